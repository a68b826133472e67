// Histogram based auto exposure
//
// Four compute passes: a per tile histogram of the scene luminance,
// a reset of the global histogram, the combine of all tiles and the
// light pre-exposure which writes average, minimum and the adaption
// state into a small buffer read by the next forward pass.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::Result;

use std::path::PathBuf;

pub const HISTOGRAM_BIN_COUNT: u32 = 128;
pub const HISTOGRAM_TILE_SIZE: u32 = 32;

/// hard coded log2 luminance range of the histogram, encoded as
/// integer specialisation constants
pub const HISTOGRAM_MIN_LOG_LUM: i32 = -10;
pub const HISTOGRAM_MAX_LOG_LUM: i32 = 16;

// specialisation constant ids shared with the histogram shaders
const SPEC_MIN_LUM: u32 = 0;
const SPEC_MAX_LUM: u32 = 1;
const SPEC_BIN_COUNT: u32 = 2;
const SPEC_MAX_TILES: u32 = 3;

#[derive(Copy, Clone)]
pub struct HistogramSettings {
    pub max_tile_count: u32,
}

pub fn histogram_settings_for_resolution(width: u32, height: u32) -> HistogramSettings {
    let tiles_x = (width + HISTOGRAM_TILE_SIZE - 1) / HISTOGRAM_TILE_SIZE;
    let tiles_y = (height + HISTOGRAM_TILE_SIZE - 1) / HISTOGRAM_TILE_SIZE;
    HistogramSettings {
        max_tile_count: tiles_x * tiles_y,
    }
}

pub struct Exposure {
    histogram_per_tile_pass: PassHandle,
    histogram_reset_pass: PassHandle,
    histogram_combine_pass: PassHandle,
    pre_expose_lights_pass: PassHandle,

    histogram_per_tile_buffer: StorageBufferHandle,
    histogram_buffer: StorageBufferHandle,
    /// previous exposure plus the pre-exposed light values,
    /// read by the forward pass
    pub light_buffer: StorageBufferHandle,

    max_tile_count: u32,
}

impl Exposure {
    fn shader_description(path: &str, settings: &HistogramSettings) -> ShaderDescription {
        let mut desc = ShaderDescription::new(PathBuf::from(path));
        let constants = &mut desc.specialisation_constants;
        constants.push(SPEC_MIN_LUM, HISTOGRAM_MIN_LOG_LUM);
        constants.push(SPEC_MAX_LUM, HISTOGRAM_MAX_LOG_LUM);
        constants.push(SPEC_BIN_COUNT, HISTOGRAM_BIN_COUNT as i32);
        constants.push(SPEC_MAX_TILES, settings.max_tile_count as i32);
        desc
    }

    pub fn new(backend: &mut RenderBackend, width: u32, height: u32) -> Result<Self> {
        let settings = histogram_settings_for_resolution(width, height);

        let histogram_per_tile_buffer = backend.create_storage_buffer(&BufferDescription {
            size: (settings.max_tile_count * HISTOGRAM_BIN_COUNT * 4) as u64,
            initial_data: Vec::new(),
        })?;
        let histogram_buffer = backend.create_storage_buffer(&BufferDescription {
            size: (HISTOGRAM_BIN_COUNT * 4) as u64,
            initial_data: Vec::new(),
        })?;
        // average, minimum and adaption state as raw bits, followed
        // by the previous exposure and the pre-exposed light values
        let light_buffer = backend.create_storage_buffer(&BufferDescription {
            size: 6 * 4,
            initial_data: vec![0u8; 24],
        })?;

        let create = |backend: &mut RenderBackend, name: &str, path: &str| {
            backend.create_compute_pass(&ComputePassDescription {
                name: String::from(name),
                shader_description: Self::shader_description(path, &settings),
            })
        };

        Ok(Self {
            histogram_per_tile_pass: create(backend, "Histogram Per Tile", "histogramPerTile.comp")?,
            histogram_reset_pass: create(backend, "Histogram Reset", "histogramReset.comp")?,
            histogram_combine_pass: create(backend, "Histogram Combine", "histogramCombine.comp")?,
            pre_expose_lights_pass: create(backend, "Pre Expose Lights", "preExposeLights.comp")?,
            histogram_per_tile_buffer: histogram_per_tile_buffer,
            histogram_buffer: histogram_buffer,
            light_buffer: light_buffer,
            max_tile_count: settings.max_tile_count,
        })
    }

    /// The tile buffer scales with resolution and the tile count is
    /// baked into the shaders, so a resize recreates the passes.
    pub fn resize(&mut self, backend: &mut RenderBackend, width: u32, height: u32) -> Result<()> {
        let settings = histogram_settings_for_resolution(width, height);
        if settings.max_tile_count == self.max_tile_count {
            return Ok(());
        }
        self.max_tile_count = settings.max_tile_count;

        backend.update_compute_pass_shader_description(
            self.histogram_per_tile_pass,
            Self::shader_description("histogramPerTile.comp", &settings),
        )?;
        backend.update_compute_pass_shader_description(
            self.histogram_combine_pass,
            Self::shader_description("histogramCombine.comp", &settings),
        )?;
        Ok(())
    }

    /// Issue the exposure chain over the lit color buffer.
    /// Returns the final pass writing the light buffer.
    pub fn compute_exposure(
        &self,
        backend: &mut RenderBackend,
        color: ImageHandle,
        sampler: SamplerHandle,
        parent: PassHandle,
        width: u32,
        height: u32,
    ) -> PassHandle {
        let tiles_x = (width + HISTOGRAM_TILE_SIZE - 1) / HISTOGRAM_TILE_SIZE;
        let tiles_y = (height + HISTOGRAM_TILE_SIZE - 1) / HISTOGRAM_TILE_SIZE;

        // per tile histogram of the lit scene
        let mut per_tile = PassExecution::new(self.histogram_per_tile_pass);
        per_tile.resources.sampled_images = vec![ImageResource::new(color, 0, 0)];
        per_tile.resources.samplers = vec![SamplerResource::new(sampler, 1)];
        per_tile.resources.storage_buffers = vec![
            StorageBufferResource::new(self.histogram_per_tile_buffer, false, 2),
            StorageBufferResource::new(self.light_buffer, true, 3),
        ];
        per_tile.parents = vec![parent];
        per_tile.dispatch_count = [tiles_x, tiles_y, 1];
        backend.set_pass_execution(per_tile);

        // clear the global histogram while the tiles are computed
        let mut reset = PassExecution::new(self.histogram_reset_pass);
        reset.resources.storage_buffers =
            vec![StorageBufferResource::new(self.histogram_buffer, false, 0)];
        reset.dispatch_count = [(HISTOGRAM_BIN_COUNT + 63) / 64, 1, 1];
        backend.set_pass_execution(reset);

        // combine all tiles into the global histogram
        let mut combine = PassExecution::new(self.histogram_combine_pass);
        combine.resources.storage_buffers = vec![
            StorageBufferResource::new(self.histogram_per_tile_buffer, true, 0),
            StorageBufferResource::new(self.histogram_buffer, false, 1),
        ];
        combine.parents = vec![self.histogram_per_tile_pass, self.histogram_reset_pass];
        combine.dispatch_count = [HISTOGRAM_BIN_COUNT, 1, 1];
        backend.set_pass_execution(combine);

        // derive exposure and pre-expose the lights
        let mut pre_expose = PassExecution::new(self.pre_expose_lights_pass);
        pre_expose.resources.storage_buffers = vec![
            StorageBufferResource::new(self.histogram_buffer, true, 0),
            StorageBufferResource::new(self.light_buffer, false, 1),
        ];
        pre_expose.parents = vec![self.histogram_combine_pass];
        pre_expose.dispatch_count = [1, 1, 1];
        backend.set_pass_execution(pre_expose);

        self.pre_expose_lights_pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_count_covers_resolution() {
        let settings = histogram_settings_for_resolution(1920, 1080);
        assert_eq!(settings.max_tile_count, 60 * 34);

        // partial tiles still count
        let settings = histogram_settings_for_resolution(33, 33);
        assert_eq!(settings.max_tile_count, 4);
    }
}
