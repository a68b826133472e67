// Temporal anti aliasing
//
// The camera jitters through an 8 sample Halton pattern; the
// supersampling pass accumulates the jittered frames against the
// reprojected history with motion vector dilation and YCoCg
// clipping, the filter pass resolves with nine bicubic weights
// fitted to a 3x3 Blackman-Harris kernel around the current jitter.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::Result;
use cgmath::{Matrix4, Vector2};

use std::path::PathBuf;

/// How the temporal filter samples its history
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HistorySamplingTech {
    Bilinear = 0,
    Bicubic16Tap = 1,
    Bicubic9Tap = 2,
    Bicubic5Tap = 3,
    Bicubic1Tap = 4,
}

#[derive(Copy, Clone, PartialEq)]
pub struct TaaSettings {
    pub enabled: bool,
    pub use_clipping: bool,
    pub use_variance_clipping: bool,
    pub use_ycocg: bool,
    pub use_motion_vector_dilation: bool,
    pub history_sampling_tech: HistorySamplingTech,
    pub supersample_use_tonemapping: bool,
    pub filter_use_tonemapping: bool,
    pub use_mip_bias: bool,
    pub texture_lod_bias: f32,
}

impl Default for TaaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            use_clipping: true,
            use_variance_clipping: true,
            use_ycocg: true,
            use_motion_vector_dilation: true,
            history_sampling_tech: HistorySamplingTech::Bicubic1Tap,
            supersample_use_tonemapping: true,
            filter_use_tonemapping: true,
            use_mip_bias: true,
            texture_lod_bias: -0.75,
        }
    }
}

/// number of jitter positions before the pattern repeats
pub const JITTER_SAMPLE_COUNT: u32 = 8;

fn halton(index: u32, base: u32) -> f32 {
    let mut f = 1.0f32;
    let mut r = 0.0f32;
    let mut i = index + 1;
    while i > 0 {
        f /= base as f32;
        r += f * (i % base) as f32;
        i /= base;
    }
    r
}

/// Jitter in pixels, centered around zero, cycling every
/// JITTER_SAMPLE_COUNT frames. Multiply by the texel size before
/// applying to a projection matrix.
pub fn compute_projection_matrix_jitter(frame_index: u32) -> Vector2<f32> {
    let sample = frame_index % JITTER_SAMPLE_COUNT;
    Vector2::new(halton(sample, 2) - 0.5, halton(sample, 3) - 0.5)
}

/// Apply a clip space jitter offset to a projection matrix.
/// The offset must already be scaled by the pixel size.
pub fn apply_projection_matrix_jitter(
    projection: &Matrix4<f32>,
    offset: Vector2<f32>,
) -> Matrix4<f32> {
    let mut jittered = *projection;
    jittered.z.x += offset.x;
    jittered.z.y += offset.y;
    jittered
}

/// Window over [-1, 1] with its peak at zero
fn blackman_harris(x: f32) -> f32 {
    let n = (x * 0.5 + 0.5).max(0.0).min(1.0);
    let a0 = 0.35875;
    let a1 = 0.48829;
    let a2 = 0.14128;
    let a3 = 0.01168;
    let t = std::f32::consts::PI * n;
    a0 - a1 * (2.0 * t).cos() + a2 * (4.0 * t).cos() - a3 * (6.0 * t).cos()
}

/// Nine weights of the 3x3 resolve neighbourhood, recomputed from
/// the sub-pixel jitter every frame and normalized to sum one.
pub fn compute_taa_resolve_weights(jitter_in_pixels: Vector2<f32>) -> [f32; 9] {
    let mut weights = [0.0f32; 9];
    let mut total = 0.0f32;
    for y in 0..3 {
        for x in 0..3 {
            let tap = Vector2::new(x as f32 - 1.0, y as f32 - 1.0);
            let distance = {
                let d = tap - jitter_in_pixels;
                (d.x * d.x + d.y * d.y).sqrt()
            };
            // taps two or more pixels from the sample contribute
            // nothing, the window spans [-2, 2] pixels
            let weight = blackman_harris((distance * 0.5).min(1.0));
            weights[y * 3 + x] = weight;
            total += weight;
        }
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
    weights
}

/// gpu layout of the resolve weight buffer, padded to vec4 rules
#[repr(C)]
#[derive(Copy, Clone)]
struct TaaResolveWeights {
    weights: [[f32; 4]; 9],
}

pub struct Taa {
    supersample_pass: PassHandle,
    filter_pass: PassHandle,

    /// ping ponged history targets
    pub history_buffers: [ImageHandle; 2],
    resolve_weight_buffer: UniformBufferHandle,

    settings: TaaSettings,
}

// specialisation constant ids shared with taa shaders
const SPEC_CLIPPING: u32 = 0;
const SPEC_VARIANCE_CLIPPING: u32 = 1;
const SPEC_YCOCG: u32 = 2;
const SPEC_DILATION: u32 = 3;
const SPEC_TONEMAP: u32 = 4;
const SPEC_HISTORY_TECH: u32 = 5;

impl Taa {
    fn supersample_shader_description(settings: &TaaSettings) -> ShaderDescription {
        let mut desc = ShaderDescription::new(PathBuf::from("taaSupersample.comp"));
        let constants = &mut desc.specialisation_constants;
        constants.push(SPEC_CLIPPING, settings.use_clipping as i32);
        constants.push(SPEC_VARIANCE_CLIPPING, settings.use_variance_clipping as i32);
        constants.push(SPEC_YCOCG, settings.use_ycocg as i32);
        constants.push(SPEC_DILATION, settings.use_motion_vector_dilation as i32);
        constants.push(SPEC_TONEMAP, settings.supersample_use_tonemapping as i32);
        desc
    }

    fn filter_shader_description(settings: &TaaSettings) -> ShaderDescription {
        let mut desc = ShaderDescription::new(PathBuf::from("taaFilter.comp"));
        let constants = &mut desc.specialisation_constants;
        constants.push(SPEC_TONEMAP, settings.filter_use_tonemapping as i32);
        constants.push(SPEC_HISTORY_TECH, settings.history_sampling_tech as i32);
        desc
    }

    pub fn new(backend: &mut RenderBackend, width: u32, height: u32) -> Result<Self> {
        let settings = TaaSettings::default();

        let history_desc = ImageDescription {
            width: width,
            height: height,
            format: ImageFormat::RGBA16Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        };
        let history_buffers = [
            backend.create_image(&history_desc)?,
            backend.create_image(&history_desc)?,
        ];

        let resolve_weight_buffer = backend.create_uniform_buffer(&BufferDescription {
            size: std::mem::size_of::<TaaResolveWeights>() as u64,
            initial_data: Vec::new(),
        })?;

        let supersample_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("TAA Supersample"),
            shader_description: Self::supersample_shader_description(&settings),
        })?;
        let filter_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("TAA Filter"),
            shader_description: Self::filter_shader_description(&settings),
        })?;

        Ok(Self {
            supersample_pass: supersample_pass,
            filter_pass: filter_pass,
            history_buffers: history_buffers,
            resolve_weight_buffer: resolve_weight_buffer,
            settings: settings,
        })
    }

    pub fn settings(&self) -> &TaaSettings {
        &self.settings
    }

    pub fn mip_bias(&self) -> f32 {
        if self.settings.use_mip_bias {
            self.settings.texture_lod_bias
        } else {
            0.0
        }
    }

    /// Settings changes re-specialise the shaders
    pub fn update_settings(
        &mut self,
        backend: &mut RenderBackend,
        settings: &TaaSettings,
    ) -> Result<()> {
        if *settings == self.settings {
            return Ok(());
        }
        self.settings = *settings;
        backend.update_compute_pass_shader_description(
            self.supersample_pass,
            Self::supersample_shader_description(&self.settings),
        )?;
        backend.update_compute_pass_shader_description(
            self.filter_pass,
            Self::filter_shader_description(&self.settings),
        )
    }

    pub fn resize(&mut self, backend: &mut RenderBackend, width: u32, height: u32) -> Result<()> {
        backend.resize_images(&self.history_buffers, width, height)
    }

    /// Upload the per frame resolve weights
    pub fn update_resolve_weights(
        &self,
        backend: &mut RenderBackend,
        jitter_in_pixels: Vector2<f32>,
    ) {
        let weights = compute_taa_resolve_weights(jitter_in_pixels);
        let mut padded = TaaResolveWeights {
            weights: [[0.0; 4]; 9],
        };
        for (i, w) in weights.iter().enumerate() {
            padded.weights[i][0] = *w;
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &padded as *const TaaResolveWeights as *const u8,
                std::mem::size_of::<TaaResolveWeights>(),
            )
        };
        backend.fill_uniform_buffer(self.resolve_weight_buffer, bytes);
    }

    /// Accumulate the current frame against the previous one.
    /// Returns the pass to parent against.
    pub fn compute_temporal_supersampling(
        &self,
        backend: &mut RenderBackend,
        current_color: ImageHandle,
        previous_color: ImageHandle,
        motion: ImageHandle,
        depth: ImageHandle,
        target: ImageHandle,
        default_sampler: SamplerHandle,
        parents: &[PassHandle],
        dispatch: [u32; 3],
    ) -> PassHandle {
        let mut execution = PassExecution::new(self.supersample_pass);
        execution.resources.sampled_images = vec![
            ImageResource::new(current_color, 0, 1),
            ImageResource::new(previous_color, 0, 2),
            ImageResource::new(motion, 0, 3),
            ImageResource::new(depth, 0, 4),
        ];
        execution.resources.storage_images = vec![ImageResource::new(target, 0, 0)];
        execution.resources.samplers = vec![SamplerResource::new(default_sampler, 5)];
        execution.parents = parents.to_vec();
        execution.dispatch_count = dispatch;
        backend.set_pass_execution(execution);
        self.supersample_pass
    }

    /// Temporal resolve into the next history buffer and the
    /// output image the rest of the frame consumes.
    pub fn compute_temporal_filter(
        &self,
        backend: &mut RenderBackend,
        color_src: ImageHandle,
        history_in: ImageHandle,
        history_out: ImageHandle,
        resolved_out: ImageHandle,
        motion: ImageHandle,
        default_sampler: SamplerHandle,
        parent: PassHandle,
        dispatch: [u32; 3],
    ) -> PassHandle {
        let mut execution = PassExecution::new(self.filter_pass);
        execution.resources.sampled_images = vec![
            ImageResource::new(color_src, 0, 1),
            ImageResource::new(history_in, 0, 2),
            ImageResource::new(motion, 0, 3),
        ];
        execution.resources.storage_images = vec![
            ImageResource::new(history_out, 0, 0),
            ImageResource::new(resolved_out, 0, 6),
        ];
        execution.resources.samplers = vec![SamplerResource::new(default_sampler, 4)];
        execution.resources.uniform_buffers =
            vec![UniformBufferResource::new(self.resolve_weight_buffer, 5)];
        execution.parents = vec![parent];
        execution.dispatch_count = dispatch;
        backend.set_pass_execution(execution);
        self.filter_pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;

    #[test]
    fn zero_jitter_leaves_projection_untouched() {
        let projection = Matrix4::identity();
        let jittered = apply_projection_matrix_jitter(&projection, Vector2::new(0.0, 0.0));
        assert_eq!(jittered, projection);
    }

    #[test]
    fn jitter_cycle_repeats_every_eight_frames() {
        for frame in 0..JITTER_SAMPLE_COUNT {
            let a = compute_projection_matrix_jitter(frame);
            let b = compute_projection_matrix_jitter(frame + JITTER_SAMPLE_COUNT);
            let c = compute_projection_matrix_jitter(frame + 2 * JITTER_SAMPLE_COUNT);
            assert_eq!(a, b);
            assert_eq!(a, c);
        }
        // and the samples within a cycle differ
        let first = compute_projection_matrix_jitter(0);
        let second = compute_projection_matrix_jitter(1);
        assert_ne!(first, second);
    }

    #[test]
    fn jitter_stays_within_half_pixel() {
        for frame in 0..JITTER_SAMPLE_COUNT {
            let jitter = compute_projection_matrix_jitter(frame);
            assert!(jitter.x.abs() <= 0.5);
            assert!(jitter.y.abs() <= 0.5);
        }
    }

    #[test]
    fn resolve_weights_normalize_and_center_peaks() {
        let weights = compute_taa_resolve_weights(Vector2::new(0.0, 0.0));
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        // the center tap dominates for a centered sample
        for (i, w) in weights.iter().enumerate() {
            if i != 4 {
                assert!(weights[4] >= *w);
            }
        }

        // an offset sample shifts the peak towards its corner
        let weights = compute_taa_resolve_weights(Vector2::new(0.5, 0.5));
        assert!(weights[8] > weights[0]);
    }
}
