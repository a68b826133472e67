// Bloom
//
// Downscale and blur the scene color in a separate mip chained
// texture, then walk the chain back up and additively blend the
// result on top of the target image.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::math;
use crate::Result;

use std::path::PathBuf;

/// depth of the down/upsample chain
pub const BLOOM_MIP_COUNT: u32 = 6;

#[derive(Copy, Clone, PartialEq)]
pub struct BloomSettings {
    pub enabled: bool,
    pub strength: f32,
    pub radius: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 0.05,
            radius: 1.5,
        }
    }
}

pub struct Bloom {
    downsample_passes: Vec<PassHandle>,
    upsample_passes: Vec<PassHandle>,
    apply_pass: PassHandle,

    downscale_texture: ImageHandle,
    upscale_texture: ImageHandle,
}

impl Bloom {
    fn texture_description(width: u32, height: u32) -> ImageDescription {
        ImageDescription {
            width: width,
            height: height,
            format: ImageFormat::R11G11B10Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            mip_count: MipCount::Manual(BLOOM_MIP_COUNT),
            ..Default::default()
        }
    }

    pub fn new(backend: &mut RenderBackend, width: u32, height: u32) -> Result<Self> {
        let downscale_texture = backend.create_image(&Self::texture_description(width, height))?;
        let upscale_texture = backend.create_image(&Self::texture_description(width, height))?;

        let mut downsample_passes = Vec::new();
        let mut upsample_passes = Vec::new();
        for mip in 0..BLOOM_MIP_COUNT {
            downsample_passes.push(backend.create_compute_pass(&ComputePassDescription {
                name: format!("Bloom Downsample {}", mip),
                shader_description: ShaderDescription::new(PathBuf::from("bloomDownsample.comp")),
            })?);
            if mip < BLOOM_MIP_COUNT - 1 {
                upsample_passes.push(backend.create_compute_pass(&ComputePassDescription {
                    name: format!("Bloom Upsample {}", mip),
                    shader_description: ShaderDescription::new(PathBuf::from("bloomUpsample.comp")),
                })?);
            }
        }
        let apply_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Apply Bloom"),
            shader_description: ShaderDescription::new(PathBuf::from("bloomApply.comp")),
        })?;

        Ok(Self {
            downsample_passes: downsample_passes,
            upsample_passes: upsample_passes,
            apply_pass: apply_pass,
            downscale_texture: downscale_texture,
            upscale_texture: upscale_texture,
        })
    }

    pub fn resize(&mut self, backend: &mut RenderBackend, width: u32, height: u32) -> Result<()> {
        backend.resize_images(&[self.downscale_texture, self.upscale_texture], width, height)
    }

    fn mip_dispatch(width: u32, height: u32, mip: u32) -> [u32; 3] {
        let w = (width >> mip).max(1);
        let h = (height >> mip).max(1);
        [(w + 7) / 8, (h + 7) / 8, 1]
    }

    /// Issue the bloom chain over `target`. Returns the pass that
    /// must be used as parent when accessing the target afterwards.
    pub fn compute_bloom(
        &self,
        backend: &mut RenderBackend,
        parent: PassHandle,
        target: ImageHandle,
        sampler: SamplerHandle,
        settings: &BloomSettings,
        width: u32,
        height: u32,
    ) -> PassHandle {
        if !settings.enabled {
            return parent;
        }

        let mut push = Vec::new();
        push.extend_from_slice(&settings.strength.to_le_bytes());
        push.extend_from_slice(&settings.radius.to_le_bytes());

        // downsample: target -> mip 0, then mip n -> mip n+1
        let mut last_pass = parent;
        for mip in 0..BLOOM_MIP_COUNT {
            let mut execution = PassExecution::new(self.downsample_passes[mip as usize]);
            let source = if mip == 0 {
                ImageResource::new(target, 0, 1)
            } else {
                ImageResource::new(self.downscale_texture, mip - 1, 1)
            };
            execution.resources.sampled_images = vec![source];
            execution.resources.storage_images =
                vec![ImageResource::new(self.downscale_texture, mip, 0)];
            execution.resources.samplers = vec![SamplerResource::new(sampler, 2)];
            execution.parents = vec![last_pass];
            execution.dispatch_count = Self::mip_dispatch(width, height, mip);
            execution.push_constants = push.clone();
            last_pass = self.downsample_passes[mip as usize];
            backend.set_pass_execution(execution);
        }

        // upsample: combine the next lower mip into the current one
        for mip in (0..BLOOM_MIP_COUNT - 1).rev() {
            let mut execution = PassExecution::new(self.upsample_passes[mip as usize]);
            let source = if mip == BLOOM_MIP_COUNT - 2 {
                ImageResource::new(self.downscale_texture, mip + 1, 1)
            } else {
                ImageResource::new(self.upscale_texture, mip + 1, 1)
            };
            execution.resources.sampled_images = vec![
                source,
                ImageResource::new(self.downscale_texture, mip, 3),
            ];
            execution.resources.storage_images =
                vec![ImageResource::new(self.upscale_texture, mip, 0)];
            execution.resources.samplers = vec![SamplerResource::new(sampler, 2)];
            execution.parents = vec![last_pass];
            execution.dispatch_count = Self::mip_dispatch(width, height, mip);
            execution.push_constants = push.clone();
            last_pass = self.upsample_passes[mip as usize];
            backend.set_pass_execution(execution);
        }

        // additively blend the top of the upscale chain onto the
        // target
        let mut execution = PassExecution::new(self.apply_pass);
        execution.resources.sampled_images = vec![ImageResource::new(self.upscale_texture, 0, 1)];
        execution.resources.storage_images = vec![ImageResource::new(target, 0, 0)];
        execution.resources.samplers = vec![SamplerResource::new(sampler, 2)];
        execution.parents = vec![last_pass];
        execution.dispatch_count = [(width + 7) / 8, (height + 7) / 8, 1];
        execution.push_constants = push;
        backend.set_pass_execution(execution);

        self.apply_pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_counts_shrink_with_mips() {
        assert_eq!(Bloom::mip_dispatch(1920, 1080, 0), [240, 135, 1]);
        assert_eq!(Bloom::mip_dispatch(1920, 1080, 1), [120, 68, 1]);
        // never reaches zero
        let tiny = Bloom::mip_dispatch(4, 4, 5);
        assert!(tiny[0] >= 1 && tiny[1] >= 1);
    }

    #[test]
    fn mip_count_matches_chain() {
        let desc = Bloom::texture_description(1920, 1080);
        assert_eq!(
            crate::image::mip_count_from_description(&desc),
            BLOOM_MIP_COUNT
        );
        let _ = math::mip_count_from_resolution(1920, 1080, 1);
    }
}
