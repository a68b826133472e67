// Hierarchical min/max depth pyramid
//
// A single compute dispatch builds the whole pyramid: workgroups
// reduce their tile through shared memory and the last workgroup,
// elected through a global atomic counter, finishes the top of the
// chain. Dispatch counts and the mip count are baked in as
// specialisation constants, so a resize recreates the pass.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::math;
use crate::Result;

use std::path::PathBuf;

/// most mips a single dispatch can produce
pub const DEPTH_PYRAMID_MAX_MIP_COUNT: u32 = 11;

const GROUP_SIZE: u32 = 8;

// specialisation constant ids shared with depthPyramid.comp
const SPEC_MIP_COUNT: u32 = 0;
const SPEC_DISPATCH_X: u32 = 1;
const SPEC_DISPATCH_Y: u32 = 2;

/// the pyramid base is half the screen size
pub fn depth_pyramid_resolution(width: u32, height: u32) -> (u32, u32) {
    ((width / 2).max(1), (height / 2).max(1))
}

pub fn depth_pyramid_mip_count(width: u32, height: u32) -> u32 {
    let (base_width, base_height) = depth_pyramid_resolution(width, height);
    math::mip_count_from_resolution(base_width, base_height, 1).min(DEPTH_PYRAMID_MAX_MIP_COUNT)
}

pub fn depth_pyramid_dispatch_count(width: u32, height: u32) -> [u32; 3] {
    let (base_width, base_height) = depth_pyramid_resolution(width, height);
    [
        (base_width + GROUP_SIZE * 2 - 1) / (GROUP_SIZE * 2),
        (base_height + GROUP_SIZE * 2 - 1) / (GROUP_SIZE * 2),
        1,
    ]
}

pub struct DepthPyramid {
    pass: PassHandle,
    pub pyramid: ImageHandle,
    /// global atomic counter for the inter workgroup handoff
    sync_buffer: StorageBufferHandle,
    mip_count: u32,
}

impl DepthPyramid {
    fn image_description(width: u32, height: u32) -> ImageDescription {
        let (base_width, base_height) = depth_pyramid_resolution(width, height);
        ImageDescription {
            width: base_width,
            height: base_height,
            format: ImageFormat::RG32Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            mip_count: MipCount::Manual(depth_pyramid_mip_count(width, height)),
            ..Default::default()
        }
    }

    fn shader_description(width: u32, height: u32) -> ShaderDescription {
        let dispatch = depth_pyramid_dispatch_count(width, height);
        let mut desc = ShaderDescription::new(PathBuf::from("depthPyramid.comp"));
        let constants = &mut desc.specialisation_constants;
        constants.push(SPEC_MIP_COUNT, depth_pyramid_mip_count(width, height) as i32);
        constants.push(SPEC_DISPATCH_X, dispatch[0] as i32);
        constants.push(SPEC_DISPATCH_Y, dispatch[1] as i32);
        desc
    }

    pub fn new(backend: &mut RenderBackend, width: u32, height: u32) -> Result<Self> {
        let pyramid = backend.create_image(&Self::image_description(width, height))?;
        let sync_buffer = backend.create_storage_buffer(&BufferDescription {
            size: 4,
            initial_data: vec![0u8; 4],
        })?;
        let pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Depth Pyramid"),
            shader_description: Self::shader_description(width, height),
        })?;

        Ok(Self {
            pass: pass,
            pyramid: pyramid,
            sync_buffer: sync_buffer,
            mip_count: depth_pyramid_mip_count(width, height),
        })
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn lowest_mip(&self) -> u32 {
        self.mip_count - 1
    }

    pub fn resize(&mut self, backend: &mut RenderBackend, width: u32, height: u32) -> Result<()> {
        // mip count and dispatch counts are specialisation
        // constants, the image resize alone is not enough
        backend.destroy_image(self.pyramid);
        self.pyramid = backend.create_image(&Self::image_description(width, height))?;
        self.mip_count = depth_pyramid_mip_count(width, height);
        backend
            .update_compute_pass_shader_description(self.pass, Self::shader_description(width, height))
    }

    /// Issue the pyramid build. Returns the pass handle for
    /// parenting.
    pub fn compute_pyramid(
        &self,
        backend: &mut RenderBackend,
        depth: ImageHandle,
        depth_sampler: SamplerHandle,
        parent: PassHandle,
        width: u32,
        height: u32,
    ) -> PassHandle {
        let mut execution = PassExecution::new(self.pass);
        execution.resources.sampled_images = vec![ImageResource::new(depth, 0, 0)];
        execution.resources.samplers = vec![SamplerResource::new(depth_sampler, 1)];
        // one storage binding per produced mip; smaller pyramids
        // repeat their lowest mip in the trailing bindings
        execution.resources.storage_images = (0..DEPTH_PYRAMID_MAX_MIP_COUNT)
            .map(|i| {
                ImageResource::new(self.pyramid, i.min(self.mip_count - 1), 2 + i)
            })
            .collect();
        execution.resources.storage_buffers =
            vec![StorageBufferResource::new(self.sync_buffer, false, 13)];
        execution.parents = vec![parent];
        execution.dispatch_count = depth_pyramid_dispatch_count(width, height);
        backend.set_pass_execution(execution);
        self.pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pyramid_is_half_screen_size() {
        assert_eq!(depth_pyramid_resolution(1280, 720), (640, 360));
        assert_eq!(depth_pyramid_resolution(801, 601), (400, 300));
    }

    #[test]
    fn mip_count_is_bounded() {
        // 640x360 base -> 1 + floor(log2(640)) = 10
        assert_eq!(depth_pyramid_mip_count(1280, 720), 10);
        assert!(depth_pyramid_mip_count(8192, 8192) <= DEPTH_PYRAMID_MAX_MIP_COUNT);
    }

    #[test]
    fn dispatch_covers_base() {
        let dispatch = depth_pyramid_dispatch_count(1280, 720);
        assert!(dispatch[0] * GROUP_SIZE * 2 >= 640);
        assert!(dispatch[1] * GROUP_SIZE * 2 >= 360);
    }
}
