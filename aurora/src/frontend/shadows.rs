// Cascaded sun shadows
//
// A compute pass reads the lowest depth pyramid mip and fits the
// cascade split planes and one light view-projection per cascade,
// written into a storage buffer. Each cascade then renders the
// casters depth-only; the CPU only culls coarsely against the
// camera frustum fitted to the light with a far pulled-back near
// plane, the tight per-cascade fit happens on the GPU.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::Result;

use std::path::PathBuf;

pub const SHADOW_CASCADE_COUNT: u32 = 4;
pub const SHADOW_MAP_RESOLUTION: u32 = 2048;

/// casters this far towards the sun are kept during culling
pub const SHADOW_NEAR_PLANE_EXTENSION: f32 = 10000.0;

// specialisation constant id selecting the cascade in shadow.vert
const SPEC_CASCADE_INDEX: u32 = 0;

/// gpu layout: one view projection per cascade plus the split
/// depths, padded to vec4
#[repr(C)]
pub struct SunShadowInfo {
    pub light_matrices: [[[f32; 4]; 4]; SHADOW_CASCADE_COUNT as usize],
    pub cascade_splits: [f32; 4],
}

pub struct SunShadows {
    light_matrix_pass: PassHandle,
    cascade_passes: Vec<PassHandle>,
    pub shadow_maps: Vec<ImageHandle>,
    pub sun_shadow_info_buffer: StorageBufferHandle,
}

impl SunShadows {
    pub fn new(backend: &mut RenderBackend) -> Result<Self> {
        let mut shadow_maps = Vec::new();
        for _ in 0..SHADOW_CASCADE_COUNT {
            shadow_maps.push(backend.create_image(&ImageDescription {
                width: SHADOW_MAP_RESOLUTION,
                height: SHADOW_MAP_RESOLUTION,
                format: ImageFormat::Depth16,
                usage: ImageUsage::ATTACHMENT | ImageUsage::SAMPLED,
                ..Default::default()
            })?);
        }

        let sun_shadow_info_buffer = backend.create_storage_buffer(&BufferDescription {
            size: std::mem::size_of::<SunShadowInfo>() as u64,
            initial_data: Vec::new(),
        })?;

        let light_matrix_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Light Matrices"),
            shader_description: ShaderDescription::new(PathBuf::from("lightMatrix.comp")),
        })?;

        let mut cascade_passes = Vec::new();
        for cascade in 0..SHADOW_CASCADE_COUNT {
            let mut vertex_shader = ShaderDescription::new(PathBuf::from("shadow.vert"));
            vertex_shader
                .specialisation_constants
                .push(SPEC_CASCADE_INDEX, cascade as i32);

            cascade_passes.push(backend.create_graphic_pass(&GraphicPassDescription {
                name: format!("Shadow Cascade {}", cascade),
                shader_descriptions: GraphicPassShaderDescriptions::new(
                    vertex_shader,
                    ShaderDescription::new(PathBuf::from("shadow.frag")),
                ),
                attachments: vec![Attachment::new(
                    shadow_maps[cascade as usize],
                    0,
                    AttachmentLoadOp::Clear,
                )],
                patch_control_points: 0,
                rasterization: RasterizationConfig {
                    mode: RasterizationMode::Fill,
                    cull_mode: CullMode::Front,
                    // keep casters in front of the light near plane
                    clamp_depth: true,
                },
                blending: BlendState::None,
                depth_test: DepthTest {
                    function: DepthFunction::LessEqual,
                    write: true,
                },
            })?);
        }

        Ok(Self {
            light_matrix_pass: light_matrix_pass,
            cascade_passes: cascade_passes,
            shadow_maps: shadow_maps,
            sun_shadow_info_buffer: sun_shadow_info_buffer,
        })
    }

    pub fn cascade_passes(&self) -> &[PassHandle] {
        &self.cascade_passes
    }

    /// Fit the cascades to the visible depth range
    pub fn compute_light_matrices(
        &self,
        backend: &mut RenderBackend,
        depth_pyramid: ImageHandle,
        lowest_pyramid_mip: u32,
        texel_sampler: SamplerHandle,
        parent: PassHandle,
    ) -> PassHandle {
        let mut execution = PassExecution::new(self.light_matrix_pass);
        execution.resources.sampled_images =
            vec![ImageResource::new(depth_pyramid, lowest_pyramid_mip, 0)];
        execution.resources.samplers = vec![SamplerResource::new(texel_sampler, 1)];
        execution.resources.storage_buffers =
            vec![StorageBufferResource::new(self.sun_shadow_info_buffer, false, 2)];
        execution.parents = vec![parent];
        execution.dispatch_count = [1, 1, 1];
        backend.set_pass_execution(execution);
        self.light_matrix_pass
    }

    /// Issue the cascade executions; the caller enqueues the caster
    /// draws separately. Returns the cascade passes for parenting.
    pub fn issue_cascade_executions(&self, backend: &mut RenderBackend) {
        for &pass in self.cascade_passes.iter() {
            let mut execution = PassExecution::new(pass);
            execution.resources.storage_buffers =
                vec![StorageBufferResource::new(self.sun_shadow_info_buffer, true, 0)];
            execution.parents = vec![self.light_matrix_pass];
            backend.set_pass_execution(execution);
        }
    }
}
