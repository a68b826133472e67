// SDF traced indirect diffuse
//
// Per object signed distance fields are cone traced for one bounce
// of diffuse lighting. Culling happens in two compute stages: the
// camera frustum first, then 32x32 screen tiles against a depth
// range from the hi-z pyramid. The traced irradiance is stored as
// YCoCg with the Y component as spherical harmonics and run through
// a spatial/temporal/spatial filter chain before the forward pass
// consumes it.

use crate::backend::RenderBackend;
use crate::desc::*;
use crate::math::ViewFrustum;
use crate::Result;
use cgmath::Matrix4;

use std::path::PathBuf;

use utils::log;

/// upper bound of instances the culling buffers are sized for
pub const MAX_SDF_INSTANCES: u32 = 1024;
/// distinct sdf volume textures that can be bound at once
pub const MAX_SDF_TEXTURES: u32 = 8;
pub const SDF_TILE_SIZE: u32 = 32;
pub const MAX_SDF_INSTANCES_PER_TILE: u32 = 100;

// specialisation constant ids shared with the sdf shaders
const SPEC_HALF_RES: u32 = 0;
const SPEC_STRICT_CUTOFF: u32 = 1;
const SPEC_HI_Z_CULLING: u32 = 2;

#[derive(Copy, Clone, PartialEq)]
pub struct SdfTraceSettings {
    pub half_res_trace: bool,
    /// reject trace hits outside the influence radius; loses range
    /// but culled objects cannot produce wrong hits
    pub strict_influence_radius_cutoff: bool,
    /// radius in which objects are not culled
    pub trace_influence_radius: f32,
    /// highest sun shadow cascade used for shadowing trace hits
    pub additional_sun_shadow_map_padding: f32,
}

impl Default for SdfTraceSettings {
    fn default() -> Self {
        Self {
            half_res_trace: true,
            strict_influence_radius_cutoff: true,
            trace_influence_radius: 5.0,
            additional_sun_shadow_map_padding: 3.0,
        }
    }
}

/// gpu layout of one sdf instance
#[repr(C)]
#[derive(Copy, Clone)]
pub struct SdfInstance {
    pub local_extends: [f32; 3],
    /// selects one of the bound sdf volume textures
    pub sdf_texture_index: u32,
    pub mean_albedo: [f32; 3],
    pub padding: f32,
    pub world_to_local: [[f32; 4]; 4],
}

/// world space bounds per instance for the frustum culling pass
#[repr(C)]
#[derive(Copy, Clone)]
pub struct SdfInstanceBounds {
    pub bb_min: [f32; 4],
    pub bb_max: [f32; 4],
}

/// camera frustum handed to the culling shader
#[repr(C)]
#[derive(Copy, Clone)]
struct FrustumGpu {
    points: [[f32; 4]; 8],
    normals: [[f32; 4]; 6],
}

/// Everything the trace consumes from the rest of the frame
pub struct SdfTraceDependencies {
    pub depth: ImageHandle,
    pub motion: ImageHandle,
    pub previous_motion: ImageHandle,
    pub depth_pyramid: ImageHandle,
    pub depth_pyramid_mip_count: u32,
    pub shadow_map: ImageHandle,
    pub light_buffer: StorageBufferHandle,
    pub sun_shadow_info_buffer: StorageBufferHandle,
    pub parents: Vec<PassHandle>,
}

pub struct SdfGi {
    camera_frustum_culling_pass: PassHandle,
    camera_tile_culling_pass: PassHandle,
    diffuse_trace_pass: PassHandle,
    filter_spatial_passes: [PassHandle; 2],
    filter_temporal_pass: PassHandle,
    upscale_pass: PassHandle,

    // ping pong pairs for the filter chain
    indirect_y_sh: [ImageHandle; 2],
    indirect_co_cg: [ImageHandle; 2],
    history_y_sh: [ImageHandle; 2],
    history_co_cg: [ImageHandle; 2],
    full_res_y_sh: ImageHandle,
    full_res_co_cg: ImageHandle,

    instance_buffer: StorageBufferHandle,
    instance_bounds_buffer: StorageBufferHandle,
    culled_instances_buffer: StorageBufferHandle,
    culled_tiles_buffer: StorageBufferHandle,
    camera_frustum_buffer: UniformBufferHandle,

    sdf_textures: Vec<ImageHandle>,
    /// 1x1x1 fallback bound to unused volume slots
    default_sdf_texture: ImageHandle,
    instance_count: u32,
    settings: SdfTraceSettings,
}

fn trace_resolution(width: u32, height: u32, settings: &SdfTraceSettings) -> (u32, u32) {
    if settings.half_res_trace {
        ((width / 2).max(1), (height / 2).max(1))
    } else {
        (width, height)
    }
}

fn tile_counts(width: u32, height: u32) -> (u32, u32) {
    (
        (width + SDF_TILE_SIZE - 1) / SDF_TILE_SIZE,
        (height + SDF_TILE_SIZE - 1) / SDF_TILE_SIZE,
    )
}

impl SdfGi {
    fn trace_shader_description(settings: &SdfTraceSettings) -> ShaderDescription {
        let mut desc = ShaderDescription::new(PathBuf::from("sdfDiffuseTrace.comp"));
        let constants = &mut desc.specialisation_constants;
        constants.push(SPEC_HALF_RES, settings.half_res_trace as i32);
        constants.push(SPEC_STRICT_CUTOFF, settings.strict_influence_radius_cutoff as i32);
        desc
    }

    fn tile_culling_shader_description() -> ShaderDescription {
        let mut desc = ShaderDescription::new(PathBuf::from("sdfCameraTileCulling.comp"));
        desc.specialisation_constants.push(SPEC_HI_Z_CULLING, 1);
        desc
    }

    fn trace_target_descriptions(
        width: u32,
        height: u32,
        settings: &SdfTraceSettings,
    ) -> (ImageDescription, ImageDescription) {
        let (w, h) = trace_resolution(width, height, settings);
        let y_sh = ImageDescription {
            width: w,
            height: h,
            format: ImageFormat::RGBA16Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        };
        let co_cg = ImageDescription {
            width: w,
            height: h,
            format: ImageFormat::RG16Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        };
        (y_sh, co_cg)
    }

    pub fn new(backend: &mut RenderBackend, width: u32, height: u32) -> Result<Self> {
        let settings = SdfTraceSettings::default();
        let (y_sh_desc, co_cg_desc) = Self::trace_target_descriptions(width, height, &settings);

        let indirect_y_sh = [
            backend.create_image(&y_sh_desc)?,
            backend.create_image(&y_sh_desc)?,
        ];
        let indirect_co_cg = [
            backend.create_image(&co_cg_desc)?,
            backend.create_image(&co_cg_desc)?,
        ];
        let history_y_sh = [
            backend.create_image(&y_sh_desc)?,
            backend.create_image(&y_sh_desc)?,
        ];
        let history_co_cg = [
            backend.create_image(&co_cg_desc)?,
            backend.create_image(&co_cg_desc)?,
        ];

        let mut full_res_y_sh_desc = y_sh_desc.clone();
        full_res_y_sh_desc.width = width;
        full_res_y_sh_desc.height = height;
        let mut full_res_co_cg_desc = co_cg_desc.clone();
        full_res_co_cg_desc.width = width;
        full_res_co_cg_desc.height = height;
        let full_res_y_sh = backend.create_image(&full_res_y_sh_desc)?;
        let full_res_co_cg = backend.create_image(&full_res_co_cg_desc)?;

        let instance_buffer = backend.create_storage_buffer(&BufferDescription {
            size: (MAX_SDF_INSTANCES as usize * std::mem::size_of::<SdfInstance>()) as u64,
            initial_data: Vec::new(),
        })?;
        let instance_bounds_buffer = backend.create_storage_buffer(&BufferDescription {
            size: (MAX_SDF_INSTANCES as usize * std::mem::size_of::<SdfInstanceBounds>()) as u64,
            initial_data: Vec::new(),
        })?;
        // count + index list
        let culled_instances_buffer = backend.create_storage_buffer(&BufferDescription {
            size: (4 + MAX_SDF_INSTANCES * 4) as u64,
            initial_data: Vec::new(),
        })?;
        let (tiles_x, tiles_y) = tile_counts(width, height);
        let culled_tiles_buffer = backend.create_storage_buffer(&BufferDescription {
            size: (tiles_x * tiles_y * (4 + MAX_SDF_INSTANCES_PER_TILE * 4)) as u64,
            initial_data: Vec::new(),
        })?;
        let camera_frustum_buffer = backend.create_uniform_buffer(&BufferDescription {
            size: std::mem::size_of::<FrustumGpu>() as u64,
            initial_data: Vec::new(),
        })?;

        // a far away empty field, sampled by unused volume slots
        let default_sdf_texture = backend.create_image(&ImageDescription {
            initial_data: vec![255u8],
            width: 1,
            height: 1,
            depth: 1,
            image_type: ImageType::Type3D,
            format: ImageFormat::R8,
            usage: ImageUsage::SAMPLED,
            ..Default::default()
        })?;

        let camera_frustum_culling_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("SDF Camera Frustum Culling"),
            shader_description: ShaderDescription::new(PathBuf::from("sdfCameraFrustumCulling.comp")),
        })?;
        let camera_tile_culling_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("SDF Camera Tile Culling"),
            shader_description: Self::tile_culling_shader_description(),
        })?;
        let diffuse_trace_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Diffuse SDF Trace"),
            shader_description: Self::trace_shader_description(&settings),
        })?;
        let filter_spatial_passes = [
            backend.create_compute_pass(&ComputePassDescription {
                name: String::from("Indirect Diffuse Spatial Filter A"),
                shader_description: ShaderDescription::new(PathBuf::from(
                    "sdfIndirectFilterSpatial.comp",
                )),
            })?,
            backend.create_compute_pass(&ComputePassDescription {
                name: String::from("Indirect Diffuse Spatial Filter B"),
                shader_description: ShaderDescription::new(PathBuf::from(
                    "sdfIndirectFilterSpatial.comp",
                )),
            })?,
        ];
        let filter_temporal_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Indirect Diffuse Temporal Filter"),
            shader_description: ShaderDescription::new(PathBuf::from(
                "sdfIndirectFilterTemporal.comp",
            )),
        })?;
        let upscale_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Indirect Diffuse Upscale"),
            shader_description: ShaderDescription::new(PathBuf::from("sdfIndirectUpscale.comp")),
        })?;

        Ok(Self {
            camera_frustum_culling_pass: camera_frustum_culling_pass,
            camera_tile_culling_pass: camera_tile_culling_pass,
            diffuse_trace_pass: diffuse_trace_pass,
            filter_spatial_passes: filter_spatial_passes,
            filter_temporal_pass: filter_temporal_pass,
            upscale_pass: upscale_pass,
            indirect_y_sh: indirect_y_sh,
            indirect_co_cg: indirect_co_cg,
            history_y_sh: history_y_sh,
            history_co_cg: history_co_cg,
            full_res_y_sh: full_res_y_sh,
            full_res_co_cg: full_res_co_cg,
            instance_buffer: instance_buffer,
            instance_bounds_buffer: instance_bounds_buffer,
            culled_instances_buffer: culled_instances_buffer,
            culled_tiles_buffer: culled_tiles_buffer,
            camera_frustum_buffer: camera_frustum_buffer,
            sdf_textures: Vec::new(),
            default_sdf_texture: default_sdf_texture,
            instance_count: 0,
            settings: settings,
        })
    }

    pub fn settings(&self) -> &SdfTraceSettings {
        &self.settings
    }

    pub fn update_settings(
        &mut self,
        backend: &mut RenderBackend,
        settings: &SdfTraceSettings,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if *settings == self.settings {
            return Ok(());
        }
        let resolution_changed = settings.half_res_trace != self.settings.half_res_trace;
        self.settings = *settings;
        backend.update_compute_pass_shader_description(
            self.diffuse_trace_pass,
            Self::trace_shader_description(&self.settings),
        )?;
        if resolution_changed {
            self.resize(backend, width, height)?;
        }
        Ok(())
    }

    /// The lighting results the forward pass samples:
    /// (Y spherical harmonics, CoCg)
    pub fn indirect_lighting_results(&self) -> (ImageHandle, ImageHandle) {
        if self.settings.half_res_trace {
            (self.full_res_y_sh, self.full_res_co_cg)
        } else {
            (self.indirect_y_sh[0], self.indirect_co_cg[0])
        }
    }

    pub fn resize(&mut self, backend: &mut RenderBackend, width: u32, height: u32) -> Result<()> {
        let (w, h) = trace_resolution(width, height, &self.settings);
        backend.resize_images(
            &[
                self.indirect_y_sh[0],
                self.indirect_y_sh[1],
                self.history_y_sh[0],
                self.history_y_sh[1],
            ],
            w,
            h,
        )?;
        backend.resize_images(
            &[
                self.indirect_co_cg[0],
                self.indirect_co_cg[1],
                self.history_co_cg[0],
                self.history_co_cg[1],
            ],
            w,
            h,
        )?;
        backend.resize_images(&[self.full_res_y_sh, self.full_res_co_cg], width, height)?;
        Ok(())
    }

    /// Upload the sdf scene: instance transforms, bounds and the
    /// volume textures. Called when objects move or the scene
    /// changes, not per frame.
    pub fn update_sdf_scene(
        &mut self,
        backend: &mut RenderBackend,
        instances: &[SdfInstance],
        bounds: &[SdfInstanceBounds],
        sdf_textures: &[ImageHandle],
    ) {
        assert_eq!(instances.len(), bounds.len());
        assert!(
            sdf_textures.len() <= MAX_SDF_TEXTURES as usize,
            "too many distinct sdf textures"
        );

        let mut count = instances.len();
        if count > MAX_SDF_INSTANCES as usize {
            log::error!(
                "{} sdf instances exceed the maximum of {}, truncating",
                count,
                MAX_SDF_INSTANCES
            );
            count = MAX_SDF_INSTANCES as usize;
        }
        self.instance_count = count as u32;
        self.sdf_textures = sdf_textures.to_vec();

        if count == 0 {
            return;
        }

        let instance_bytes = unsafe {
            std::slice::from_raw_parts(
                instances.as_ptr() as *const u8,
                count * std::mem::size_of::<SdfInstance>(),
            )
        };
        backend.fill_storage_buffer(self.instance_buffer, instance_bytes);

        let bounds_bytes = unsafe {
            std::slice::from_raw_parts(
                bounds.as_ptr() as *const u8,
                count * std::mem::size_of::<SdfInstanceBounds>(),
            )
        };
        backend.fill_storage_buffer(self.instance_bounds_buffer, bounds_bytes);
    }

    fn upload_camera_frustum(&self, backend: &mut RenderBackend, frustum: &ViewFrustum) {
        let to4 = |v: cgmath::Vector3<f32>| [v.x, v.y, v.z, 0.0];
        let p = &frustum.points;
        let n = &frustum.normals;
        let gpu = FrustumGpu {
            points: [
                to4(p.l_u_n),
                to4(p.r_u_n),
                to4(p.l_l_n),
                to4(p.r_l_n),
                to4(p.l_u_f),
                to4(p.r_u_f),
                to4(p.l_l_f),
                to4(p.r_l_f),
            ],
            normals: [
                to4(n.top),
                to4(n.bot),
                to4(n.left),
                to4(n.right),
                to4(n.near),
                to4(n.far),
            ],
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &gpu as *const FrustumGpu as *const u8,
                std::mem::size_of::<FrustumGpu>(),
            )
        };
        backend.fill_uniform_buffer(self.camera_frustum_buffer, bytes);
    }

    /// sdf volume textures occupy a run of fixed bindings, unused
    /// slots sample the empty fallback volume
    fn sdf_texture_resources(&self, first_binding: u32) -> Vec<ImageResource> {
        let mut resources = Vec::new();
        for i in 0..MAX_SDF_TEXTURES {
            let texture = self
                .sdf_textures
                .get(i as usize)
                .copied()
                .unwrap_or(self.default_sdf_texture);
            resources.push(ImageResource::new(texture, 0, first_binding + i));
        }
        resources
    }

    /// Issue the whole indirect lighting chain.
    /// Returns the pass producing the final result.
    pub fn compute_indirect_lighting(
        &self,
        backend: &mut RenderBackend,
        dependencies: &SdfTraceDependencies,
        camera_frustum: &ViewFrustum,
        texel_sampler: SamplerHandle,
        linear_sampler: SamplerHandle,
        frame_index: u32,
        width: u32,
        height: u32,
        _previous_view_projection: &Matrix4<f32>,
    ) -> PassHandle {
        self.upload_camera_frustum(backend, camera_frustum);

        let (trace_width, trace_height) = trace_resolution(width, height, &self.settings);
        let trace_dispatch = [
            (trace_width + 7) / 8,
            (trace_height + 7) / 8,
            1,
        ];
        let history = (frame_index % 2) as usize;
        let previous_history = 1 - history;

        // stage 1: camera frustum culling into a compacted list
        let mut frustum_cull = PassExecution::new(self.camera_frustum_culling_pass);
        frustum_cull.resources.storage_buffers = vec![
            StorageBufferResource::new(self.instance_bounds_buffer, true, 0),
            StorageBufferResource::new(self.culled_instances_buffer, false, 1),
        ];
        frustum_cull.resources.uniform_buffers =
            vec![UniformBufferResource::new(self.camera_frustum_buffer, 2)];
        // single workgroup, the shader loops over the instances
        frustum_cull.dispatch_count = [1, 1, 1];
        let mut push = Vec::new();
        push.extend_from_slice(&self.instance_count.to_le_bytes());
        push.extend_from_slice(&self.settings.trace_influence_radius.to_le_bytes());
        frustum_cull.push_constants = push.clone();
        backend.set_pass_execution(frustum_cull);

        // stage 2: per tile culling against the hi-z depth range
        let (tiles_x, tiles_y) = tile_counts(width, height);
        let mut tile_cull = PassExecution::new(self.camera_tile_culling_pass);
        tile_cull.resources.storage_buffers = vec![
            StorageBufferResource::new(self.culled_instances_buffer, true, 0),
            StorageBufferResource::new(self.instance_bounds_buffer, true, 1),
            StorageBufferResource::new(self.culled_tiles_buffer, false, 2),
        ];
        // depth range from the pyramid mip whose texels cover a
        // tile; tiny outputs do not have that many mips
        let tile_mip = ((SDF_TILE_SIZE as f32).log2() as u32 - 1)
            .min(dependencies.depth_pyramid_mip_count - 1);
        tile_cull.resources.sampled_images = vec![ImageResource::new(
            dependencies.depth_pyramid,
            tile_mip,
            3,
        )];
        tile_cull.resources.samplers = vec![SamplerResource::new(texel_sampler, 4)];
        tile_cull.parents = {
            let mut parents = dependencies.parents.clone();
            parents.push(self.camera_frustum_culling_pass);
            parents
        };
        tile_cull.dispatch_count = [tiles_x, tiles_y, 1];
        tile_cull.push_constants = push.clone();
        backend.set_pass_execution(tile_cull);

        // stage 3: the cone trace itself
        let mut trace = PassExecution::new(self.diffuse_trace_pass);
        trace.resources.storage_images = vec![
            ImageResource::new(self.indirect_y_sh[0], 0, 0),
            ImageResource::new(self.indirect_co_cg[0], 0, 1),
        ];
        trace.resources.sampled_images = vec![
            ImageResource::new(dependencies.depth, 0, 2),
            ImageResource::new(dependencies.shadow_map, 0, 3),
        ];
        trace.resources.sampled_images.extend(self.sdf_texture_resources(16));
        trace.resources.storage_buffers = vec![
            StorageBufferResource::new(self.instance_buffer, true, 4),
            StorageBufferResource::new(self.culled_tiles_buffer, true, 5),
            StorageBufferResource::new(dependencies.light_buffer, true, 6),
            StorageBufferResource::new(dependencies.sun_shadow_info_buffer, true, 7),
        ];
        trace.resources.samplers = vec![
            SamplerResource::new(texel_sampler, 8),
            SamplerResource::new(linear_sampler, 9),
        ];
        trace.parents = vec![self.camera_tile_culling_pass];
        let mut trace_push = push.clone();
        trace_push
            .extend_from_slice(&self.settings.additional_sun_shadow_map_padding.to_le_bytes());
        trace.push_constants = trace_push;
        trace.dispatch_count = trace_dispatch;
        backend.set_pass_execution(trace);

        // stage 4: spatial filter A, trace target ping pong
        let mut spatial_a = PassExecution::new(self.filter_spatial_passes[0]);
        spatial_a.resources.sampled_images = vec![
            ImageResource::new(self.indirect_y_sh[0], 0, 2),
            ImageResource::new(self.indirect_co_cg[0], 0, 3),
            ImageResource::new(dependencies.depth, 0, 4),
        ];
        spatial_a.resources.storage_images = vec![
            ImageResource::new(self.indirect_y_sh[1], 0, 0),
            ImageResource::new(self.indirect_co_cg[1], 0, 1),
        ];
        spatial_a.resources.samplers = vec![SamplerResource::new(texel_sampler, 5)];
        spatial_a.parents = vec![self.diffuse_trace_pass];
        spatial_a.dispatch_count = trace_dispatch;
        backend.set_pass_execution(spatial_a);

        // stage 5: temporal filter against the history, rejected
        // with motion vectors of both frames
        let mut temporal = PassExecution::new(self.filter_temporal_pass);
        temporal.resources.sampled_images = vec![
            ImageResource::new(self.indirect_y_sh[1], 0, 2),
            ImageResource::new(self.indirect_co_cg[1], 0, 3),
            ImageResource::new(self.history_y_sh[previous_history], 0, 4),
            ImageResource::new(self.history_co_cg[previous_history], 0, 5),
            ImageResource::new(dependencies.motion, 0, 6),
            ImageResource::new(dependencies.previous_motion, 0, 7),
        ];
        temporal.resources.storage_images = vec![
            ImageResource::new(self.history_y_sh[history], 0, 0),
            ImageResource::new(self.history_co_cg[history], 0, 1),
        ];
        temporal.resources.samplers = vec![SamplerResource::new(linear_sampler, 8)];
        temporal.parents = vec![self.filter_spatial_passes[0]];
        temporal.dispatch_count = trace_dispatch;
        backend.set_pass_execution(temporal);

        // stage 6: spatial filter B back into the primary target
        let mut spatial_b = PassExecution::new(self.filter_spatial_passes[1]);
        spatial_b.resources.sampled_images = vec![
            ImageResource::new(self.history_y_sh[history], 0, 2),
            ImageResource::new(self.history_co_cg[history], 0, 3),
            ImageResource::new(dependencies.depth, 0, 4),
        ];
        spatial_b.resources.storage_images = vec![
            ImageResource::new(self.indirect_y_sh[0], 0, 0),
            ImageResource::new(self.indirect_co_cg[0], 0, 1),
        ];
        spatial_b.resources.samplers = vec![SamplerResource::new(texel_sampler, 5)];
        spatial_b.parents = vec![self.filter_temporal_pass];
        spatial_b.dispatch_count = trace_dispatch;
        backend.set_pass_execution(spatial_b);

        if !self.settings.half_res_trace {
            return self.filter_spatial_passes[1];
        }

        // stage 7: upscale combines the half res result with the
        // full res depth
        let mut upscale = PassExecution::new(self.upscale_pass);
        upscale.resources.sampled_images = vec![
            ImageResource::new(self.indirect_y_sh[0], 0, 2),
            ImageResource::new(self.indirect_co_cg[0], 0, 3),
            ImageResource::new(dependencies.depth, 0, 4),
        ];
        upscale.resources.storage_images = vec![
            ImageResource::new(self.full_res_y_sh, 0, 0),
            ImageResource::new(self.full_res_co_cg, 0, 1),
        ];
        upscale.resources.samplers = vec![SamplerResource::new(linear_sampler, 5)];
        upscale.parents = vec![self.filter_spatial_passes[1]];
        upscale.dispatch_count = [(width + 7) / 8, (height + 7) / 8, 1];
        backend.set_pass_execution(upscale);

        self.upscale_pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_counts_cover_screen() {
        let (x, y) = tile_counts(1920, 1080);
        assert_eq!((x, y), (60, 34));
        assert!(x * SDF_TILE_SIZE >= 1920);
        assert!(y * SDF_TILE_SIZE >= 1080);
    }

    #[test]
    fn half_res_trace_resolution() {
        let settings = SdfTraceSettings::default();
        assert_eq!(trace_resolution(1280, 720, &settings), (640, 360));
        let full = SdfTraceSettings {
            half_res_trace: false,
            ..Default::default()
        };
        assert_eq!(trace_resolution(1280, 720, &full), (1280, 720));
    }

    #[test]
    fn instance_layout_matches_gpu_expectation() {
        // vec3 + uint + vec3 + float + mat4
        assert_eq!(std::mem::size_of::<SdfInstance>(), 16 + 16 + 64);
    }
}
