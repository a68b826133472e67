// The render frontend
//
// Issues the fixed per-frame pass chain against the backend:
// depth prepass with motion vectors, hi-z pyramid, sun light
// matrices, shadow cascades, SDF indirect diffuse, forward shading,
// sky, auto exposure, TAA, bloom and tonemapping into the swapchain
// image. Owns the frame render targets, the cameras, culling and
// all render settings.

pub mod bloom;
pub mod exposure;
pub mod hiz;
pub mod sdfgi;
pub mod shadows;
pub mod sky;
pub mod taa;

pub use bloom::{Bloom, BloomSettings};
pub use exposure::Exposure;
pub use hiz::DepthPyramid;
pub use sdfgi::{SdfGi, SdfInstance, SdfInstanceBounds, SdfTraceSettings};
pub use shadows::{SunShadows, SHADOW_CASCADE_COUNT};
pub use sky::Sky;
pub use taa::{Taa, TaaSettings};

use crate::backend::RenderBackend;
use crate::camera::{
    projection_matrix_from_intrinsic, view_matrix_from_extrinsic, Camera, CameraExtrinsic,
};
use crate::desc::*;
use crate::formats::MeshBinary;
use crate::math::{
    self, frustum::compute_orthogonal_frustum_fitted_to_camera,
    frustum::is_aabb_intersecting_frustum, packing, AxisAlignedBoundingBox, ViewFrustum,
};
use crate::mesh::MeshDataInternal;
use crate::timing::RenderPassTime;
use crate::ui::UiDrawData;
use crate::Result;

use cgmath::{InnerSpace, Matrix4, SquareMatrix, Vector2, Vector3, Vector4};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use std::path::PathBuf;

use utils::log;

/// Frontend mesh handles index the frontend's mesh states, which
/// carry transform history and bounds on top of the backend mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrontendMeshHandle {
    pub index: u32,
}

/// Resolved textures of a mesh; anything missing falls back to the
/// defaults.
#[derive(Copy, Clone, Default)]
pub struct MeshTextures {
    pub albedo: Option<ImageHandle>,
    pub normal: Option<ImageHandle>,
    pub specular: Option<ImageHandle>,
    /// volume texture for the indirect diffuse trace
    pub sdf_texture: Option<ImageHandle>,
    pub mean_albedo: [f32; 3],
}

struct MeshState {
    backend_handle: MeshHandle,
    model_matrix: Matrix4<f32>,
    previous_model_matrix: Matrix4<f32>,
    bounding_box: AxisAlignedBoundingBox,
    sdf_texture: Option<ImageHandle>,
    mean_albedo: [f32; 3],
}

/// these enum values must correspond to the shader values
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiffuseBrdf {
    Lambert = 0,
    Disney = 1,
    CoDWWII = 2,
    Titanfall2 = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirectSpecularMultiscattering {
    McAuley = 0,
    Simplified = 1,
    ScaledGGX = 2,
    None = 3,
}

#[derive(Copy, Clone, PartialEq)]
pub struct ShadingConfig {
    pub diffuse_brdf: DiffuseBrdf,
    pub direct_multiscatter: DirectSpecularMultiscattering,
    pub use_indirect_multiscatter: bool,
    pub use_geometry_aa: bool,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            diffuse_brdf: DiffuseBrdf::Titanfall2,
            direct_multiscatter: DirectSpecularMultiscattering::McAuley,
            use_indirect_multiscatter: true,
            use_geometry_aa: true,
        }
    }
}

// forward pass specialisation constant ids
const SPEC_DIFFUSE_BRDF: u32 = 0;
const SPEC_DIRECT_MULTISCATTER: u32 = 1;
const SPEC_INDIRECT_MULTISCATTER: u32 = 2;
const SPEC_GEOMETRY_AA: u32 = 3;
const SPEC_SPECULAR_PROBE_MIPS: u32 = 4;

/// One frame's output images and the framebuffers over them.
/// Two sets exist so temporal passes can read the previous frame.
struct FrameRenderTargets {
    color: ImageHandle,
    motion: ImageHandle,
    depth: ImageHandle,
    color_framebuffer: FramebufferHandle,
    prepass_framebuffer: FramebufferHandle,
}

struct DrawcallStats {
    mesh_count: u32,
    main_pass_drawcalls: u32,
    shadow_pass_drawcalls: u32,
}

pub struct RenderFrontend {
    backend: RenderBackend,

    // fixed passes
    depth_prepass: PassHandle,
    main_pass: PassHandle,
    debug_geo_pass: PassHandle,
    tonemapping_pass: PassHandle,

    // techniques
    sky: Sky,
    shadows: SunShadows,
    depth_pyramid: DepthPyramid,
    exposure: Exposure,
    taa: Taa,
    bloom: Bloom,
    sdfgi: SdfGi,

    frame_targets: [FrameRenderTargets; 2],
    /// intermediate supersampling target
    supersample_target: ImageHandle,
    /// resolved taa output, input to bloom and tonemapping
    taa_output: ImageHandle,

    // samplers
    shadow_sampler: SamplerHandle,
    hdri_sampler: SamplerHandle,
    cube_sampler: SamplerHandle,
    lut_sampler: SamplerHandle,
    default_texel_sampler: SamplerHandle,
    clamped_depth_sampler: SamplerHandle,
    color_sampler: SamplerHandle,

    // default textures
    default_albedo_texture: ImageHandle,
    default_normal_texture: ImageHandle,
    default_specular_texture: ImageHandle,
    default_sky_texture: ImageHandle,

    mesh_states: Vec<MeshState>,
    sky_cube: MeshHandle,
    meshes_to_draw: Vec<FrontendMeshHandle>,
    sdf_scene_dirty: bool,

    // debug geometry, host visible and rebuilt per frame
    camera_frustum_mesh: DynamicMeshHandle,
    shadow_frustum_mesh: DynamicMeshHandle,
    bb_debug_meshes: Vec<DynamicMeshHandle>,
    draw_bounding_boxes: bool,
    freeze_and_draw_camera_frustum: bool,
    draw_shadow_frustum: bool,
    frozen_camera_frustum: Option<ViewFrustum>,

    camera: Camera,
    camera_frustum: ViewFrustum,
    view_projection: Matrix4<f32>,
    view_projection_jittered: Matrix4<f32>,
    previous_view_projection_jittered: Matrix4<f32>,
    global_info: GlobalShaderInfo,
    sun_direction_angles: Vector2<f32>,

    shading_config: ShadingConfig,
    bloom_settings: BloomSettings,
    main_pass_shader_stale: bool,
    camera_cut_requested: bool,

    screen_width: u32,
    screen_height: u32,
    pending_resolution: Option<(u32, u32)>,
    minimized: bool,
    first_frame: bool,
    frame_index: u32,

    stats: DrawcallStats,
    ui_draw_data: UiDrawData,

    // timings are cached and refreshed at a slow rate to stay
    // readable in the overlay
    cached_timings: Vec<RenderPassTime>,
    timing_last_update_millis: u64,
    last_frame_millis: u64,
}

impl RenderFrontend {
    fn forward_shader_descriptions(
        config: &ShadingConfig,
        specular_probe_mips: u32,
    ) -> GraphicPassShaderDescriptions {
        let vertex = ShaderDescription::new(PathBuf::from("forward.vert"));
        let mut fragment = ShaderDescription::new(PathBuf::from("forward.frag"));
        let constants = &mut fragment.specialisation_constants;
        constants.push(SPEC_DIFFUSE_BRDF, config.diffuse_brdf as i32);
        constants.push(SPEC_DIRECT_MULTISCATTER, config.direct_multiscatter as i32);
        constants.push(
            SPEC_INDIRECT_MULTISCATTER,
            config.use_indirect_multiscatter as i32,
        );
        constants.push(SPEC_GEOMETRY_AA, config.use_geometry_aa as i32);
        constants.push(SPEC_SPECULAR_PROBE_MIPS, specular_probe_mips as i32);
        GraphicPassShaderDescriptions::new(vertex, fragment)
    }

    pub fn setup(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut backend = RenderBackend::new(display_handle, window_handle, width, height)?;

        /*
         * samplers
         */
        let shadow_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Nearest,
            wrapping: SamplerWrapping::Color,
            border_color: SamplerBorderColor::White,
            max_mip: 1,
            ..Default::default()
        })?;
        let hdri_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Linear,
            wrapping: SamplerWrapping::Clamp,
            max_mip: 1,
            ..Default::default()
        })?;
        let cube_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Linear,
            wrapping: SamplerWrapping::Clamp,
            max_mip: sky::SKY_TEXTURE_MIP_COUNT,
            ..Default::default()
        })?;
        let lut_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Linear,
            wrapping: SamplerWrapping::Clamp,
            max_mip: 1,
            ..Default::default()
        })?;
        let default_texel_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Nearest,
            wrapping: SamplerWrapping::Clamp,
            max_mip: 1,
            ..Default::default()
        })?;
        let clamped_depth_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Nearest,
            wrapping: SamplerWrapping::Color,
            border_color: SamplerBorderColor::White,
            max_mip: hiz::DEPTH_PYRAMID_MAX_MIP_COUNT,
            ..Default::default()
        })?;
        let color_sampler = backend.create_sampler(&SamplerDescription {
            interpolation: SamplerInterpolation::Linear,
            wrapping: SamplerWrapping::Clamp,
            max_mip: 1,
            ..Default::default()
        })?;

        /*
         * default textures
         */
        let default_albedo_texture = backend.create_image(&ImageDescription {
            initial_data: vec![255, 255, 255, 255],
            ..Default::default()
        })?;
        let default_normal_texture = backend.create_image(&ImageDescription {
            initial_data: vec![128, 128, 255, 255],
            ..Default::default()
        })?;
        let default_specular_texture = backend.create_image(&ImageDescription {
            initial_data: vec![0, 128, 255, 0],
            ..Default::default()
        })?;
        let default_sky_texture = backend.create_image(&ImageDescription {
            initial_data: vec![255; 6 * 4],
            image_type: ImageType::TypeCube,
            ..Default::default()
        })?;
        // equirectangular stand-in until an environment is loaded
        let default_environment_map = backend.create_image(&ImageDescription {
            initial_data: vec![255, 255, 255, 255],
            ..Default::default()
        })?;

        /*
         * frame render targets
         */
        let color_desc = ImageDescription {
            width: width,
            height: height,
            format: ImageFormat::RGBA16Float,
            usage: ImageUsage::ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        };
        let motion_desc = ImageDescription {
            width: width,
            height: height,
            format: ImageFormat::RG16Float,
            usage: ImageUsage::ATTACHMENT | ImageUsage::SAMPLED,
            ..Default::default()
        };
        let depth_desc = ImageDescription {
            width: width,
            height: height,
            format: ImageFormat::Depth32,
            usage: ImageUsage::ATTACHMENT | ImageUsage::SAMPLED,
            ..Default::default()
        };

        let mut target_images = Vec::new();
        for _ in 0..2 {
            target_images.push((
                backend.create_image(&color_desc)?,
                backend.create_image(&motion_desc)?,
                backend.create_image(&depth_desc)?,
            ));
        }

        let taa_intermediate_desc = ImageDescription {
            width: width,
            height: height,
            format: ImageFormat::RGBA16Float,
            usage: ImageUsage::SAMPLED | ImageUsage::STORAGE,
            ..Default::default()
        };
        let supersample_target = backend.create_image(&taa_intermediate_desc)?;
        let taa_output = backend.create_image(&taa_intermediate_desc)?;

        /*
         * fixed passes; attachments reference the first target set,
         * per frame executions override the framebuffer
         */
        let depth_prepass = backend.create_graphic_pass(&GraphicPassDescription {
            name: String::from("Depth Prepass"),
            shader_descriptions: GraphicPassShaderDescriptions::new(
                ShaderDescription::new(PathBuf::from("depthPrepass.vert")),
                ShaderDescription::new(PathBuf::from("depthPrepass.frag")),
            ),
            attachments: vec![
                Attachment::new(target_images[0].1, 0, AttachmentLoadOp::Clear),
                Attachment::new(target_images[0].2, 0, AttachmentLoadOp::Clear),
            ],
            patch_control_points: 0,
            rasterization: RasterizationConfig {
                cull_mode: CullMode::Back,
                ..Default::default()
            },
            blending: BlendState::None,
            depth_test: DepthTest {
                function: DepthFunction::LessEqual,
                write: true,
            },
        })?;

        let shading_config = ShadingConfig::default();
        // created before the sky module exists, the mip count is a
        // fixed property of the probe resolution
        let specular_probe_mips = math::mip_count_from_resolution(
            sky::SPECULAR_PROBE_RESOLUTION,
            sky::SPECULAR_PROBE_RESOLUTION,
            1,
        ) - sky::SPECULAR_PROBE_MIPS_TOO_SMALL;

        let main_pass = backend.create_graphic_pass(&GraphicPassDescription {
            name: String::from("Forward Shading"),
            shader_descriptions: Self::forward_shader_descriptions(
                &shading_config,
                specular_probe_mips,
            ),
            attachments: vec![
                Attachment::new(target_images[0].0, 0, AttachmentLoadOp::Clear),
                Attachment::new(target_images[0].2, 0, AttachmentLoadOp::Load),
            ],
            patch_control_points: 0,
            rasterization: RasterizationConfig {
                cull_mode: CullMode::Back,
                ..Default::default()
            },
            blending: BlendState::None,
            // early z equality against the prepass
            depth_test: DepthTest {
                function: DepthFunction::Equal,
                write: false,
            },
        })?;

        let debug_geo_pass = backend.create_graphic_pass(&GraphicPassDescription {
            name: String::from("Debug Geometry"),
            shader_descriptions: GraphicPassShaderDescriptions::new(
                ShaderDescription::new(PathBuf::from("debugGeo.vert")),
                ShaderDescription::new(PathBuf::from("debugGeo.frag")),
            ),
            attachments: vec![
                Attachment::new(target_images[0].0, 0, AttachmentLoadOp::Load),
                Attachment::new(target_images[0].2, 0, AttachmentLoadOp::Load),
            ],
            patch_control_points: 0,
            rasterization: RasterizationConfig {
                mode: RasterizationMode::Line,
                ..Default::default()
            },
            blending: BlendState::None,
            depth_test: DepthTest {
                function: DepthFunction::LessEqual,
                write: false,
            },
        })?;

        let tonemapping_pass = backend.create_compute_pass(&ComputePassDescription {
            name: String::from("Tonemapping"),
            shader_description: ShaderDescription::new(PathBuf::from("tonemapping.comp")),
        })?;

        /*
         * techniques
         */
        let sky = Sky::new(
            &mut backend,
            default_environment_map,
            target_images[0].0,
            target_images[0].2,
            shading_config.diffuse_brdf as i32,
        )?;
        let shadows = SunShadows::new(&mut backend)?;
        let depth_pyramid = DepthPyramid::new(&mut backend, width, height)?;
        let exposure = Exposure::new(&mut backend, width, height)?;
        let taa = Taa::new(&mut backend, width, height)?;
        let bloom = Bloom::new(&mut backend, width, height)?;
        let sdfgi = SdfGi::new(&mut backend, width, height)?;

        /*
         * framebuffers per target set
         */
        let mut frame_targets = Vec::new();
        for (color, motion, depth) in target_images.iter().copied() {
            let color_framebuffer = backend.create_framebuffer(
                main_pass,
                &[
                    Attachment::new(color, 0, AttachmentLoadOp::Clear),
                    Attachment::new(depth, 0, AttachmentLoadOp::Load),
                ],
            )?;
            let prepass_framebuffer = backend.create_framebuffer(
                depth_prepass,
                &[
                    Attachment::new(motion, 0, AttachmentLoadOp::Clear),
                    Attachment::new(depth, 0, AttachmentLoadOp::Clear),
                ],
            )?;
            frame_targets.push(FrameRenderTargets {
                color: color,
                motion: motion,
                depth: depth,
                color_framebuffer: color_framebuffer,
                prepass_framebuffer: prepass_framebuffer,
            });
        }
        let mut frame_targets = frame_targets.into_iter();
        let frame_targets = [
            frame_targets.next().unwrap(),
            frame_targets.next().unwrap(),
        ];

        /*
         * the sky cube mesh
         */
        let sky_cube_data = build_cube_mesh_data();
        let sky_cube = backend
            .create_meshes(&[sky_cube_data], &[sky.sky_draw_pass()])?
            .pop()
            .unwrap();

        // frustum debug meshes: 8 corners, 24 line list indices
        let frustum_meshes = backend.create_dynamic_meshes(&[8, 8], &[24, 24])?;

        let camera = Camera::default();
        let camera_frustum = ViewFrustum::from_camera(&camera);

        let mut ret = Self {
            backend: backend,
            depth_prepass: depth_prepass,
            main_pass: main_pass,
            debug_geo_pass: debug_geo_pass,
            tonemapping_pass: tonemapping_pass,
            sky: sky,
            shadows: shadows,
            depth_pyramid: depth_pyramid,
            exposure: exposure,
            taa: taa,
            bloom: bloom,
            sdfgi: sdfgi,
            frame_targets: frame_targets,
            supersample_target: supersample_target,
            taa_output: taa_output,
            shadow_sampler: shadow_sampler,
            hdri_sampler: hdri_sampler,
            cube_sampler: cube_sampler,
            lut_sampler: lut_sampler,
            default_texel_sampler: default_texel_sampler,
            clamped_depth_sampler: clamped_depth_sampler,
            color_sampler: color_sampler,
            default_albedo_texture: default_albedo_texture,
            default_normal_texture: default_normal_texture,
            default_specular_texture: default_specular_texture,
            default_sky_texture: default_sky_texture,
            mesh_states: Vec::new(),
            sky_cube: sky_cube,
            meshes_to_draw: Vec::new(),
            sdf_scene_dirty: false,
            camera_frustum_mesh: frustum_meshes[0],
            shadow_frustum_mesh: frustum_meshes[1],
            bb_debug_meshes: Vec::new(),
            draw_bounding_boxes: false,
            freeze_and_draw_camera_frustum: false,
            draw_shadow_frustum: false,
            frozen_camera_frustum: None,
            camera: camera,
            camera_frustum: camera_frustum,
            view_projection: Matrix4::identity(),
            view_projection_jittered: Matrix4::identity(),
            previous_view_projection_jittered: Matrix4::identity(),
            global_info: GlobalShaderInfo::default(),
            sun_direction_angles: Vector2::new(-120.0, 150.0),
            shading_config: shading_config,
            bloom_settings: BloomSettings::default(),
            main_pass_shader_stale: false,
            camera_cut_requested: true,
            screen_width: width,
            screen_height: height,
            pending_resolution: None,
            minimized: false,
            first_frame: true,
            frame_index: 0,
            stats: DrawcallStats {
                mesh_count: 0,
                main_pass_drawcalls: 0,
                shadow_pass_drawcalls: 0,
            },
            ui_draw_data: UiDrawData::default(),
            cached_timings: Vec::new(),
            timing_last_update_millis: 0,
            last_frame_millis: utils::timing::get_current_millis(),
        };
        ret.update_sun();
        Ok(ret)
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    pub fn backend(&self) -> &RenderBackend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut RenderBackend {
        &mut self.backend
    }

    /*
     * resources
     */

    pub fn create_image(&mut self, desc: &ImageDescription) -> Result<ImageHandle> {
        self.backend.create_image(desc)
    }

    pub fn create_meshes(
        &mut self,
        meshes: &[MeshBinary],
        textures: &[MeshTextures],
    ) -> Result<Vec<FrontendMeshHandle>> {
        assert_eq!(meshes.len(), textures.len());

        let passes = [self.main_pass, self.depth_prepass];
        let mut all_passes: Vec<PassHandle> = passes.to_vec();
        all_passes.extend_from_slice(self.shadows.cascade_passes());

        let mut handles = Vec::with_capacity(meshes.len());
        for (binary, mesh_textures) in meshes.iter().zip(textures.iter()) {
            let data = MeshDataInternal {
                index_count: binary.index_count,
                vertex_count: binary.vertex_count,
                index_buffer: binary.index_buffer.clone(),
                vertex_buffer: binary.vertex_buffer.clone(),
                bounding_box: binary.bounding_box(),
                albedo_texture: Some(
                    mesh_textures.albedo.unwrap_or(self.default_albedo_texture),
                ),
                normal_texture: Some(
                    mesh_textures.normal.unwrap_or(self.default_normal_texture),
                ),
                specular_texture: Some(
                    mesh_textures
                        .specular
                        .unwrap_or(self.default_specular_texture),
                ),
            };
            let backend_handle = self
                .backend
                .create_meshes(std::slice::from_ref(&data), &all_passes)?
                .pop()
                .unwrap();

            handles.push(FrontendMeshHandle {
                index: self.mesh_states.len() as u32,
            });
            self.mesh_states.push(MeshState {
                backend_handle: backend_handle,
                model_matrix: Matrix4::identity(),
                previous_model_matrix: Matrix4::identity(),
                bounding_box: binary.bounding_box(),
                sdf_texture: mesh_textures.sdf_texture,
                mean_albedo: mesh_textures.mean_albedo,
            });
        }
        self.sdf_scene_dirty = true;
        Ok(handles)
    }

    pub fn set_model_matrix(&mut self, handle: FrontendMeshHandle, matrix: Matrix4<f32>) {
        let state = &mut self.mesh_states[handle.index as usize];
        state.model_matrix = matrix;
        self.sdf_scene_dirty = true;
    }

    pub fn issue_mesh_draws(&mut self, meshes: &[FrontendMeshHandle]) {
        self.meshes_to_draw.extend_from_slice(meshes);
    }

    /*
     * settings
     */

    pub fn set_camera_extrinsic(&mut self, extrinsic: &CameraExtrinsic) {
        self.camera.extrinsic = *extrinsic;
    }

    /// Reject all temporal history for one frame, for teleports
    pub fn request_camera_cut(&mut self) {
        self.camera_cut_requested = true;
    }

    pub fn set_sun_direction(&mut self, angles_degrees: Vector2<f32>) {
        self.sun_direction_angles = angles_degrees;
        self.update_sun();
    }

    /// Swap the equirectangular environment source. The probes are
    /// reconvolved on the next frame.
    pub fn set_environment_map(&mut self, image: ImageHandle) {
        self.sky.set_environment_map(image);
        self.first_frame = true;
    }

    fn update_sun(&mut self) {
        let direction = math::direction_to_vector(self.sun_direction_angles).normalize();
        self.global_info.sun_direction =
            Vector4::new(direction.x, direction.y, direction.z, 0.0);
    }

    pub fn set_shading_config(&mut self, config: &ShadingConfig) {
        if *config != self.shading_config {
            self.shading_config = *config;
            self.main_pass_shader_stale = true;
        }
    }

    pub fn set_bloom_settings(&mut self, settings: &BloomSettings) {
        self.bloom_settings = *settings;
    }

    pub fn set_taa_settings(&mut self, settings: &TaaSettings) -> Result<()> {
        self.taa.update_settings(&mut self.backend, settings)
    }

    pub fn set_sdf_trace_settings(&mut self, settings: &SdfTraceSettings) -> Result<()> {
        let (width, height) = (self.screen_width, self.screen_height);
        self.sdfgi
            .update_settings(&mut self.backend, settings, width, height)
    }

    pub fn set_exposure_offset(&mut self, offset: f32) {
        self.global_info.exposure_offset = offset;
    }

    pub fn set_ui_draw_data(&mut self, draw_data: UiDrawData) {
        self.ui_draw_data = draw_data;
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.minimized = true;
            return;
        }
        self.minimized = false;
        self.pending_resolution = Some((width, height));
    }

    /*
     * per frame
     */

    pub fn new_frame(&mut self) {
        self.meshes_to_draw.clear();
        self.stats = DrawcallStats {
            mesh_count: 0,
            main_pass_drawcalls: 0,
            shadow_pass_drawcalls: 0,
        };
    }

    fn apply_pending_resize(&mut self) -> Result<()> {
        let (width, height) = match self.pending_resolution.take() {
            Some(resolution) => resolution,
            None => return Ok(()),
        };
        if width == self.screen_width && height == self.screen_height {
            return Ok(());
        }
        self.screen_width = width;
        self.screen_height = height;

        self.backend.recreate_swapchain(width, height)?;

        let mut frame_images = Vec::new();
        for targets in self.frame_targets.iter() {
            frame_images.push(targets.color);
            frame_images.push(targets.motion);
            frame_images.push(targets.depth);
        }
        frame_images.push(self.supersample_target);
        frame_images.push(self.taa_output);
        self.backend.resize_images(&frame_images, width, height)?;

        self.depth_pyramid.resize(&mut self.backend, width, height)?;
        self.exposure.resize(&mut self.backend, width, height)?;
        self.taa.resize(&mut self.backend, width, height)?;
        self.bloom.resize(&mut self.backend, width, height)?;
        self.sdfgi.resize(&mut self.backend, width, height)?;

        // the history is garbage at the new resolution
        self.camera_cut_requested = true;
        Ok(())
    }

    fn update_camera_and_global_info(&mut self) {
        self.camera.intrinsic.aspect_ratio = self.screen_width as f32 / self.screen_height as f32;
        self.camera_frustum = ViewFrustum::from_camera(&self.camera);

        let view = view_matrix_from_extrinsic(&self.camera.extrinsic);
        let projection = projection_matrix_from_intrinsic(&self.camera.intrinsic);
        self.view_projection = projection * view;

        // jitter in pixels, scaled to uv offsets on the projection
        let jitter_pixels = taa::compute_projection_matrix_jitter(self.frame_index);
        let jitter_uv = Vector2::new(
            jitter_pixels.x * 2.0 / self.screen_width as f32,
            jitter_pixels.y * 2.0 / self.screen_height as f32,
        );
        let jittered_projection = if self.taa.settings().enabled {
            taa::apply_projection_matrix_jitter(&projection, jitter_uv)
        } else {
            projection
        };
        self.previous_view_projection_jittered = self.view_projection_jittered;
        self.view_projection_jittered = jittered_projection * view;

        self.taa
            .update_resolve_weights(&mut self.backend, jitter_pixels);

        let info = &mut self.global_info;
        info.previous_view_projection = info.view_projection;
        info.view_projection = self.view_projection_jittered;
        let position = self.camera.extrinsic.position;
        info.camera_position = Vector4::new(position.x, position.y, position.z, 1.0);
        let forward = self.camera.extrinsic.forward;
        info.camera_forward = Vector4::new(forward.x, forward.y, forward.z, 0.0);
        let up = self.camera.extrinsic.up;
        info.camera_up = Vector4::new(up.x, up.y, up.z, 0.0);
        let right = self.camera.extrinsic.right;
        info.camera_right = Vector4::new(right.x, right.y, right.z, 0.0);
        info.jitter = Vector4::new(
            jitter_uv.x,
            jitter_uv.y,
            info.jitter.x,
            info.jitter.y,
        );
        info.screen_width = self.screen_width as f32;
        info.screen_height = self.screen_height as f32;
        info.near_plane = self.camera.intrinsic.near;
        info.far_plane = self.camera.intrinsic.far;
        info.mip_bias = self.taa.mip_bias();
        info.camera_cut = self.camera_cut_requested as u32;
        info.frame_index = self.frame_index;

        let now = utils::timing::get_current_millis();
        info.delta_time = (now.saturating_sub(self.last_frame_millis) as f32 * 0.001).max(1e-4);
        self.last_frame_millis = now;
        info.time = now as f32 * 0.001;

        self.camera_cut_requested = false;
        let info_copy = self.global_info;
        self.backend.set_global_shader_info(&info_copy);
    }

    fn update_sdf_scene_if_dirty(&mut self) {
        if !self.sdf_scene_dirty {
            return;
        }
        self.sdf_scene_dirty = false;

        let mut instances = Vec::new();
        let mut bounds = Vec::new();
        let mut textures: Vec<ImageHandle> = Vec::new();

        for state in self.mesh_states.iter() {
            let sdf_texture = match state.sdf_texture {
                Some(texture) => texture,
                None => continue,
            };
            let texture_index = match textures.iter().position(|&t| t == sdf_texture) {
                Some(index) => index,
                None => {
                    if textures.len() >= sdfgi::MAX_SDF_TEXTURES as usize {
                        log::error!("Too many distinct sdf textures, skipping instance");
                        continue;
                    }
                    textures.push(sdf_texture);
                    textures.len() - 1
                }
            };

            let world_bb = state.bounding_box.transformed(&state.model_matrix);
            let extents = state.bounding_box.extents();
            let world_to_local = state
                .model_matrix
                .invert()
                .unwrap_or(Matrix4::identity());

            instances.push(SdfInstance {
                local_extends: [extents.x, extents.y, extents.z],
                sdf_texture_index: texture_index as u32,
                mean_albedo: state.mean_albedo,
                padding: 0.0,
                world_to_local: world_to_local.into(),
            });
            bounds.push(SdfInstanceBounds {
                bb_min: [world_bb.min.x, world_bb.min.y, world_bb.min.z, 0.0],
                bb_max: [world_bb.max.x, world_bb.max.y, world_bb.max.z, 0.0],
            });
        }

        self.sdfgi
            .update_sdf_scene(&mut self.backend, &instances, &bounds, &textures);
    }

    pub fn set_draw_bounding_boxes(&mut self, enabled: bool) {
        self.draw_bounding_boxes = enabled;
    }

    /// Freezes the culling frustum in place and draws it, for
    /// inspecting what the culling actually sees.
    pub fn set_freeze_and_draw_camera_frustum(&mut self, enabled: bool) {
        self.freeze_and_draw_camera_frustum = enabled;
    }

    pub fn set_draw_shadow_frustum(&mut self, enabled: bool) {
        self.draw_shadow_frustum = enabled;
    }

    /// Rebuild and enqueue the debug geometry for this frame
    fn update_debug_geometry(&mut self) -> Result<()> {
        use crate::math::frustum::frustum_to_line_mesh;
        let identity = Matrix4::identity();
        // debug lines live in world space, projected by the view
        let transform = [self.view_projection_jittered, identity];

        if self.freeze_and_draw_camera_frustum {
            let frustum = *self
                .frozen_camera_frustum
                .get_or_insert(self.camera_frustum);
            let (positions, indices) = frustum_to_line_mesh(&frustum);
            self.backend.update_dynamic_meshes(
                &[self.camera_frustum_mesh],
                &[positions],
                &[indices],
            );
            self.backend.draw_dynamic_meshes(
                &[self.camera_frustum_mesh],
                &[transform],
                &[self.debug_geo_pass],
            );
        } else {
            self.frozen_camera_frustum = None;
        }

        if self.draw_shadow_frustum {
            let sun_direction = {
                let d = self.global_info.sun_direction;
                Vector3::new(d.x, d.y, d.z)
            };
            let shadow_frustum =
                compute_orthogonal_frustum_fitted_to_camera(&self.camera_frustum, sun_direction);
            let (positions, indices) = frustum_to_line_mesh(&shadow_frustum);
            self.backend.update_dynamic_meshes(
                &[self.shadow_frustum_mesh],
                &[positions],
                &[indices],
            );
            self.backend.draw_dynamic_meshes(
                &[self.shadow_frustum_mesh],
                &[transform],
                &[self.debug_geo_pass],
            );
        }

        if self.draw_bounding_boxes {
            // grow the pool of host visible meshes on demand
            while self.bb_debug_meshes.len() < self.meshes_to_draw.len() {
                let new_meshes = self.backend.create_dynamic_meshes(&[20], &[38])?;
                self.bb_debug_meshes.push(new_meshes[0]);
            }

            // consecutive strip positions connect as a line list
            let strip_indices: Vec<u32> = (0..19u32).flat_map(|i| vec![i, i + 1]).collect();
            let handles = self.meshes_to_draw.clone();
            for (debug_index, handle) in handles.iter().enumerate() {
                let state = &self.mesh_states[handle.index as usize];
                let world_bb = state.bounding_box.transformed(&state.model_matrix);
                let mesh = self.bb_debug_meshes[debug_index];
                self.backend.update_dynamic_meshes(
                    &[mesh],
                    &[world_bb.to_line_strip()],
                    &[strip_indices.clone()],
                );
                self.backend.draw_dynamic_meshes(
                    &[mesh],
                    &[transform],
                    &[self.debug_geo_pass],
                );
            }
        }
        Ok(())
    }

    /// Cull and enqueue the mesh draws for prepass, main pass and
    /// the shadow cascades.
    fn issue_culled_draws(&mut self) {
        let meshes = std::mem::take(&mut self.meshes_to_draw);
        self.stats.mesh_count = meshes.len() as u32;

        let mut main_meshes = Vec::new();
        let mut main_matrices = Vec::new();
        let mut prepass_matrices = Vec::new();
        let mut shadow_meshes = Vec::new();
        let mut shadow_matrices = Vec::new();

        let sun_direction = {
            let d = self.global_info.sun_direction;
            Vector3::new(d.x, d.y, d.z)
        };
        let shadow_frustum =
            compute_orthogonal_frustum_fitted_to_camera(&self.camera_frustum, sun_direction)
                .with_near_plane_extended(sun_direction, shadows::SHADOW_NEAR_PLANE_EXTENSION);

        for handle in meshes.iter() {
            let state = &mut self.mesh_states[handle.index as usize];
            let world_bb = state.bounding_box.transformed(&state.model_matrix);

            if is_aabb_intersecting_frustum(&self.camera_frustum, &world_bb) {
                main_meshes.push(state.backend_handle);
                main_matrices.push([
                    self.view_projection_jittered * state.model_matrix,
                    state.model_matrix,
                ]);
                prepass_matrices.push([
                    self.view_projection_jittered * state.model_matrix,
                    self.previous_view_projection_jittered * state.previous_model_matrix,
                ]);
                self.stats.main_pass_drawcalls += 1;
            }

            if is_aabb_intersecting_frustum(&shadow_frustum, &world_bb) {
                shadow_meshes.push(state.backend_handle);
                shadow_matrices.push([state.model_matrix, state.model_matrix]);
                self.stats.shadow_pass_drawcalls += 1;
            }

            state.previous_model_matrix = state.model_matrix;
        }

        self.backend
            .draw_meshes(&main_meshes, &main_matrices, &[self.main_pass]);
        self.backend
            .draw_meshes(&main_meshes, &prepass_matrices, &[self.depth_prepass]);
        let cascade_passes = self.shadows.cascade_passes().to_vec();
        self.backend
            .draw_meshes(&shadow_meshes, &shadow_matrices, &cascade_passes);

        // the sky cube draws with the identity transform
        let identity = Matrix4::identity();
        self.backend.draw_meshes(
            &[self.sky_cube],
            &[[identity, identity]],
            &[self.sky.sky_draw_pass()],
        );
    }

    pub fn render_frame(&mut self) -> Result<()> {
        if self.minimized || self.backend.is_minimized() {
            return Ok(());
        }

        // pre frame maintenance
        self.backend.update_shader_code();
        self.apply_pending_resize()?;
        if self.main_pass_shader_stale {
            self.main_pass_shader_stale = false;
            let descriptions = Self::forward_shader_descriptions(
                &self.shading_config,
                self.sky.specular_probe_mip_count(),
            );
            self.backend
                .update_graphic_pass_shader_description(self.main_pass, descriptions)?;
            let cube_sampler = self.cube_sampler;
            let brdf = self.shading_config.diffuse_brdf as i32;
            self.sky
                .update_diffuse_brdf(&mut self.backend, brdf, cube_sampler)?;
        }

        self.backend.new_frame()?;
        self.update_camera_and_global_info();
        self.update_sdf_scene_if_dirty();

        let (width, height) = (self.screen_width, self.screen_height);
        let current = (self.frame_index % 2) as usize;
        let previous = 1 - current;

        // one time environment preparation
        let mut first_frame_parents = Vec::new();
        if self.first_frame {
            first_frame_parents = self.sky.issue_first_frame_preparation(
                &mut self.backend,
                self.hdri_sampler,
                self.cube_sampler,
            );
        }

        /*
         * depth prepass with motion vectors
         */
        let mut prepass = PassExecution::new(self.depth_prepass);
        prepass.framebuffer = Some(self.frame_targets[current].prepass_framebuffer);
        self.backend.set_pass_execution(prepass);

        /*
         * hi-z depth pyramid
         */
        let pyramid_pass = self.depth_pyramid.compute_pyramid(
            &mut self.backend,
            self.frame_targets[current].depth,
            self.clamped_depth_sampler,
            self.depth_prepass,
            width,
            height,
        );

        /*
         * sun light matrices and shadow cascades
         */
        let light_matrix_pass = self.shadows.compute_light_matrices(
            &mut self.backend,
            self.depth_pyramid.pyramid,
            self.depth_pyramid.lowest_mip(),
            self.default_texel_sampler,
            pyramid_pass,
        );
        self.shadows.issue_cascade_executions(&mut self.backend);

        /*
         * sdf traced indirect diffuse
         */
        let sdf_dependencies = sdfgi::SdfTraceDependencies {
            depth: self.frame_targets[current].depth,
            motion: self.frame_targets[current].motion,
            previous_motion: self.frame_targets[previous].motion,
            depth_pyramid: self.depth_pyramid.pyramid,
            depth_pyramid_mip_count: self.depth_pyramid.mip_count(),
            shadow_map: self.shadows.shadow_maps[SHADOW_CASCADE_COUNT as usize - 1],
            light_buffer: self.exposure.light_buffer,
            sun_shadow_info_buffer: self.shadows.sun_shadow_info_buffer,
            parents: vec![pyramid_pass, self.shadows.cascade_passes()[SHADOW_CASCADE_COUNT as usize - 1]],
        };
        let camera_frustum = self.camera_frustum;
        let previous_vp = self.previous_view_projection_jittered;
        let indirect_pass = self.sdfgi.compute_indirect_lighting(
            &mut self.backend,
            &sdf_dependencies,
            &camera_frustum,
            self.default_texel_sampler,
            self.color_sampler,
            self.frame_index,
            width,
            height,
            &previous_vp,
        );
        let (indirect_y_sh, indirect_co_cg) = self.sdfgi.indirect_lighting_results();

        /*
         * forward shading
         */
        let mut forward = PassExecution::new(self.main_pass);
        forward.framebuffer = Some(self.frame_targets[current].color_framebuffer);
        forward.resources.storage_buffers = vec![
            StorageBufferResource::new(self.shadows.sun_shadow_info_buffer, true, 0),
            StorageBufferResource::new(self.exposure.light_buffer, true, 1),
        ];
        forward.resources.sampled_images = vec![
            ImageResource::new(self.shadows.shadow_maps[0], 0, 2),
            ImageResource::new(self.shadows.shadow_maps[1], 0, 3),
            ImageResource::new(self.shadows.shadow_maps[2], 0, 4),
            ImageResource::new(self.shadows.shadow_maps[3], 0, 5),
            ImageResource::new(self.sky.diffuse_probe, 0, 6),
            ImageResource::new(self.sky.specular_probe, 0, 7),
            ImageResource::new(self.sky.brdf_lut, 0, 8),
            ImageResource::new(indirect_y_sh, 0, 9),
            ImageResource::new(indirect_co_cg, 0, 10),
        ];
        forward.resources.samplers = vec![
            SamplerResource::new(self.shadow_sampler, 11),
            SamplerResource::new(self.cube_sampler, 12),
            SamplerResource::new(self.lut_sampler, 13),
            SamplerResource::new(self.color_sampler, 14),
        ];
        forward.parents = vec![
            self.depth_prepass,
            light_matrix_pass,
            indirect_pass,
        ];
        forward.parents.extend_from_slice(self.shadows.cascade_passes());
        forward.parents.extend(first_frame_parents);
        self.backend.set_pass_execution(forward);

        /*
         * sky
         */
        let sky_pass = self.sky.issue_sky_draw(
            &mut self.backend,
            self.frame_targets[current].color_framebuffer,
            self.cube_sampler,
            self.exposure.light_buffer,
            &[self.main_pass],
        );

        /*
         * debug geometry
         */
        let mut debug_geo = PassExecution::new(self.debug_geo_pass);
        debug_geo.framebuffer = Some(self.frame_targets[current].color_framebuffer);
        debug_geo.parents = vec![sky_pass];
        self.backend.set_pass_execution(debug_geo);

        /*
         * auto exposure over the lit frame
         */
        let exposure_pass = self.exposure.compute_exposure(
            &mut self.backend,
            self.frame_targets[current].color,
            self.default_texel_sampler,
            self.debug_geo_pass,
            width,
            height,
        );

        /*
         * taa supersampling and resolve
         */
        let dispatch = [(width + 7) / 8, (height + 7) / 8, 1];
        let supersample_pass = self.taa.compute_temporal_supersampling(
            &mut self.backend,
            self.frame_targets[current].color,
            self.frame_targets[previous].color,
            self.frame_targets[current].motion,
            self.frame_targets[current].depth,
            self.supersample_target,
            self.color_sampler,
            &[self.debug_geo_pass],
            dispatch,
        );
        let taa_pass = self.taa.compute_temporal_filter(
            &mut self.backend,
            self.supersample_target,
            self.taa.history_buffers[previous],
            self.taa.history_buffers[current],
            self.taa_output,
            self.frame_targets[current].motion,
            self.color_sampler,
            supersample_pass,
            dispatch,
        );

        /*
         * bloom on the resolved output
         */
        let bloom_settings = self.bloom_settings;
        let bloom_pass = self.bloom.compute_bloom(
            &mut self.backend,
            taa_pass,
            self.taa_output,
            self.color_sampler,
            &bloom_settings,
            width,
            height,
        );

        /*
         * tonemap into the swapchain image
         */
        let swapchain_image = self.backend.swapchain_input_image();
        let mut tonemap = PassExecution::new(self.tonemapping_pass);
        tonemap.resources.storage_images = vec![ImageResource::new(swapchain_image, 0, 0)];
        tonemap.resources.sampled_images = vec![ImageResource::new(self.taa_output, 0, 1)];
        tonemap.resources.storage_buffers =
            vec![StorageBufferResource::new(self.exposure.light_buffer, true, 2)];
        tonemap.resources.samplers = vec![SamplerResource::new(self.color_sampler, 3)];
        tonemap.parents = vec![bloom_pass, exposure_pass];
        tonemap.dispatch_count = dispatch;
        self.backend.set_pass_execution(tonemap);

        /*
         * draws, overlay, submission
         */
        self.update_debug_geometry()?;
        self.issue_culled_draws();
        let ui_data = std::mem::take(&mut self.ui_draw_data);
        self.backend.set_ui_draw_data(ui_data);

        self.backend.render_frame()?;

        self.first_frame = false;
        self.frame_index += 1;
        self.refresh_cached_timings();
        Ok(())
    }

    fn refresh_cached_timings(&mut self) {
        let now = utils::timing::get_current_millis();
        // 0.2 seconds between updates keeps the numbers readable
        if now.saturating_sub(self.timing_last_update_millis) < 200 {
            return;
        }
        self.timing_last_update_millis = now;
        self.cached_timings = self.backend.render_timings().to_vec();
    }

    pub fn render_timings(&self) -> &[RenderPassTime] {
        &self.cached_timings
    }

    pub fn drawcall_stats(&self) -> (u32, u32, u32) {
        (
            self.stats.mesh_count,
            self.stats.main_pass_drawcalls,
            self.stats.shadow_pass_drawcalls,
        )
    }

    pub fn memory_stats(&self) -> (u64, u64) {
        self.backend.memory_stats()
    }

    /// fallback textures used when a load fails:
    /// albedo, normal, specular, sky cube
    pub fn default_textures(&self) -> [ImageHandle; 4] {
        [
            self.default_albedo_texture,
            self.default_normal_texture,
            self.default_specular_texture,
            self.default_sky_texture,
        ]
    }

    /// (color, motion, depth) images of one of the two target sets
    pub fn frame_target_images(&self, index: usize) -> (ImageHandle, ImageHandle, ImageHandle) {
        let targets = &self.frame_targets[index];
        (targets.color, targets.motion, targets.depth)
    }

    /// color buffer the most recently rendered frame wrote
    pub fn last_color_buffer(&self) -> ImageHandle {
        self.frame_targets[(self.frame_index.wrapping_sub(1) % 2) as usize].color
    }

    pub fn depth_pyramid_image(&self) -> ImageHandle {
        self.depth_pyramid.pyramid
    }
}

/// A unit cube in the full vertex layout, used for the sky box.
/// Normals point outward, the bitangent slot carries the actual
/// bitangent.
fn build_cube_mesh_data() -> MeshDataInternal {
    let positions = [
        Vector3::new(-1.0f32, -1.0, -1.0),
        Vector3::new(1.0, -1.0, -1.0),
        Vector3::new(1.0, 1.0, -1.0),
        Vector3::new(-1.0, 1.0, -1.0),
        Vector3::new(-1.0, -1.0, 1.0),
        Vector3::new(1.0, -1.0, 1.0),
        Vector3::new(1.0, 1.0, 1.0),
        Vector3::new(-1.0, 1.0, 1.0),
    ];

    let indices: [u32; 36] = [
        0, 1, 2, 2, 3, 0, // back
        4, 6, 5, 6, 4, 7, // front
        0, 3, 7, 7, 4, 0, // left
        1, 5, 6, 6, 2, 1, // right
        3, 2, 6, 6, 7, 3, // top
        0, 4, 5, 5, 1, 0, // bottom
    ];

    let mut vertex_buffer = Vec::new();
    for p in positions.iter() {
        // position
        vertex_buffer.extend_from_slice(&p.x.to_le_bytes());
        vertex_buffer.extend_from_slice(&p.y.to_le_bytes());
        vertex_buffer.extend_from_slice(&p.z.to_le_bytes());
        // uv
        let uv = packing::vec2_to_f16(Vector2::new(0.0, 0.0));
        vertex_buffer.extend_from_slice(&uv[0].to_le_bytes());
        vertex_buffer.extend_from_slice(&uv[1].to_le_bytes());
        // normal, tangent and bitangent, padded to 8 bytes each
        let normal = p.normalize();
        let tangent = Vector3::new(-normal.z, 0.0, normal.x);
        let bitangent = normal.cross(tangent);
        for v in [normal, tangent, bitangent].iter() {
            let packed = packing::vec3_to_normalized_r10g10b10a2(*v);
            vertex_buffer.extend_from_slice(&packed.value.to_le_bytes());
            vertex_buffer.extend_from_slice(&[0u8; 4]);
        }
    }

    let mut index_buffer = Vec::new();
    for index in indices.iter() {
        index_buffer.extend_from_slice(&(*index as u16).to_le_bytes());
    }

    MeshDataInternal {
        index_count: 36,
        vertex_count: 8,
        index_buffer: index_buffer,
        vertex_buffer: vertex_buffer,
        bounding_box: AxisAlignedBoundingBox {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        },
        albedo_texture: None,
        normal_texture: None,
        specular_texture: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_mesh_matches_layout() {
        let cube = build_cube_mesh_data();
        assert_eq!(cube.vertex_count, 8);
        assert_eq!(cube.index_count, 36);
        assert_eq!(
            cube.vertex_buffer.len(),
            8 * crate::formats::FULL_VERTEX_BYTE_SIZE as usize
        );
        // 8 vertices fit in 16 bit indices
        assert_eq!(cube.index_buffer.len(), 36 * 2);
    }
}
