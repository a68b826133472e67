// The aurora renderer
//
// A forward shading physically based renderer over an explicit
// frame render graph. The backend owns all GPU resources behind
// typed handles and schedules passes with automatic barrier
// insertion; the frontend wires a fixed pipeline of depth prepass,
// hi-z pyramid, cascaded sun shadows, forward shading, SDF indirect
// diffuse, auto exposure, TAA, bloom and tonemapping.

pub mod backend;
pub mod barrier;
pub mod buffer;
pub mod camera;
pub mod desc;
pub mod descpool;
pub mod device;
pub mod display;
pub mod formats;
pub mod frontend;
pub mod image;
pub mod instance;
pub mod math;
pub mod memory;
pub mod mesh;
pub mod pass;
pub mod reflection;
pub mod registry;
pub mod shader;
pub mod timing;
pub mod transfer;
pub mod ui;
pub mod vertex;

pub use backend::RenderBackend;
pub use camera::{Camera, CameraExtrinsic, CameraIntrinsic};
pub use desc::*;
pub use formats::{parse_dds, read_mesh_binaries, MeshBinary, TexturePaths};
pub use frontend::{FrontendMeshHandle, MeshTextures, RenderFrontend};
pub use timing::RenderPassTime;
pub use ui::{UiDrawCommand, UiDrawData};

use thiserror::Error;

/// Aurora errors
///
/// Most Vulkan failures are not recoverable for a renderer, these
/// exist so startup problems propagate to the caller with a usable
/// message instead of a panic deep inside the backend.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum AuroraError {
    #[error("The required vulkan extensions are not available")]
    VK_NOT_ALL_EXTENSIONS_AVAILABLE,
    #[error("The vulkan surface is not supported")]
    VK_SURF_NOT_SUPPORTED,
    #[error("No suitable physical device found")]
    NO_SUITABLE_PHYSICAL_DEVICE,
    #[error("The physical device is missing required features")]
    MISSING_DEVICE_FEATURES,
    #[error("Out of device memory")]
    OUT_OF_DEVICE_MEMORY,
    #[error("No suitable memory type for this allocation")]
    NO_SUITABLE_MEMORY_TYPE,
    #[error("Could not create a descriptor pool")]
    DESCRIPTOR_POOL_CREATION_FAILED,
    #[error("Shader compilation failed")]
    SHADER_COMPILE_FAILED,
    #[error("Shader reflection failed")]
    SHADER_REFLECTION_FAILED,
    #[error("Image could not be loaded")]
    IMAGE_LOAD_FAILED,
    #[error("Mesh data is malformed")]
    INVALID_MESH_DATA,
    #[error("A required format feature is missing")]
    FORMAT_FEATURE_MISSING,
    #[error("The swapchain is out of date")]
    SWAPCHAIN_OUT_OF_DATE,
    #[error("Timeout while waiting for the GPU")]
    TIMEOUT,
    #[error("Invalid operation")]
    INVALID,
}

pub type Result<T> = std::result::Result<T, AuroraError>;

/// The public renderer object.
///
/// This is a thin facade over the frontend; applications create an
/// Aurora for a window, feed it meshes and a camera and call
/// new_frame/render_frame once per frame.
pub struct Aurora {
    au_frontend: RenderFrontend,
}

impl Aurora {
    pub fn new(
        display_handle: raw_window_handle::RawDisplayHandle,
        window_handle: raw_window_handle::RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Aurora> {
        Ok(Aurora {
            au_frontend: RenderFrontend::setup(display_handle, window_handle, width, height)?,
        })
    }

    pub fn get_resolution(&self) -> (u32, u32) {
        self.au_frontend.resolution()
    }

    /// Resize the output. A zero area marks the window minimized
    /// and frames are skipped until it is restored.
    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.au_frontend.set_resolution(width, height);
    }

    pub fn set_camera_extrinsic(&mut self, extrinsic: &CameraExtrinsic) {
        self.au_frontend.set_camera_extrinsic(extrinsic);
    }

    /// Register a texture described by CPU side data, for use in
    /// mesh materials.
    pub fn create_image(&mut self, desc: &ImageDescription) -> Result<ImageHandle> {
        self.au_frontend.create_image(desc)
    }

    /// Register preprocessed meshes together with their resolved
    /// textures. Missing textures fall back to defaults.
    pub fn create_meshes(
        &mut self,
        meshes: &[MeshBinary],
        textures: &[MeshTextures],
    ) -> Result<Vec<FrontendMeshHandle>> {
        self.au_frontend.create_meshes(meshes, textures)
    }

    pub fn set_model_matrix(&mut self, handle: FrontendMeshHandle, matrix: cgmath::Matrix4<f32>) {
        self.au_frontend.set_model_matrix(handle, matrix);
    }

    /// Queue meshes to be drawn this frame
    pub fn issue_mesh_draws(&mut self, meshes: &[FrontendMeshHandle]) {
        self.au_frontend.issue_mesh_draws(meshes);
    }

    /// Inject the overlay draw stream for this frame
    pub fn set_ui_draw_data(&mut self, draw_data: UiDrawData) {
        self.au_frontend.set_ui_draw_data(draw_data);
    }

    pub fn new_frame(&mut self) {
        self.au_frontend.new_frame();
    }

    pub fn render_frame(&mut self) -> Result<()> {
        self.au_frontend.render_frame()
    }

    /// Per pass GPU timings of the last completed frame
    pub fn render_timings(&self) -> &[RenderPassTime] {
        self.au_frontend.render_timings()
    }

    /// (allocated, used) bytes of GPU pool memory
    pub fn memory_stats(&self) -> (u64, u64) {
        self.au_frontend.memory_stats()
    }

    pub fn frontend(&self) -> &RenderFrontend {
        &self.au_frontend
    }

    pub fn frontend_mut(&mut self) -> &mut RenderFrontend {
        &mut self.au_frontend
    }
}
