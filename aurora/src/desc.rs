// Resource and pass descriptions
//
// These types are the vocabulary between frontend and backend.
// Descriptions say how a resource should be created, resource
// bindings say how a pass uses it this frame. The shader dictates
// what must be bound where; bindings may change from frame to frame
// while descriptions are fixed at creation.

use crate::registry::Handle;
use cgmath::{Matrix4, SquareMatrix, Vector4};
use std::path::PathBuf;

/*
 * Handle markers
 *
 * One zero-sized marker per registry. Uniform and storage buffers
 * store the same object type but must not be interchangeable.
 */
pub enum ImageTag {}
pub enum UniformBufferTag {}
pub enum StorageBufferTag {}
pub enum SamplerTag {}
pub enum MeshTag {}
pub enum DynamicMeshTag {}
pub enum PassTag {}
pub enum FramebufferTag {}

pub type ImageHandle = Handle<ImageTag>;
pub type UniformBufferHandle = Handle<UniformBufferTag>;
pub type StorageBufferHandle = Handle<StorageBufferTag>;
pub type SamplerHandle = Handle<SamplerTag>;
pub type MeshHandle = Handle<MeshTag>;
pub type DynamicMeshHandle = Handle<DynamicMeshTag>;
pub type PassHandle = Handle<PassTag>;
pub type FramebufferHandle = Handle<FramebufferTag>;

/*
 * Images
 */

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageType {
    Type1D,
    Type2D,
    Type3D,
    TypeCube,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    R8,
    RG8,
    RGBA8,
    RG16Float,
    RG32Float,
    RGBA16Float,
    RGBA32Float,
    R11G11B10Float,
    Depth16,
    Depth32,
    BC1,
    BC3,
    BC5,
}

/// How many mip levels an image gets
///
/// FullChainAlreadyInData means the initial data contains the whole
/// chain, so the full count is allocated but no mips are generated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MipCount {
    One,
    FullChain,
    Manual(u32),
    FullChainAlreadyInData,
}

bitflags::bitflags! {
    pub struct ImageUsage: u32 {
        const STORAGE    = 0x1;
        const SAMPLED    = 0x2;
        const ATTACHMENT = 0x4;
    }
}

bitflags::bitflags! {
    /// Which attributes a vertex shader consumes. Locations map
    /// 1:1 to the fixed attribute set.
    pub struct VertexInputFlags: u32 {
        const POSITION  = 0x1;
        const UV        = 0x2;
        const NORMAL    = 0x4;
        const TANGENT   = 0x8;
        const BITANGENT = 0x10;
    }
}

impl VertexInputFlags {
    /// Flag for a vertex input location decoration
    pub fn from_location(location: u32) -> Option<VertexInputFlags> {
        match location {
            0 => Some(VertexInputFlags::POSITION),
            1 => Some(VertexInputFlags::UV),
            2 => Some(VertexInputFlags::NORMAL),
            3 => Some(VertexInputFlags::TANGENT),
            4 => Some(VertexInputFlags::BITANGENT),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Material textures a pass samples, derived from the fixed
    /// set 2 binding numbers during reflection. Every pass carries
    /// its own material set layout over the subset it uses.
    pub struct MaterialFeatureFlags: u32 {
        const ALBEDO_TEXTURE   = 0x1;
        const NORMAL_TEXTURE   = 0x2;
        const SPECULAR_TEXTURE = 0x4;
    }
}

#[derive(Clone)]
pub struct ImageDescription {
    pub initial_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub image_type: ImageType,
    pub format: ImageFormat,
    pub usage: ImageUsage,
    pub mip_count: MipCount,
    pub auto_create_mips: bool,
}

impl Default for ImageDescription {
    fn default() -> Self {
        Self {
            initial_data: Vec::new(),
            width: 1,
            height: 1,
            depth: 1,
            image_type: ImageType::Type2D,
            format: ImageFormat::RGBA8,
            usage: ImageUsage::SAMPLED,
            mip_count: MipCount::One,
            auto_create_mips: false,
        }
    }
}

/*
 * Buffers
 */

#[derive(Clone, Default)]
pub struct BufferDescription {
    pub size: u64,
    pub initial_data: Vec<u8>,
}

/*
 * Samplers
 */

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplerInterpolation {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplerWrapping {
    Clamp,
    Color,
    Repeat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplerBorderColor {
    White,
    Black,
}

#[derive(Copy, Clone)]
pub struct SamplerDescription {
    pub interpolation: SamplerInterpolation,
    pub wrapping: SamplerWrapping,
    pub use_anisotropy: bool,
    pub max_anisotropy: f32,
    pub border_color: SamplerBorderColor,
    pub max_mip: u32,
}

impl Default for SamplerDescription {
    fn default() -> Self {
        Self {
            interpolation: SamplerInterpolation::Nearest,
            wrapping: SamplerWrapping::Repeat,
            use_anisotropy: false,
            max_anisotropy: 8.0,
            border_color: SamplerBorderColor::Black,
            max_mip: 1,
        }
    }
}

/*
 * Pass configuration
 */

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RasterizationMode {
    Fill,
    Line,
    Point,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Copy, Clone)]
pub struct RasterizationConfig {
    pub mode: RasterizationMode,
    pub cull_mode: CullMode,
    pub clamp_depth: bool,
}

impl Default for RasterizationConfig {
    fn default() -> Self {
        Self {
            mode: RasterizationMode::Fill,
            cull_mode: CullMode::None,
            clamp_depth: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DepthFunction {
    Never,
    Always,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
}

#[derive(Copy, Clone)]
pub struct DepthTest {
    pub function: DepthFunction,
    pub write: bool,
}

impl Default for DepthTest {
    fn default() -> Self {
        Self {
            function: DepthFunction::Always,
            write: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendState {
    None,
    Additive,
}

/// Attachments are fixed at pass creation and cannot change
/// from frame to frame, only the framebuffer may be swapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachmentLoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Copy, Clone)]
pub struct Attachment {
    pub image: ImageHandle,
    pub mip_level: u32,
    pub load_op: AttachmentLoadOp,
}

impl Attachment {
    pub fn new(image: ImageHandle, mip_level: u32, load_op: AttachmentLoadOp) -> Self {
        Self {
            image: image,
            mip_level: mip_level,
            load_op: load_op,
        }
    }
}

/*
 * Shaders
 */

/// Integer specialisation constants baked into a pipeline.
/// Changing these forces a shader recompile and pass recreation.
#[derive(Clone, Default, PartialEq)]
pub struct ShaderSpecialisationConstants {
    pub ids: Vec<u32>,
    pub values: Vec<i32>,
}

impl ShaderSpecialisationConstants {
    pub fn push(&mut self, id: u32, value: i32) {
        self.ids.push(id);
        self.values.push(value);
    }
}

#[derive(Clone)]
pub struct ShaderDescription {
    /// relative to resources/shaders/
    pub src_path_relative: PathBuf,
    pub specialisation_constants: ShaderSpecialisationConstants,
}

impl ShaderDescription {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            src_path_relative: path.into(),
            specialisation_constants: ShaderSpecialisationConstants::default(),
        }
    }
}

#[derive(Clone)]
pub struct GraphicPassShaderDescriptions {
    pub vertex: ShaderDescription,
    pub fragment: ShaderDescription,
    pub geometry: Option<ShaderDescription>,
    pub tesselation_control: Option<ShaderDescription>,
    pub tesselation_evaluation: Option<ShaderDescription>,
}

impl GraphicPassShaderDescriptions {
    pub fn new(vertex: ShaderDescription, fragment: ShaderDescription) -> Self {
        Self {
            vertex: vertex,
            fragment: fragment,
            geometry: None,
            tesselation_control: None,
            tesselation_evaluation: None,
        }
    }
}

#[derive(Clone)]
pub struct GraphicPassDescription {
    pub name: String,
    pub shader_descriptions: GraphicPassShaderDescriptions,
    pub attachments: Vec<Attachment>,
    /// ignored without tesselation shaders
    pub patch_control_points: u32,
    pub rasterization: RasterizationConfig,
    pub blending: BlendState,
    pub depth_test: DepthTest,
}

#[derive(Clone)]
pub struct ComputePassDescription {
    pub name: String,
    pub shader_description: ShaderDescription,
}

/*
 * Per-frame pass resources
 */

/// If an image is bound as a storage image it is considered to be
/// written to, causing additional barriers.
#[derive(Copy, Clone)]
pub struct ImageResource {
    pub image: ImageHandle,
    pub mip_level: u32,
    pub binding: u32,
}

impl ImageResource {
    pub fn new(image: ImageHandle, mip_level: u32, binding: u32) -> Self {
        Self {
            image: image,
            mip_level: mip_level,
            binding: binding,
        }
    }
}

#[derive(Copy, Clone)]
pub struct SamplerResource {
    pub sampler: SamplerHandle,
    pub binding: u32,
}

impl SamplerResource {
    pub fn new(sampler: SamplerHandle, binding: u32) -> Self {
        Self {
            sampler: sampler,
            binding: binding,
        }
    }
}

#[derive(Copy, Clone)]
pub struct UniformBufferResource {
    pub buffer: UniformBufferHandle,
    pub binding: u32,
}

impl UniformBufferResource {
    pub fn new(buffer: UniformBufferHandle, binding: u32) -> Self {
        Self {
            buffer: buffer,
            binding: binding,
        }
    }
}

#[derive(Copy, Clone)]
pub struct StorageBufferResource {
    pub buffer: StorageBufferHandle,
    pub read_only: bool,
    pub binding: u32,
}

impl StorageBufferResource {
    pub fn new(buffer: StorageBufferHandle, read_only: bool, binding: u32) -> Self {
        Self {
            buffer: buffer,
            read_only: read_only,
            binding: binding,
        }
    }
}

#[derive(Clone, Default)]
pub struct PassResources {
    pub samplers: Vec<SamplerResource>,
    pub sampled_images: Vec<ImageResource>,
    pub storage_images: Vec<ImageResource>,
    pub uniform_buffers: Vec<UniformBufferResource>,
    pub storage_buffers: Vec<StorageBufferResource>,
}

/// Everything needed to run one pass this frame
///
/// Parents are the passes whose results this one consumes; the
/// scheduler orders executions so every parent runs first. The
/// parent relation must be acyclic, a cycle is a caller bug.
#[derive(Clone)]
pub struct PassExecution {
    pub pass: PassHandle,
    pub resources: PassResources,
    pub parents: Vec<PassHandle>,
    /// compute only
    pub dispatch_count: [u32; 3],
    /// compute only, pushed before dispatch
    pub push_constants: Vec<u8>,
    /// graphics only, overrides the pass' own framebuffer
    pub framebuffer: Option<FramebufferHandle>,
}

impl PassExecution {
    pub fn new(pass: PassHandle) -> Self {
        Self {
            pass: pass,
            resources: PassResources::default(),
            parents: Vec::new(),
            dispatch_count: [1, 1, 1],
            push_constants: Vec::new(),
            framebuffer: None,
        }
    }
}

/*
 * Global shader info
 *
 * Device visible uniform block bound at set 0, rebuilt every frame.
 * Layout must match globalInfo.inc on the shader side (std140, all
 * members are vec4/mat4 or packed into 4-float runs).
 */
#[repr(C)]
#[derive(Copy, Clone)]
pub struct GlobalShaderInfo {
    pub view_projection: Matrix4<f32>,
    pub previous_view_projection: Matrix4<f32>,
    /// w component is the sun illuminance in lux
    pub sun_color: Vector4<f32>,
    pub sun_direction: Vector4<f32>,
    pub camera_position: Vector4<f32>,
    pub camera_forward: Vector4<f32>,
    pub camera_up: Vector4<f32>,
    pub camera_right: Vector4<f32>,
    /// xy current jitter, zw previous jitter, in uv space
    pub jitter: Vector4<f32>,
    pub screen_width: f32,
    pub screen_height: f32,
    pub near_plane: f32,
    pub far_plane: f32,
    pub exposure_offset: f32,
    pub exposure_adaption_speed_ev_per_sec: f32,
    pub delta_time: f32,
    pub time: f32,
    pub mip_bias: f32,
    /// set for one frame after a camera teleport, temporal history is rejected
    pub camera_cut: u32,
    pub frame_index: u32,
    pub sky_illuminance_lux: f32,
}

impl Default for GlobalShaderInfo {
    fn default() -> Self {
        Self {
            view_projection: Matrix4::identity(),
            previous_view_projection: Matrix4::identity(),
            sun_color: Vector4::new(1.0, 1.0, 1.0, 80000.0),
            sun_direction: Vector4::new(0.0, -1.0, 0.0, 0.0),
            camera_position: Vector4::new(0.0, 0.0, 0.0, 1.0),
            camera_forward: Vector4::new(0.0, 0.0, 1.0, 0.0),
            camera_up: Vector4::new(0.0, 1.0, 0.0, 0.0),
            camera_right: Vector4::new(1.0, 0.0, 0.0, 0.0),
            jitter: Vector4::new(0.0, 0.0, 0.0, 0.0),
            screen_width: 800.0,
            screen_height: 600.0,
            near_plane: 0.1,
            far_plane: 300.0,
            exposure_offset: 0.0,
            exposure_adaption_speed_ev_per_sec: 2.0,
            delta_time: 0.016,
            time: 0.0,
            mip_bias: 0.0,
            camera_cut: 0,
            frame_index: 0,
            sky_illuminance_lux: 30000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    /// the shader side block is std140; scalars are packed in runs
    /// of four floats so the repr(C) layout lines up exactly
    #[test]
    fn global_info_layout_matches_shader_block() {
        assert_eq!(offset_of!(GlobalShaderInfo, sun_color), 128);
        assert_eq!(offset_of!(GlobalShaderInfo, camera_position), 160);
        assert_eq!(offset_of!(GlobalShaderInfo, jitter), 224);
        assert_eq!(offset_of!(GlobalShaderInfo, screen_width), 240);
        assert_eq!(offset_of!(GlobalShaderInfo, exposure_offset), 256);
        assert_eq!(offset_of!(GlobalShaderInfo, mip_bias), 272);
        assert_eq!(std::mem::size_of::<GlobalShaderInfo>(), 288);
    }

    #[test]
    fn vertex_flags_cover_all_locations() {
        for location in 0..5 {
            assert!(VertexInputFlags::from_location(location).is_some());
        }
        assert!(VertexInputFlags::from_location(5).is_none());
    }
}
