// Render pass objects and the pass factory
//
// A pass is created once from a description plus compiled shaders:
// reflection drives the descriptor layouts and vertex input, the
// description drives the fixed function state. Hot reload destroys
// and recreates the whole pass under device idle, keeping the
// handle and description.

use crate::desc::{
    Attachment, AttachmentLoadOp, BlendState, ComputePassDescription, CullMode, DepthFunction,
    FramebufferHandle, GraphicPassDescription, ImageHandle, MaterialFeatureFlags, PassHandle,
    RasterizationMode, ShaderSpecialisationConstants, VertexInputFlags,
};
use crate::descpool::{DescriptorPoolManager, PoolSizes};
use crate::device::Device;
use crate::image::is_vk_depth_format;
use crate::mesh::MeshRenderCommand;
use crate::reflection::{self, GraphicShaderSpirV, ShaderLayout, ShaderReflection};
use crate::vertex;
use crate::{AuroraError, Result};
use ash::vk;

use std::ffi::CString;

/// Byte size of the push constant block: primary and secondary
/// matrix, pushed per draw in the vertex stage. Compute passes get
/// a range of the same size for their optional per-dispatch blob.
pub const PUSH_CONSTANT_RANGE_SIZE: u32 = 128;

pub struct GraphicPass {
    /// used to reconstruct the pass when reloading shaders
    pub desc: GraphicPassDescription,

    pub vk_render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub descriptor_set_layout: vk::DescriptorSetLayout,

    /// every pass carries its own material layout over the features
    /// its shaders sample; null when no material set is used
    pub material_set_layout: vk::DescriptorSetLayout,
    pub material_features: MaterialFeatureFlags,
    pub vertex_input_flags: VertexInputFlags,

    pub clear_values: Vec<vk::ClearValue>,
    pub attachments: Vec<ImageHandle>,
    /// default framebuffer over the described attachments,
    /// executions may override it for ping-ponged targets
    pub framebuffer: FramebufferHandle,

    /// draws queued for this frame, drained at frame end
    pub mesh_render_commands: Vec<MeshRenderCommand>,
    pub dynamic_mesh_render_commands: Vec<MeshRenderCommand>,
}

pub struct ComputePass {
    pub desc: ComputePassDescription,

    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
}

/// Graphic and compute passes share one handle namespace so the
/// frontend can declare parent relations without caring about the
/// kind. The scheduler matches on the variant.
pub enum Pass {
    Graphic(GraphicPass),
    Compute(ComputePass),
}

impl Pass {
    pub fn name(&self) -> &str {
        match self {
            Pass::Graphic(pass) => &pass.desc.name,
            Pass::Compute(pass) => &pass.desc.name,
        }
    }

    pub fn as_graphic(&self) -> Option<&GraphicPass> {
        match self {
            Pass::Graphic(pass) => Some(pass),
            Pass::Compute(_) => None,
        }
    }

    pub fn as_graphic_mut(&mut self) -> Option<&mut GraphicPass> {
        match self {
            Pass::Graphic(pass) => Some(pass),
            Pass::Compute(_) => None,
        }
    }
}

/// A framebuffer over concrete attachment images. Kept in its own
/// registry because temporal techniques render into per-frame
/// targets through the same pass.
pub struct Framebuffer {
    pub vk_framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub attachments: Vec<Attachment>,
    /// pass whose render pass object this framebuffer is compatible with
    pub pass: PassHandle,
}

/*
 * descriptor layout helpers
 */

/// Pass set layout from reflection. Bindings are visible in all
/// stages so one layout serves any stage combination.
pub fn create_descriptor_set_layout(
    dev: &Device,
    shader_layout: &ShaderLayout,
) -> Result<vk::DescriptorSetLayout> {
    let mut bindings = Vec::new();
    let mut push_bindings = |binding_list: &Vec<u32>, descriptor_type: vk::DescriptorType| {
        for &binding in binding_list {
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
                    .build(),
            );
        }
    };
    push_bindings(&shader_layout.sampler_bindings, vk::DescriptorType::SAMPLER);
    push_bindings(
        &shader_layout.sampled_image_bindings,
        vk::DescriptorType::SAMPLED_IMAGE,
    );
    push_bindings(
        &shader_layout.storage_image_bindings,
        vk::DescriptorType::STORAGE_IMAGE,
    );
    push_bindings(
        &shader_layout.uniform_buffer_bindings,
        vk::DescriptorType::UNIFORM_BUFFER,
    );
    push_bindings(
        &shader_layout.storage_buffer_bindings,
        vk::DescriptorType::STORAGE_BUFFER,
    );

    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe {
        dev.dev
            .create_descriptor_set_layout(&info, None)
            .or(Err(AuroraError::INVALID))
    }
}

/// Offset between a material texture binding and its sampler
/// binding: albedo image 0 / sampler 4, normal 1/5, specular 2/6.
const MATERIAL_SAMPLER_BINDING_OFFSET: u32 = 4;

fn material_feature_bindings(features: MaterialFeatureFlags) -> Vec<u32> {
    let mut bindings = Vec::new();
    if features.contains(MaterialFeatureFlags::ALBEDO_TEXTURE) {
        bindings.push(0);
    }
    if features.contains(MaterialFeatureFlags::NORMAL_TEXTURE) {
        bindings.push(1);
    }
    if features.contains(MaterialFeatureFlags::SPECULAR_TEXTURE) {
        bindings.push(2);
    }
    bindings
}

/// Material set layout over the features a pass samples.
/// Returns null for an empty feature set.
pub fn create_material_set_layout(
    dev: &Device,
    features: MaterialFeatureFlags,
) -> Result<vk::DescriptorSetLayout> {
    if features.is_empty() {
        return Ok(vk::DescriptorSetLayout::null());
    }

    let mut bindings = Vec::new();
    for binding in material_feature_bindings(features) {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        );
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding + MATERIAL_SAMPLER_BINDING_OFFSET)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        );
    }

    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe {
        dev.dev
            .create_descriptor_set_layout(&info, None)
            .or(Err(AuroraError::INVALID))
    }
}

/// Descriptor counts a reflected pass set consumes
pub fn pool_sizes_from_shader_layout(layout: &ShaderLayout) -> PoolSizes {
    PoolSizes {
        set_count: 1,
        sampled_image: layout.sampled_image_bindings.len() as u32,
        storage_image: layout.storage_image_bindings.len() as u32,
        uniform_buffer: layout.uniform_buffer_bindings.len() as u32,
        storage_buffer: layout.storage_buffer_bindings.len() as u32,
        sampler: layout.sampler_bindings.len() as u32,
    }
}

/// Descriptor counts a material set consumes
pub fn pool_sizes_from_material_flags(features: MaterialFeatureFlags) -> PoolSizes {
    let count = material_feature_bindings(features).len() as u32;
    PoolSizes {
        set_count: 1,
        sampled_image: count,
        storage_image: 0,
        uniform_buffer: 0,
        storage_buffer: 0,
        sampler: count,
    }
}

/// Pipeline layout over [global, pass, material] set layouts.
/// Graphic passes get the matrix push constant range in the vertex
/// stage, compute passes an equally sized range for their dispatch
/// blob.
pub fn create_pipeline_layout(
    dev: &Device,
    global_set_layout: vk::DescriptorSetLayout,
    pass_set_layout: vk::DescriptorSetLayout,
    material_set_layout: vk::DescriptorSetLayout,
    is_graphic_pass: bool,
) -> Result<vk::PipelineLayout> {
    let mut set_layouts = vec![global_set_layout, pass_set_layout];
    if material_set_layout != vk::DescriptorSetLayout::null() {
        set_layouts.push(material_set_layout);
    }

    let stage = if is_graphic_pass {
        vk::ShaderStageFlags::VERTEX
    } else {
        vk::ShaderStageFlags::COMPUTE
    };
    let push_ranges = [vk::PushConstantRange::builder()
        .stage_flags(stage)
        .offset(0)
        .size(PUSH_CONSTANT_RANGE_SIZE)
        .build()];

    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);

    unsafe {
        dev.dev
            .create_pipeline_layout(&info, None)
            .or(Err(AuroraError::INVALID))
    }
}

/*
 * render pass objects
 */

fn to_vk_load_op(load_op: AttachmentLoadOp) -> vk::AttachmentLoadOp {
    match load_op {
        AttachmentLoadOp::Load => vk::AttachmentLoadOp::LOAD,
        AttachmentLoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        AttachmentLoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

/// Render pass object from the attachment formats and load ops.
/// The scheduler transitions attachments before the pass begins, so
/// initial and final layouts are the attachment layouts themselves.
pub fn create_vulkan_render_pass(
    dev: &Device,
    attachments: &[(vk::Format, AttachmentLoadOp)],
) -> Result<vk::RenderPass> {
    let mut descriptions = Vec::new();
    let mut color_references = Vec::new();
    let mut depth_reference = None;

    for (index, (format, load_op)) in attachments.iter().enumerate() {
        let layout = if is_vk_depth_format(*format) {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        };

        descriptions.push(
            vk::AttachmentDescription::builder()
                .format(*format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(to_vk_load_op(*load_op))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(layout)
                .final_layout(layout)
                .build(),
        );

        let reference = vk::AttachmentReference::builder()
            .attachment(index as u32)
            .layout(layout)
            .build();
        if is_vk_depth_format(*format) {
            assert!(depth_reference.is_none(), "only one depth attachment allowed");
            depth_reference = Some(reference);
        } else {
            color_references.push(reference);
        }
    }

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_references);
    if let Some(depth) = depth_reference.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth);
    }
    let subpasses = [subpass.build()];

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&descriptions)
        .subpasses(&subpasses);

    unsafe {
        dev.dev
            .create_render_pass(&info, None)
            .or(Err(AuroraError::INVALID))
    }
}

pub fn create_vulkan_framebuffer(
    dev: &Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    views: &[vk::ImageView],
) -> Result<vk::Framebuffer> {
    let info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(views)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe {
        dev.dev
            .create_framebuffer(&info, None)
            .or(Err(AuroraError::INVALID))
    }
}

/// black color, depth cleared to one
pub fn clear_values_for_attachments(attachments: &[(vk::Format, AttachmentLoadOp)]) -> Vec<vk::ClearValue> {
    attachments
        .iter()
        .map(|(format, _)| {
            if is_vk_depth_format(*format) {
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                }
            } else {
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 0.0],
                    },
                }
            }
        })
        .collect()
}

/*
 * pipeline state helpers
 */

fn create_shader_module(dev: &Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::builder().code(code);
    unsafe {
        dev.dev
            .create_shader_module(&info, None)
            .or(Err(AuroraError::SHADER_COMPILE_FAILED))
    }
}

/// Owned storage backing a VkSpecializationInfo
struct SpecialisationData {
    map_entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl SpecialisationData {
    fn new(constants: &ShaderSpecialisationConstants) -> Self {
        assert_eq!(constants.ids.len(), constants.values.len());
        let mut map_entries = Vec::new();
        let mut data = Vec::new();
        for (i, (&id, &value)) in constants
            .ids
            .iter()
            .zip(constants.values.iter())
            .enumerate()
        {
            map_entries.push(
                vk::SpecializationMapEntry::builder()
                    .constant_id(id)
                    .offset(i as u32 * 4)
                    .size(4)
                    .build(),
            );
            data.extend_from_slice(&value.to_le_bytes());
        }
        Self {
            map_entries: map_entries,
            data: data,
        }
    }

    fn info(&self) -> vk::SpecializationInfo {
        vk::SpecializationInfo::builder()
            .map_entries(&self.map_entries)
            .data(&self.data)
            .build()
    }
}

fn to_vk_polygon_mode(mode: RasterizationMode) -> vk::PolygonMode {
    match mode {
        RasterizationMode::Fill => vk::PolygonMode::FILL,
        RasterizationMode::Line => vk::PolygonMode::LINE,
        RasterizationMode::Point => vk::PolygonMode::POINT,
    }
}

/// primitive topology follows the raster mode
fn to_vk_topology(mode: RasterizationMode) -> vk::PrimitiveTopology {
    match mode {
        RasterizationMode::Fill => vk::PrimitiveTopology::TRIANGLE_LIST,
        RasterizationMode::Line => vk::PrimitiveTopology::LINE_LIST,
        RasterizationMode::Point => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn to_vk_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

fn to_vk_compare_op(function: DepthFunction) -> vk::CompareOp {
    match function {
        DepthFunction::Never => vk::CompareOp::NEVER,
        DepthFunction::Always => vk::CompareOp::ALWAYS,
        DepthFunction::Less => vk::CompareOp::LESS,
        DepthFunction::Greater => vk::CompareOp::GREATER,
        DepthFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        DepthFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        DepthFunction::Equal => vk::CompareOp::EQUAL,
    }
}

/// Everything a graphic pass needs besides its framebuffer, which
/// the backend wires up afterwards because it owns the image views.
pub struct GraphicPassObjects {
    pub vk_render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub material_set_layout: vk::DescriptorSetLayout,
    pub material_features: MaterialFeatureFlags,
    pub vertex_input_flags: VertexInputFlags,
    pub clear_values: Vec<vk::ClearValue>,
}

/// Build all API objects of a graphic pass from its description and
/// compiled shaders.
pub fn create_graphic_pass_objects(
    dev: &Device,
    descriptor_pools: &mut DescriptorPoolManager,
    global_set_layout: vk::DescriptorSetLayout,
    desc: &GraphicPassDescription,
    spirv: &GraphicShaderSpirV,
    attachment_formats: &[(vk::Format, AttachmentLoadOp)],
) -> Result<GraphicPassObjects> {
    let reflection: ShaderReflection = reflection::reflect_graphic_shaders(spirv)?;

    let descriptor_set_layout = create_descriptor_set_layout(dev, &reflection.layout)?;
    let material_set_layout = create_material_set_layout(dev, reflection.material_features)?;
    let pipeline_layout = create_pipeline_layout(
        dev,
        global_set_layout,
        descriptor_set_layout,
        material_set_layout,
        true,
    )?;
    let vk_render_pass = create_vulkan_render_pass(dev, attachment_formats)?;

    // shader stages
    let entry_name = CString::new("main").unwrap();
    let mut modules: Vec<vk::ShaderModule> = Vec::new();
    let mut specialisations: Vec<SpecialisationData> = Vec::new();
    let mut stage_kinds: Vec<vk::ShaderStageFlags> = Vec::new();

    {
        let mut add_stage = |code: &[u32],
                             constants: &ShaderSpecialisationConstants,
                             stage: vk::ShaderStageFlags|
         -> Result<()> {
            modules.push(create_shader_module(dev, code)?);
            specialisations.push(SpecialisationData::new(constants));
            stage_kinds.push(stage);
            Ok(())
        };

        add_stage(
            &spirv.vertex,
            &desc.shader_descriptions.vertex.specialisation_constants,
            vk::ShaderStageFlags::VERTEX,
        )?;
        add_stage(
            &spirv.fragment,
            &desc.shader_descriptions.fragment.specialisation_constants,
            vk::ShaderStageFlags::FRAGMENT,
        )?;
        if let (Some(code), Some(shader_desc)) =
            (&spirv.geometry, &desc.shader_descriptions.geometry)
        {
            add_stage(
                code,
                &shader_desc.specialisation_constants,
                vk::ShaderStageFlags::GEOMETRY,
            )?;
        }
        if let (Some(code), Some(shader_desc)) = (
            &spirv.tesselation_control,
            &desc.shader_descriptions.tesselation_control,
        ) {
            add_stage(
                code,
                &shader_desc.specialisation_constants,
                vk::ShaderStageFlags::TESSELLATION_CONTROL,
            )?;
        }
        if let (Some(code), Some(shader_desc)) = (
            &spirv.tesselation_evaluation,
            &desc.shader_descriptions.tesselation_evaluation,
        ) {
            add_stage(
                code,
                &shader_desc.specialisation_constants,
                vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            )?;
        }
    }

    let specialisation_infos: Vec<vk::SpecializationInfo> =
        specialisations.iter().map(|s| s.info()).collect();
    let stages: Vec<vk::PipelineShaderStageCreateInfo> = modules
        .iter()
        .zip(stage_kinds.iter())
        .zip(specialisation_infos.iter())
        .map(|((&module, &stage), spec_info)| {
            vk::PipelineShaderStageCreateInfo::builder()
                .module(module)
                .name(&entry_name)
                .stage(stage)
                .specialization_info(spec_info)
                .build()
        })
        .collect();

    // vertex input from the reflected attribute mask
    let (vertex_bindings, vertex_attributes) =
        vertex::vertex_input_descriptions(reflection.vertex_input_flags);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes)
        .build();

    let uses_tesselation = desc.shader_descriptions.tesselation_control.is_some();
    let topology = if uses_tesselation {
        vk::PrimitiveTopology::PATCH_LIST
    } else {
        to_vk_topology(desc.rasterization.mode)
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(topology)
        .build();
    let tesselation_state = vk::PipelineTessellationStateCreateInfo::builder()
        .patch_control_points(desc.patch_control_points)
        .build();

    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(to_vk_polygon_mode(desc.rasterization.mode))
        .cull_mode(to_vk_cull_mode(desc.rasterization.cull_mode))
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_clamp_enable(desc.rasterization.clamp_depth)
        .line_width(1.0)
        .build();

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .build();

    // a test that always passes without writing is the same as no
    // test, so the enable bit can stay on unconditionally; the
    // whole state is ignored for passes without a depth attachment
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(desc.depth_test.write)
        .depth_compare_op(to_vk_compare_op(desc.depth_test.function))
        .build();

    // blending applies to color attachments only
    let color_attachment_count = attachment_formats
        .iter()
        .filter(|(format, _)| !is_vk_depth_format(*format))
        .count();
    let blend_attachment = match desc.blending {
        BlendState::None => vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build(),
        BlendState::Additive => vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build(),
    };
    let blend_attachments = vec![blend_attachment; color_attachment_count];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .attachments(&blend_attachments)
        .build();

    // viewport and scissor are dynamic, the same pass renders into
    // differently sized framebuffers after a resize
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1)
        .build();
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
        .dynamic_states(&dynamic_states)
        .build();

    let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .viewport_state(&viewport_state)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(vk_render_pass)
        .subpass(0);
    if uses_tesselation {
        pipeline_info = pipeline_info.tessellation_state(&tesselation_state);
    }

    let pipeline = unsafe {
        dev.dev
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
            .map_err(|_| AuroraError::INVALID)?[0]
    };

    for module in modules {
        unsafe {
            dev.dev.destroy_shader_module(module, None);
        }
    }

    let descriptor_set = descriptor_pools.allocate_set(
        &dev.dev,
        descriptor_set_layout,
        &pool_sizes_from_shader_layout(&reflection.layout),
    )?;

    Ok(GraphicPassObjects {
        vk_render_pass: vk_render_pass,
        pipeline: pipeline,
        pipeline_layout: pipeline_layout,
        descriptor_set: descriptor_set,
        descriptor_set_layout: descriptor_set_layout,
        material_set_layout: material_set_layout,
        material_features: reflection.material_features,
        vertex_input_flags: reflection.vertex_input_flags,
        clear_values: clear_values_for_attachments(attachment_formats),
    })
}

pub struct ComputePassObjects {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
}

pub fn create_compute_pass_objects(
    dev: &Device,
    descriptor_pools: &mut DescriptorPoolManager,
    global_set_layout: vk::DescriptorSetLayout,
    desc: &ComputePassDescription,
    spirv: &[u32],
) -> Result<ComputePassObjects> {
    let reflection = reflection::reflect_compute_shader(spirv)?;

    let descriptor_set_layout = create_descriptor_set_layout(dev, &reflection.layout)?;
    let pipeline_layout = create_pipeline_layout(
        dev,
        global_set_layout,
        descriptor_set_layout,
        vk::DescriptorSetLayout::null(),
        false,
    )?;

    let module = create_shader_module(dev, spirv)?;
    let entry_name = CString::new("main").unwrap();
    let specialisation = SpecialisationData::new(
        &desc.shader_description.specialisation_constants,
    );
    let specialisation_info = specialisation.info();
    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .module(module)
        .name(&entry_name)
        .stage(vk::ShaderStageFlags::COMPUTE)
        .specialization_info(&specialisation_info)
        .build();

    let info = vk::ComputePipelineCreateInfo::builder()
        .stage(stage)
        .layout(pipeline_layout)
        .build();

    let pipeline = unsafe {
        dev.dev
            .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
            .map_err(|_| AuroraError::INVALID)?[0]
    };
    unsafe {
        dev.dev.destroy_shader_module(module, None);
    }

    let descriptor_set = descriptor_pools.allocate_set(
        &dev.dev,
        descriptor_set_layout,
        &pool_sizes_from_shader_layout(&reflection.layout),
    )?;

    Ok(ComputePassObjects {
        pipeline: pipeline,
        pipeline_layout: pipeline_layout,
        descriptor_set: descriptor_set,
        descriptor_set_layout: descriptor_set_layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_from_reflection() {
        let layout = ShaderLayout {
            sampler_bindings: vec![0, 1],
            sampled_image_bindings: vec![2],
            storage_image_bindings: vec![],
            uniform_buffer_bindings: vec![3],
            storage_buffer_bindings: vec![4, 5, 6],
        };
        let sizes = pool_sizes_from_shader_layout(&layout);
        assert_eq!(sizes.set_count, 1);
        assert_eq!(sizes.sampler, 2);
        assert_eq!(sizes.sampled_image, 1);
        assert_eq!(sizes.storage_buffer, 3);
    }

    #[test]
    fn material_pool_sizes_match_features() {
        let sizes = pool_sizes_from_material_flags(
            MaterialFeatureFlags::ALBEDO_TEXTURE | MaterialFeatureFlags::NORMAL_TEXTURE,
        );
        assert_eq!(sizes.sampled_image, 2);
        assert_eq!(sizes.sampler, 2);
        assert_eq!(sizes.set_count, 1);
    }

    #[test]
    fn clear_values_follow_formats() {
        let attachments = [
            (vk::Format::R16G16B16A16_SFLOAT, AttachmentLoadOp::Clear),
            (vk::Format::D32_SFLOAT, AttachmentLoadOp::Clear),
        ];
        let clears = clear_values_for_attachments(&attachments);
        assert_eq!(clears.len(), 2);
        unsafe {
            assert_eq!(clears[0].color.float32, [0.0, 0.0, 0.0, 0.0]);
            assert_eq!(clears[1].depth_stencil.depth, 1.0);
        }
    }
}
