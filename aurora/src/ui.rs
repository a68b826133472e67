// Debug overlay pass
//
// The overlay consumes a CPU side draw stream produced by an
// external UI library: one vertex/index blob plus scissored,
// textured draw commands. The stream is copied into host visible
// buffers every frame and rendered on top of the swapchain image
// after all graph passes ran.

use crate::buffer::Buffer;
use crate::descpool::{DescriptorPoolManager, PoolSizes};
use crate::device::Device;
use crate::pass::create_vulkan_framebuffer;
use crate::shader;
use crate::{AuroraError, Result};
use ash::vk;

use std::ffi::CString;
use std::path::Path;

use utils::log;

/// Vertex layout of the external draw stream:
/// screen position, uv, packed RGBA8 color
pub const UI_VERTEX_BYTE_SIZE: u32 = 8 + 8 + 4;

#[derive(Copy, Clone, Debug)]
pub struct UiDrawCommand {
    pub scissor_offset: [i32; 2],
    pub scissor_extent: [u32; 2],
    pub index_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
}

/// One frame worth of overlay geometry
#[derive(Clone, Default)]
pub struct UiDrawData {
    /// raw vertices, UI_VERTEX_BYTE_SIZE each
    pub vertices: Vec<u8>,
    pub indices: Vec<u16>,
    pub commands: Vec<UiDrawCommand>,
}

impl UiDrawData {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub struct UiRenderer {
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    /// one framebuffer per swapchain image
    framebuffers: Vec<vk::Framebuffer>,
    pub(crate) vertex_buffer: Buffer,
    pub(crate) index_buffer: Buffer,
}

impl UiRenderer {
    /// The fixed overlay set: font/ui texture and its sampler
    fn create_set_layout(dev: &Device) -> Result<vk::DescriptorSetLayout> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        unsafe {
            dev.dev
                .create_descriptor_set_layout(&info, None)
                .or(Err(AuroraError::INVALID))
        }
    }

    fn create_render_pass(dev: &Device, format: vk::Format) -> Result<vk::RenderPass> {
        // load the tonemapped frame, draw on top
        let attachments = [vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];
        let references = [vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&references)
            .build()];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);
        unsafe {
            dev.dev
                .create_render_pass(&info, None)
                .or(Err(AuroraError::INVALID))
        }
    }

    pub fn new(
        dev: &Device,
        descriptor_pools: &mut DescriptorPoolManager,
        swapchain_format: vk::Format,
        vertex_buffer: Buffer,
        index_buffer: Buffer,
    ) -> Result<Self> {
        let set_layout = Self::create_set_layout(dev)?;
        let render_pass = Self::create_render_pass(dev, swapchain_format)?;

        let push_ranges = [vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(16) // scale + translate
            .build()];
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout = unsafe {
            dev.dev
                .create_pipeline_layout(&layout_info, None)
                .or(Err(AuroraError::INVALID))?
        };

        let vert_spirv = shader::load_shader(Path::new("ui.vert"))?;
        let frag_spirv = shader::load_shader(Path::new("ui.frag"))?;
        let pipeline = Self::create_pipeline(
            dev,
            render_pass,
            pipeline_layout,
            &vert_spirv,
            &frag_spirv,
        )?;

        let required = PoolSizes {
            set_count: 1,
            sampled_image: 1,
            sampler: 1,
            ..Default::default()
        };
        let descriptor_set = descriptor_pools.allocate_set(&dev.dev, set_layout, &required)?;

        Ok(Self {
            render_pass: render_pass,
            pipeline: pipeline,
            pipeline_layout: pipeline_layout,
            set_layout: set_layout,
            descriptor_set: descriptor_set,
            framebuffers: Vec::new(),
            vertex_buffer: vertex_buffer,
            index_buffer: index_buffer,
        })
    }

    fn create_pipeline(
        dev: &Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        vert_spirv: &[u32],
        frag_spirv: &[u32],
    ) -> Result<vk::Pipeline> {
        let vert_info = vk::ShaderModuleCreateInfo::builder().code(vert_spirv);
        let frag_info = vk::ShaderModuleCreateInfo::builder().code(frag_spirv);
        let (vert_module, frag_module) = unsafe {
            (
                dev.dev
                    .create_shader_module(&vert_info, None)
                    .or(Err(AuroraError::SHADER_COMPILE_FAILED))?,
                dev.dev
                    .create_shader_module(&frag_info, None)
                    .or(Err(AuroraError::SHADER_COMPILE_FAILED))?,
            )
        };

        let entry_name = CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .module(vert_module)
                .name(&entry_name)
                .stage(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .module(frag_module)
                .name(&entry_name)
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];

        let bindings = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(UI_VERTEX_BYTE_SIZE)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];
        let attributes = [
            vk::VertexInputAttributeDescription::builder()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(8)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .location(2)
                .binding(0)
                .format(vk::Format::R8G8B8A8_UNORM)
                .offset(16)
                .build(),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .build();
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0)
            .build();
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .build();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default();

        // classic UI alpha blending
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .build();

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .viewport_state(&viewport_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipeline = unsafe {
            dev.dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|_| AuroraError::INVALID)?[0]
        };
        unsafe {
            dev.dev.destroy_shader_module(vert_module, None);
            dev.dev.destroy_shader_module(frag_module, None);
        }
        Ok(pipeline)
    }

    /// Point the overlay at its texture, typically the font atlas
    pub fn set_texture(&self, dev: &Device, view: vk::ImageView, sampler: vk::Sampler) {
        let image_info = [vk::DescriptorImageInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()];
        let sampler_info = [vk::DescriptorImageInfo::builder().sampler(sampler).build()];
        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(self.descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .image_info(&image_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.descriptor_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(&sampler_info)
                .build(),
        ];
        unsafe {
            dev.dev.update_descriptor_sets(&writes, &[]);
        }
    }

    /// Rebuild per swapchain image framebuffers after a resize
    pub fn recreate_framebuffers(
        &mut self,
        dev: &Device,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<()> {
        for fb in self.framebuffers.drain(..) {
            unsafe {
                dev.dev.destroy_framebuffer(fb, None);
            }
        }
        for view in views {
            self.framebuffers.push(create_vulkan_framebuffer(
                dev,
                self.render_pass,
                extent,
                &[*view],
            )?);
        }
        Ok(())
    }

    /// Upload the draw stream and record the overlay pass.
    /// Oversized streams are clamped to the buffer capacity.
    pub fn record(
        &mut self,
        dev: &Device,
        cbuf: vk::CommandBuffer,
        swapchain_image_index: u32,
        extent: vk::Extent2D,
        draw_data: &UiDrawData,
    ) {
        let mut vertex_bytes = draw_data.vertices.len();
        if vertex_bytes as u64 > self.vertex_buffer.size {
            log::error!(
                "UI vertex data of {} bytes overflows the {} byte buffer, clamping",
                vertex_bytes,
                self.vertex_buffer.size
            );
            vertex_bytes = self.vertex_buffer.size as usize;
        }
        let mut index_count = draw_data.indices.len();
        if (index_count * 2) as u64 > self.index_buffer.size {
            log::error!("UI index data overflows its buffer, clamping");
            index_count = self.index_buffer.size as usize / 2;
        }

        if !draw_data.is_empty() {
            unsafe {
                let ptr = dev
                    .dev
                    .map_memory(
                        self.vertex_buffer.memory.vk_memory,
                        self.vertex_buffer.memory.offset,
                        vertex_bytes as u64,
                        vk::MemoryMapFlags::empty(),
                    )
                    .unwrap();
                std::slice::from_raw_parts_mut(ptr as *mut u8, vertex_bytes)
                    .copy_from_slice(&draw_data.vertices[..vertex_bytes]);
                dev.dev.unmap_memory(self.vertex_buffer.memory.vk_memory);

                let ptr = dev
                    .dev
                    .map_memory(
                        self.index_buffer.memory.vk_memory,
                        self.index_buffer.memory.offset,
                        (index_count * 2) as u64,
                        vk::MemoryMapFlags::empty(),
                    )
                    .unwrap();
                std::slice::from_raw_parts_mut(ptr as *mut u16, index_count)
                    .copy_from_slice(&draw_data.indices[..index_count]);
                dev.dev.unmap_memory(self.index_buffer.memory.vk_memory);
            }
        }

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[swapchain_image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: extent,
            })
            .build();

        unsafe {
            dev.dev
                .cmd_begin_render_pass(cbuf, &begin_info, vk::SubpassContents::INLINE);

            if !draw_data.is_empty() {
                dev.dev
                    .cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
                dev.dev.cmd_bind_descriptor_sets(
                    cbuf,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[self.descriptor_set],
                    &[],
                );
                dev.dev
                    .cmd_bind_vertex_buffers(cbuf, 0, &[self.vertex_buffer.vk_buffer], &[0]);
                dev.dev.cmd_bind_index_buffer(
                    cbuf,
                    self.index_buffer.vk_buffer,
                    0,
                    vk::IndexType::UINT16,
                );

                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                dev.dev.cmd_set_viewport(cbuf, 0, &[viewport]);

                // screen pixels to clip space
                let push: [f32; 4] = [
                    2.0 / extent.width as f32,
                    2.0 / extent.height as f32,
                    -1.0,
                    -1.0,
                ];
                let push_bytes: &[u8] = std::slice::from_raw_parts(
                    push.as_ptr() as *const u8,
                    std::mem::size_of_val(&push),
                );
                dev.dev.cmd_push_constants(
                    cbuf,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    push_bytes,
                );

                for command in draw_data.commands.iter() {
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D {
                            x: command.scissor_offset[0].max(0),
                            y: command.scissor_offset[1].max(0),
                        },
                        extent: vk::Extent2D {
                            width: command.scissor_extent[0].min(extent.width),
                            height: command.scissor_extent[1].min(extent.height),
                        },
                    };
                    dev.dev.cmd_set_scissor(cbuf, 0, &[scissor]);
                    dev.dev.cmd_draw_indexed(
                        cbuf,
                        command.index_count,
                        1,
                        command.first_index,
                        command.vertex_offset,
                        0,
                    );
                }
            }

            dev.dev.cmd_end_render_pass(cbuf);
        }
    }

    pub fn destroy(&mut self, dev: &Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                dev.dev.destroy_framebuffer(fb, None);
            }
            dev.dev.destroy_pipeline(self.pipeline, None);
            dev.dev.destroy_pipeline_layout(self.pipeline_layout, None);
            dev.dev.destroy_render_pass(self.render_pass, None);
            dev.dev.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
