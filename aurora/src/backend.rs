// The render backend
//
// Owns every GPU object behind typed handles: images, buffers,
// samplers, meshes, passes and framebuffers. Per frame it accepts a
// set of pass executions with declared parents, orders them
// topologically, synthesizes the required barriers and records the
// whole frame into one of two alternating command buffers.

use crate::barrier::{
    barriers_command, create_buffer_barrier, create_image_barriers, image_barriers_for_execution,
};
use crate::buffer::{Buffer, STAGING_BUFFER_SIZE};
use crate::desc::*;
use crate::descpool::{DescriptorPoolManager, PoolSizes};
use crate::device::Device;
use crate::display::Display;
use crate::image::{self, mip_count_from_description, Image};
use crate::instance::Instance;
use crate::memory::MemoryAllocator;
use crate::mesh::{
    positions_to_bytes, DynamicMesh, Mesh, MeshDataInternal, MeshMaterial, MeshRenderCommand,
    MeshVertexBuffer,
};
use crate::pass::{
    self, ComputePass, Framebuffer, GraphicPass, Pass, PUSH_CONSTANT_RANGE_SIZE,
};
use crate::reflection::GraphicShaderSpirV;
use crate::registry::{Handle, Registry};
use crate::shader;
use crate::timing::{RenderPassTime, TimestampQuery, TimestampQueryPool};
use crate::transfer::TransferEngine;
use crate::ui::{UiDrawData, UiRenderer};
use crate::vertex;
use crate::{AuroraError, Result};

use ash::extensions::khr;
use ash::vk;
use cgmath::{Matrix4, Vector3};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use std::sync::Arc;

use utils::log;

/// Storage buffers track their last unsynchronized write so a
/// barrier can be synthesized for the first reader.
pub struct StorageBuffer {
    pub buffer: Buffer,
    pub last_write_access: vk::AccessFlags,
}

/// Execution with its synthesized barriers, ready for recording
struct ExecutionInternal {
    pass: PassHandle,
    dispatch_count: [u32; 3],
    push_constants: Vec<u8>,
    framebuffer: Option<FramebufferHandle>,
    image_barriers: Vec<vk::ImageMemoryBarrier>,
    buffer_barriers: Vec<vk::BufferMemoryBarrier>,
}

/// Topological order of the executions by their parent lists.
///
/// Repeatedly appends the first execution whose parents are all
/// emitted. Making no progress with work left means the declared
/// parents form a cycle, which is a caller bug.
pub(crate) fn topological_order(executions: &[PassExecution]) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(executions.len());
    let mut emitted: Vec<PassHandle> = Vec::with_capacity(executions.len());
    let mut remaining: Vec<usize> = (0..executions.len()).collect();

    let mut scan = 0;
    while scan < remaining.len() {
        let candidate = remaining[scan];
        let parents_available = executions[candidate]
            .parents
            .iter()
            .all(|parent| emitted.contains(parent));

        if parents_available {
            order.push(candidate);
            emitted.push(executions[candidate].pass);
            remaining.swap_remove(scan);
            scan = 0;
        } else {
            scan += 1;
        }
    }

    assert!(
        remaining.is_empty(),
        "Cyclic parent declarations in render pass executions"
    );
    order
}

pub struct RenderBackend {
    dev: Arc<Device>,
    display: Display,

    allocator: MemoryAllocator,
    descriptor_pools: DescriptorPoolManager,
    transfer: TransferEngine,
    timestamps: TimestampQueryPool,

    images: Registry<ImageTag, Image>,
    uniform_buffers: Registry<UniformBufferTag, Buffer>,
    storage_buffers: Registry<StorageBufferTag, StorageBuffer>,
    samplers: Registry<SamplerTag, vk::Sampler>,
    meshes: Registry<MeshTag, Mesh>,
    dynamic_meshes: Registry<DynamicMeshTag, DynamicMesh>,
    passes: Registry<PassTag, Pass>,
    framebuffers: Registry<FramebufferTag, Framebuffer>,

    /// set 0, fixed layout: the global info uniform buffer
    global_set_layout: vk::DescriptorSetLayout,
    global_descriptor_set: vk::DescriptorSet,
    global_info_buffer: Buffer,

    /// sampler used by every material set
    material_sampler: vk::Sampler,

    /// one image entry per swapchain image
    swapchain_image_handles: Vec<ImageHandle>,

    cmd_pool: vk::CommandPool,
    /// two so one can be filled while the other is still rendering
    cmd_buffers: [vk::CommandBuffer; 2],
    current_cmd_buffer_index: usize,
    render_finished_fence: vk::Fence,

    frame_executions: Vec<PassExecution>,
    ordered_executions: Vec<ExecutionInternal>,

    ui: UiRenderer,
    ui_draw_data: UiDrawData,

    timings: Vec<RenderPassTime>,
    minimized: bool,
}

impl RenderBackend {
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let instance = Arc::new(Instance::new(display_handle)?);

        let surface_loader = khr::Surface::new(&instance.loader, &instance.inst);
        let surface = unsafe {
            ash_window::create_surface(
                &instance.loader,
                &instance.inst,
                display_handle,
                window_handle,
                None,
            )
            .or(Err(AuroraError::VK_SURF_NOT_SUPPORTED))?
        };

        let dev = Arc::new(Device::new(instance.clone(), &surface_loader, surface)?);
        let display = Display::new(dev.clone(), surface_loader, surface, width, height)?;

        let mut allocator = MemoryAllocator::new(dev.mem_props);
        let mut descriptor_pools = DescriptorPoolManager::new();

        // global info set: one uniform buffer at binding 0,
        // visible everywhere
        let global_set_layout = {
            let bindings = [vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build()];
            let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            unsafe {
                dev.dev
                    .create_descriptor_set_layout(&info, None)
                    .or(Err(AuroraError::INVALID))?
            }
        };
        let global_descriptor_set = descriptor_pools.allocate_set(
            &dev.dev,
            global_set_layout,
            &PoolSizes {
                set_count: 1,
                uniform_buffer: 1,
                ..Default::default()
            },
        )?;

        let global_info_buffer = Self::create_buffer_internal(
            &dev,
            &mut allocator,
            std::mem::size_of::<GlobalShaderInfo>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        {
            let buffer_infos = [vk::DescriptorBufferInfo::builder()
                .buffer(global_info_buffer.vk_buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)
                .build()];
            let writes = [vk::WriteDescriptorSet::builder()
                .dst_set(global_descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_infos)
                .build()];
            unsafe {
                dev.dev.update_descriptor_sets(&writes, &[]);
            }
        }

        let staging_buffer = Self::create_buffer_internal(
            &dev,
            &mut allocator,
            STAGING_BUFFER_SIZE,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let transfer = TransferEngine::new(&dev, staging_buffer);

        let cmd_pool = dev.create_command_pool(
            dev.queue_families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        );
        let cbufs = dev.create_command_buffers(cmd_pool, 2);

        let timestamps = TimestampQueryPool::new(&dev.dev, dev.timestamp_period)?;

        // overlay plumbing: host visible geometry buffers and the
        // pipeline over the swapchain format
        let ui_vertex_buffer = Self::create_buffer_internal(
            &dev,
            &mut allocator,
            1 << 20,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let ui_index_buffer = Self::create_buffer_internal(
            &dev,
            &mut allocator,
            1 << 19,
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let ui = UiRenderer::new(
            &dev,
            &mut descriptor_pools,
            display.surface_format.format,
            ui_vertex_buffer,
            ui_index_buffer,
        )?;

        let material_sampler = {
            let info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .anisotropy_enable(true)
                .max_anisotropy(8.0)
                .max_lod(vk::LOD_CLAMP_NONE)
                .build();
            unsafe { dev.dev.create_sampler(&info, None).unwrap() }
        };

        let render_finished_fence = dev.create_fence(true);

        let mut ret = Self {
            dev: dev.clone(),
            display: display,
            allocator: allocator,
            descriptor_pools: descriptor_pools,
            transfer: transfer,
            timestamps: timestamps,
            images: Registry::new(),
            uniform_buffers: Registry::new(),
            storage_buffers: Registry::new(),
            samplers: Registry::new(),
            meshes: Registry::new(),
            dynamic_meshes: Registry::new(),
            passes: Registry::new(),
            framebuffers: Registry::new(),
            global_set_layout: global_set_layout,
            global_descriptor_set: global_descriptor_set,
            global_info_buffer: global_info_buffer,
            material_sampler: material_sampler,
            swapchain_image_handles: Vec::new(),
            cmd_pool: cmd_pool,
            cmd_buffers: [cbufs[0], cbufs[1]],
            current_cmd_buffer_index: 0,
            render_finished_fence: render_finished_fence,
            frame_executions: Vec::new(),
            ordered_executions: Vec::new(),
            ui: ui,
            ui_draw_data: UiDrawData::default(),
            timings: Vec::new(),
            minimized: false,
        };

        ret.register_swapchain_images()?;
        Ok(ret)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn resolution(&self) -> (u32, u32) {
        (
            self.display.resolution.width,
            self.display.resolution.height,
        )
    }

    /*
     * swapchain image bookkeeping
     */

    fn register_swapchain_images(&mut self) -> Result<()> {
        let format = self.display.surface_format.format;
        let extent = self.display.resolution;
        let mut views = Vec::new();

        for &vk_image in self.display.images.iter() {
            let view = Self::create_image_view_raw(
                &self.dev,
                vk_image,
                vk::ImageViewType::TYPE_2D,
                format,
                0,
                1,
                vk::ImageAspectFlags::COLOR,
            )?;
            views.push(view);

            let image = Image {
                vk_image: vk_image,
                views_per_mip: vec![view],
                format: format,
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                image_type: ImageType::Type2D,
                layout_per_mip: vec![vk::ImageLayout::UNDEFINED],
                current_access: vk::AccessFlags::empty(),
                currently_writing: false,
                desc: ImageDescription {
                    width: extent.width,
                    height: extent.height,
                    usage: ImageUsage::STORAGE | ImageUsage::ATTACHMENT,
                    ..Default::default()
                },
                is_swapchain_image: true,
                memory: None,
            };
            let handle = self.images.add(image);
            self.swapchain_image_handles.push(handle);
        }

        self.ui.recreate_framebuffers(&self.dev, &views, extent)?;
        Ok(())
    }

    fn destroy_swapchain_images(&mut self) {
        for handle in self.swapchain_image_handles.drain(..).collect::<Vec<_>>() {
            let image = self.images.remove(handle);
            for view in image.views_per_mip.iter() {
                unsafe {
                    self.dev.dev.destroy_image_view(*view, None);
                }
            }
            // image and memory belong to the swapchain
        }
    }

    /// Image handle presented this frame. Valid after new_frame.
    pub fn swapchain_input_image(&self) -> ImageHandle {
        self.swapchain_image_handles[self.display.current_image as usize]
    }

    /// Recreate the swapchain and everything tied to it.
    /// A zero area marks the window as minimized and frame
    /// recording is skipped until it is restored.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;

        self.dev.wait_idle();
        self.destroy_swapchain_images();
        self.display.recreate_swapchain(width, height)?;
        self.register_swapchain_images()
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /*
     * buffers
     */

    fn create_buffer_internal(
        dev: &Device,
        allocator: &mut MemoryAllocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let vk_buffer = unsafe {
            dev.dev
                .create_buffer(&info, None)
                .or(Err(AuroraError::INVALID))?
        };

        let reqs = unsafe { dev.dev.get_buffer_memory_requirements(vk_buffer) };
        let memory = allocator.allocate(&dev.dev, &reqs, memory_flags)?;
        unsafe {
            dev.dev
                .bind_buffer_memory(vk_buffer, memory.vk_memory, memory.offset)
                .or(Err(AuroraError::OUT_OF_DEVICE_MEMORY))?;
        }

        Ok(Buffer {
            vk_buffer: vk_buffer,
            size: size,
            memory: memory,
        })
    }

    pub fn create_uniform_buffer(&mut self, desc: &BufferDescription) -> Result<UniformBufferHandle> {
        let buffer = Self::create_buffer_internal(
            &self.dev,
            &mut self.allocator,
            desc.size,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        if !desc.initial_data.is_empty() {
            self.transfer.fill_buffer(&self.dev, &buffer, &desc.initial_data);
        }
        Ok(self.uniform_buffers.add(buffer))
    }

    pub fn create_storage_buffer(&mut self, desc: &BufferDescription) -> Result<StorageBufferHandle> {
        let buffer = Self::create_buffer_internal(
            &self.dev,
            &mut self.allocator,
            desc.size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let mut last_write = vk::AccessFlags::empty();
        if !desc.initial_data.is_empty() {
            self.transfer.fill_buffer(&self.dev, &buffer, &desc.initial_data);
            last_write = vk::AccessFlags::TRANSFER_WRITE;
        }
        Ok(self.storage_buffers.add(StorageBuffer {
            buffer: buffer,
            last_write_access: last_write,
        }))
    }

    /// Update a storage buffer through staging. The next reader
    /// gets a transfer barrier. Returns the number of transfer
    /// submissions the chunked copy needed.
    pub fn fill_storage_buffer(&mut self, handle: StorageBufferHandle, data: &[u8]) -> u32 {
        let entry = self.storage_buffers.get_mut(handle);
        let submissions = self.transfer.fill_buffer(&self.dev, &entry.buffer, data);
        entry.last_write_access = vk::AccessFlags::TRANSFER_WRITE;
        submissions
    }

    pub fn fill_uniform_buffer(&mut self, handle: UniformBufferHandle, data: &[u8]) {
        let buffer = *self.uniform_buffers.get(handle);
        self.transfer.fill_buffer(&self.dev, &buffer, data);
    }

    fn destroy_buffer(&mut self, buffer: &Buffer) {
        unsafe {
            self.dev.dev.destroy_buffer(buffer.vk_buffer, None);
        }
        self.allocator.free(&buffer.memory);
    }

    /*
     * images
     */

    fn create_image_view_raw(
        dev: &Device,
        vk_image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        base_mip: u32,
        mip_count: u32,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let layer_count = if view_type == vk::ImageViewType::CUBE {
            6
        } else {
            1
        };
        let info = vk::ImageViewCreateInfo::builder()
            .image(vk_image)
            .view_type(view_type)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(base_mip)
                    .level_count(mip_count)
                    .base_array_layer(0)
                    .layer_count(layer_count)
                    .build(),
            );
        unsafe {
            dev.dev
                .create_image_view(&info, None)
                .or(Err(AuroraError::INVALID))
        }
    }

    fn create_image_object(&mut self, desc: &ImageDescription) -> Result<Image> {
        let format = image::to_vk_format(desc.format);
        let (vk_type, view_type) = image::to_vk_image_type(desc.image_type);
        let aspect = if image::is_depth_format(desc.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let mip_count = mip_count_from_description(desc);

        let mut usage = vk::ImageUsageFlags::empty();
        if desc.usage.contains(ImageUsage::ATTACHMENT) {
            usage |= if image::is_depth_format(desc.format) {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
            };
        }
        if desc.usage.contains(ImageUsage::SAMPLED) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.usage.contains(ImageUsage::STORAGE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if !desc.initial_data.is_empty() {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if desc.auto_create_mips {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }

        let mut flags = vk::ImageCreateFlags::empty();
        let mut array_layers = 1;
        if desc.image_type == ImageType::TypeCube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
            array_layers = 6;
            assert_eq!(desc.width, desc.height, "cube faces must be square");
            assert_eq!(desc.depth, 1);
        }

        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: desc.depth.max(1),
        };
        let info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk_type)
            .format(format)
            .extent(extent)
            .mip_levels(mip_count)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let vk_image = unsafe {
            self.dev
                .dev
                .create_image(&info, None)
                .or(Err(AuroraError::INVALID))?
        };

        let reqs = unsafe { self.dev.dev.get_image_memory_requirements(vk_image) };
        let memory = self.allocator.allocate(
            &self.dev.dev,
            &reqs,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        unsafe {
            self.dev
                .dev
                .bind_image_memory(vk_image, memory.vk_memory, memory.offset)
                .or(Err(AuroraError::OUT_OF_DEVICE_MEMORY))?;
        }

        // one view per mip, each covering the rest of the chain
        let mut views = Vec::with_capacity(mip_count as usize);
        for mip in 0..mip_count {
            views.push(Self::create_image_view_raw(
                &self.dev,
                vk_image,
                view_type,
                format,
                mip,
                mip_count - mip,
                aspect,
            )?);
        }

        let mut image = Image {
            vk_image: vk_image,
            views_per_mip: views,
            format: format,
            extent: extent,
            image_type: desc.image_type,
            layout_per_mip: vec![vk::ImageLayout::UNDEFINED; mip_count as usize],
            current_access: vk::AccessFlags::empty(),
            currently_writing: false,
            desc: desc.clone(),
            is_swapchain_image: false,
            memory: Some(memory),
        };

        if !desc.initial_data.is_empty() {
            self.transfer
                .transfer_data_into_image(&self.dev, &mut image, &desc.initial_data);
        }

        if desc.auto_create_mips {
            self.transfer.generate_mip_chain(
                &self.dev,
                &mut image,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        } else if desc.usage.contains(ImageUsage::SAMPLED) {
            // material textures are sampled through material sets
            // which bypass the per-execution declarations, so they
            // must reach their final layout eagerly
            let cbuf = self.dev.begin_one_time_use_cbuf(self.cmd_pool);
            let barriers = create_image_barriers(
                &mut image,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::SHADER_READ,
                0,
                mip_count,
            );
            barriers_command(&self.dev.dev, cbuf, &barriers, &[]);
            self.dev
                .submit_and_wait_one_time_use_cbuf(self.cmd_pool, cbuf, self.dev.graphics_queue);
        }

        Ok(image)
    }

    pub fn create_image(&mut self, desc: &ImageDescription) -> Result<ImageHandle> {
        let image = self.create_image_object(desc)?;
        Ok(self.images.add(image))
    }

    fn destroy_image_object(&mut self, image: Image) {
        for view in image.views_per_mip.iter() {
            unsafe {
                self.dev.dev.destroy_image_view(*view, None);
            }
        }
        if !image.is_swapchain_image {
            unsafe {
                self.dev.dev.destroy_image(image.vk_image, None);
            }
            if let Some(memory) = image.memory.as_ref() {
                self.allocator.free(memory);
            }
        }
    }

    pub fn destroy_image(&mut self, handle: ImageHandle) {
        let image = self.images.remove(handle);
        self.destroy_image_object(image);
    }

    pub fn image_description(&self, handle: ImageHandle) -> ImageDescription {
        self.images.get(handle).desc.clone()
    }

    /// Resize a set of images together. All of them are destroyed
    /// and recreated under their existing handles, then every
    /// framebuffer referencing one of them is rebuilt.
    pub fn resize_images(&mut self, handles: &[ImageHandle], width: u32, height: u32) -> Result<()> {
        if handles.is_empty() {
            return Ok(());
        }
        self.dev.wait_idle();

        for &handle in handles {
            let mut desc = self.images.get(handle).desc.clone();
            desc.width = width;
            desc.height = height;
            desc.initial_data = Vec::new();
            let new_image = self.create_image_object(&desc)?;
            let old = self.images.replace(handle, new_image);
            self.destroy_image_object(old);
        }

        // rebuild framebuffers that reference a resized image
        for fb_handle in self.framebuffers.handles() {
            let needs_rebuild = self
                .framebuffers
                .get(fb_handle)
                .attachments
                .iter()
                .any(|a| handles.contains(&a.image));
            if !needs_rebuild {
                continue;
            }

            let (attachments, pass_handle) = {
                let fb = self.framebuffers.get(fb_handle);
                (fb.attachments.clone(), fb.pass)
            };
            let render_pass = match self.passes.get(pass_handle) {
                Pass::Graphic(pass) => pass.vk_render_pass,
                Pass::Compute(_) => panic!("framebuffer references a compute pass"),
            };

            let views: Vec<vk::ImageView> = attachments
                .iter()
                .map(|a| self.images.get(a.image).views_per_mip[a.mip_level as usize])
                .collect();
            let extent = {
                let first = self.images.get(attachments[0].image);
                vk::Extent2D {
                    width: (first.extent.width >> attachments[0].mip_level).max(1),
                    height: (first.extent.height >> attachments[0].mip_level).max(1),
                }
            };

            let new_fb =
                pass::create_vulkan_framebuffer(&self.dev, render_pass, extent, &views)?;
            let fb = self.framebuffers.get_mut(fb_handle);
            unsafe {
                self.dev.dev.destroy_framebuffer(fb.vk_framebuffer, None);
            }
            fb.vk_framebuffer = new_fb;
            fb.extent = extent;
        }
        Ok(())
    }

    /*
     * samplers
     */

    pub fn create_sampler(&mut self, desc: &SamplerDescription) -> Result<SamplerHandle> {
        let filter = match desc.interpolation {
            SamplerInterpolation::Nearest => vk::Filter::NEAREST,
            SamplerInterpolation::Linear => vk::Filter::LINEAR,
        };
        let mipmap_mode = match desc.interpolation {
            SamplerInterpolation::Nearest => vk::SamplerMipmapMode::NEAREST,
            SamplerInterpolation::Linear => vk::SamplerMipmapMode::LINEAR,
        };
        let address_mode = match desc.wrapping {
            SamplerWrapping::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerWrapping::Color => vk::SamplerAddressMode::CLAMP_TO_BORDER,
            SamplerWrapping::Repeat => vk::SamplerAddressMode::REPEAT,
        };
        let border_color = match desc.border_color {
            SamplerBorderColor::White => vk::BorderColor::FLOAT_OPAQUE_WHITE,
            SamplerBorderColor::Black => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        };

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(desc.use_anisotropy)
            .max_anisotropy(desc.max_anisotropy)
            .border_color(border_color)
            .min_lod(0.0)
            .max_lod(desc.max_mip as f32);

        let sampler = unsafe {
            self.dev
                .dev
                .create_sampler(&info, None)
                .or(Err(AuroraError::INVALID))?
        };
        Ok(self.samplers.add(sampler))
    }

    /*
     * meshes
     */

    fn create_mesh_internal(
        &mut self,
        data: &MeshDataInternal,
        passes: &[PassHandle],
    ) -> Result<MeshHandle> {
        // index precision already decided by the preprocessor
        let index_type = if data.vertex_count < crate::formats::MAX_U16_INDEX_COUNT {
            vk::IndexType::UINT16
        } else {
            vk::IndexType::UINT32
        };

        let index_buffer = Self::create_buffer_internal(
            &self.dev,
            &mut self.allocator,
            data.index_buffer.len() as u64,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.transfer
            .fill_buffer(&self.dev, &index_buffer, &data.index_buffer);

        // one vertex buffer per distinct layout the passes want
        let mut vertex_buffers: Vec<MeshVertexBuffer> = Vec::new();
        let mut materials: Vec<MeshMaterial> = Vec::new();

        for &pass_handle in passes {
            let (vertex_flags, material_features, material_layout) =
                match self.passes.get(pass_handle) {
                    Pass::Graphic(pass) => (
                        pass.vertex_input_flags,
                        pass.material_features,
                        pass.material_set_layout,
                    ),
                    Pass::Compute(_) => {
                        log::error!("Cannot create mesh for a compute pass, skipping");
                        continue;
                    }
                };

            if !vertex_flags.is_empty()
                && !vertex_buffers.iter().any(|b| b.flags == vertex_flags)
            {
                let vertex_data = vertex::extract_vertex_attributes(&data.vertex_buffer, vertex_flags);
                let buffer = Self::create_buffer_internal(
                    &self.dev,
                    &mut self.allocator,
                    vertex_data.len() as u64,
                    vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?;
                self.transfer.fill_buffer(&self.dev, &buffer, &vertex_data);
                vertex_buffers.push(MeshVertexBuffer {
                    buffer: buffer,
                    flags: vertex_flags,
                });
            }

            if !material_features.is_empty()
                && !materials.iter().any(|m| m.flags == material_features)
            {
                let set = self.descriptor_pools.allocate_set(
                    &self.dev.dev,
                    material_layout,
                    &pass::pool_sizes_from_material_flags(material_features),
                )?;
                self.write_material_set(set, material_features, data);
                materials.push(MeshMaterial {
                    descriptor_set: set,
                    flags: material_features,
                });
            }
        }

        let mesh = Mesh {
            index_count: data.index_count,
            index_buffer: index_buffer,
            index_type: index_type,
            vertex_buffers: vertex_buffers,
            materials: materials,
        };
        Ok(self.meshes.add(mesh))
    }

    fn write_material_set(
        &self,
        set: vk::DescriptorSet,
        features: MaterialFeatureFlags,
        data: &MeshDataInternal,
    ) {
        let feature_textures = [
            (MaterialFeatureFlags::ALBEDO_TEXTURE, 0u32, data.albedo_texture),
            (MaterialFeatureFlags::NORMAL_TEXTURE, 1, data.normal_texture),
            (
                MaterialFeatureFlags::SPECULAR_TEXTURE,
                2,
                data.specular_texture,
            ),
        ];

        let mut image_infos: Vec<[vk::DescriptorImageInfo; 1]> = Vec::with_capacity(8);
        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();

        for (feature, binding, texture) in feature_textures.iter() {
            if !features.contains(*feature) {
                continue;
            }
            let handle = texture.expect("pass samples a material texture the mesh does not carry");
            let view = self.images.get(handle).views_per_mip[0];

            image_infos.push([vk::DescriptorImageInfo::builder()
                .image_view(view)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(image_infos.last().unwrap())
                    .build(),
            );

            image_infos.push([vk::DescriptorImageInfo::builder()
                .sampler(self.material_sampler)
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding + 4)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(image_infos.last().unwrap())
                    .build(),
            );
        }

        unsafe {
            self.dev.dev.update_descriptor_sets(&writes, &[]);
        }
    }

    pub fn create_meshes(
        &mut self,
        meshes: &[MeshDataInternal],
        passes: &[PassHandle],
    ) -> Result<Vec<MeshHandle>> {
        let mut handles = Vec::with_capacity(meshes.len());
        for data in meshes {
            handles.push(self.create_mesh_internal(data, passes)?);
        }
        Ok(handles)
    }

    pub fn create_dynamic_meshes(
        &mut self,
        max_positions_per_mesh: &[u32],
        max_indices_per_mesh: &[u32],
    ) -> Result<Vec<DynamicMeshHandle>> {
        assert_eq!(max_positions_per_mesh.len(), max_indices_per_mesh.len());
        let mut handles = Vec::new();
        for (&max_positions, &max_indices) in
            max_positions_per_mesh.iter().zip(max_indices_per_mesh.iter())
        {
            let vertex_buffer = Self::create_buffer_internal(
                &self.dev,
                &mut self.allocator,
                max_positions as u64 * 12,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let index_buffer = Self::create_buffer_internal(
                &self.dev,
                &mut self.allocator,
                max_indices as u64 * 4,
                vk::BufferUsageFlags::INDEX_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            handles.push(self.dynamic_meshes.add(DynamicMesh {
                index_count: 0,
                max_positions: max_positions,
                max_indices: max_indices,
                vertex_buffer: vertex_buffer,
                index_buffer: index_buffer,
            }));
        }
        Ok(handles)
    }

    pub fn update_dynamic_meshes(
        &mut self,
        handles: &[DynamicMeshHandle],
        positions_per_mesh: &[Vec<Vector3<f32>>],
        indices_per_mesh: &[Vec<u32>],
    ) {
        assert_eq!(handles.len(), positions_per_mesh.len());
        assert_eq!(handles.len(), indices_per_mesh.len());

        for ((&handle, positions), indices) in handles
            .iter()
            .zip(positions_per_mesh.iter())
            .zip(indices_per_mesh.iter())
        {
            let (vertex_buffer, index_buffer, max_positions, max_indices) = {
                let mesh = self.dynamic_meshes.get(handle);
                (
                    mesh.vertex_buffer,
                    mesh.index_buffer,
                    mesh.max_positions,
                    mesh.max_indices,
                )
            };

            let mut position_count = positions.len();
            if position_count > max_positions as usize {
                log::error!(
                    "Dynamic mesh update with {} positions exceeds maximum of {}, clamping",
                    position_count,
                    max_positions
                );
                position_count = max_positions as usize;
            }
            let mut index_count = indices.len();
            if index_count > max_indices as usize {
                log::error!(
                    "Dynamic mesh update with {} indices exceeds maximum of {}, clamping",
                    index_count,
                    max_indices
                );
                index_count = max_indices as usize;
            }

            let vertex_bytes = positions_to_bytes(&positions[..position_count]);
            self.transfer.fill_host_visible_coherent_buffer(
                &self.dev,
                &vertex_buffer,
                &vertex_bytes,
                0,
            );
            let mut index_bytes = Vec::with_capacity(index_count * 4);
            for index in indices[..index_count].iter() {
                index_bytes.extend_from_slice(&index.to_le_bytes());
            }
            self.transfer.fill_host_visible_coherent_buffer(
                &self.dev,
                &index_buffer,
                &index_bytes,
                0,
            );

            self.dynamic_meshes.get_mut(handle).index_count = index_count as u32;
        }
    }

    /*
     * passes and framebuffers
     */

    fn load_graphic_shaders(
        desc: &GraphicPassShaderDescriptions,
    ) -> Result<GraphicShaderSpirV> {
        Ok(GraphicShaderSpirV {
            vertex: shader::load_shader(&desc.vertex.src_path_relative)?,
            fragment: shader::load_shader(&desc.fragment.src_path_relative)?,
            geometry: match &desc.geometry {
                Some(g) => Some(shader::load_shader(&g.src_path_relative)?),
                None => None,
            },
            tesselation_control: match &desc.tesselation_control {
                Some(t) => Some(shader::load_shader(&t.src_path_relative)?),
                None => None,
            },
            tesselation_evaluation: match &desc.tesselation_evaluation {
                Some(t) => Some(shader::load_shader(&t.src_path_relative)?),
                None => None,
            },
        })
    }

    fn attachment_formats(&self, attachments: &[Attachment]) -> Vec<(vk::Format, AttachmentLoadOp)> {
        attachments
            .iter()
            .map(|a| (self.images.get(a.image).format, a.load_op))
            .collect()
    }

    fn create_framebuffer_internal(
        &mut self,
        pass_handle: PassHandle,
        render_pass: vk::RenderPass,
        attachments: &[Attachment],
    ) -> Result<FramebufferHandle> {
        assert!(!attachments.is_empty());
        let views: Vec<vk::ImageView> = attachments
            .iter()
            .map(|a| self.images.get(a.image).views_per_mip[a.mip_level as usize])
            .collect();
        let first = self.images.get(attachments[0].image);
        let extent = vk::Extent2D {
            width: (first.extent.width >> attachments[0].mip_level).max(1),
            height: (first.extent.height >> attachments[0].mip_level).max(1),
        };

        let vk_framebuffer =
            pass::create_vulkan_framebuffer(&self.dev, render_pass, extent, &views)?;
        Ok(self.framebuffers.add(Framebuffer {
            vk_framebuffer: vk_framebuffer,
            extent: extent,
            attachments: attachments.to_vec(),
            pass: pass_handle,
        }))
    }

    /// Additional framebuffer for an existing pass, used to render
    /// the same pass into ping-ponged targets.
    pub fn create_framebuffer(
        &mut self,
        pass_handle: PassHandle,
        attachments: &[Attachment],
    ) -> Result<FramebufferHandle> {
        let render_pass = match self.passes.get(pass_handle) {
            Pass::Graphic(pass) => pass.vk_render_pass,
            Pass::Compute(_) => panic!("compute passes have no framebuffers"),
        };
        self.create_framebuffer_internal(pass_handle, render_pass, attachments)
    }

    pub fn create_graphic_pass(&mut self, desc: &GraphicPassDescription) -> Result<PassHandle> {
        let spirv = Self::load_graphic_shaders(&desc.shader_descriptions)?;
        let attachment_formats = self.attachment_formats(&desc.attachments);

        let objects = pass::create_graphic_pass_objects(
            &self.dev,
            &mut self.descriptor_pools,
            self.global_set_layout,
            desc,
            &spirv,
            &attachment_formats,
        )?;

        let attachments: Vec<ImageHandle> = desc.attachments.iter().map(|a| a.image).collect();
        let pass_handle = self.passes.add(Pass::Graphic(GraphicPass {
            desc: desc.clone(),
            vk_render_pass: objects.vk_render_pass,
            pipeline: objects.pipeline,
            pipeline_layout: objects.pipeline_layout,
            descriptor_set: objects.descriptor_set,
            descriptor_set_layout: objects.descriptor_set_layout,
            material_set_layout: objects.material_set_layout,
            material_features: objects.material_features,
            vertex_input_flags: objects.vertex_input_flags,
            clear_values: objects.clear_values,
            attachments: attachments,
            framebuffer: Handle::invalid(),
            mesh_render_commands: Vec::new(),
            dynamic_mesh_render_commands: Vec::new(),
        }));

        let framebuffer = self.create_framebuffer_internal(
            pass_handle,
            objects.vk_render_pass,
            &desc.attachments,
        )?;
        match self.passes.get_mut(pass_handle) {
            Pass::Graphic(pass) => pass.framebuffer = framebuffer,
            Pass::Compute(_) => unreachable!(),
        }

        Ok(pass_handle)
    }

    pub fn create_compute_pass(&mut self, desc: &ComputePassDescription) -> Result<PassHandle> {
        let spirv = shader::load_shader(&desc.shader_description.src_path_relative)?;
        let objects = pass::create_compute_pass_objects(
            &self.dev,
            &mut self.descriptor_pools,
            self.global_set_layout,
            desc,
            &spirv,
        )?;
        Ok(self.passes.add(Pass::Compute(ComputePass {
            desc: desc.clone(),
            pipeline: objects.pipeline,
            pipeline_layout: objects.pipeline_layout,
            descriptor_set: objects.descriptor_set,
            descriptor_set_layout: objects.descriptor_set_layout,
        })))
    }

    /// The pipeline handle of a pass, mainly interesting for tests
    /// asserting that hot reload swapped it.
    pub fn pass_pipeline(&self, handle: PassHandle) -> vk::Pipeline {
        match self.passes.get(handle) {
            Pass::Graphic(pass) => pass.pipeline,
            Pass::Compute(pass) => pass.pipeline,
        }
    }

    fn destroy_graphic_pass_objects(&mut self, pass: &GraphicPass) {
        unsafe {
            self.dev.dev.destroy_pipeline(pass.pipeline, None);
            self.dev
                .dev
                .destroy_pipeline_layout(pass.pipeline_layout, None);
            self.dev.dev.destroy_render_pass(pass.vk_render_pass, None);
            self.dev
                .dev
                .destroy_descriptor_set_layout(pass.descriptor_set_layout, None);
            if pass.material_set_layout != vk::DescriptorSetLayout::null() {
                self.dev
                    .dev
                    .destroy_descriptor_set_layout(pass.material_set_layout, None);
            }
        }
    }

    fn destroy_compute_pass_objects(&mut self, pass: &ComputePass) {
        unsafe {
            self.dev.dev.destroy_pipeline(pass.pipeline, None);
            self.dev
                .dev
                .destroy_pipeline_layout(pass.pipeline_layout, None);
            self.dev
                .dev
                .destroy_descriptor_set_layout(pass.descriptor_set_layout, None);
        }
    }

    /// Swap in a new shader description, forcing recompile and pass
    /// recreation. Used when specialisation constants change.
    pub fn update_compute_pass_shader_description(
        &mut self,
        handle: PassHandle,
        shader_description: ShaderDescription,
    ) -> Result<()> {
        self.dev.wait_idle();
        let mut desc = match self.passes.get(handle) {
            Pass::Compute(pass) => pass.desc.clone(),
            Pass::Graphic(_) => panic!("pass is not a compute pass"),
        };
        desc.shader_description = shader_description;
        self.recreate_compute_pass(handle, &desc)
    }

    pub fn update_graphic_pass_shader_description(
        &mut self,
        handle: PassHandle,
        shader_descriptions: GraphicPassShaderDescriptions,
    ) -> Result<()> {
        self.dev.wait_idle();
        let mut desc = match self.passes.get(handle) {
            Pass::Graphic(pass) => pass.desc.clone(),
            Pass::Compute(_) => panic!("pass is not a graphic pass"),
        };
        desc.shader_descriptions = shader_descriptions;
        self.recreate_graphic_pass(handle, &desc)
    }

    fn recreate_compute_pass(
        &mut self,
        handle: PassHandle,
        desc: &ComputePassDescription,
    ) -> Result<()> {
        let spirv = shader::load_shader(&desc.shader_description.src_path_relative)?;
        let objects = pass::create_compute_pass_objects(
            &self.dev,
            &mut self.descriptor_pools,
            self.global_set_layout,
            desc,
            &spirv,
        )?;

        let new_pass = Pass::Compute(ComputePass {
            desc: desc.clone(),
            pipeline: objects.pipeline,
            pipeline_layout: objects.pipeline_layout,
            descriptor_set: objects.descriptor_set,
            descriptor_set_layout: objects.descriptor_set_layout,
        });
        let old = self.passes.replace(handle, new_pass);
        if let Pass::Compute(old_pass) = old {
            self.destroy_compute_pass_objects(&old_pass);
        }
        Ok(())
    }

    fn recreate_graphic_pass(
        &mut self,
        handle: PassHandle,
        desc: &GraphicPassDescription,
    ) -> Result<()> {
        let spirv = Self::load_graphic_shaders(&desc.shader_descriptions)?;
        let attachment_formats = self.attachment_formats(&desc.attachments);
        let objects = pass::create_graphic_pass_objects(
            &self.dev,
            &mut self.descriptor_pools,
            self.global_set_layout,
            desc,
            &spirv,
            &attachment_formats,
        )?;

        // framebuffers stay valid: the recreated render pass object
        // is compatible because the attachments did not change
        let (framebuffer, attachments) = match self.passes.get(handle) {
            Pass::Graphic(pass) => (pass.framebuffer, pass.attachments.clone()),
            Pass::Compute(_) => panic!("pass is not a graphic pass"),
        };

        let new_pass = Pass::Graphic(GraphicPass {
            desc: desc.clone(),
            vk_render_pass: objects.vk_render_pass,
            pipeline: objects.pipeline,
            pipeline_layout: objects.pipeline_layout,
            descriptor_set: objects.descriptor_set,
            descriptor_set_layout: objects.descriptor_set_layout,
            material_set_layout: objects.material_set_layout,
            material_features: objects.material_features,
            vertex_input_flags: objects.vertex_input_flags,
            clear_values: objects.clear_values,
            attachments: attachments,
            framebuffer: framebuffer,
            mesh_render_commands: Vec::new(),
            dynamic_mesh_render_commands: Vec::new(),
        });
        let old = self.passes.replace(handle, new_pass);
        if let Pass::Graphic(old_pass) = old {
            self.destroy_graphic_pass_objects(&old_pass);
        }
        Ok(())
    }

    /// Checks every pass for out of date shaders, recompiles and
    /// recreates the affected passes. A failing compile is logged
    /// and the old pipeline stays in use.
    pub fn update_shader_code(&mut self) {
        let mut stale_graphic: Vec<PassHandle> = Vec::new();
        let mut stale_compute: Vec<PassHandle> = Vec::new();

        for (handle, pass) in self.passes.iter() {
            match pass {
                Pass::Graphic(graphic) => {
                    let shaders = &graphic.desc.shader_descriptions;
                    let mut out_of_date =
                        shader::is_shader_out_of_date(&shaders.vertex.src_path_relative);
                    out_of_date |=
                        shader::is_shader_out_of_date(&shaders.fragment.src_path_relative);
                    if let Some(g) = &shaders.geometry {
                        out_of_date |= shader::is_shader_out_of_date(&g.src_path_relative);
                    }
                    if let Some(t) = &shaders.tesselation_control {
                        out_of_date |= shader::is_shader_out_of_date(&t.src_path_relative);
                    }
                    if let Some(t) = &shaders.tesselation_evaluation {
                        out_of_date |= shader::is_shader_out_of_date(&t.src_path_relative);
                    }
                    if out_of_date {
                        stale_graphic.push(handle);
                    }
                }
                Pass::Compute(compute) => {
                    if shader::is_shader_out_of_date(
                        &compute.desc.shader_description.src_path_relative,
                    ) {
                        stale_compute.push(handle);
                    }
                }
            }
        }

        if stale_graphic.is_empty() && stale_compute.is_empty() {
            return;
        }

        // passes must not be in use while they are being replaced
        self.dev.wait_idle();

        for handle in stale_graphic {
            let desc = match self.passes.get(handle) {
                Pass::Graphic(pass) => pass.desc.clone(),
                Pass::Compute(_) => unreachable!(),
            };
            if let Err(e) = self.recreate_graphic_pass(handle, &desc) {
                log::error!(
                    "Hot reload of pass '{}' failed ({:?}), keeping the old pipeline",
                    desc.name,
                    e
                );
            }
        }
        for handle in stale_compute {
            let desc = match self.passes.get(handle) {
                Pass::Compute(pass) => pass.desc.clone(),
                Pass::Graphic(_) => unreachable!(),
            };
            if let Err(e) = self.recreate_compute_pass(handle, &desc) {
                log::error!(
                    "Hot reload of pass '{}' failed ({:?}), keeping the old pipeline",
                    desc.name,
                    e
                );
            }
        }
    }

    /*
     * frame recording
     */

    /// Start a new frame: acquire the swapchain image so passes can
    /// bind it, drop any executions left from an aborted frame.
    pub fn new_frame(&mut self) -> Result<()> {
        if self.minimized {
            return Ok(());
        }
        self.frame_executions.clear();
        self.ordered_executions.clear();
        self.ui_draw_data = UiDrawData::default();

        // the previous frame must be done before its acquire
        // semaphore can be reused
        unsafe {
            self.dev
                .dev
                .wait_for_fences(&[self.render_finished_fence], true, u64::MAX)
                .or(Err(AuroraError::TIMEOUT))?;
        }
        self.display.acquire_next_image()?;
        Ok(())
    }

    pub fn set_pass_execution(&mut self, execution: PassExecution) {
        self.frame_executions.push(execution);
    }

    pub fn set_ui_draw_data(&mut self, draw_data: UiDrawData) {
        self.ui_draw_data = draw_data;
    }

    pub fn set_ui_texture(&mut self, image: ImageHandle, sampler: SamplerHandle) {
        let view = self.images.get(image).views_per_mip[0];
        let vk_sampler = *self.samplers.get(sampler);
        self.ui.set_texture(&self.dev, view, vk_sampler);
    }

    pub fn set_global_shader_info(&mut self, info: &GlobalShaderInfo) {
        let bytes = unsafe {
            std::slice::from_raw_parts(
                info as *const GlobalShaderInfo as *const u8,
                std::mem::size_of::<GlobalShaderInfo>(),
            )
        };
        self.transfer
            .fill_host_visible_coherent_buffer(&self.dev, &self.global_info_buffer, bytes, 0);
    }

    /// Queue draws: every mesh is drawn with its matrix pair in
    /// every listed pass. Mismatched lengths are logged and
    /// truncated to the shortest.
    pub fn draw_meshes(
        &mut self,
        mesh_handles: &[MeshHandle],
        matrices: &[[Matrix4<f32>; 2]],
        passes: &[PassHandle],
    ) {
        let mut count = mesh_handles.len();
        if mesh_handles.len() != matrices.len() {
            log::error!(
                "draw_meshes: {} meshes but {} matrix pairs, truncating",
                mesh_handles.len(),
                matrices.len()
            );
            count = count.min(matrices.len());
        }

        for &pass_handle in passes {
            for i in 0..count {
                let mesh = self.meshes.get(mesh_handles[i]);
                let (vertex_flags, material_features) = match self.passes.get(pass_handle) {
                    Pass::Graphic(pass) => (pass.vertex_input_flags, pass.material_features),
                    Pass::Compute(_) => {
                        log::error!("draw_meshes: pass is not a graphic pass, skipping");
                        break;
                    }
                };

                let vertex_buffer = match mesh.vertex_buffer_for_flags(vertex_flags) {
                    Some(buffer) => buffer.buffer.vk_buffer,
                    None => {
                        log::error!("Mesh is missing a vertex buffer for the pass layout, skipping draw");
                        continue;
                    }
                };
                let material_set = if material_features.is_empty() {
                    vk::DescriptorSet::null()
                } else {
                    match mesh.material_for_flags(material_features) {
                        Some(material) => material.descriptor_set,
                        None => {
                            log::error!("Mesh is missing a material for the pass features, skipping draw");
                            continue;
                        }
                    }
                };

                let command = MeshRenderCommand {
                    index_buffer: mesh.index_buffer.vk_buffer,
                    vertex_buffer: vertex_buffer,
                    index_count: mesh.index_count,
                    index_type: mesh.index_type,
                    material_set: material_set,
                    primary_matrix: matrices[i][0],
                    secondary_matrix: matrices[i][1],
                };
                match self.passes.get_mut(pass_handle) {
                    Pass::Graphic(pass) => pass.mesh_render_commands.push(command),
                    Pass::Compute(_) => unreachable!(),
                }
            }
        }
    }

    pub fn draw_dynamic_meshes(
        &mut self,
        mesh_handles: &[DynamicMeshHandle],
        matrices: &[[Matrix4<f32>; 2]],
        passes: &[PassHandle],
    ) {
        let mut count = mesh_handles.len();
        if mesh_handles.len() != matrices.len() {
            log::error!(
                "draw_dynamic_meshes: {} meshes but {} matrix pairs, truncating",
                mesh_handles.len(),
                matrices.len()
            );
            count = count.min(matrices.len());
        }

        for &pass_handle in passes {
            for i in 0..count {
                let mesh = self.dynamic_meshes.get(mesh_handles[i]);
                if mesh.index_count == 0 {
                    continue;
                }
                let command = MeshRenderCommand {
                    index_buffer: mesh.index_buffer.vk_buffer,
                    vertex_buffer: mesh.vertex_buffer.vk_buffer,
                    index_count: mesh.index_count,
                    index_type: vk::IndexType::UINT32,
                    material_set: vk::DescriptorSet::null(),
                    primary_matrix: matrices[i][0],
                    secondary_matrix: matrices[i][1],
                };
                match self.passes.get_mut(pass_handle) {
                    Pass::Graphic(pass) => pass.dynamic_mesh_render_commands.push(command),
                    Pass::Compute(_) => {
                        log::error!("draw_dynamic_meshes: pass is not a graphic pass");
                    }
                }
            }
        }
    }

    /// Update a pass' descriptor set from its declared resources
    fn update_descriptor_set(&self, set: vk::DescriptorSet, resources: &PassResources) {
        let mut image_infos: Vec<[vk::DescriptorImageInfo; 1]> = Vec::with_capacity(
            resources.samplers.len()
                + resources.sampled_images.len()
                + resources.storage_images.len(),
        );
        let mut buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> =
            Vec::with_capacity(resources.uniform_buffers.len() + resources.storage_buffers.len());
        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();

        for sampler in resources.samplers.iter() {
            image_infos.push([vk::DescriptorImageInfo::builder()
                .sampler(*self.samplers.get(sampler.sampler))
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(sampler.binding)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(image_infos.last().unwrap())
                    .build(),
            );
        }

        for sampled in resources.sampled_images.iter() {
            let image = self.images.get(sampled.image);
            // if the image doubles as a storage target this pass it
            // stays in the general layout
            let used_as_storage = resources
                .storage_images
                .iter()
                .any(|s| s.image == sampled.image);
            let layout = if used_as_storage {
                vk::ImageLayout::GENERAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            image_infos.push([vk::DescriptorImageInfo::builder()
                .image_view(image.views_per_mip[sampled.mip_level as usize])
                .image_layout(layout)
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(sampled.binding)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(image_infos.last().unwrap())
                    .build(),
            );
        }

        for storage in resources.storage_images.iter() {
            let image = self.images.get(storage.image);
            image_infos.push([vk::DescriptorImageInfo::builder()
                .image_view(image.views_per_mip[storage.mip_level as usize])
                .image_layout(vk::ImageLayout::GENERAL)
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(storage.binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(image_infos.last().unwrap())
                    .build(),
            );
        }

        for uniform in resources.uniform_buffers.iter() {
            let buffer = self.uniform_buffers.get(uniform.buffer);
            buffer_infos.push([vk::DescriptorBufferInfo::builder()
                .buffer(buffer.vk_buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(uniform.binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(buffer_infos.last().unwrap())
                    .build(),
            );
        }

        for storage in resources.storage_buffers.iter() {
            let entry = self.storage_buffers.get(storage.buffer);
            buffer_infos.push([vk::DescriptorBufferInfo::builder()
                .buffer(entry.buffer.vk_buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)
                .build()]);
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(storage.binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(buffer_infos.last().unwrap())
                    .build(),
            );
        }

        if !writes.is_empty() {
            unsafe {
                self.dev.dev.update_descriptor_sets(&writes, &[]);
            }
        }
    }

    /// Buffer barriers for the storage buffers of one execution:
    /// a buffer written earlier needs a barrier before the next
    /// pass touches it.
    fn buffer_barriers_for_execution(
        &mut self,
        resources: &PassResources,
    ) -> Vec<vk::BufferMemoryBarrier> {
        let mut barriers = Vec::new();
        for resource in resources.storage_buffers.iter() {
            let entry = self.storage_buffers.get_mut(resource.buffer);
            let dst_access = if resource.read_only {
                vk::AccessFlags::SHADER_READ
            } else {
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
            };
            if entry.last_write_access != vk::AccessFlags::empty() {
                barriers.push(create_buffer_barrier(
                    &entry.buffer,
                    entry.last_write_access,
                    dst_access,
                ));
            }
            entry.last_write_access = if resource.read_only {
                vk::AccessFlags::empty()
            } else {
                vk::AccessFlags::SHADER_WRITE
            };
        }
        barriers
    }

    /// Order the frame's executions, update descriptor sets and
    /// synthesize all barriers.
    fn prepare_render_passes(&mut self) {
        // descriptor updates first, in submission order
        for execution in self.frame_executions.iter() {
            let set = match self.passes.get(execution.pass) {
                Pass::Graphic(pass) => pass.descriptor_set,
                Pass::Compute(pass) => pass.descriptor_set,
            };
            self.update_descriptor_set(set, &execution.resources);
        }

        let order = topological_order(&self.frame_executions);

        self.ordered_executions.clear();
        for index in order {
            let execution = self.frame_executions[index].clone();

            let attachments: Vec<ImageHandle> = match self.passes.get(execution.pass) {
                Pass::Graphic(pass) => match execution.framebuffer {
                    Some(fb) => self
                        .framebuffers
                        .get(fb)
                        .attachments
                        .iter()
                        .map(|a| a.image)
                        .collect(),
                    None => pass.attachments.clone(),
                },
                Pass::Compute(_) => Vec::new(),
            };

            let image_barriers = image_barriers_for_execution(
                &mut self.images,
                &execution.resources,
                &attachments,
            );
            let buffer_barriers = self.buffer_barriers_for_execution(&execution.resources);

            self.ordered_executions.push(ExecutionInternal {
                pass: execution.pass,
                dispatch_count: execution.dispatch_count,
                push_constants: execution.push_constants,
                framebuffer: execution.framebuffer,
                image_barriers: image_barriers,
                buffer_barriers: buffer_barriers,
            });
        }
    }

    fn submit_render_pass(&mut self, execution_index: usize, cbuf: vk::CommandBuffer) {
        let execution = &self.ordered_executions[execution_index];
        barriers_command(
            &self.dev.dev,
            cbuf,
            &execution.image_barriers,
            &execution.buffer_barriers,
        );

        let pass_handle = execution.pass;
        let dispatch = execution.dispatch_count;
        let push_constants = execution.push_constants.clone();
        let framebuffer_override = execution.framebuffer;

        let name = self.passes.get(pass_handle).name().to_string();
        self.dev.start_debug_label(cbuf, &name);
        let start_query = self.timestamps.issue_query(&self.dev.dev, cbuf);

        match self.passes.get(pass_handle) {
            Pass::Graphic(pass) => {
                let framebuffer = self
                    .framebuffers
                    .get(framebuffer_override.unwrap_or(pass.framebuffer));

                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(pass.vk_render_pass)
                    .framebuffer(framebuffer.vk_framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: framebuffer.extent,
                    })
                    // rebound every frame, the backing storage may
                    // have moved with the pass registry
                    .clear_values(&pass.clear_values)
                    .build();

                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: framebuffer.extent.width as f32,
                    height: framebuffer.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: framebuffer.extent,
                };

                unsafe {
                    let dev = &self.dev.dev;
                    dev.cmd_begin_render_pass(cbuf, &begin_info, vk::SubpassContents::INLINE);
                    dev.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, pass.pipeline);
                    dev.cmd_set_viewport(cbuf, 0, &[viewport]);
                    dev.cmd_set_scissor(cbuf, 0, &[scissor]);

                    for command in pass
                        .mesh_render_commands
                        .iter()
                        .chain(pass.dynamic_mesh_render_commands.iter())
                    {
                        dev.cmd_bind_vertex_buffers(cbuf, 0, &[command.vertex_buffer], &[0]);
                        dev.cmd_bind_index_buffer(
                            cbuf,
                            command.index_buffer,
                            0,
                            command.index_type,
                        );

                        let matrices = [command.primary_matrix, command.secondary_matrix];
                        let bytes = std::slice::from_raw_parts(
                            matrices.as_ptr() as *const u8,
                            PUSH_CONSTANT_RANGE_SIZE as usize,
                        );
                        dev.cmd_push_constants(
                            cbuf,
                            pass.pipeline_layout,
                            vk::ShaderStageFlags::VERTEX,
                            0,
                            bytes,
                        );

                        let mut sets = vec![self.global_descriptor_set, pass.descriptor_set];
                        if command.material_set != vk::DescriptorSet::null() {
                            sets.push(command.material_set);
                        }
                        dev.cmd_bind_descriptor_sets(
                            cbuf,
                            vk::PipelineBindPoint::GRAPHICS,
                            pass.pipeline_layout,
                            0,
                            &sets,
                            &[],
                        );

                        dev.cmd_draw_indexed(cbuf, command.index_count, 1, 0, 0, 0);
                    }

                    dev.cmd_end_render_pass(cbuf);
                }
            }
            Pass::Compute(pass) => unsafe {
                let dev = &self.dev.dev;
                dev.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, pass.pipeline);
                dev.cmd_bind_descriptor_sets(
                    cbuf,
                    vk::PipelineBindPoint::COMPUTE,
                    pass.pipeline_layout,
                    0,
                    &[self.global_descriptor_set, pass.descriptor_set],
                    &[],
                );
                if !push_constants.is_empty() {
                    dev.cmd_push_constants(
                        cbuf,
                        pass.pipeline_layout,
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        &push_constants,
                    );
                }
                dev.cmd_dispatch(cbuf, dispatch[0], dispatch[1], dispatch[2]);
            },
        }

        let end_query = self.timestamps.issue_query(&self.dev.dev, cbuf);
        self.dev.end_debug_label(cbuf);
        self.timestamps.push_pass_query(TimestampQuery {
            name: name,
            start_query: start_query,
            end_query: end_query,
        });
    }

    /// Record, submit and present the frame built up since
    /// new_frame.
    pub fn render_frame(&mut self) -> Result<()> {
        if self.minimized {
            return Ok(());
        }

        // serialise the CPU exactly one frame ahead of the GPU
        unsafe {
            self.dev
                .dev
                .wait_for_fences(&[self.render_finished_fence], true, u64::MAX)
                .or(Err(AuroraError::TIMEOUT))?;
            self.dev
                .dev
                .reset_fences(&[self.render_finished_fence])
                .or(Err(AuroraError::INVALID))?;
        }

        // reset does not work before the fence wait
        self.timestamps.reset(&self.dev.dev);

        self.prepare_render_passes();

        let cbuf = self.cmd_buffers[self.current_cmd_buffer_index];
        self.current_cmd_buffer_index = (self.current_cmd_buffer_index + 1) % 2;

        unsafe {
            self.dev
                .dev
                .reset_command_buffer(cbuf, vk::CommandBufferResetFlags::empty())
                .or(Err(AuroraError::INVALID))?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.dev
                .dev
                .begin_command_buffer(cbuf, &begin_info)
                .or(Err(AuroraError::INVALID))?;
        }

        // frame spanning query, end patched in after the overlay
        let frame_start_query = self.timestamps.issue_query(&self.dev.dev, cbuf);
        self.timestamps.push_pass_query(TimestampQuery {
            name: String::from("Frame"),
            start_query: frame_start_query,
            end_query: frame_start_query,
        });
        let frame_query_index = self.timestamps.last_query_index();

        for index in 0..self.ordered_executions.len() {
            self.submit_render_pass(index, cbuf);
        }

        // overlay on top of the swapchain image
        {
            self.dev.start_debug_label(cbuf, "ImGui");
            let ui_start_query = self.timestamps.issue_query(&self.dev.dev, cbuf);

            let swapchain_handle = self.swapchain_input_image();
            let ui_barriers = {
                let image = self.images.get_mut(swapchain_handle);
                create_image_barriers(
                    image,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    0,
                    1,
                )
            };
            barriers_command(&self.dev.dev, cbuf, &ui_barriers, &[]);

            let draw_data = std::mem::take(&mut self.ui_draw_data);
            let extent = self.display.resolution;
            let image_index = self.display.current_image;
            self.ui
                .record(&self.dev, cbuf, image_index, extent, &draw_data);
            self.images.get_mut(swapchain_handle).currently_writing = true;

            let ui_end_query = self.timestamps.issue_query(&self.dev.dev, cbuf);
            self.timestamps.push_pass_query(TimestampQuery {
                name: String::from("ImGui"),
                start_query: ui_start_query,
                end_query: ui_end_query,
            });
            self.dev.end_debug_label(cbuf);
        }

        let frame_end_query = self.timestamps.issue_query(&self.dev.dev, cbuf);
        self.timestamps
            .set_end_query(frame_query_index, frame_end_query);

        // transition the swapchain image for presentation
        {
            let swapchain_handle = self.swapchain_input_image();
            let image = self.images.get_mut(swapchain_handle);
            let barriers = create_image_barriers(
                image,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                0,
                1,
            );
            barriers_command(&self.dev.dev, cbuf, &barriers, &[]);
        }

        unsafe {
            self.dev
                .dev
                .end_command_buffer(cbuf)
                .or(Err(AuroraError::INVALID))?;

            let wait_semas = [self.display.image_available_sema];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let signal_semas = [self.display.render_finished_sema];
            let cbufs = [cbuf];
            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semas)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&cbufs)
                .signal_semaphores(&signal_semas)
                .build();
            self.dev
                .dev
                .queue_submit(
                    self.dev.graphics_queue,
                    &[submit_info],
                    self.render_finished_fence,
                )
                .or(Err(AuroraError::INVALID))?;
        }

        self.display.present()?;

        // resolve the timestamps of the frame just submitted
        self.timings = self.timestamps.resolve(&self.dev.dev)?;

        // reset draw queues for the next frame
        for (_, pass) in self.passes.iter_mut() {
            if let Pass::Graphic(graphic) = pass {
                graphic.mesh_render_commands.clear();
                graphic.dynamic_mesh_render_commands.clear();
            }
        }
        self.frame_executions.clear();

        Ok(())
    }

    /// Timings of the most recently completed frame
    pub fn render_timings(&self) -> &[RenderPassTime] {
        &self.timings
    }

    /// (allocated, used) bytes over all memory pools
    pub fn memory_stats(&self) -> (u64, u64) {
        self.allocator.memory_stats()
    }

    /// Current layout of an image mip, for tests and validation
    pub fn image_layout(&self, handle: ImageHandle, mip: u32) -> vk::ImageLayout {
        self.images.get(handle).layout_per_mip[mip as usize]
    }

    pub fn image_extent(&self, handle: ImageHandle) -> (u32, u32, u32) {
        let e = self.images.get(handle).extent;
        (e.width, e.height, e.depth)
    }
}

impl Drop for RenderBackend {
    fn drop(&mut self) {
        self.dev.wait_idle();

        for pass in self.passes.drain() {
            match pass {
                Pass::Graphic(graphic) => {
                    let pass_copy = graphic;
                    self.destroy_graphic_pass_objects(&pass_copy);
                }
                Pass::Compute(compute) => {
                    let pass_copy = compute;
                    self.destroy_compute_pass_objects(&pass_copy);
                }
            }
        }
        for fb in self.framebuffers.drain() {
            unsafe {
                self.dev.dev.destroy_framebuffer(fb.vk_framebuffer, None);
            }
        }
        for mesh in self.meshes.drain() {
            self.destroy_buffer(&mesh.index_buffer.clone());
            for vb in mesh.vertex_buffers.iter() {
                self.destroy_buffer(&vb.buffer.clone());
            }
        }
        for mesh in self.dynamic_meshes.drain() {
            self.destroy_buffer(&mesh.vertex_buffer.clone());
            self.destroy_buffer(&mesh.index_buffer.clone());
        }
        for sampler in self.samplers.drain() {
            unsafe {
                self.dev.dev.destroy_sampler(sampler, None);
            }
        }
        for buffer in self.uniform_buffers.drain() {
            self.destroy_buffer(&buffer);
        }
        for entry in self.storage_buffers.drain() {
            self.destroy_buffer(&entry.buffer);
        }

        self.destroy_swapchain_images();
        for image in self.images.drain() {
            let dev = self.dev.clone();
            for view in image.views_per_mip.iter() {
                unsafe {
                    dev.dev.destroy_image_view(*view, None);
                }
            }
            if !image.is_swapchain_image {
                unsafe {
                    dev.dev.destroy_image(image.vk_image, None);
                }
                if let Some(memory) = image.memory.as_ref() {
                    self.allocator.free(memory);
                }
            }
        }

        let staging = *self.transfer.staging_buffer();
        self.destroy_buffer(&staging);
        let global = self.global_info_buffer;
        self.destroy_buffer(&global);

        {
            let dev = self.dev.clone();
            let ui_vertex = self.ui.vertex_buffer;
            let ui_index = self.ui.index_buffer;
            self.destroy_buffer(&ui_vertex);
            self.destroy_buffer(&ui_index);
            self.ui.destroy(&dev);
        }

        unsafe {
            self.dev.dev.destroy_sampler(self.material_sampler, None);
            self.dev
                .dev
                .destroy_descriptor_set_layout(self.global_set_layout, None);
            self.dev.dev.destroy_fence(self.render_finished_fence, None);
            self.dev.dev.destroy_command_pool(self.cmd_pool, None);
        }
        {
            let dev = self.dev.clone();
            self.transfer.destroy(&dev);
            self.timestamps.destroy(&dev.dev);
            self.descriptor_pools.destroy(&dev.dev);
            self.allocator.destroy(&dev.dev);
        }
        self.display.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Handle;

    fn execution(pass: u32, parents: &[u32]) -> PassExecution {
        let mut e = PassExecution::new(Handle::new(pass));
        e.parents = parents.iter().map(|&p| Handle::new(p)).collect();
        e
    }

    #[test]
    fn toposort_respects_parents() {
        let executions = vec![
            execution(0, &[2]),
            execution(1, &[0, 2]),
            execution(2, &[]),
            execution(3, &[1]),
        ];
        let order = topological_order(&executions);
        let position = |pass: usize| order.iter().position(|&i| i == pass).unwrap();

        for (index, exec) in executions.iter().enumerate() {
            for parent in exec.parents.iter() {
                let parent_index = executions
                    .iter()
                    .position(|e| e.pass == *parent)
                    .unwrap();
                assert!(position(parent_index) < position(index));
            }
        }
    }

    #[test]
    fn toposort_keeps_independent_passes() {
        let executions = vec![execution(0, &[]), execution(1, &[]), execution(2, &[])];
        let order = topological_order(&executions);
        assert_eq!(order.len(), 3);
    }

    #[test]
    #[should_panic(expected = "Cyclic")]
    fn toposort_rejects_cycles() {
        let executions = vec![execution(0, &[1]), execution(1, &[0])];
        topological_order(&executions);
    }
}
