// Vulkan device representation
//
// This stores per-GPU state: the logical device, the queues the
// renderer hands work to and small helpers for one-shot command
// buffers, sync objects and debug labels.

use ash::extensions::khr;
use ash::vk;

use crate::instance::Instance;
use crate::{AuroraError, Result};
use utils::log;

use std::ffi::CString;
use std::sync::Arc;

#[derive(Copy, Clone, Debug)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub presentation: u32,
    pub compute: u32,
    pub transfer: u32,
}

/// Aurora Device
///
/// This holds all of the Vulkan logic for one GPU. Shared read-only
/// by every component, so it lives behind an Arc.
pub struct Device {
    pub(crate) inst: Arc<Instance>,
    /// the logical device we are using
    pub(crate) dev: ash::Device,
    /// the physical device selected to display to
    pub(crate) pdev: vk::PhysicalDevice,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,

    pub(crate) queue_families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) presentation_queue: vk::Queue,
    pub(crate) compute_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,

    /// nanoseconds per timestamp tick
    pub(crate) timestamp_period: f32,
}

/// The device features the render pipeline cannot run without
fn has_required_features(inst: &ash::Instance, pdev: vk::PhysicalDevice) -> bool {
    let features = unsafe { inst.get_physical_device_features(pdev) };

    let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::builder().build();
    let mut features2 = vk::PhysicalDeviceFeatures2::builder().build();
    features2.p_next = &mut vulkan12 as *mut _ as *mut std::ffi::c_void;
    unsafe { inst.get_physical_device_features2(pdev, &mut features2) };

    features.sampler_anisotropy != 0
        && features.image_cube_array != 0
        && features.fragment_stores_and_atomics != 0
        && features.fill_mode_non_solid != 0
        && features.depth_clamp != 0
        && vulkan12.host_query_reset != 0
}

impl Device {
    /// Choose a queue family matching `flags`
    fn select_queue_family(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        flags: vk::QueueFlags,
    ) -> Result<u32> {
        unsafe { inst.get_physical_device_queue_family_properties(pdev) }
            .iter()
            .enumerate()
            .filter_map(|(index, info)| match info.queue_flags.contains(flags) {
                true => Some(index as u32),
                false => None,
            })
            .nth(0)
            .ok_or(AuroraError::NO_SUITABLE_PHYSICAL_DEVICE)
    }

    /// Choose a queue family that can present to `surface`
    fn select_present_queue_family(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<u32> {
        unsafe { inst.get_physical_device_queue_family_properties(pdev) }
            .iter()
            .enumerate()
            .filter_map(|(index, info)| {
                let supports_present = unsafe {
                    surface_loader
                        .get_physical_device_surface_support(pdev, index as u32, surface)
                        .unwrap_or(false)
                };
                match supports_present && info.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    true => Some(index as u32),
                    false => None,
                }
            })
            .nth(0)
            .ok_or(AuroraError::VK_SURF_NOT_SUPPORTED)
    }

    /// Choose a vkPhysicalDevice with the feature set we need
    fn select_pdev(inst: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let pdevices = unsafe {
            inst.enumerate_physical_devices()
                .or(Err(AuroraError::NO_SUITABLE_PHYSICAL_DEVICE))?
        };

        for pdev in pdevices.iter() {
            if has_required_features(inst, *pdev) {
                return Ok(*pdev);
            }
            let props = unsafe { inst.get_physical_device_properties(*pdev) };
            log::error!(
                "Physical device {:?} is missing required features, skipping",
                unsafe { std::ffi::CStr::from_ptr(props.device_name.as_ptr()) }
            );
        }
        Err(AuroraError::MISSING_DEVICE_FEATURES)
    }

    fn create_device(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        queue_families: &[u32],
    ) -> Result<ash::Device> {
        let dev_extension_names = [khr::Swapchain::name().as_ptr()];

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .image_cube_array(true)
            .fragment_stores_and_atomics(true)
            .fill_mode_non_solid(true)
            .depth_clamp(true)
            .build();
        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .host_query_reset(true)
            .build();

        // queue create infos for every distinct family in use
        let priorities = [1.0];
        let mut distinct_families: Vec<u32> = queue_families.to_vec();
        distinct_families.sort_unstable();
        distinct_families.dedup();
        let queue_infos: Vec<_> = distinct_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let devinfo = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_infos.as_slice())
            .enabled_extension_names(&dev_extension_names)
            .enabled_features(&features)
            .push_next(&mut vulkan12_features);

        unsafe {
            inst.create_device(pdev, &devinfo, None)
                .or(Err(AuroraError::NO_SUITABLE_PHYSICAL_DEVICE))
        }
    }

    /// Create a new Device for the first physical device carrying
    /// the required features. The surface is needed to validate
    /// presentation support of the chosen queue family.
    pub fn new(
        instance: Arc<Instance>,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let inst = &instance.inst;
        let pdev = Self::select_pdev(inst)?;

        let graphics = Self::select_queue_family(inst, pdev, vk::QueueFlags::GRAPHICS)?;
        let compute = Self::select_queue_family(inst, pdev, vk::QueueFlags::COMPUTE)?;
        let transfer = Self::select_queue_family(inst, pdev, vk::QueueFlags::TRANSFER)?;
        let presentation = Self::select_present_queue_family(inst, pdev, surface_loader, surface)?;

        let queue_families = QueueFamilies {
            graphics: graphics,
            presentation: presentation,
            compute: compute,
            transfer: transfer,
        };

        let dev = Self::create_device(inst, pdev, &[graphics, presentation, compute, transfer])?;

        let mem_props = unsafe { inst.get_physical_device_memory_properties(pdev) };
        let props = unsafe { inst.get_physical_device_properties(pdev) };

        let ret = Self {
            inst: instance,
            graphics_queue: unsafe { dev.get_device_queue(graphics, 0) },
            presentation_queue: unsafe { dev.get_device_queue(presentation, 0) },
            compute_queue: unsafe { dev.get_device_queue(compute, 0) },
            transfer_queue: unsafe { dev.get_device_queue(transfer, 0) },
            dev: dev,
            pdev: pdev,
            mem_props: mem_props,
            queue_families: queue_families,
            timestamp_period: props.limits.timestamp_period,
        };
        Ok(ret)
    }

    pub fn vk_device(&self) -> &ash::Device {
        &self.dev
    }

    pub fn wait_idle(&self) {
        unsafe {
            self.dev
                .device_wait_idle()
                .expect("Could not wait for device idle");
        }
    }

    /// returns a new vkCommandPool for the given queue family
    pub(crate) fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> vk::CommandPool {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family);

        unsafe {
            self.dev
                .create_command_pool(&pool_create_info, None)
                .unwrap()
        }
    }

    /// Allocate a vec of vkCommandBuffers. Command buffer is
    /// shortened to `cbuf` in many areas of the code.
    pub(crate) fn create_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Vec<vk::CommandBuffer> {
        let cbuf_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(count)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        unsafe {
            self.dev
                .allocate_command_buffers(&cbuf_allocate_info)
                .unwrap()
        }
    }

    /// allocate and begin a one time use command buffer
    pub(crate) fn begin_one_time_use_cbuf(&self, pool: vk::CommandPool) -> vk::CommandBuffer {
        let cbuf = self.create_command_buffers(pool, 1)[0];
        let record_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.dev
                .begin_command_buffer(cbuf, &record_info)
                .expect("Could not start command buffer");
        }
        cbuf
    }

    /// End, submit and wait for a one time use command buffer, then
    /// free it. Used for transfers, which block on a fence per
    /// submission anyway.
    pub(crate) fn submit_and_wait_one_time_use_cbuf(
        &self,
        pool: vk::CommandPool,
        cbuf: vk::CommandBuffer,
        queue: vk::Queue,
    ) {
        unsafe {
            self.dev
                .end_command_buffer(cbuf)
                .expect("Could not end command buffer");

            let fence = self.create_fence(false);
            let cbufs = [cbuf];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&cbufs).build();
            self.dev
                .queue_submit(queue, &[submit_info], fence)
                .expect("Could not submit buffer to queue");
            self.dev
                .wait_for_fences(&[fence], true, u64::MAX)
                .expect("Could not wait for transfer fence");
            self.dev.destroy_fence(fence, None);
            self.dev.free_command_buffers(pool, &cbufs);
        }
    }

    pub(crate) fn create_semaphore(&self) -> vk::Semaphore {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.dev.create_semaphore(&info, None).unwrap() }
    }

    pub(crate) fn create_fence(&self, signaled: bool) -> vk::Fence {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.dev.create_fence(&info, None).unwrap() }
    }

    /// Debug label wrapping pass submission, shows up in capture
    /// tools and validation output.
    pub(crate) fn start_debug_label(&self, cbuf: vk::CommandBuffer, name: &str) {
        let name_c = CString::new(name).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::builder().label_name(&name_c).build();
        unsafe {
            self.inst.debug_loader().cmd_begin_debug_utils_label(cbuf, &label);
        }
    }

    pub(crate) fn end_debug_label(&self, cbuf: vk::CommandBuffer) {
        unsafe {
            self.inst.debug_loader().cmd_end_debug_utils_label(cbuf);
        }
    }

    /// Does the format support linear filtered sampling? Mip chain
    /// generation blits with linear filtering and fails without it.
    pub(crate) fn supports_linear_filtering(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.inst
                .inst
                .get_physical_device_format_properties(self.pdev, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.dev.device_wait_idle().unwrap();
            self.dev.destroy_device(None);
        }
    }
}
