// Surface and swapchain handling
//
// The window system hands us an opaque handle, everything else is
// derived here: surface, format selection, the swapchain and the
// acquire/present semaphore pair.

use ash::extensions::khr;
use ash::vk;

use crate::device::Device;
use crate::{AuroraError, Result};
use utils::log;

use std::sync::Arc;

pub struct Display {
    dev: Arc<Device>,

    pub(crate) surface_loader: khr::Surface,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) surface_format: vk::SurfaceFormatKHR,

    pub(crate) swapchain_loader: khr::Swapchain,
    pub(crate) swapchain: vk::SwapchainKHR,
    /// images belonging to the swapchain, not owned by us
    pub(crate) images: Vec<vk::Image>,
    pub(crate) resolution: vk::Extent2D,

    /// signalled by acquire, waited on by the frame submission at
    /// the color attachment output stage
    pub(crate) image_available_sema: vk::Semaphore,
    /// signalled by the frame submission, waited on by present
    pub(crate) render_finished_sema: vk::Semaphore,
    pub(crate) current_image: u32,
}

impl Display {
    /// The preferred format is 8 bit BGRA with an sRGB non-linear
    /// color space, anything else falls back to the first entry.
    fn select_surface_format(
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        pdev: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(pdev, surface)
                .or(Err(AuroraError::VK_SURF_NOT_SUPPORTED))?
        };

        formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.iter().nth(0))
            .copied()
            .ok_or(AuroraError::VK_SURF_NOT_SUPPORTED)
    }

    pub fn new(
        dev: Arc<Device>,
        surface_loader: khr::Surface,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let surface_format = Self::select_surface_format(&surface_loader, surface, dev.pdev)?;
        let swapchain_loader = khr::Swapchain::new(&dev.inst.inst, &dev.dev);

        let image_available_sema = dev.create_semaphore();
        let render_finished_sema = dev.create_semaphore();

        let mut ret = Self {
            dev: dev,
            surface_loader: surface_loader,
            surface: surface,
            surface_format: surface_format,
            swapchain_loader: swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            resolution: vk::Extent2D {
                width: width,
                height: height,
            },
            image_available_sema: image_available_sema,
            render_finished_sema: render_finished_sema,
            current_image: 0,
        };
        ret.recreate_swapchain(width, height)?;
        Ok(ret)
    }

    /// (Re)creates the swapchain for the given resolution.
    /// The old swapchain is passed along so in-flight presentation
    /// can finish; callers already waited for device idle.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.dev.pdev, self.surface)
                .or(Err(AuroraError::VK_SURF_NOT_SUPPORTED))?
        };

        let mut image_count = utils::partial_max(2, caps.min_image_count);
        if caps.max_image_count > 0 {
            image_count = utils::partial_min(image_count, caps.max_image_count);
        }

        let extent = match caps.current_extent.width {
            u32::MAX => vk::Extent2D {
                width: width,
                height: height,
            },
            _ => caps.current_extent,
        };
        self.resolution = extent;

        // the tonemapping pass writes the swapchain image from a
        // compute shader, the ui pass renders on top of it
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::STORAGE;

        let old_swapchain = self.swapchain;
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old_swapchain);

        self.swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&info, None)
                .or(Err(AuroraError::VK_SURF_NOT_SUPPORTED))?
        };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
        }

        self.images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(self.swapchain)
                .or(Err(AuroraError::VK_SURF_NOT_SUPPORTED))?
        };
        log::debug!(
            "Created swapchain with {} images at {}x{}",
            self.images.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Acquire the next image, signalling the image available
    /// semaphore. Returns the image index.
    pub fn acquire_next_image(&mut self) -> Result<u32> {
        let (index, _suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    self.image_available_sema,
                    vk::Fence::null(),
                )
                .or(Err(AuroraError::SWAPCHAIN_OUT_OF_DATE))?
        };
        self.current_image = index;
        Ok(index)
    }

    /// Present the current image, waiting on render finished
    pub fn present(&self) -> Result<()> {
        let swapchains = [self.swapchain];
        let indices = [self.current_image];
        let wait_semas = [self.render_finished_sema];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semas)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.dev.presentation_queue, &info)
                .or(Err(AuroraError::SWAPCHAIN_OUT_OF_DATE))?;
        }
        Ok(())
    }

    pub fn destroy(&mut self) {
        unsafe {
            self.dev.dev.destroy_semaphore(self.image_available_sema, None);
            self.dev.dev.destroy_semaphore(self.render_finished_sema, None);
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
