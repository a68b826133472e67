// Image resources and format conversion
//
// Every mip level of an image tracks its own layout; the scheduler
// reads and updates these when it synthesizes barriers. The creating
// description is kept around so a resize can rebuild the image under
// the same handle.

use crate::desc::{ImageDescription, ImageFormat, ImageType, MipCount};
use crate::math;
use crate::memory::Allocation;
use ash::vk;

pub struct Image {
    pub vk_image: vk::Image,
    /// one view per mip, each view covers the mip and everything below
    pub views_per_mip: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub image_type: ImageType,

    // current status
    pub layout_per_mip: Vec<vk::ImageLayout>,
    pub current_access: vk::AccessFlags,
    pub currently_writing: bool,

    /// description backup in case of resize
    pub desc: ImageDescription,

    /// swapchain images are not owned: views are destroyed, the
    /// image and its memory belong to the swapchain
    pub is_swapchain_image: bool,
    pub memory: Option<Allocation>,
}

impl Image {
    pub fn mip_count(&self) -> u32 {
        debug_assert_eq!(self.layout_per_mip.len(), self.views_per_mip.len());
        self.layout_per_mip.len() as u32
    }

    pub fn layer_count(&self) -> u32 {
        if self.image_type == ImageType::TypeCube {
            6
        } else {
            1
        }
    }

    pub fn is_depth_format(&self) -> bool {
        is_vk_depth_format(self.format)
    }

    pub fn aspect_flags(&self) -> vk::ImageAspectFlags {
        if self.is_depth_format() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

pub fn to_vk_format(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::R8 => vk::Format::R8_UNORM,
        ImageFormat::RG8 => vk::Format::R8G8_UNORM,
        ImageFormat::RGBA8 => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::RG16Float => vk::Format::R16G16_SFLOAT,
        ImageFormat::RG32Float => vk::Format::R32G32_SFLOAT,
        ImageFormat::RGBA16Float => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::RGBA32Float => vk::Format::R32G32B32A32_SFLOAT,
        ImageFormat::R11G11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        ImageFormat::Depth16 => vk::Format::D16_UNORM,
        ImageFormat::Depth32 => vk::Format::D32_SFLOAT,
        ImageFormat::BC1 => vk::Format::BC1_RGB_UNORM_BLOCK,
        ImageFormat::BC3 => vk::Format::BC3_UNORM_BLOCK,
        ImageFormat::BC5 => vk::Format::BC5_UNORM_BLOCK,
    }
}

pub fn is_depth_format(format: ImageFormat) -> bool {
    match format {
        ImageFormat::Depth16 | ImageFormat::Depth32 => true,
        _ => false,
    }
}

pub fn is_vk_depth_format(format: vk::Format) -> bool {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT => true,
        _ => false,
    }
}

pub fn is_bc_format(format: ImageFormat) -> bool {
    match format {
        ImageFormat::BC1 | ImageFormat::BC3 | ImageFormat::BC5 => true,
        _ => false,
    }
}

/// bytes per pixel is fractional for block compressed formats
pub fn bytes_per_pixel(format: ImageFormat) -> f32 {
    match format {
        ImageFormat::R8 => 1.0,
        ImageFormat::RG8 => 2.0,
        ImageFormat::RGBA8 => 4.0,
        ImageFormat::RG16Float => 4.0,
        ImageFormat::RG32Float => 8.0,
        ImageFormat::RGBA16Float => 8.0,
        ImageFormat::RGBA32Float => 16.0,
        ImageFormat::R11G11B10Float => 4.0,
        ImageFormat::Depth16 => 2.0,
        ImageFormat::Depth32 => 4.0,
        ImageFormat::BC1 => 0.5,
        ImageFormat::BC3 => 1.0,
        ImageFormat::BC5 => 1.0,
    }
}

pub fn to_vk_image_type(image_type: ImageType) -> (vk::ImageType, vk::ImageViewType) {
    match image_type {
        ImageType::Type1D => (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D),
        ImageType::Type2D => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D),
        ImageType::Type3D => (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D),
        ImageType::TypeCube => (vk::ImageType::TYPE_2D, vk::ImageViewType::CUBE),
    }
}

/// Resolve the mip count policy of a description
pub fn mip_count_from_description(desc: &ImageDescription) -> u32 {
    match desc.mip_count {
        MipCount::One => 1,
        MipCount::Manual(n) => n,
        MipCount::FullChain | MipCount::FullChainAlreadyInData => {
            math::mip_count_from_resolution(desc.width, desc.height, desc.depth)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_policies() {
        let mut desc = ImageDescription::default();
        desc.width = 1024;
        desc.height = 512;
        desc.depth = 1;

        desc.mip_count = MipCount::One;
        assert_eq!(mip_count_from_description(&desc), 1);
        desc.mip_count = MipCount::Manual(4);
        assert_eq!(mip_count_from_description(&desc), 4);
        desc.mip_count = MipCount::FullChain;
        assert_eq!(mip_count_from_description(&desc), 11);
        desc.mip_count = MipCount::FullChainAlreadyInData;
        assert_eq!(mip_count_from_description(&desc), 11);
    }

    #[test]
    fn depth_formats() {
        assert!(is_depth_format(ImageFormat::Depth32));
        assert!(!is_depth_format(ImageFormat::RGBA8));
        assert!(is_vk_depth_format(to_vk_format(ImageFormat::Depth16)));
    }
}
