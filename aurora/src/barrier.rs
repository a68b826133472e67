// Image layout tracking and barrier synthesis
//
// Passes declare how they use a resource, the scheduler turns that
// into the minimal set of memory barriers. Every mip level tracks
// its own layout because transfers and mip generation leave a chain
// in mixed states. All pipeline barriers are emitted with
// ALL_COMMANDS source and destination stages; ordering precision
// comes from the access masks and the frame level pass order.

use crate::buffer::Buffer;
use crate::desc::{ImageHandle, ImageTag, PassResources};
use crate::image::Image;
use crate::registry::Registry;
use ash::vk;

/// Creates barriers transitioning `mip_levels` mips starting at
/// `base_mip` to `new_layout`.
///
/// Contiguous mips that share their old layout are folded into one
/// barrier by extending the subresource range. The image state is
/// updated: affected mip layouts, the current access mask, and the
/// writing flag is cleared (callers re-set it when the new use
/// writes).
pub fn create_image_barriers(
    image: &mut Image,
    new_layout: vk::ImageLayout,
    dst_access: vk::AccessFlags,
    base_mip: u32,
    mip_levels: u32,
) -> Vec<vk::ImageMemoryBarrier> {
    let aspect_flags = image.aspect_flags();
    let layer_count = image.layer_count();

    let mut barriers: Vec<vk::ImageMemoryBarrier> = Vec::new();

    let new_barrier = |image: &Image, mip: u32| {
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(image.current_access)
            .dst_access_mask(dst_access)
            .old_layout(image.layout_per_mip[mip as usize])
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.vk_image)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect_flags)
                    .base_mip_level(mip)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(layer_count)
                    .build(),
            )
            .build()
    };

    barriers.push(new_barrier(image, base_mip));

    for i in 1..mip_levels {
        let mip = base_mip + i;
        let last = barriers.last_mut().unwrap();
        if image.layout_per_mip[mip as usize] == last.old_layout {
            // same old layout: extend the subresource range
            last.subresource_range.level_count += 1;
        } else {
            let barrier = new_barrier(image, mip);
            barriers.push(barrier);
        }
    }

    // update the tracked state
    for mip in base_mip..base_mip + mip_levels {
        image.layout_per_mip[mip as usize] = new_layout;
    }
    image.current_access = dst_access;
    image.currently_writing = false;

    barriers
}

fn any_mip_differs(image: &Image, required: vk::ImageLayout) -> bool {
    image.layout_per_mip.iter().any(|&l| l != required)
}

fn has_barrier_for_image(barriers: &[vk::ImageMemoryBarrier], image: vk::Image) -> bool {
    barriers.iter().any(|b| b.image == image)
}

/// Synthesize the image barriers one pass execution needs.
///
/// Rules per binding kind:
/// - storage images require GENERAL with read+write access and mark
///   the image as being written
/// - sampled images require SHADER_READ_ONLY_OPTIMAL; if the same
///   image is also bound as storage in this pass it stays GENERAL
///   and the sampled entry is skipped
/// - attachments require their attachment layout with write access
///   and mark the image as being written
///
/// A barrier is only emitted when a mip differs from the required
/// layout or the image is currently flagged as being written.
pub fn image_barriers_for_execution(
    images: &mut Registry<ImageTag, Image>,
    resources: &PassResources,
    attachments: &[ImageHandle],
) -> Vec<vk::ImageMemoryBarrier> {
    let mut barriers: Vec<vk::ImageMemoryBarrier> = Vec::new();

    // storage images
    for storage_image in resources.storage_images.iter() {
        let image = images.get_mut(storage_image.image);
        let required_layout = vk::ImageLayout::GENERAL;
        let needs_transition = any_mip_differs(image, required_layout);

        // the same image can appear as two storage bindings when a
        // pass accesses different mips, one barrier covers both
        if (image.currently_writing || needs_transition)
            && !has_barrier_for_image(&barriers, image.vk_image)
        {
            let mip_count = image.mip_count();
            barriers.extend(create_image_barriers(
                image,
                required_layout,
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                0,
                mip_count,
            ));
        }
        image.currently_writing = true;
    }

    // sampled images
    for sampled_image in resources.sampled_images.iter() {
        // an image used as storage in the same pass stays in the
        // general layout, skip the sampled entry
        let used_as_storage = resources
            .storage_images
            .iter()
            .any(|s| s.image == sampled_image.image);
        if used_as_storage {
            continue;
        }

        let image = images.get_mut(sampled_image.image);
        let required_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        if image.currently_writing || any_mip_differs(image, required_layout) {
            let mip_count = image.mip_count();
            barriers.extend(create_image_barriers(
                image,
                required_layout,
                vk::AccessFlags::SHADER_READ,
                0,
                mip_count,
            ));
        }
    }

    // attachments
    for attachment in attachments.iter() {
        let image = images.get_mut(*attachment);
        let required_layout = if image.is_depth_format() {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        };

        if image.currently_writing || any_mip_differs(image, required_layout) {
            let access = if image.is_depth_format() {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            } else {
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            };
            let mip_count = image.mip_count();
            barriers.extend(create_image_barriers(
                image,
                required_layout,
                access,
                0,
                mip_count,
            ));
        }
        image.currently_writing = true;
    }

    barriers
}

/// Emit one pipeline barrier covering all collected image and
/// buffer barriers. Source and destination stage are ALL_COMMANDS,
/// precision comes from the access masks.
pub fn barriers_command(
    dev: &ash::Device,
    cmd_buffer: vk::CommandBuffer,
    image_barriers: &[vk::ImageMemoryBarrier],
    buffer_barriers: &[vk::BufferMemoryBarrier],
) {
    if image_barriers.is_empty() && buffer_barriers.is_empty() {
        return;
    }
    unsafe {
        dev.cmd_pipeline_barrier(
            cmd_buffer,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            buffer_barriers,
            image_barriers,
        );
    }
}

/// Barrier for a storage buffer written by an earlier pass
pub fn create_buffer_barrier(
    buffer: &Buffer,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::BufferMemoryBarrier {
    vk::BufferMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer.vk_buffer)
        .offset(0)
        .size(buffer.size)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{ImageDescription, ImageResource, ImageType};
    use crate::registry::Handle;

    fn test_image(mip_count: u32) -> Image {
        Image {
            vk_image: vk::Image::null(),
            views_per_mip: vec![vk::ImageView::null(); mip_count as usize],
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D {
                width: 16,
                height: 16,
                depth: 1,
            },
            image_type: ImageType::Type2D,
            layout_per_mip: vec![vk::ImageLayout::UNDEFINED; mip_count as usize],
            current_access: vk::AccessFlags::empty(),
            currently_writing: false,
            desc: ImageDescription::default(),
            is_swapchain_image: false,
            memory: None,
        }
    }

    #[test]
    fn barrier_updates_all_mips_and_second_pass_is_free() {
        let mut images: Registry<ImageTag, Image> = Registry::new();
        let handle = images.add(test_image(4));

        let mut resources = PassResources::default();
        resources
            .sampled_images
            .push(ImageResource::new(handle, 0, 0));

        let barriers = image_barriers_for_execution(&mut images, &resources, &[]);
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].subresource_range.level_count, 4);
        for layout in images.get(handle).layout_per_mip.iter() {
            assert_eq!(*layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        // same use again on the untouched image: no barrier
        let barriers = image_barriers_for_execution(&mut images, &resources, &[]);
        assert!(barriers.is_empty());
    }

    #[test]
    fn contiguous_old_layouts_coalesce() {
        let mut image = test_image(6);
        // mips 0..3 in one layout, 3..6 in another
        for mip in 0..3 {
            image.layout_per_mip[mip] = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        }
        for mip in 3..6 {
            image.layout_per_mip[mip] = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        }

        let barriers = create_image_barriers(
            &mut image,
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::SHADER_WRITE,
            0,
            6,
        );
        // exactly two barriers, not six
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].subresource_range.base_mip_level, 0);
        assert_eq!(barriers[0].subresource_range.level_count, 3);
        assert_eq!(barriers[1].subresource_range.base_mip_level, 3);
        assert_eq!(barriers[1].subresource_range.level_count, 3);
    }

    #[test]
    fn storage_and_sampled_same_image_forces_general() {
        let mut images: Registry<ImageTag, Image> = Registry::new();
        let handle = images.add(test_image(1));

        let mut resources = PassResources::default();
        resources
            .storage_images
            .push(ImageResource::new(handle, 0, 0));
        resources
            .sampled_images
            .push(ImageResource::new(handle, 0, 1));

        let barriers = image_barriers_for_execution(&mut images, &resources, &[]);
        // one barrier to general, the sampled entry is skipped
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(
            images.get(handle).layout_per_mip[0],
            vk::ImageLayout::GENERAL
        );
        assert!(images.get(handle).currently_writing);
    }

    #[test]
    fn writer_then_reader_needs_barrier() {
        let mut images: Registry<ImageTag, Image> = Registry::new();
        let handle = images.add(test_image(1));

        let mut write_resources = PassResources::default();
        write_resources
            .storage_images
            .push(ImageResource::new(handle, 0, 0));
        image_barriers_for_execution(&mut images, &write_resources, &[]);
        assert!(images.get(handle).currently_writing);

        // the reading pass sees the writing flag even though it
        // wants the same layout as a previous read would
        let mut read_resources = PassResources::default();
        read_resources
            .sampled_images
            .push(ImageResource::new(handle, 0, 0));
        let barriers = image_barriers_for_execution(&mut images, &read_resources, &[]);
        assert_eq!(barriers.len(), 1);
        assert!(!images.get(handle).currently_writing);
    }

    #[test]
    fn attachments_use_format_specific_layouts() {
        let mut images: Registry<ImageTag, Image> = Registry::new();
        let color = images.add(test_image(1));
        let mut depth_image = test_image(1);
        depth_image.format = vk::Format::D32_SFLOAT;
        let depth = images.add(depth_image);

        let resources = PassResources::default();
        let barriers =
            image_barriers_for_execution(&mut images, &resources, &[color, depth]);
        assert_eq!(barriers.len(), 2);
        assert_eq!(
            barriers[0].new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            barriers[1].new_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            barriers[1].subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn cube_images_cover_six_layers() {
        let mut image = test_image(1);
        image.image_type = ImageType::TypeCube;
        let barriers = create_image_barriers(
            &mut image,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            0,
            1,
        );
        assert_eq!(barriers[0].subresource_range.layer_count, 6);
    }

    #[test]
    fn unused_handle_type_checks() {
        // Handle<ImageTag> cannot be conjured from a buffer handle,
        // this is enforced at compile time; the runtime check left
        // here is the sentinel rule.
        let images: Registry<ImageTag, Image> = Registry::new();
        assert!(!images.contains(Handle::invalid()));
    }
}
