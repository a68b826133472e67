// Staging driven uploads
//
// All initial data reaches the GPU through one fixed size host
// visible staging buffer. Uploads larger than the staging buffer
// are split into multiple one-shot submissions, each waiting on a
// fence. This is cold path code, it runs at load time.

use crate::barrier::{barriers_command, create_image_barriers};
use crate::buffer::Buffer;
use crate::desc::ImageFormat;
use crate::device::Device;
use crate::image::{bytes_per_pixel, is_bc_format, Image};
use crate::{AuroraError, Result};
use ash::vk;

use utils::log;

/// Row and size parameters for copying one mip level.
///
/// Block compressed textures store at least one 4x4 block per mip
/// and at least four bytes per row, however small the mip gets.
pub fn mip_copy_params(format: ImageFormat, width: u32, height: u32) -> (u64, u64) {
    let bpp = bytes_per_pixel(format);
    let mut bytes_per_row = (width as f32 * bpp) as u64;
    let mut mip_size = (width as f32 * height as f32 * bpp) as u64;

    if is_bc_format(format) {
        let min_row = utils::partial_max((4.0 * bpp) as u64, 4);
        let min_block = utils::partial_max((4.0 * 4.0 * bpp) as u64, 8);
        bytes_per_row = utils::partial_max(bytes_per_row, min_row);
        mip_size = utils::partial_max(mip_size, min_block);
    } else {
        bytes_per_row = utils::partial_max(bytes_per_row, 1);
        mip_size = utils::partial_max(mip_size, 1);
    }
    (bytes_per_row, mip_size)
}

pub struct TransferEngine {
    /// short lived command buffers for copies come from here
    transient_cmd_pool: vk::CommandPool,
    staging_buffer: Buffer,
}

impl TransferEngine {
    pub fn new(dev: &Device, staging_buffer: Buffer) -> Self {
        let transient_cmd_pool = dev.create_command_pool(
            dev.queue_families.transfer,
            vk::CommandPoolCreateFlags::TRANSIENT,
        );
        Self {
            transient_cmd_pool: transient_cmd_pool,
            staging_buffer: staging_buffer,
        }
    }

    pub fn staging_buffer(&self) -> &Buffer {
        &self.staging_buffer
    }

    /// memcpy into a mapped host visible coherent buffer
    pub fn fill_host_visible_coherent_buffer(
        &self,
        dev: &Device,
        target: &Buffer,
        data: &[u8],
        offset: vk::DeviceSize,
    ) {
        assert!(offset + data.len() as u64 <= target.size);
        unsafe {
            let ptr = dev
                .dev
                .map_memory(
                    target.memory.vk_memory,
                    target.memory.offset + offset,
                    data.len() as u64,
                    vk::MemoryMapFlags::empty(),
                )
                .expect("Could not map buffer memory");
            let dst = std::slice::from_raw_parts_mut(ptr as *mut u8, data.len());
            dst.copy_from_slice(data);
            dev.dev.unmap_memory(target.memory.vk_memory);
        }
    }

    /// Fill a device local buffer through the staging buffer.
    ///
    /// Returns the number of transfer submissions that were needed,
    /// size / staging size rounded up.
    pub fn fill_buffer(&self, dev: &Device, target: &Buffer, data: &[u8]) -> u32 {
        let staging_size = self.staging_buffer.size as usize;
        let mut submissions = 0;

        let mut offset = 0;
        while offset < data.len() {
            let copy_size = utils::partial_min(staging_size, data.len() - offset);
            self.fill_host_visible_coherent_buffer(
                dev,
                &self.staging_buffer,
                &data[offset..offset + copy_size],
                0,
            );

            let cbuf = dev.begin_one_time_use_cbuf(self.transient_cmd_pool);
            let region = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(offset as u64)
                .size(copy_size as u64)
                .build();
            unsafe {
                dev.dev
                    .cmd_copy_buffer(cbuf, self.staging_buffer.vk_buffer, target.vk_buffer, &[region]);
            }
            dev.submit_and_wait_one_time_use_cbuf(
                self.transient_cmd_pool,
                cbuf,
                dev.transfer_queue,
            );

            offset += copy_size;
            submissions += 1;
        }
        submissions
    }

    /// Upload image data through the staging buffer.
    ///
    /// Data is copied in whole rows; when a mip level is consumed
    /// the walk switches to the next one, halving the resolution.
    /// The data stream may contain a full mip chain. 3D images are
    /// copied slice by slice.
    pub fn transfer_data_into_image(&self, dev: &Device, image: &mut Image, data: &[u8]) {
        let format = image.desc.format;
        let staging_size = self.staging_buffer.size;

        let mut total_offset: usize = 0;
        let mut first_copy = true;

        let mut mip_width = image.extent.width;
        let mut mip_height = image.extent.height;
        let mut mip_depth = image.extent.depth.max(1);

        'mips: for mip in 0..image.mip_count() {
            let (bytes_per_row, slice_size) = mip_copy_params(format, mip_width, mip_height);
            // rows of one slice that fit the staging buffer
            let rows_per_slice = slice_size / bytes_per_row;

            for slice in 0..mip_depth {
                let mut row: u64 = 0;
                while row < rows_per_slice {
                    if total_offset >= data.len() {
                        break 'mips;
                    }

                    let rows_fitting_staging =
                        utils::partial_max(staging_size / bytes_per_row, 1);
                    let mut copy_rows = utils::partial_min(rows_fitting_staging, rows_per_slice - row);
                    // intermediate block compressed copies must end
                    // on a block boundary
                    if is_bc_format(format) && row + copy_rows < rows_per_slice {
                        copy_rows = utils::partial_max((copy_rows / 4) * 4, 4);
                    }
                    let copy_size = utils::partial_min(
                        (copy_rows * bytes_per_row) as usize,
                        data.len() - total_offset,
                    );

                    self.fill_host_visible_coherent_buffer(
                        dev,
                        &self.staging_buffer,
                        &data[total_offset..total_offset + copy_size],
                        0,
                    );

                    let cbuf = dev.begin_one_time_use_cbuf(self.transient_cmd_pool);

                    // whole image to transfer destination on the
                    // first copy only
                    if first_copy {
                        let mip_count = image.mip_count();
                        let to_transfer_dst = create_image_barriers(
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::AccessFlags::TRANSFER_WRITE,
                            0,
                            mip_count,
                        );
                        barriers_command(&dev.dev, cbuf, &to_transfer_dst, &[]);
                        first_copy = false;
                    }

                    let mut buffer_row_length = mip_width;
                    let mut buffer_image_height = mip_height;
                    if is_bc_format(format) {
                        // compressed data is addressed in 4x4 blocks
                        buffer_row_length = buffer_row_length.max(4);
                        buffer_image_height = buffer_image_height.max(4);
                    }

                    let region = vk::BufferImageCopy::builder()
                        .buffer_offset(0)
                        .buffer_row_length(buffer_row_length)
                        .buffer_image_height(buffer_image_height)
                        .image_subresource(
                            vk::ImageSubresourceLayers::builder()
                                .aspect_mask(image.aspect_flags())
                                .mip_level(mip)
                                .base_array_layer(0)
                                .layer_count(image.layer_count())
                                .build(),
                        )
                        .image_offset(vk::Offset3D {
                            x: 0,
                            y: row as i32,
                            z: slice as i32,
                        })
                        .image_extent(vk::Extent3D {
                            width: mip_width,
                            height: utils::partial_min(copy_rows as u32, mip_height),
                            depth: 1,
                        })
                        .build();

                    unsafe {
                        dev.dev.cmd_copy_buffer_to_image(
                            cbuf,
                            self.staging_buffer.vk_buffer,
                            image.vk_image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[region],
                        );
                    }
                    dev.submit_and_wait_one_time_use_cbuf(
                        self.transient_cmd_pool,
                        cbuf,
                        dev.transfer_queue,
                    );

                    row += copy_rows;
                    total_offset += (copy_rows * bytes_per_row) as usize;
                }
            }

            mip_width = (mip_width / 2).max(1);
            mip_height = (mip_height / 2).max(1);
            if image.desc.depth > 1 {
                mip_depth = (mip_depth / 2).max(1);
            }
        }

        if total_offset < data.len() {
            log::error!(
                "Image upload left {} trailing bytes unconsumed",
                data.len() - total_offset
            );
        }
    }

    /// Generate the mip chain by blitting every level into the next
    /// smaller one, then transition the whole chain to `new_layout`.
    pub fn generate_mip_chain(
        &self,
        dev: &Device,
        image: &mut Image,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        if !dev.supports_linear_filtering(image.format) {
            log::error!(
                "Physical device lacks linear filtering support for format {:?}",
                image.format
            );
            return Err(AuroraError::FORMAT_FEATURE_MISSING);
        }

        // blits need graphics capabilities
        let cbuf = dev.begin_one_time_use_cbuf(self.transient_cmd_pool);

        let mut src_extent = [
            image.extent.width as i32,
            image.extent.height as i32,
            image.extent.depth.max(1) as i32,
        ];

        let halve = |extent: &[i32; 3]| {
            [
                if extent[0] != 1 { extent[0] / 2 } else { 1 },
                if extent[1] != 1 { extent[1] / 2 } else { 1 },
                if extent[2] != 1 { extent[2] / 2 } else { 1 },
            ]
        };

        let mip_count = image.mip_count();
        for src_mip in 0..mip_count - 1 {
            let dst_extent = halve(&src_extent);

            let mut barriers = create_image_barriers(
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                src_mip,
                1,
            );
            barriers.extend(create_image_barriers(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                src_mip + 1,
                1,
            ));
            barriers_command(&dev.dev, cbuf, &barriers, &[]);

            let subresource = |mip: u32| {
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(image.aspect_flags())
                    .mip_level(mip)
                    .base_array_layer(0)
                    .layer_count(image.layer_count())
                    .build()
            };

            let blit = vk::ImageBlit::builder()
                .src_subresource(subresource(src_mip))
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: src_extent[0],
                        y: src_extent[1],
                        z: src_extent[2],
                    },
                ])
                .dst_subresource(subresource(src_mip + 1))
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: dst_extent[0],
                        y: dst_extent[1],
                        z: dst_extent[2],
                    },
                ])
                .build();

            unsafe {
                dev.dev.cmd_blit_image(
                    cbuf,
                    image.vk_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.vk_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }

            src_extent = dst_extent;
        }

        // bring the whole chain into the target layout
        let final_barriers = create_image_barriers(
            image,
            new_layout,
            vk::AccessFlags::TRANSFER_WRITE,
            0,
            mip_count,
        );
        barriers_command(&dev.dev, cbuf, &final_barriers, &[]);

        dev.submit_and_wait_one_time_use_cbuf(self.transient_cmd_pool, cbuf, dev.graphics_queue);
        Ok(())
    }

    pub fn destroy(&mut self, dev: &Device) {
        unsafe {
            dev.dev.destroy_command_pool(self.transient_cmd_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bc_minimums() {
        // a 2x2 BC1 image still copies at least 4 bytes per row and
        // one full 4x4 block
        let (bytes_per_row, mip_size) = mip_copy_params(ImageFormat::BC1, 2, 2);
        assert!(bytes_per_row >= 4);
        assert!(mip_size >= 8);

        let (bytes_per_row, mip_size) = mip_copy_params(ImageFormat::BC5, 1, 1);
        assert!(bytes_per_row >= 4);
        assert!(mip_size >= 16);
    }

    #[test]
    fn uncompressed_params() {
        let (bytes_per_row, mip_size) = mip_copy_params(ImageFormat::RGBA8, 16, 8);
        assert_eq!(bytes_per_row, 64);
        assert_eq!(mip_size, 64 * 8);
    }

    #[test]
    fn bc_full_size_rows() {
        // 8x8 BC3 is one byte per pixel
        let (bytes_per_row, mip_size) = mip_copy_params(ImageFormat::BC3, 8, 8);
        assert_eq!(bytes_per_row, 8);
        assert_eq!(mip_size, 64);
    }
}
