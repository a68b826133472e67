// Buffer resources

use crate::memory::Allocation;
use ash::vk;

/// Default size of the fixed staging buffer, 1 MiB
pub const STAGING_BUFFER_SIZE: vk::DeviceSize = 1048576;

#[derive(Copy, Clone)]
pub struct Buffer {
    pub vk_buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    pub memory: Allocation,
}
