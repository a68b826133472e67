// Math helpers shared by frontend and backend

pub mod aabb;
pub mod frustum;
pub mod packing;

pub use aabb::AxisAlignedBoundingBox;
pub use frustum::{ViewFrustum, ViewFrustumNormals, ViewFrustumPoints};

use cgmath::{Matrix4, SquareMatrix, Vector2, Vector3};

/// Mips in a full chain down to 1x1
///
/// (1024, 512, 1) gives 11.
pub fn mip_count_from_resolution(width: u32, height: u32, depth: u32) -> u32 {
    let max = width.max(height).max(depth).max(1);
    1 + (max as f32).log2().floor() as u32
}

/// Spherical degrees to a direction vector
pub fn direction_to_vector(direction: Vector2<f32>) -> Vector3<f32> {
    let theta = direction.y / 180.0 * std::f32::consts::PI;
    let phi = direction.x / 180.0 * std::f32::consts::PI;

    Vector3::new(
        theta.sin() * phi.cos(),
        theta.sin() * phi.sin(),
        theta.cos(),
    )
}

/// Maps GL style clip space to Vulkan: y flipped, z from [-1, 1]
/// into [0, 1].
pub fn vulkan_clip_correction() -> Matrix4<f32> {
    let mut m = Matrix4::identity();
    m.y.y = -1.0;
    m.z.z = 0.5;
    m.w.z = 0.5;
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count() {
        assert_eq!(mip_count_from_resolution(1024, 512, 1), 11);
        assert_eq!(mip_count_from_resolution(1, 1, 1), 1);
        assert_eq!(mip_count_from_resolution(2, 2, 1), 2);
        assert_eq!(mip_count_from_resolution(1, 1, 256), 9);
    }
}
