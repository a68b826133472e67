// Camera state consumed by the renderer
//
// The controller that fills the extrinsic from input lives outside
// the renderer, only the resulting basis is consumed here.

use crate::math;
use cgmath::{Matrix4, SquareMatrix, Vector3, Vector4};

#[derive(Copy, Clone, Debug)]
pub struct CameraExtrinsic {
    pub position: Vector3<f32>,
    pub forward: Vector3<f32>,
    pub up: Vector3<f32>,
    pub right: Vector3<f32>,
}

impl Default for CameraExtrinsic {
    fn default() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            forward: Vector3::new(0.0, 0.0, 1.0),
            up: Vector3::new(0.0, 1.0, 0.0),
            right: Vector3::new(1.0, 0.0, 0.0),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CameraIntrinsic {
    pub fov_degrees: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraIntrinsic {
    fn default() -> Self {
        Self {
            fov_degrees: 35.0,
            aspect_ratio: 800.0 / 600.0,
            near: 0.1,
            far: 300.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Camera {
    pub extrinsic: CameraExtrinsic,
    pub intrinsic: CameraIntrinsic,
}

/// View matrix from the camera basis
pub fn view_matrix_from_extrinsic(extrinsic: &CameraExtrinsic) -> Matrix4<f32> {
    let mut view = Matrix4::identity();
    view.x = Vector4::new(extrinsic.right.x, extrinsic.right.y, extrinsic.right.z, 0.0);
    view.y = Vector4::new(extrinsic.up.x, extrinsic.up.y, extrinsic.up.z, 0.0);
    view.z = Vector4::new(extrinsic.forward.x, extrinsic.forward.y, extrinsic.forward.z, 0.0);
    view = cgmath::Matrix::transpose(&view);
    view * Matrix4::from_translation(-extrinsic.position)
}

/// Projection matrix with the Vulkan clip space correction applied
pub fn projection_matrix_from_intrinsic(intrinsic: &CameraIntrinsic) -> Matrix4<f32> {
    let projection = cgmath::perspective(
        cgmath::Deg(intrinsic.fov_degrees),
        intrinsic.aspect_ratio,
        intrinsic.near,
        intrinsic.far,
    );
    math::vulkan_clip_correction() * projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;

    #[test]
    fn view_matrix_moves_camera_to_origin() {
        let extrinsic = CameraExtrinsic {
            position: Vector3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        let view = view_matrix_from_extrinsic(&extrinsic);
        let p = view * Vector4::new(1.0, 2.0, 3.0, 1.0);
        assert!(Vector3::new(p.x, p.y, p.z).magnitude() < 1e-6);
    }
}
