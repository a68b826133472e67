// View frustum construction and coarse culling
//
// reference: http://www.lighthouse3d.com/tutorials/view-frustum-culling/

use crate::camera::Camera;
use crate::math::aabb::AxisAlignedBoundingBox;
use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, SquareMatrix, Vector3, Vector4};

/// Frustum corner points.
/// Naming scheme: horizontal(l: left, r: right), vertical(u: upper,
/// l: lower), plane(n: near, f: far).
#[derive(Copy, Clone, Debug)]
pub struct ViewFrustumPoints {
    pub l_u_n: Vector3<f32>,
    pub r_u_n: Vector3<f32>,
    pub l_l_n: Vector3<f32>,
    pub r_l_n: Vector3<f32>,

    pub l_u_f: Vector3<f32>,
    pub r_u_f: Vector3<f32>,
    pub l_l_f: Vector3<f32>,
    pub r_l_f: Vector3<f32>,
}

/// Outward facing plane normals
#[derive(Copy, Clone, Debug)]
pub struct ViewFrustumNormals {
    pub top: Vector3<f32>,
    pub bot: Vector3<f32>,
    pub left: Vector3<f32>,
    pub right: Vector3<f32>,
    pub near: Vector3<f32>,
    pub far: Vector3<f32>,
}

#[derive(Copy, Clone, Debug)]
pub struct ViewFrustum {
    pub points: ViewFrustumPoints,
    pub normals: ViewFrustumNormals,
}

impl ViewFrustum {
    /// Build the frustum from camera parameters.
    /// The camera looks towards the negative forward axis.
    pub fn from_camera(camera: &Camera) -> Self {
        let extrinsic = &camera.extrinsic;
        let intrinsic = &camera.intrinsic;

        let near_center = extrinsic.position - extrinsic.forward * intrinsic.near;
        let far_center = extrinsic.position - extrinsic.forward * intrinsic.far;

        let tan_fov = (intrinsic.fov_degrees.to_radians() * 0.5).tan();
        let height_near = tan_fov * intrinsic.near;
        let height_far = tan_fov * intrinsic.far;

        let width_near = height_near * intrinsic.aspect_ratio;
        let width_far = height_far * intrinsic.aspect_ratio;

        let up = extrinsic.up;
        let right = extrinsic.right;

        let points = ViewFrustumPoints {
            r_u_f: far_center + up * height_far + right * width_far,
            l_u_f: far_center + up * height_far - right * width_far,
            r_l_f: far_center - up * height_far + right * width_far,
            l_l_f: far_center - up * height_far - right * width_far,

            r_u_n: near_center + up * height_near + right * width_near,
            l_u_n: near_center + up * height_near - right * width_near,
            r_l_n: near_center - up * height_near + right * width_near,
            l_l_n: near_center - up * height_near - right * width_near,
        };

        Self::from_points(points)
    }

    /// Rebuild from a changed point set
    pub fn from_points(points: ViewFrustumPoints) -> Self {
        Self {
            points: points,
            normals: compute_frustum_normals(&points),
        }
    }

    pub fn point_array(&self) -> [Vector3<f32>; 8] {
        let p = &self.points;
        [
            p.l_u_n, p.r_u_n, p.l_l_n, p.r_l_n, p.l_u_f, p.r_u_f, p.l_l_f, p.r_l_f,
        ]
    }

    /// Push the near plane corners towards the sun.
    ///
    /// The near plane of a light-fitted frustum is its sun-facing
    /// side. Casters between the visible volume and the sun still
    /// throw shadows into view, so shadow culling moves that face a
    /// long way out before testing.
    pub fn with_near_plane_extended(&self, light_direction: Vector3<f32>, distance: f32) -> Self {
        let offset = light_direction.normalize() * distance;
        let p = &self.points;
        Self::from_points(ViewFrustumPoints {
            l_u_n: p.l_u_n + offset,
            r_u_n: p.r_u_n + offset,
            l_l_n: p.l_l_n + offset,
            r_l_n: p.r_l_n + offset,
            l_u_f: p.l_u_f,
            r_u_f: p.r_u_f,
            l_l_f: p.l_l_f,
            r_l_f: p.r_l_f,
        })
    }
}

pub fn compute_frustum_normals(p: &ViewFrustumPoints) -> ViewFrustumNormals {
    ViewFrustumNormals {
        top: (p.r_u_n - p.l_u_n).cross(p.r_u_f - p.r_u_n).normalize(),
        bot: (p.r_l_f - p.r_l_n).cross(p.r_l_n - p.l_l_n).normalize(),

        right: (p.r_l_f - p.r_l_n).cross(p.r_u_n - p.r_l_n).normalize(),
        left: (p.l_u_n - p.l_l_n).cross(p.l_l_f - p.l_l_n).normalize(),

        near: (p.r_l_n - p.l_l_n).cross(p.r_u_n - p.r_l_n).normalize(),
        far: (p.r_u_f - p.r_l_f).cross(p.r_l_f - p.l_l_f).normalize(),
    }
}

/// Fit an orthogonal frustum around the camera frustum as seen from
/// the light.
///
/// reference: https://developer.download.nvidia.com/SDK/10.5/opengl/src/cascaded_shadow_maps/doc/cascaded_shadow_maps.pdf
///
/// `light_direction` points towards the light source. The result's
/// near plane is the sun-facing side; tight per-cascade fitting to
/// depth values happens on the GPU, this volume is only used for
/// coarse caster culling.
pub fn compute_orthogonal_frustum_fitted_to_camera(
    camera_frustum: &ViewFrustum,
    light_direction: Vector3<f32>,
) -> ViewFrustum {
    let up = if light_direction.y.abs() < 0.999 {
        Vector3::new(0.0, -1.0, 0.0)
    } else {
        Vector3::new(0.0, 0.0, -1.0)
    };

    let view = Matrix4::look_at(
        Point3::from_vec(-light_direction),
        Point3::origin(),
        up,
    );

    let mut min_p = Vector3::new(f32::MAX, f32::MAX, f32::MAX);
    let mut max_p = Vector3::new(f32::MIN, f32::MIN, f32::MIN);
    for p in camera_frustum.point_array().iter() {
        let t = view * Vector4::new(p.x, p.y, p.z, 1.0);
        min_p = Vector3::new(min_p.x.min(t.x), min_p.y.min(t.y), min_p.z.min(t.z));
        max_p = Vector3::new(max_p.x.max(t.x), max_p.y.max(t.y), max_p.z.max(t.z));
    }

    let scale = Vector3::new(
        2.0 / (max_p.x - min_p.x),
        2.0 / (max_p.y - min_p.y),
        2.0 / (max_p.z - min_p.z),
    );
    let offset = Vector3::new(
        -0.5 * (max_p.x + min_p.x) * scale.x,
        -0.5 * (max_p.y + min_p.y) * scale.y,
        -0.5 * (max_p.z + min_p.z) * scale.z,
    );

    let mut clip = Matrix4::identity();
    clip.x.x = scale.x;
    clip.y.y = scale.y;
    clip.z.z = scale.z;
    clip.w = Vector4::new(offset.x, offset.y, offset.z, 1.0);

    let clip_to_world = (clip * view)
        .invert()
        .expect("light clip matrix must be invertible");

    let unproject = |x: f32, y: f32, z: f32| {
        let v = clip_to_world * Vector4::new(x, y, z, 1.0);
        Vector3::new(v.x, v.y, v.z)
    };

    ViewFrustum::from_points(ViewFrustumPoints {
        l_l_n: unproject(-1.0, 1.0, -1.0),
        r_l_n: unproject(1.0, 1.0, -1.0),
        l_u_n: unproject(-1.0, -1.0, -1.0),
        r_u_n: unproject(1.0, -1.0, -1.0),
        l_l_f: unproject(-1.0, 1.0, 1.0),
        r_l_f: unproject(1.0, 1.0, 1.0),
        l_u_f: unproject(-1.0, -1.0, 1.0),
        r_u_f: unproject(1.0, -1.0, 1.0),
    })
}

/// Coarse box-in-frustum test
///
/// Checks all box corners against every plane halfspace. A box whose
/// corners all lie outside one plane does not intersect. This is
/// conservative: boxes outside the frustum but not fully outside any
/// single plane still report an intersection, which only costs a
/// wasted draw.
pub fn is_aabb_intersecting_frustum(frustum: &ViewFrustum, bb: &AxisAlignedBoundingBox) -> bool {
    let fps = &frustum.points;
    let fns = &frustum.normals;

    // a point on each plane and its outward normal
    let plane_point_normal_pairs = [
        (fps.l_u_f, fns.top),
        (fps.l_l_f, fns.bot),
        (fps.l_u_n, fns.near),
        (fps.l_u_f, fns.far),
        (fps.l_u_f, fns.left),
        (fps.r_u_f, fns.right),
    ];

    for (plane_point, plane_normal) in plane_point_normal_pairs.iter() {
        let mut outside_plane = true;
        for bp in bb.points().iter() {
            outside_plane &= (bp - plane_point).dot(*plane_normal) > 0.0;
        }
        if outside_plane {
            return false;
        }
    }
    true
}

/// Line-list mesh of the frustum edges for debug rendering
pub fn frustum_to_line_mesh(frustum: &ViewFrustum) -> (Vec<Vector3<f32>>, Vec<u32>) {
    let p = &frustum.points;
    let positions = vec![
        p.l_l_n, p.l_l_f, p.l_u_n, p.l_u_f, p.r_l_n, p.r_l_f, p.r_u_n, p.r_u_f,
    ];
    // near quad, far quad, connecting edges
    let indices = vec![
        0, 2, 2, 6, 6, 4, 4, 0, // near
        1, 3, 3, 7, 7, 5, 5, 1, // far
        0, 1, 2, 3, 4, 5, 6, 7, // connections
    ];
    (positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraExtrinsic, CameraIntrinsic};

    fn test_camera() -> Camera {
        Camera {
            extrinsic: CameraExtrinsic {
                position: Vector3::new(0.0, 0.0, 0.0),
                forward: Vector3::new(0.0, 0.0, -1.0),
                up: Vector3::new(0.0, 1.0, 0.0),
                right: Vector3::new(1.0, 0.0, 0.0),
            },
            intrinsic: CameraIntrinsic {
                fov_degrees: 90.0,
                aspect_ratio: 1.0,
                near: 0.1,
                far: 100.0,
            },
        }
    }

    #[test]
    fn box_outside_does_not_intersect() {
        let frustum = ViewFrustum::from_camera(&test_camera());
        // camera looks towards -forward = +z, box far behind it
        let bb = AxisAlignedBoundingBox {
            min: Vector3::new(-1.0, -1.0, -200.0),
            max: Vector3::new(1.0, 1.0, -190.0),
        };
        assert!(!is_aabb_intersecting_frustum(&frustum, &bb));
    }

    #[test]
    fn box_containing_near_point_intersects() {
        let frustum = ViewFrustum::from_camera(&test_camera());
        let near_point = frustum.points.l_u_n;
        let bb = AxisAlignedBoundingBox {
            min: near_point - Vector3::new(0.5, 0.5, 0.5),
            max: near_point + Vector3::new(0.5, 0.5, 0.5),
        };
        assert!(is_aabb_intersecting_frustum(&frustum, &bb));
    }

    #[test]
    fn box_inside_intersects() {
        let frustum = ViewFrustum::from_camera(&test_camera());
        let bb = AxisAlignedBoundingBox {
            min: Vector3::new(-1.0, -1.0, 9.0),
            max: Vector3::new(1.0, 1.0, 11.0),
        };
        assert!(is_aabb_intersecting_frustum(&frustum, &bb));
    }

    #[test]
    fn fitted_frustum_contains_camera_frustum() {
        let frustum = ViewFrustum::from_camera(&test_camera());
        let sun = Vector3::new(0.3, 0.8, 0.2).normalize();
        let fitted = compute_orthogonal_frustum_fitted_to_camera(&frustum, sun);
        for p in frustum.point_array().iter() {
            let bb = AxisAlignedBoundingBox {
                min: p - Vector3::new(0.01, 0.01, 0.01),
                max: p + Vector3::new(0.01, 0.01, 0.01),
            };
            assert!(is_aabb_intersecting_frustum(&fitted, &bb));
        }
    }

    #[test]
    fn near_extension_catches_casters_towards_sun() {
        let frustum = ViewFrustum::from_camera(&test_camera());
        let sun = Vector3::new(0.0, 1.0, 0.0);
        let fitted = compute_orthogonal_frustum_fitted_to_camera(&frustum, sun);

        // caster far above everything the camera can see
        let bb = AxisAlignedBoundingBox {
            min: Vector3::new(-1.0, 150.0, 9.0),
            max: Vector3::new(1.0, 152.0, 11.0),
        };
        assert!(!is_aabb_intersecting_frustum(&fitted, &bb));

        let extended = fitted.with_near_plane_extended(sun, 10000.0);
        assert!(is_aabb_intersecting_frustum(&extended, &bb));
    }
}
