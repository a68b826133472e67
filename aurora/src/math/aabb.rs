// Axis aligned bounding boxes

use cgmath::{Matrix4, Vector3, Vector4};

#[derive(Copy, Clone, Debug)]
pub struct AxisAlignedBoundingBox {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

/// vertex count that to_line_strip produces
pub const AABB_VERTICES_PER_MESH: usize = 20;

fn vec_min(a: Vector3<f32>, b: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z))
}

fn vec_max(a: Vector3<f32>, b: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z))
}

impl AxisAlignedBoundingBox {
    pub fn from_positions(positions: &[Vector3<f32>]) -> Self {
        let mut bb = Self {
            min: Vector3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Vector3::new(f32::MIN, f32::MIN, f32::MIN),
        };
        for pos in positions {
            bb.min = vec_min(bb.min, *pos);
            bb.max = vec_max(bb.max, *pos);
        }
        bb
    }

    /// The eight corner points
    pub fn points(&self) -> [Vector3<f32>; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vector3::new(min.x, min.y, min.z),
            Vector3::new(min.x, min.y, max.z),
            Vector3::new(min.x, max.y, min.z),
            Vector3::new(min.x, max.y, max.z),
            Vector3::new(max.x, min.y, min.z),
            Vector3::new(max.x, min.y, max.z),
            Vector3::new(max.x, max.y, min.z),
            Vector3::new(max.x, max.y, max.z),
        ]
    }

    /// Transform all corners and rebuild the box around them
    pub fn transformed(&self, m: &Matrix4<f32>) -> Self {
        let mut transformed = [Vector3::new(0.0, 0.0, 0.0); 8];
        for (i, p) in self.points().iter().enumerate() {
            let v = m * Vector4::new(p.x, p.y, p.z, 1.0);
            transformed[i] = Vector3::new(v.x, v.y, v.z);
        }
        Self::from_positions(&transformed)
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vector3<f32> {
        (self.max - self.min) * 0.5
    }

    /// Line-list positions for debug rendering, no diagonals:
    /// between consecutive points only one component flips.
    pub fn to_line_strip(&self) -> Vec<Vector3<f32>> {
        let (min, max) = (self.min, self.max);
        vec![
            // first quad
            Vector3::new(min.x, min.y, min.z),
            Vector3::new(min.x, min.y, max.z),
            Vector3::new(min.x, max.y, max.z),
            Vector3::new(min.x, max.y, min.z),
            Vector3::new(min.x, min.y, min.z),
            // second quad, same but with max in x
            Vector3::new(max.x, min.y, min.z),
            Vector3::new(max.x, min.y, max.z),
            Vector3::new(max.x, max.y, max.z),
            Vector3::new(max.x, max.y, min.z),
            Vector3::new(max.x, min.y, min.z),
            // third quad
            Vector3::new(max.x, min.y, min.z),
            Vector3::new(min.x, min.y, min.z),
            Vector3::new(min.x, max.y, min.z),
            Vector3::new(max.x, max.y, min.z),
            Vector3::new(max.x, min.y, min.z),
            // fourth quad, same but with max in z
            Vector3::new(max.x, min.y, max.z),
            Vector3::new(min.x, min.y, max.z),
            Vector3::new(min.x, max.y, max.z),
            Vector3::new(max.x, max.y, max.z),
            Vector3::new(max.x, min.y, max.z),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Matrix4;

    #[test]
    fn translated_unit_cube() {
        let bb = AxisAlignedBoundingBox {
            min: Vector3::new(0.0, 0.0, 0.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };
        let m = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0));
        let t = bb.transformed(&m);
        assert_eq!(t.min, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(t.max, Vector3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn rotation_grows_box() {
        let bb = AxisAlignedBoundingBox {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };
        let m = Matrix4::from_angle_y(cgmath::Deg(45.0));
        let t = bb.transformed(&m);
        let expected = 2.0f32.sqrt();
        assert!((t.max.x - expected).abs() < 1e-5);
        assert!((t.min.x + expected).abs() < 1e-5);
        // y is unaffected by a rotation around y
        assert!((t.max.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn line_strip_has_no_diagonals() {
        let bb = AxisAlignedBoundingBox {
            min: Vector3::new(0.0, 0.0, 0.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };
        let strip = bb.to_line_strip();
        assert_eq!(strip.len(), AABB_VERTICES_PER_MESH);
        for pair in strip.windows(2) {
            let delta = pair[1] - pair[0];
            let changed = (delta.x != 0.0) as u32 + (delta.y != 0.0) as u32 + (delta.z != 0.0) as u32;
            assert!(changed <= 1);
        }
    }
}
