// Compressed vertex attribute types
//
// Vertex normals, tangents and bitangents are packed into
// A2R10G10B10 signed normalized words, uvs into half float pairs.
// The wrapper structs exist for type safety so a packed word is not
// mistaken for a plain integer.

use cgmath::{Vector2, Vector3};
use half::f16;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NormalizedUInt16 {
    pub value: u16,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NormalizedInt16 {
    pub value: i16,
}

/// Corresponds to VK_FORMAT_A2R10G10B10_SNORM_PACK32
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NormalizedR10G10B10A2 {
    pub value: u32,
}

/// Convert a float in range [0, 1] to u16 using the full range.
/// 0 maps to 0, 1 maps to u16::MAX.
pub fn float_to_normalized_u16(f: f32) -> NormalizedUInt16 {
    let clamped = f.max(0.0).min(1.0);
    NormalizedUInt16 {
        value: (clamped * u16::MAX as f32) as u16,
    }
}

/// Convert a float in range [-1, 1] to i16 using the full range
pub fn float_to_normalized_i16(f: f32) -> NormalizedInt16 {
    let clamped = f.max(-1.0).min(1.0);
    let min_value = i16::MIN as f32;
    let max_value = i16::MAX as f32;
    let value_range = max_value - min_value;
    let remapped = clamped * 0.5 + 0.5;
    NormalizedInt16 {
        value: (remapped * value_range + min_value) as i16,
    }
}

/// Pack a vector with components in [-1, 1] into 10_10_10_2 snorm.
/// x lands in bits 20..29, y in 10..19, z in 0..9, the alpha bits
/// stay zero.
pub fn vec3_to_normalized_r10g10b10a2(v: Vector3<f32>) -> NormalizedR10G10B10A2 {
    let mut result = 0u32;
    for i in 0..3 {
        // min and max of a 10 bit signed integer
        let min_value = -510.0;
        let max_value = 511.0;
        let value_range = max_value - min_value;

        let value = [v.x, v.y, v.z][i];
        let clamped = value.max(-1.0).min(1.0);
        let remapped = clamped * 0.5 + 0.5;
        let mut bits = (remapped * value_range + min_value) as i32;

        // get rid of the sign extension above bit 10
        bits &= 1023;

        result |= (bits as u32) << ((2 - i) * 10);
    }
    NormalizedR10G10B10A2 { value: result }
}

/// Decode the way the GPU samples snorm: sign extend each 10 bit
/// component and divide by 511, clamped to [-1, 1].
pub fn normalized_r10g10b10a2_to_vec3(packed: NormalizedR10G10B10A2) -> Vector3<f32> {
    let mut components = [0.0f32; 3];
    for i in 0..3 {
        let bits = ((packed.value >> ((2 - i) * 10)) & 1023) as u32;
        // sign extend from 10 bits
        let signed = if bits & 0x200 != 0 {
            bits as i32 - 1024
        } else {
            bits as i32
        };
        components[i] = (signed as f32 / 511.0).max(-1.0).min(1.0);
    }
    Vector3::new(components[0], components[1], components[2])
}

/// uv pair packed as two half floats
pub fn vec2_to_f16(v: Vector2<f32>) -> [u16; 2] {
    [f16::from_f32(v.x).to_bits(), f16::from_f32(v.y).to_bits()]
}

pub fn f16_to_vec2(packed: [u16; 2]) -> Vector2<f32> {
    Vector2::new(
        f16::from_bits(packed[0]).to_f32(),
        f16::from_bits(packed[1]).to_f32(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Vector3<f32>) -> Vector3<f32> {
        normalized_r10g10b10a2_to_vec3(vec3_to_normalized_r10g10b10a2(v))
    }

    #[test]
    fn snorm_roundtrip_unit_axes() {
        let tolerance = 1.0 / 511.0;

        let one = roundtrip(Vector3::new(1.0, 0.0, 0.0));
        assert!((one.x - 1.0).abs() <= tolerance);
        assert!(one.y.abs() <= tolerance && one.z.abs() <= tolerance);

        let neg = roundtrip(Vector3::new(-1.0, 0.0, 0.0));
        assert!((neg.x + 1.0).abs() <= tolerance);

        let zero = roundtrip(Vector3::new(0.0, 0.0, 0.0));
        assert!(zero.x.abs() <= tolerance);
        assert!(zero.y.abs() <= tolerance);
        assert!(zero.z.abs() <= tolerance);
    }

    #[test]
    fn snorm_components_stay_in_their_lanes() {
        let packed = vec3_to_normalized_r10g10b10a2(Vector3::new(1.0, 0.0, -1.0));
        let v = normalized_r10g10b10a2_to_vec3(packed);
        assert!(v.x > 0.99);
        assert!(v.y.abs() < 0.01);
        assert!(v.z < -0.99);
        // alpha bits unused
        assert_eq!(packed.value >> 30, 0);
    }

    #[test]
    fn half_uv_roundtrip_is_exact_for_representable_values() {
        let uv = Vector2::new(0.25, 0.75);
        let unpacked = f16_to_vec2(vec2_to_f16(uv));
        assert_eq!(unpacked, uv);
    }

    #[test]
    fn normalized_u16_full_range() {
        assert_eq!(float_to_normalized_u16(0.0).value, 0);
        assert_eq!(float_to_normalized_u16(1.0).value, u16::MAX);
        assert_eq!(float_to_normalized_u16(2.0).value, u16::MAX);
    }

    #[test]
    fn normalized_i16_endpoints() {
        assert_eq!(float_to_normalized_i16(-1.0).value, i16::MIN);
        assert!(float_to_normalized_i16(1.0).value >= i16::MAX - 1);
    }
}
