// Vertex input layouts
//
// Five fixed attributes exist, identified by shader input location:
// position, uv, normal, tangent, bitangent. A pass only consumes
// the attributes its vertex shader declares, and every mesh carries
// one tightly packed vertex buffer per layout in use. Attribute
// order inside a buffer always follows the location order.

use crate::desc::VertexInputFlags;
use ash::vk;

pub const VERTEX_INPUT_ATTRIBUTE_COUNT: usize = 5;

/// which vertex attribute goes to which location
pub const VERTEX_INPUT_FLAG_PER_LOCATION: [VertexInputFlags; VERTEX_INPUT_ATTRIBUTE_COUNT] = [
    VertexInputFlags::POSITION,
    VertexInputFlags::UV,
    VertexInputFlags::NORMAL,
    VertexInputFlags::TANGENT,
    VertexInputFlags::BITANGENT,
];

/// format per location
pub const VERTEX_INPUT_FORMAT_PER_LOCATION: [vk::Format; VERTEX_INPUT_ATTRIBUTE_COUNT] = [
    vk::Format::R32G32B32_SFLOAT,          // position
    vk::Format::R16G16_SFLOAT,             // uvs
    vk::Format::A2R10G10B10_SNORM_PACK32,  // normal
    vk::Format::A2R10G10B10_SNORM_PACK32,  // tangent
    vk::Format::A2R10G10B10_SNORM_PACK32,  // bitangent
];

/// byte size per location, packed words are padded to keep the
/// following attribute 4 byte aligned
pub const VERTEX_INPUT_BYTES_PER_LOCATION: [u32; VERTEX_INPUT_ATTRIBUTE_COUNT] = [12, 4, 8, 8, 8];

/// Byte stride of a vertex with the given attribute set
pub fn vertex_stride(flags: VertexInputFlags) -> u32 {
    let mut stride = 0;
    for location in 0..VERTEX_INPUT_ATTRIBUTE_COUNT {
        if flags.contains(VERTEX_INPUT_FLAG_PER_LOCATION[location]) {
            stride += VERTEX_INPUT_BYTES_PER_LOCATION[location];
        }
    }
    stride
}

/// Byte offset of every present attribute, indexed by location.
/// Absent attributes get None.
pub fn vertex_attribute_offsets(
    flags: VertexInputFlags,
) -> [Option<u32>; VERTEX_INPUT_ATTRIBUTE_COUNT] {
    let mut offsets = [None; VERTEX_INPUT_ATTRIBUTE_COUNT];
    let mut running = 0;
    for location in 0..VERTEX_INPUT_ATTRIBUTE_COUNT {
        if flags.contains(VERTEX_INPUT_FLAG_PER_LOCATION[location]) {
            offsets[location] = Some(running);
            running += VERTEX_INPUT_BYTES_PER_LOCATION[location];
        }
    }
    offsets
}

/// Vertex input state for a pipeline consuming `flags`
pub fn vertex_input_descriptions(
    flags: VertexInputFlags,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    if flags.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let bindings = vec![vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(vertex_stride(flags))
        .input_rate(vk::VertexInputRate::VERTEX)
        .build()];

    let offsets = vertex_attribute_offsets(flags);
    let mut attributes = Vec::new();
    for location in 0..VERTEX_INPUT_ATTRIBUTE_COUNT {
        if let Some(offset) = offsets[location] {
            attributes.push(
                vk::VertexInputAttributeDescription::builder()
                    .location(location as u32)
                    .binding(0)
                    .format(VERTEX_INPUT_FORMAT_PER_LOCATION[location])
                    .offset(offset)
                    .build(),
            );
        }
    }
    (bindings, attributes)
}

/// Build a per-layout vertex buffer by gathering the flagged
/// attributes out of the full packed stream.
pub fn extract_vertex_attributes(full_vertex_buffer: &[u8], flags: VertexInputFlags) -> Vec<u8> {
    let full_flags = VertexInputFlags::all();
    let full_stride = vertex_stride(full_flags) as usize;
    assert!(full_vertex_buffer.len() % full_stride == 0);
    let vertex_count = full_vertex_buffer.len() / full_stride;

    let full_offsets = vertex_attribute_offsets(full_flags);
    let target_stride = vertex_stride(flags) as usize;
    let mut out = Vec::with_capacity(vertex_count * target_stride);

    for vertex in 0..vertex_count {
        let base = vertex * full_stride;
        for location in 0..VERTEX_INPUT_ATTRIBUTE_COUNT {
            if flags.contains(VERTEX_INPUT_FLAG_PER_LOCATION[location]) {
                let offset = base + full_offsets[location].unwrap() as usize;
                let size = VERTEX_INPUT_BYTES_PER_LOCATION[location] as usize;
                out.extend_from_slice(&full_vertex_buffer[offset..offset + size]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_layout_stride_and_offsets() {
        let flags = VertexInputFlags::all();
        assert_eq!(vertex_stride(flags), 12 + 4 + 8 + 8 + 8);

        let offsets = vertex_attribute_offsets(flags);
        assert_eq!(offsets[0], Some(0));
        assert_eq!(offsets[1], Some(12));
        assert_eq!(offsets[2], Some(16));
        assert_eq!(offsets[3], Some(24));
        assert_eq!(offsets[4], Some(32));
    }

    #[test]
    fn position_only_layout() {
        let flags = VertexInputFlags::POSITION;
        assert_eq!(vertex_stride(flags), 12);
        let (bindings, attributes) = vertex_input_descriptions(flags);
        assert_eq!(bindings[0].stride, 12);
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].location, 0);
        assert_eq!(attributes[0].offset, 0);
    }

    #[test]
    fn sparse_layout_skips_missing_attributes() {
        let flags = VertexInputFlags::POSITION | VertexInputFlags::NORMAL;
        assert_eq!(vertex_stride(flags), 20);
        let (_, attributes) = vertex_input_descriptions(flags);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].location, 2);
        assert_eq!(attributes[1].offset, 12);
    }

    #[test]
    fn attribute_extraction() {
        // two vertices in the full layout with recognizable bytes
        let full_stride = vertex_stride(VertexInputFlags::all()) as usize;
        let mut data = vec![0u8; 2 * full_stride];
        for vertex in 0..2 {
            for byte in 0..full_stride {
                data[vertex * full_stride + byte] = (vertex * full_stride + byte) as u8;
            }
        }

        let positions = extract_vertex_attributes(&data, VertexInputFlags::POSITION);
        assert_eq!(positions.len(), 2 * 12);
        assert_eq!(&positions[0..12], &data[0..12]);
        assert_eq!(&positions[12..24], &data[full_stride..full_stride + 12]);

        let pos_normal = extract_vertex_attributes(
            &data,
            VertexInputFlags::POSITION | VertexInputFlags::NORMAL,
        );
        assert_eq!(pos_normal.len(), 2 * 20);
        // normal sits at offset 16 in the full layout
        assert_eq!(&pos_normal[12..20], &data[16..24]);
    }
}
