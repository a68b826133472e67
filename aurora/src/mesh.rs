// Mesh resources
//
// The same logical mesh is drawn by several passes that want
// different vertex attributes, so it carries one vertex buffer per
// layout and one material descriptor set per feature subset.

use crate::buffer::Buffer;
use crate::desc::{ImageHandle, MaterialFeatureFlags, VertexInputFlags};
use crate::math::AxisAlignedBoundingBox;
use ash::vk;
use cgmath::{Matrix4, Vector3};

/// Mesh data handed to the backend, textures already resolved to
/// handles so the frontend can dedupe them.
pub struct MeshDataInternal {
    pub index_count: u32,
    pub vertex_count: u32,
    /// u16 values when vertex_count fits, u32 otherwise
    pub index_buffer: Vec<u8>,
    /// full packed vertex layout
    pub vertex_buffer: Vec<u8>,
    pub bounding_box: AxisAlignedBoundingBox,
    pub albedo_texture: Option<ImageHandle>,
    pub normal_texture: Option<ImageHandle>,
    pub specular_texture: Option<ImageHandle>,
}

pub struct MeshVertexBuffer {
    pub buffer: Buffer,
    pub flags: VertexInputFlags,
}

pub struct MeshMaterial {
    pub descriptor_set: vk::DescriptorSet,
    pub flags: MaterialFeatureFlags,
}

pub struct Mesh {
    pub index_count: u32,
    pub index_buffer: Buffer,
    pub index_type: vk::IndexType,
    pub vertex_buffers: Vec<MeshVertexBuffer>,
    pub materials: Vec<MeshMaterial>,
}

impl Mesh {
    pub fn vertex_buffer_for_flags(&self, flags: VertexInputFlags) -> Option<&MeshVertexBuffer> {
        self.vertex_buffers.iter().find(|b| b.flags == flags)
    }

    pub fn material_for_flags(&self, flags: MaterialFeatureFlags) -> Option<&MeshMaterial> {
        self.materials.iter().find(|m| m.flags == flags)
    }
}

/// Host visible mesh with a fixed maximum, updated by memory map
/// every frame. Rendering from host visible memory is slow, these
/// only exist for debug geometry.
pub struct DynamicMesh {
    pub index_count: u32,
    pub max_positions: u32,
    pub max_indices: u32,
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
}

/// One queued draw, recorded when the pass executes
pub struct MeshRenderCommand {
    pub index_buffer: vk::Buffer,
    pub vertex_buffer: vk::Buffer,
    pub index_count: u32,
    pub index_type: vk::IndexType,
    pub material_set: vk::DescriptorSet,
    /// typically MVP, or jittered MVP for the prepass
    pub primary_matrix: Matrix4<f32>,
    /// typically the model matrix, or the previous frame MVP for
    /// motion vectors
    pub secondary_matrix: Matrix4<f32>,
}

/// Build positions-only vertex data for a dynamic mesh update
pub fn positions_to_bytes(positions: &[Vector3<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(positions.len() * 12);
    for p in positions {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.z.to_le_bytes());
    }
    out
}
