// External data formats
//
// The renderer consumes two on-disk formats: the preprocessed mesh
// binary stream produced by the asset pipeline and DDS textures with
// block compression. Everything else (OBJ parsing, STB image decode)
// happens outside and arrives as ready-made descriptions.

use crate::desc::{ImageDescription, ImageFormat, ImageType, ImageUsage, MipCount};
use crate::math::AxisAlignedBoundingBox;
use crate::{AuroraError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use cgmath::Vector3;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;

/// Byte size of one vertex in the full layout:
/// position f32x3, uv f16x2, normal/tangent/bitangent 10_10_10_2
/// (packed words are padded to 4 byte alignment, so 8 bytes each)
pub const FULL_VERTEX_BYTE_SIZE: u32 = 12 + 4 + 8 + 8 + 8;

/// Indices switch to 32 bit at this vertex count
pub const MAX_U16_INDEX_COUNT: u32 = 0xFFFF;

#[derive(Clone, Default, Debug, PartialEq)]
pub struct TexturePaths {
    pub albedo: PathBuf,
    pub normal: PathBuf,
    pub specular: PathBuf,
}

/// One mesh as produced by the preprocessor, consumed by the
/// backend as-is. The index buffer holds u16 values when the vertex
/// count fits, u32 otherwise. The vertex buffer is the final packed
/// stream.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct MeshBinary {
    pub index_count: u32,
    pub vertex_count: u32,
    pub bounding_box_min: [f32; 3],
    pub bounding_box_max: [f32; 3],
    pub texture_paths: TexturePaths,
    pub index_buffer: Vec<u8>,
    pub vertex_buffer: Vec<u8>,
}

impl MeshBinary {
    pub fn uses_u16_indices(&self) -> bool {
        self.vertex_count < MAX_U16_INDEX_COUNT
    }

    pub fn bounding_box(&self) -> AxisAlignedBoundingBox {
        AxisAlignedBoundingBox {
            min: Vector3::from(self.bounding_box_min),
            max: Vector3::from(self.bounding_box_max),
        }
    }
}

fn read_path(reader: &mut Cursor<&[u8]>) -> Result<PathBuf> {
    let len = reader
        .read_u32::<LittleEndian>()
        .or(Err(AuroraError::INVALID_MESH_DATA))? as usize;
    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .or(Err(AuroraError::INVALID_MESH_DATA))?;
    let s = String::from_utf8(bytes).or(Err(AuroraError::INVALID_MESH_DATA))?;
    Ok(PathBuf::from(s))
}

fn write_path(writer: &mut Vec<u8>, path: &PathBuf) {
    let s = path.to_string_lossy();
    writer.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    writer.write_all(s.as_bytes()).unwrap();
}

/// Parse a stream of mesh binaries.
///
/// Layout per mesh: index count u32, vertex count u32, bounding box
/// min/max vec3, three length-prefixed texture paths, then the raw
/// index and vertex buffers.
pub fn read_mesh_binaries(data: &[u8]) -> Result<Vec<MeshBinary>> {
    let mut reader = Cursor::new(data);
    let mut meshes = Vec::new();

    while (reader.position() as usize) < data.len() {
        let index_count = reader
            .read_u32::<LittleEndian>()
            .or(Err(AuroraError::INVALID_MESH_DATA))?;
        let vertex_count = reader
            .read_u32::<LittleEndian>()
            .or(Err(AuroraError::INVALID_MESH_DATA))?;

        let mut bb = [[0f32; 3]; 2];
        for corner in bb.iter_mut() {
            for component in corner.iter_mut() {
                *component = reader
                    .read_f32::<LittleEndian>()
                    .or(Err(AuroraError::INVALID_MESH_DATA))?;
            }
        }

        let texture_paths = TexturePaths {
            albedo: read_path(&mut reader)?,
            normal: read_path(&mut reader)?,
            specular: read_path(&mut reader)?,
        };

        let index_byte_size = if vertex_count < MAX_U16_INDEX_COUNT {
            2
        } else {
            4
        };
        let mut index_buffer = vec![0u8; (index_count * index_byte_size) as usize];
        reader
            .read_exact(&mut index_buffer)
            .or(Err(AuroraError::INVALID_MESH_DATA))?;

        let mut vertex_buffer = vec![0u8; (vertex_count * FULL_VERTEX_BYTE_SIZE) as usize];
        reader
            .read_exact(&mut vertex_buffer)
            .or(Err(AuroraError::INVALID_MESH_DATA))?;

        meshes.push(MeshBinary {
            index_count: index_count,
            vertex_count: vertex_count,
            bounding_box_min: bb[0],
            bounding_box_max: bb[1],
            texture_paths: texture_paths,
            index_buffer: index_buffer,
            vertex_buffer: vertex_buffer,
        });
    }
    Ok(meshes)
}

/// Inverse of read_mesh_binaries, used by the preprocessor side and
/// the tests.
pub fn write_mesh_binaries(meshes: &[MeshBinary]) -> Vec<u8> {
    let mut out = Vec::new();
    for mesh in meshes {
        out.write_u32::<LittleEndian>(mesh.index_count).unwrap();
        out.write_u32::<LittleEndian>(mesh.vertex_count).unwrap();
        for component in mesh
            .bounding_box_min
            .iter()
            .chain(mesh.bounding_box_max.iter())
        {
            out.write_f32::<LittleEndian>(*component).unwrap();
        }
        write_path(&mut out, &mesh.texture_paths.albedo);
        write_path(&mut out, &mesh.texture_paths.normal);
        write_path(&mut out, &mesh.texture_paths.specular);
        out.write_all(&mesh.index_buffer).unwrap();
        out.write_all(&mesh.vertex_buffer).unwrap();
    }
    out
}

/*
 * DDS
 *
 * reference: https://docs.microsoft.com/en-us/windows/win32/direct3ddds/dx-graphics-dds-reference
 */

const DDS_MAGIC: u32 = 0x20534444;
const DDS_HEADER_SIZE: usize = 124;
const DDS_PIXELFORMAT_FOURCC: u32 = 0x4;

const BC1_CODE: u32 = 827611204;
const BC3_CODE: u32 = 894720068;
const BC5_CODE: u32 = 843666497;

/// Parse a DDS file into an image description.
///
/// Only the block compressed formats the material system uses are
/// accepted, everything else fails the load and the caller falls
/// back to a default texture. The file carries its own mip chain.
pub fn parse_dds(data: &[u8]) -> Result<ImageDescription> {
    // magic number plus the fixed size header
    if data.len() < 4 + DDS_HEADER_SIZE {
        return Err(AuroraError::IMAGE_LOAD_FAILED);
    }
    let mut reader = Cursor::new(data);

    let magic = reader
        .read_u32::<LittleEndian>()
        .or(Err(AuroraError::IMAGE_LOAD_FAILED))?;
    if magic != DDS_MAGIC {
        return Err(AuroraError::IMAGE_LOAD_FAILED);
    }

    let header_size = reader
        .read_u32::<LittleEndian>()
        .or(Err(AuroraError::IMAGE_LOAD_FAILED))?;
    if header_size as usize != DDS_HEADER_SIZE {
        return Err(AuroraError::IMAGE_LOAD_FAILED);
    }

    let _flags = reader.read_u32::<LittleEndian>().unwrap();
    let height = reader.read_u32::<LittleEndian>().unwrap();
    let width = reader.read_u32::<LittleEndian>().unwrap();
    let _pitch_or_linear_size = reader.read_u32::<LittleEndian>().unwrap();
    let depth = reader.read_u32::<LittleEndian>().unwrap();
    let _mip_map_count = reader.read_u32::<LittleEndian>().unwrap();
    for _ in 0..11 {
        let _reserved = reader.read_u32::<LittleEndian>().unwrap();
    }

    // pixel format block
    let _info_size = reader.read_u32::<LittleEndian>().unwrap();
    let pf_flags = reader.read_u32::<LittleEndian>().unwrap();
    let compression_code = reader.read_u32::<LittleEndian>().unwrap();
    for _ in 0..5 {
        let _masks = reader.read_u32::<LittleEndian>().unwrap();
    }

    // caps + reserved
    for _ in 0..5 {
        let _caps = reader.read_u32::<LittleEndian>().unwrap();
    }

    if pf_flags & DDS_PIXELFORMAT_FOURCC == 0 {
        // only compressed DDS files are supported
        return Err(AuroraError::IMAGE_LOAD_FAILED);
    }

    let format = match compression_code {
        BC1_CODE => ImageFormat::BC1,
        BC3_CODE => ImageFormat::BC3,
        BC5_CODE => ImageFormat::BC5,
        _ => return Err(AuroraError::IMAGE_LOAD_FAILED),
    };

    let data_offset = reader.position() as usize;

    Ok(ImageDescription {
        initial_data: data[data_offset..].to_vec(),
        width: width,
        height: height,
        depth: depth.max(1),
        image_type: ImageType::Type2D,
        format: format,
        usage: ImageUsage::SAMPLED,
        mip_count: MipCount::FullChainAlreadyInData,
        auto_create_mips: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_binary_roundtrip() {
        let mesh = MeshBinary {
            index_count: 36,
            vertex_count: 8,
            bounding_box_min: [-1.0, -1.0, -1.0],
            bounding_box_max: [1.0, 1.0, 1.0],
            texture_paths: TexturePaths {
                albedo: PathBuf::from("textures/brick_albedo.dds"),
                normal: PathBuf::from("textures/brick_normal.dds"),
                specular: PathBuf::from(""),
            },
            index_buffer: vec![0u8; 36 * 2],
            vertex_buffer: vec![7u8; 8 * FULL_VERTEX_BYTE_SIZE as usize],
        };
        assert!(mesh.uses_u16_indices());

        let bytes = write_mesh_binaries(&[mesh.clone(), mesh.clone()]);
        let parsed = read_mesh_binaries(&bytes).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], mesh);
    }

    #[test]
    fn large_meshes_use_u32_indices() {
        let mesh = MeshBinary {
            index_count: 3,
            vertex_count: 70000,
            index_buffer: vec![0u8; 3 * 4],
            vertex_buffer: vec![0u8; 70000 * FULL_VERTEX_BYTE_SIZE as usize],
            ..Default::default()
        };
        assert!(!mesh.uses_u16_indices());
        let bytes = write_mesh_binaries(&[mesh.clone()]);
        let parsed = read_mesh_binaries(&bytes).unwrap();
        assert_eq!(parsed[0], mesh);
    }

    fn dds_bytes(compression_code: u32, flags: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(DDS_MAGIC).unwrap();
        out.write_u32::<LittleEndian>(DDS_HEADER_SIZE as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // flags
        out.write_u32::<LittleEndian>(4).unwrap(); // height
        out.write_u32::<LittleEndian>(4).unwrap(); // width
        out.write_u32::<LittleEndian>(0).unwrap(); // pitch
        out.write_u32::<LittleEndian>(0).unwrap(); // depth
        out.write_u32::<LittleEndian>(1).unwrap(); // mips
        for _ in 0..11 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        out.write_u32::<LittleEndian>(32).unwrap(); // pf size
        out.write_u32::<LittleEndian>(flags).unwrap();
        out.write_u32::<LittleEndian>(compression_code).unwrap();
        for _ in 0..5 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        for _ in 0..5 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        // one bc1 block
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    #[test]
    fn dds_bc_formats() {
        let image = parse_dds(&dds_bytes(BC1_CODE, DDS_PIXELFORMAT_FOURCC)).unwrap();
        assert_eq!(image.format, ImageFormat::BC1);
        assert_eq!(image.width, 4);
        assert_eq!(image.initial_data.len(), 8);
        assert_eq!(image.mip_count, MipCount::FullChainAlreadyInData);

        let bc3 = parse_dds(&dds_bytes(BC3_CODE, DDS_PIXELFORMAT_FOURCC)).unwrap();
        assert_eq!(bc3.format, ImageFormat::BC3);
        let bc5 = parse_dds(&dds_bytes(BC5_CODE, DDS_PIXELFORMAT_FOURCC)).unwrap();
        assert_eq!(bc5.format, ImageFormat::BC5);
    }

    #[test]
    fn dds_rejects_uncompressed_and_unknown() {
        assert!(parse_dds(&dds_bytes(BC1_CODE, 0)).is_err());
        assert!(parse_dds(&dds_bytes(12345, DDS_PIXELFORMAT_FOURCC)).is_err());
        assert!(parse_dds(&[0u8; 16]).is_err());
    }
}
