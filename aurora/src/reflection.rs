// SPIR-V shader reflection
//
// Walks the raw instruction stream instead of pulling in a compiler
// stack. The only information a pass needs is which descriptor
// bindings of the pass set (set 1) exist and of what kind, which
// material textures (set 2) are referenced and which vertex input
// locations the vertex stage consumes. Set 0 is the global info set
// and handled by a fixed layout.

use crate::desc::{MaterialFeatureFlags, VertexInputFlags};
use crate::{AuroraError, Result};
use ash::vk;

const SPIRV_MAGIC: u32 = 0x0723_0203;

// opcodes
const OP_TYPE_IMAGE: u32 = 25;
const OP_TYPE_SAMPLER: u32 = 26;
const OP_TYPE_SAMPLED_IMAGE: u32 = 27;
const OP_TYPE_ARRAY: u32 = 28;
const OP_TYPE_RUNTIME_ARRAY: u32 = 29;
const OP_TYPE_STRUCT: u32 = 30;
const OP_TYPE_POINTER: u32 = 32;
const OP_VARIABLE: u32 = 59;
const OP_DECORATE: u32 = 71;

// decorations
const DECORATION_BLOCK: u32 = 2;
const DECORATION_BUFFER_BLOCK: u32 = 3;
const DECORATION_LOCATION: u32 = 30;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;

// storage classes
const STORAGE_CLASS_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_CLASS_INPUT: u32 = 1;
const STORAGE_CLASS_UNIFORM: u32 = 2;
const STORAGE_CLASS_STORAGE_BUFFER: u32 = 12;

/// Descriptor set index reserved for per-pass resources
pub const PASS_DESCRIPTOR_SET: u32 = 1;
/// Descriptor set index reserved for material textures
pub const MATERIAL_DESCRIPTOR_SET: u32 = 2;

/// Per-binding resource lists of the pass set
#[derive(Clone, Default, Debug, PartialEq)]
pub struct ShaderLayout {
    pub sampler_bindings: Vec<u32>,
    pub sampled_image_bindings: Vec<u32>,
    pub storage_image_bindings: Vec<u32>,
    pub uniform_buffer_bindings: Vec<u32>,
    pub storage_buffer_bindings: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct ShaderReflection {
    pub layout: ShaderLayout,
    pub material_features: MaterialFeatureFlags,
    pub vertex_input_flags: VertexInputFlags,
}

impl Default for ShaderReflection {
    fn default() -> Self {
        Self {
            layout: ShaderLayout::default(),
            material_features: MaterialFeatureFlags::empty(),
            vertex_input_flags: VertexInputFlags::empty(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum ResourceKind {
    Sampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
}

/// The subset of the type graph reflection cares about
#[derive(Copy, Clone)]
enum TypeInfo {
    /// OpTypeImage, true when declared with sampled == 2
    Image { is_storage: bool },
    Sampler,
    SampledImage,
    Struct,
    /// array of some element type
    Array { element: u32 },
    /// pointer into a storage class
    Pointer { storage_class: u32, pointee: u32 },
}

struct Instruction<'a> {
    opcode: u32,
    operands: &'a [u32],
}

/// Iterate the instruction stream of a module, header already
/// stripped. Malformed word counts fail the reflection rather than
/// panicking, a corrupt cache file must not take the renderer down.
fn for_each_instruction<'a, F: FnMut(Instruction<'a>)>(words: &'a [u32], mut f: F) -> Result<()> {
    let mut offset = 0;
    while offset < words.len() {
        let word_count = (words[offset] >> 16) as usize;
        let opcode = words[offset] & 0xFFFF;
        if word_count == 0 || offset + word_count > words.len() {
            return Err(AuroraError::SHADER_REFLECTION_FAILED);
        }
        f(Instruction {
            opcode: opcode,
            operands: &words[offset + 1..offset + word_count],
        });
        offset += word_count;
    }
    Ok(())
}

/// Reflect a single stage and merge the results into `out`.
///
/// Merging lets graphic passes accumulate the union of all their
/// stages; a binding used by several stages appears once.
pub fn reflect_shader_stage(
    spirv: &[u32],
    stage: vk::ShaderStageFlags,
    out: &mut ShaderReflection,
) -> Result<()> {
    if spirv.len() < 5 || spirv[0] != SPIRV_MAGIC {
        return Err(AuroraError::SHADER_REFLECTION_FAILED);
    }
    let words = &spirv[5..];

    use std::collections::HashMap;
    let mut descriptor_sets: HashMap<u32, u32> = HashMap::new();
    let mut bindings: HashMap<u32, u32> = HashMap::new();
    let mut locations: HashMap<u32, u32> = HashMap::new();
    let mut block_structs: Vec<u32> = Vec::new();
    let mut buffer_block_structs: Vec<u32> = Vec::new();
    let mut types: HashMap<u32, TypeInfo> = HashMap::new();
    let mut variables: Vec<(u32, u32, u32)> = Vec::new(); // (id, type, storage class)

    for_each_instruction(words, |inst| match inst.opcode {
        OP_DECORATE => {
            if inst.operands.len() >= 2 {
                let target = inst.operands[0];
                let literal = inst.operands.get(2).copied();
                match (inst.operands[1], literal) {
                    (DECORATION_DESCRIPTOR_SET, Some(set)) => {
                        descriptor_sets.insert(target, set);
                    }
                    (DECORATION_BINDING, Some(binding)) => {
                        bindings.insert(target, binding);
                    }
                    (DECORATION_LOCATION, Some(location)) => {
                        locations.insert(target, location);
                    }
                    (DECORATION_BLOCK, _) => block_structs.push(target),
                    (DECORATION_BUFFER_BLOCK, _) => buffer_block_structs.push(target),
                    _ => (),
                }
            }
        }
        OP_TYPE_IMAGE => {
            // operands: result, sampled type, dim, depth, arrayed, ms, sampled, format
            if inst.operands.len() >= 7 {
                types.insert(
                    inst.operands[0],
                    TypeInfo::Image {
                        is_storage: inst.operands[6] == 2,
                    },
                );
            }
        }
        OP_TYPE_SAMPLER if !inst.operands.is_empty() => {
            types.insert(inst.operands[0], TypeInfo::Sampler);
        }
        OP_TYPE_SAMPLED_IMAGE if !inst.operands.is_empty() => {
            types.insert(inst.operands[0], TypeInfo::SampledImage);
        }
        OP_TYPE_STRUCT if !inst.operands.is_empty() => {
            types.insert(inst.operands[0], TypeInfo::Struct);
        }
        OP_TYPE_ARRAY | OP_TYPE_RUNTIME_ARRAY if inst.operands.len() >= 2 => {
            types.insert(
                inst.operands[0],
                TypeInfo::Array {
                    element: inst.operands[1],
                },
            );
        }
        OP_TYPE_POINTER if inst.operands.len() >= 3 => {
            types.insert(
                inst.operands[0],
                TypeInfo::Pointer {
                    storage_class: inst.operands[1],
                    pointee: inst.operands[2],
                },
            );
        }
        OP_VARIABLE => {
            if inst.operands.len() >= 3 {
                variables.push((inst.operands[1], inst.operands[0], inst.operands[2]));
            }
        }
        _ => (),
    })?;

    // chase pointers and arrays down to the interesting type
    let resolve = |mut type_id: u32| -> Option<TypeInfo> {
        loop {
            match types.get(&type_id)? {
                TypeInfo::Array { element } => type_id = *element,
                other => return Some(*other),
            }
        }
    };

    for (var_id, type_id, storage_class) in variables {
        // vertex inputs
        if storage_class == STORAGE_CLASS_INPUT {
            if stage == vk::ShaderStageFlags::VERTEX {
                if let Some(&location) = locations.get(&var_id) {
                    out.vertex_input_flags |= VertexInputFlags::from_location(location)
                        .ok_or(AuroraError::SHADER_REFLECTION_FAILED)?;
                }
            }
            continue;
        }

        let pointee = match types.get(&type_id) {
            Some(TypeInfo::Pointer { pointee, .. }) => *pointee,
            _ => continue,
        };

        let kind = match storage_class {
            STORAGE_CLASS_UNIFORM_CONSTANT => match resolve(pointee) {
                Some(TypeInfo::Image { is_storage: true }) => ResourceKind::StorageImage,
                Some(TypeInfo::Image { is_storage: false }) => ResourceKind::SampledImage,
                Some(TypeInfo::SampledImage) => ResourceKind::SampledImage,
                Some(TypeInfo::Sampler) => ResourceKind::Sampler,
                _ => continue,
            },
            STORAGE_CLASS_UNIFORM => match resolve(pointee) {
                Some(TypeInfo::Struct) => {
                    // legacy SPIR-V marks storage buffers as uniform
                    // structs with the BufferBlock decoration
                    if buffer_block_structs.contains(&pointee) {
                        ResourceKind::StorageBuffer
                    } else if block_structs.contains(&pointee) {
                        ResourceKind::UniformBuffer
                    } else {
                        continue;
                    }
                }
                _ => continue,
            },
            STORAGE_CLASS_STORAGE_BUFFER => ResourceKind::StorageBuffer,
            _ => continue,
        };

        let set = match descriptor_sets.get(&var_id) {
            Some(&s) => s,
            None => continue,
        };
        let binding = match bindings.get(&var_id) {
            Some(&b) => b,
            None => continue,
        };

        if set == PASS_DESCRIPTOR_SET {
            let list = match kind {
                ResourceKind::Sampler => &mut out.layout.sampler_bindings,
                ResourceKind::SampledImage => &mut out.layout.sampled_image_bindings,
                ResourceKind::StorageImage => &mut out.layout.storage_image_bindings,
                ResourceKind::UniformBuffer => &mut out.layout.uniform_buffer_bindings,
                ResourceKind::StorageBuffer => &mut out.layout.storage_buffer_bindings,
            };
            if !list.contains(&binding) {
                list.push(binding);
            }
        } else if set == MATERIAL_DESCRIPTOR_SET {
            out.material_features |= match binding {
                0 | 4 => MaterialFeatureFlags::ALBEDO_TEXTURE,
                1 | 5 => MaterialFeatureFlags::NORMAL_TEXTURE,
                2 | 6 => MaterialFeatureFlags::SPECULAR_TEXTURE,
                _ => MaterialFeatureFlags::empty(),
            };
        }
    }

    Ok(())
}

/// Reflection over all stages of a graphic pass
pub struct GraphicShaderSpirV {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
    pub geometry: Option<Vec<u32>>,
    pub tesselation_control: Option<Vec<u32>>,
    pub tesselation_evaluation: Option<Vec<u32>>,
}

pub fn reflect_graphic_shaders(spirv: &GraphicShaderSpirV) -> Result<ShaderReflection> {
    let mut reflection = ShaderReflection::default();
    reflect_shader_stage(&spirv.vertex, vk::ShaderStageFlags::VERTEX, &mut reflection)?;
    reflect_shader_stage(
        &spirv.fragment,
        vk::ShaderStageFlags::FRAGMENT,
        &mut reflection,
    )?;
    if let Some(geometry) = &spirv.geometry {
        reflect_shader_stage(geometry, vk::ShaderStageFlags::GEOMETRY, &mut reflection)?;
    }
    if let Some(control) = &spirv.tesselation_control {
        assert!(spirv.tesselation_evaluation.is_some());
        reflect_shader_stage(
            control,
            vk::ShaderStageFlags::TESSELLATION_CONTROL,
            &mut reflection,
        )?;
    }
    if let Some(evaluation) = &spirv.tesselation_evaluation {
        reflect_shader_stage(
            evaluation,
            vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            &mut reflection,
        )?;
    }
    Ok(reflection)
}

pub fn reflect_compute_shader(spirv: &[u32]) -> Result<ShaderReflection> {
    let mut reflection = ShaderReflection::default();
    reflect_shader_stage(spirv, vk::ShaderStageFlags::COMPUTE, &mut reflection)?;
    Ok(reflection)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// tiny SPIR-V assembler for the opcodes reflection looks at
    struct ModuleBuilder {
        words: Vec<u32>,
    }

    impl ModuleBuilder {
        fn new() -> Self {
            // magic, version 1.0, generator, bound, schema
            Self {
                words: vec![SPIRV_MAGIC, 0x0001_0000, 0, 100, 0],
            }
        }

        fn inst(&mut self, opcode: u32, operands: &[u32]) -> &mut Self {
            self.words
                .push(((operands.len() as u32 + 1) << 16) | opcode);
            self.words.extend_from_slice(operands);
            self
        }

        fn decorate(&mut self, id: u32, decoration: u32, value: u32) -> &mut Self {
            self.inst(OP_DECORATE, &[id, decoration, value])
        }

        fn finish(&self) -> Vec<u32> {
            self.words.clone()
        }
    }

    #[test]
    fn pass_set_bindings_are_classified() {
        let mut m = ModuleBuilder::new();
        // type ids: 10 image (sampled), 11 image (storage), 12 sampler, 13 struct
        m.inst(OP_TYPE_IMAGE, &[10, 1, 1, 0, 0, 0, 1, 0]);
        m.inst(OP_TYPE_IMAGE, &[11, 1, 1, 0, 0, 0, 2, 0]);
        m.inst(OP_TYPE_SAMPLER, &[12]);
        m.inst(OP_TYPE_STRUCT, &[13]);
        // pointers: 20..23
        m.inst(OP_TYPE_POINTER, &[20, STORAGE_CLASS_UNIFORM_CONSTANT, 10]);
        m.inst(OP_TYPE_POINTER, &[21, STORAGE_CLASS_UNIFORM_CONSTANT, 11]);
        m.inst(OP_TYPE_POINTER, &[22, STORAGE_CLASS_UNIFORM_CONSTANT, 12]);
        m.inst(OP_TYPE_POINTER, &[23, STORAGE_CLASS_UNIFORM, 13]);
        // decorations for variables 30..33
        for (var, binding) in &[(30u32, 0u32), (31, 1), (32, 2), (33, 3)] {
            m.decorate(*var, DECORATION_DESCRIPTOR_SET, PASS_DESCRIPTOR_SET);
            m.decorate(*var, DECORATION_BINDING, *binding);
        }
        m.decorate(13, DECORATION_BLOCK, 0);
        // variables
        m.inst(OP_VARIABLE, &[20, 30, STORAGE_CLASS_UNIFORM_CONSTANT]);
        m.inst(OP_VARIABLE, &[21, 31, STORAGE_CLASS_UNIFORM_CONSTANT]);
        m.inst(OP_VARIABLE, &[22, 32, STORAGE_CLASS_UNIFORM_CONSTANT]);
        m.inst(OP_VARIABLE, &[23, 33, STORAGE_CLASS_UNIFORM]);

        let reflection = reflect_compute_shader(&m.finish()).unwrap();
        assert_eq!(reflection.layout.sampled_image_bindings, vec![0]);
        assert_eq!(reflection.layout.storage_image_bindings, vec![1]);
        assert_eq!(reflection.layout.sampler_bindings, vec![2]);
        assert_eq!(reflection.layout.uniform_buffer_bindings, vec![3]);
        assert!(reflection.layout.storage_buffer_bindings.is_empty());
    }

    #[test]
    fn other_sets_are_ignored_for_layout() {
        let mut m = ModuleBuilder::new();
        m.inst(OP_TYPE_SAMPLER, &[10]);
        m.inst(OP_TYPE_POINTER, &[20, STORAGE_CLASS_UNIFORM_CONSTANT, 10]);
        m.decorate(30, DECORATION_DESCRIPTOR_SET, 0);
        m.decorate(30, DECORATION_BINDING, 5);
        m.inst(OP_VARIABLE, &[20, 30, STORAGE_CLASS_UNIFORM_CONSTANT]);

        let reflection = reflect_compute_shader(&m.finish()).unwrap();
        assert!(reflection.layout.sampler_bindings.is_empty());
    }

    #[test]
    fn material_features_from_set_two_bindings() {
        let mut m = ModuleBuilder::new();
        m.inst(OP_TYPE_IMAGE, &[10, 1, 1, 0, 0, 0, 1, 0]);
        m.inst(OP_TYPE_POINTER, &[20, STORAGE_CLASS_UNIFORM_CONSTANT, 10]);
        for (var, binding) in &[(30u32, 0u32), (31, 1)] {
            m.decorate(*var, DECORATION_DESCRIPTOR_SET, MATERIAL_DESCRIPTOR_SET);
            m.decorate(*var, DECORATION_BINDING, *binding);
            m.inst(OP_VARIABLE, &[20, *var, STORAGE_CLASS_UNIFORM_CONSTANT]);
        }

        let reflection = reflect_compute_shader(&m.finish()).unwrap();
        assert!(reflection
            .material_features
            .contains(MaterialFeatureFlags::ALBEDO_TEXTURE));
        assert!(reflection
            .material_features
            .contains(MaterialFeatureFlags::NORMAL_TEXTURE));
        assert!(!reflection
            .material_features
            .contains(MaterialFeatureFlags::SPECULAR_TEXTURE));
    }

    #[test]
    fn vertex_inputs_from_locations() {
        let mut m = ModuleBuilder::new();
        m.inst(OP_TYPE_POINTER, &[20, STORAGE_CLASS_INPUT, 10]);
        m.decorate(30, DECORATION_LOCATION, 0);
        m.decorate(31, DECORATION_LOCATION, 2);
        m.inst(OP_VARIABLE, &[20, 30, STORAGE_CLASS_INPUT]);
        m.inst(OP_VARIABLE, &[20, 31, STORAGE_CLASS_INPUT]);

        let mut reflection = ShaderReflection::default();
        reflect_shader_stage(&m.finish(), vk::ShaderStageFlags::VERTEX, &mut reflection).unwrap();
        assert_eq!(
            reflection.vertex_input_flags,
            VertexInputFlags::POSITION | VertexInputFlags::NORMAL
        );

        // fragment stage inputs are inter-stage varyings, not vertex attributes
        let mut fragment_reflection = ShaderReflection::default();
        reflect_shader_stage(
            &m.finish(),
            vk::ShaderStageFlags::FRAGMENT,
            &mut fragment_reflection,
        )
        .unwrap();
        assert!(fragment_reflection.vertex_input_flags.is_empty());
    }

    #[test]
    fn storage_buffer_by_buffer_block_and_storage_class() {
        let mut m = ModuleBuilder::new();
        m.inst(OP_TYPE_STRUCT, &[10]);
        m.inst(OP_TYPE_STRUCT, &[11]);
        m.inst(OP_TYPE_POINTER, &[20, STORAGE_CLASS_UNIFORM, 10]);
        m.inst(OP_TYPE_POINTER, &[21, STORAGE_CLASS_STORAGE_BUFFER, 11]);
        m.decorate(10, DECORATION_BUFFER_BLOCK, 0);
        m.decorate(11, DECORATION_BLOCK, 0);
        for (var, binding) in &[(30u32, 0u32), (31, 1)] {
            m.decorate(*var, DECORATION_DESCRIPTOR_SET, PASS_DESCRIPTOR_SET);
            m.decorate(*var, DECORATION_BINDING, *binding);
        }
        m.inst(OP_VARIABLE, &[20, 30, STORAGE_CLASS_UNIFORM]);
        m.inst(OP_VARIABLE, &[21, 31, STORAGE_CLASS_STORAGE_BUFFER]);

        let reflection = reflect_compute_shader(&m.finish()).unwrap();
        assert_eq!(reflection.layout.storage_buffer_bindings, vec![0, 1]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let words = vec![0xdeadbeef, 0, 0, 0, 0];
        assert!(reflect_compute_shader(&words).is_err());
    }
}
