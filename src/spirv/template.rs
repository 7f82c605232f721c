//! Cross-stage layout agreement for a vertex + fragment pair.
//!
//! Both stages are compiled independently, so the push-constant block layout
//! and the descriptor set / binding indices are fixed up front from the union
//! of what both scripts declare.

use std::collections::{BTreeMap, btree_map::Entry};

use anyhow::{Result, anyhow, bail};

use super::structures::member_stride;
use crate::script::{BindingKind, NodeKind, Script, VariableDataType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantLocation {
    pub offset: u32,
    pub data_type: VariableDataType,
}

/// Dense indices for one descriptor set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSetLayout {
    pub index: u32,
    /// Binding id -> (dense binding index, kind).
    pub bindings: BTreeMap<u32, (u32, BindingKind)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CombinedShaderTemplate {
    /// Push-constant member id -> location in the shared block.
    pub push_constants: BTreeMap<u32, PushConstantLocation>,
    pub push_constant_size: u32,
    /// Descriptor set id -> layout.
    pub descriptor_sets: BTreeMap<u32, DescriptorSetLayout>,
}

impl CombinedShaderTemplate {
    pub fn push_constant_location(&self, id: u32) -> Result<PushConstantLocation> {
        self.push_constants
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow!("push constant id {id} is missing from the shader template"))
    }

    /// Dense (set index, binding index) for a declared (set id, binding id).
    pub fn descriptor_indices(&self, set_id: u32, binding_id: u32) -> Result<(u32, u32)> {
        let set = self.descriptor_sets.get(&set_id).ok_or_else(|| {
            anyhow!("descriptor set {set_id} is missing from the shader template")
        })?;
        let (binding, _) = set.bindings.get(&binding_id).ok_or_else(|| {
            anyhow!("descriptor binding {set_id}.{binding_id} is missing from the shader template")
        })?;
        Ok((set.index, *binding))
    }
}

/// Union push constants and descriptor bindings of `scripts`.
///
/// Push constants are laid out in ascending id order, each taking
/// `max(16, size)` bytes; sets and bindings get dense indices in ascending id
/// order.
pub fn create_combined_shader_template(scripts: &[&Script]) -> Result<CombinedShaderTemplate> {
    let mut push_types: BTreeMap<u32, VariableDataType> = BTreeMap::new();
    let mut bindings: BTreeMap<u32, BTreeMap<u32, BindingKind>> = BTreeMap::new();

    for script in scripts {
        if let Some(node_id) = script.push_constants() {
            let node = script.node(node_id)?;
            let NodeKind::PushConstants { member_ids } = &node.kind else {
                bail!("push-constant node {} has kind {:?}", node_id.0, node.kind);
            };
            if member_ids.len() != node.outputs.len() {
                bail!(
                    "push-constant node declares {} ids for {} output pins",
                    member_ids.len(),
                    node.outputs.len()
                );
            }
            for (&id, pin) in member_ids.iter().zip(&node.outputs) {
                match push_types.entry(id) {
                    Entry::Vacant(slot) => {
                        slot.insert(pin.data_type);
                    }
                    Entry::Occupied(slot) if *slot.get() != pin.data_type => bail!(
                        "push constant id {id} is declared as {:?} and as {:?}",
                        slot.get(),
                        pin.data_type
                    ),
                    Entry::Occupied(_) => {}
                }
            }
        }

        for set in script.descriptor_sets() {
            for &binding_node in &set.bindings {
                let NodeKind::DescriptorBinding {
                    set_id,
                    binding_id,
                    kind,
                } = script.node(binding_node)?.kind
                else {
                    bail!("descriptor binding node {} has an unexpected kind", binding_node.0);
                };
                match bindings.entry(set_id).or_default().entry(binding_id) {
                    Entry::Vacant(slot) => {
                        slot.insert(kind);
                    }
                    Entry::Occupied(slot) if *slot.get() != kind => bail!(
                        "descriptor binding {set_id}.{binding_id} is declared as {:?} and as {kind:?}",
                        slot.get()
                    ),
                    Entry::Occupied(_) => {}
                }
            }
        }
    }

    let mut template = CombinedShaderTemplate::default();
    let mut offset = 0;
    for (id, data_type) in push_types {
        template
            .push_constants
            .insert(id, PushConstantLocation { offset, data_type });
        offset += member_stride(data_type);
    }
    template.push_constant_size = offset;

    for (set_index, (set_id, set_bindings)) in bindings.into_iter().enumerate() {
        let layout = DescriptorSetLayout {
            index: set_index as u32,
            bindings: set_bindings
                .into_iter()
                .enumerate()
                .map(|(binding_index, (binding_id, kind))| {
                    (binding_id, (binding_index as u32, kind))
                })
                .collect(),
        };
        template.descriptor_sets.insert(set_id, layout);
    }

    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptType;
    use proptest::prelude::*;

    #[test]
    fn push_constants_are_unioned_by_id() {
        let mut vertex = Script::new(ScriptType::Vertex);
        vertex.add_push_constant(7, VariableDataType::Matrix4x4f32).unwrap();
        vertex.add_push_constant(2, VariableDataType::Float32).unwrap();
        let mut fragment = Script::new(ScriptType::Fragment);
        fragment.add_push_constant(2, VariableDataType::Float32).unwrap();
        fragment.add_push_constant(5, VariableDataType::Vector3f32).unwrap();

        let template = create_combined_shader_template(&[&vertex, &fragment]).unwrap();
        let offsets: Vec<(u32, u32)> = template
            .push_constants
            .iter()
            .map(|(&id, loc)| (id, loc.offset))
            .collect();
        assert_eq!(offsets, vec![(2, 0), (5, 16), (7, 32)]);
        assert_eq!(template.push_constant_size, 96);
    }

    #[test]
    fn push_constant_type_mismatch_is_an_error() {
        let mut vertex = Script::new(ScriptType::Vertex);
        vertex.add_push_constant(1, VariableDataType::Float32).unwrap();
        let mut fragment = Script::new(ScriptType::Fragment);
        fragment.add_push_constant(1, VariableDataType::Vector4f32).unwrap();

        let err = create_combined_shader_template(&[&vertex, &fragment]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Float32"), "{message}");
        assert!(message.contains("Vector4f32"), "{message}");
    }

    #[test]
    fn descriptor_indices_are_dense() {
        let mut vertex = Script::new(ScriptType::Vertex);
        vertex
            .add_descriptor_binding(3, 9, BindingKind::UniformBuffer, &[VariableDataType::Matrix4x4f32])
            .unwrap();
        let mut fragment = Script::new(ScriptType::Fragment);
        fragment
            .add_descriptor_binding(3, 4, BindingKind::Sampler2D, &[])
            .unwrap();
        fragment
            .add_descriptor_binding(8, 1, BindingKind::Sampler3D, &[])
            .unwrap();

        let template = create_combined_shader_template(&[&vertex, &fragment]).unwrap();
        assert_eq!(template.descriptor_indices(3, 4).unwrap(), (0, 0));
        assert_eq!(template.descriptor_indices(3, 9).unwrap(), (0, 1));
        assert_eq!(template.descriptor_indices(8, 1).unwrap(), (1, 0));
        assert!(template.descriptor_indices(8, 2).is_err());
    }

    proptest! {
        #[test]
        fn push_constant_offsets_accumulate_in_id_order(ids in prop::collection::btree_set(0u32..64, 0..10)) {
            let mut script = Script::new(ScriptType::Fragment);
            for &id in ids.iter().rev() {
                let data_type = if id % 2 == 0 { VariableDataType::Matrix4x4f32 } else { VariableDataType::Float32 };
                script.add_push_constant(id, data_type).unwrap();
            }
            let template = create_combined_shader_template(&[&script]).unwrap();
            let mut expected = 0;
            for (_, location) in &template.push_constants {
                prop_assert_eq!(location.offset, expected);
                expected += location.data_type.size_bytes().max(16);
            }
            prop_assert_eq!(template.push_constant_size, expected);
        }
    }
}
