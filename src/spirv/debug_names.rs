//! Optional `OpName`/`OpMemberName` entries.
//!
//! Names are collected into their own buffer after the module is complete and
//! spliced in at a recorded offset, so turning them on never changes an id.

use std::collections::BTreeMap;

use rspirv::spirv::Word;

use super::Generator;
use super::module_buffer::ModuleBuffer;
use super::tree::PinStorage;
use crate::script::NodeKind;

#[derive(Debug, Default)]
pub struct DebugNames {
    buffer: ModuleBuffer,
    counters: BTreeMap<&'static str, u32>,
}

impl DebugNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, target: Word, name: &str) {
        self.buffer.add_op_name(target, name);
    }

    pub fn member_name(&mut self, structure: Word, member: u32, name: &str) {
        self.buffer.add_op_member_name(structure, member, name);
    }

    /// Name `target` `<prefix>_<n>`, counting per prefix from 0.
    pub fn name_next(&mut self, target: Word, prefix: &'static str) {
        let counter = self.counters.entry(prefix).or_default();
        let name = format!("{prefix}_{counter}");
        *counter += 1;
        self.buffer.add_op_name(target, &name);
    }

    pub fn into_words(self) -> Vec<Word> {
        self.buffer.into_words()
    }
}

impl Generator<'_> {
    pub(super) fn write_debug_names(&mut self, offset: usize) {
        let mut names = DebugNames::new();
        names.name(self.main_function_id, "main");

        for member in self.inputs.members() {
            names.name(member.id, &format!("input_{}", member.location));
        }
        for member in self.outputs.members() {
            names.name(member.id, &format!("output_{}", member.location));
        }
        if let Some(block) = &self.vertex_output {
            names.name(block.id, "PerVertex");
            names.member_name(block.id, 0, "position");
            names.name(block.variable_id, "vertex_output");
        }
        if !self.push_constants.is_empty() {
            names.name(self.push_constants.id, "PushConstants");
            for index in 0..self.push_constants.members.len() {
                let index = index as u32;
                names.member_name(self.push_constants.id, index, &format!("member_{index}"));
            }
            names.name(self.push_constants.variable_id, "push_constants");
        }
        for sampler in self.samplers.samplers() {
            names.name_next(sampler.id, "sampler");
        }
        for buffer in &self.uniform_buffers {
            let structure = &buffer.structure;
            names.name(
                structure.id,
                &format!("UniformBuffer_{}_{}", buffer.set_id, buffer.binding_id),
            );
            for index in 0..structure.members.len() {
                let index = index as u32;
                names.member_name(structure.id, index, &format!("member_{index}"));
            }
            names.name_next(structure.variable_id, "uniform_buffer");
        }

        for handle in &self.main_instructions {
            let node = &self.nodes[handle.0];
            let prefix = match self.script.node(node.script_node).map(|n| &n.kind) {
                Ok(NodeKind::Operator(_)) => "operator",
                Ok(NodeKind::Function(_)) => "function",
                Ok(NodeKind::Composite) => "composite",
                _ => continue,
            };
            for pin in node.outputs.iter().flatten() {
                if let PinStorage::Function(id) = self.output_pins[pin.0].storage {
                    names.name_next(id, prefix);
                }
            }
        }

        self.buffer.insert_words(offset, &names.into_words());
    }
}
