//! Backward walk from the script roots.
//!
//! Every script node reached from a root gets one [`GeneratorNode`] in the
//! generator's arena. Connections are resolved into [`OutputPinHandle`]s,
//! defaults into constants, and every node that produces instructions is
//! appended to the main-instruction list in dependency order.

use anyhow::{Result, anyhow, bail};
use rspirv::spirv::{StorageClass, Word};

use super::constants::ConstantHandle;
use super::structures::{Structure, UniformBuffer, VertexOutputBlock, member_stride};
use super::{Generator, PUSH_CONSTANT_BUDGET_BYTES};
use crate::script::{Literal, Node, NodeId, NodeKind, OutputPinRef, ScriptType, VariableDataType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) struct GeneratorNodeHandle(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) struct OutputPinHandle(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum GeneratorInputPin {
    Unresolved,
    /// Output-interface member left out of the module.
    Ignored,
    /// Unconnected pin reading its default literal.
    Default(ConstantHandle),
    Connected(OutputPinHandle),
}

/// Where the value of an output pin currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum PinStorage {
    Constant(ConstantHandle),
    Input { location: u32 },
    PushConstant,
    Uniform { buffer: usize },
    UniformConstant { sampler: usize },
    /// SSA value in the function body.
    Function(Word),
    /// Result of a main instruction that has not been emitted yet.
    Pending,
}

#[derive(Clone, Debug)]
pub(super) struct GeneratorOutputPin {
    pub pin: OutputPinRef,
    pub storage: PinStorage,
}

#[derive(Clone, Debug)]
pub(super) struct GeneratorNode {
    pub script_node: NodeId,
    pub inputs: Vec<GeneratorInputPin>,
    pub outputs: Vec<Option<OutputPinHandle>>,
    next_input: usize,
    visited: bool,
}

/// Offset of output `pin` when every preceding output of `node` is laid out
/// before it, used members or not.
fn declared_offset(node: &Node, pin: usize) -> u32 {
    node.outputs[..pin]
        .iter()
        .map(|output| member_stride(output.data_type))
        .sum()
}

/// Each interface member takes exactly one location, so only scalars and
/// vectors can cross a stage boundary.
fn check_interface_type(data_type: VariableDataType, interface: &str, location: u32) -> Result<()> {
    match data_type {
        VariableDataType::Int32 | VariableDataType::Float32 => Ok(()),
        t if t.is_vector() => Ok(()),
        other => bail!(
            "unsupported data type for {interface} member {location}: {other:?} ({})",
            other as u32
        ),
    }
}

enum Resolution {
    Resolved,
    Descend(GeneratorNodeHandle),
}

impl Generator<'_> {
    pub(super) fn build_tree(&mut self) -> Result<()> {
        let script = self.script;

        if !self.options.ignore_unused_inputs {
            let input = script.input_interface();
            self.traverse(input)?;
            for pin in 0..script.node(input)?.outputs.len() {
                self.create_output_pin(OutputPinRef { node: input, pin })?;
            }
        }

        self.traverse(script.output_interface())?;
        if let Some(vertex_output) = script.vertex_output() {
            self.traverse(vertex_output)?;
        }

        self.finish_tree()
    }

    fn get_or_create_node(&mut self, id: NodeId) -> Result<GeneratorNodeHandle> {
        if let Some(&handle) = self.node_map.get(&id) {
            return Ok(handle);
        }
        let node = self.script.node(id)?;
        self.nodes.push(GeneratorNode {
            script_node: id,
            inputs: vec![GeneratorInputPin::Unresolved; node.inputs.len()],
            outputs: vec![None; node.outputs.len()],
            next_input: 0,
            visited: false,
        });
        let handle = GeneratorNodeHandle(self.nodes.len() - 1);
        self.node_map.insert(id, handle);
        Ok(handle)
    }

    /// Depth-first walk with an explicit stack; a node is visited once all of
    /// its producers have been.
    fn traverse(&mut self, root: NodeId) -> Result<()> {
        let root = self.get_or_create_node(root)?;
        if self.nodes[root.0].visited {
            return Ok(());
        }

        let mut stack = vec![root];
        while let Some(&top) = stack.last() {
            let node = &self.nodes[top.0];
            if node.next_input < node.inputs.len() {
                let index = node.next_input;
                match self.resolve_input(top, index)? {
                    Resolution::Resolved => self.nodes[top.0].next_input += 1,
                    Resolution::Descend(producer) => stack.push(producer),
                }
            } else {
                stack.pop();
                self.visit(top)?;
            }
        }
        Ok(())
    }

    fn resolve_input(&mut self, handle: GeneratorNodeHandle, index: usize) -> Result<Resolution> {
        let script = self.script;
        let node_id = self.nodes[handle.0].script_node;
        let node = script.node(node_id)?;
        let pin = &node.inputs[index];

        if node.kind == NodeKind::Output
            && self.options.ignored_output_indices.contains(&(index as u32))
        {
            self.nodes[handle.0].inputs[index] = GeneratorInputPin::Ignored;
            return Ok(Resolution::Resolved);
        }

        let Some(from) = pin.connection else {
            let literal = match pin.default {
                Some(literal) => literal,
                None => Literal::zero(pin.data_type)?,
            };
            let constant = self.constants.get_or_create(literal, &mut self.data_types);
            self.nodes[handle.0].inputs[index] = GeneratorInputPin::Default(constant);
            return Ok(Resolution::Resolved);
        };

        let from_type = script.output_pin(from)?.data_type;
        if from_type != pin.data_type {
            bail!(
                "input pin {index} of node {} expects {:?} but is connected to a {from_type:?} output",
                node_id.0,
                pin.data_type
            );
        }

        if let Some(&output) = self.output_map.get(&from) {
            self.nodes[handle.0].inputs[index] = GeneratorInputPin::Connected(output);
            return Ok(Resolution::Resolved);
        }

        if let Some(&producer) = self.node_map.get(&from.node) {
            if !self.nodes[producer.0].visited {
                bail!(
                    "cycle detected: node {} depends on node {}, which is still being resolved",
                    node_id.0,
                    from.node.0
                );
            }
            let output = self.create_output_pin(from)?;
            self.nodes[handle.0].inputs[index] = GeneratorInputPin::Connected(output);
            return Ok(Resolution::Resolved);
        }

        Ok(Resolution::Descend(self.get_or_create_node(from.node)?))
    }

    fn push_output_pin(&mut self, pin: OutputPinRef, storage: PinStorage) -> Result<OutputPinHandle> {
        self.script.output_pin(pin)?;
        self.output_pins.push(GeneratorOutputPin { pin, storage });
        let handle = OutputPinHandle(self.output_pins.len() - 1);
        self.output_map.insert(pin, handle);
        if let Some(&node) = self.node_map.get(&pin.node) {
            if let Some(slot) = self.nodes[node.0].outputs.get_mut(pin.pin) {
                *slot = Some(handle);
            }
        }
        Ok(handle)
    }

    /// Register the storage behind an output pin of a source node (input
    /// interface, push constants, descriptor bindings) the first time it is read.
    fn create_output_pin(&mut self, pin: OutputPinRef) -> Result<OutputPinHandle> {
        if let Some(&handle) = self.output_map.get(&pin) {
            return Ok(handle);
        }

        let script = self.script;
        let node = script.node(pin.node)?;
        let kind = script.output_pin(pin)?.data_type;

        let storage = match &node.kind {
            NodeKind::Input => {
                let location = pin.pin as u32;
                check_interface_type(kind, "input", location)?;
                let flat = script.script_type() == ScriptType::Fragment
                    && kind == VariableDataType::Int32;
                let data_type = self.data_types.get_or_create(kind);
                let pointer = self.pointers.get_or_create(StorageClass::Input, data_type);
                self.inputs.add(location, data_type, pointer, flat);
                PinStorage::Input { location }
            }
            NodeKind::PushConstants { member_ids } => {
                let id = *member_ids.get(pin.pin).ok_or_else(|| {
                    anyhow!("push-constant pin {} has no member id", pin.pin)
                })?;
                let data_type = self.data_types.get_or_create(kind);
                let pointer = self
                    .pointers
                    .get_or_create(StorageClass::PushConstant, data_type);
                match self.options.template {
                    Some(template) => {
                        let location = template.push_constant_location(id)?;
                        if location.data_type != kind {
                            bail!(
                                "push constant id {id} is {kind:?} here but {:?} in the shader template",
                                location.data_type
                            );
                        }
                        self.push_constants
                            .add_member_at(kind, data_type, pointer, pin, location.offset);
                    }
                    None => {
                        let offset = declared_offset(node, pin.pin);
                        self.push_constants
                            .add_member_at(kind, data_type, pointer, pin, offset);
                    }
                }
                PinStorage::PushConstant
            }
            NodeKind::DescriptorBinding {
                set_id,
                binding_id,
                kind: binding,
            } => {
                let data_type = self.data_types.get_or_create(kind);
                if binding.sampler_type().is_some() {
                    let pointer = self
                        .pointers
                        .get_or_create(StorageClass::UniformConstant, data_type);
                    let sampler = self
                        .samplers
                        .add(*set_id, *binding_id, pin, data_type, pointer);
                    PinStorage::UniformConstant { sampler }
                } else {
                    let pointer = self.pointers.get_or_create(StorageClass::Uniform, data_type);
                    let buffer = match self
                        .uniform_buffers
                        .iter()
                        .position(|b| b.set_id == *set_id && b.binding_id == *binding_id)
                    {
                        Some(index) => index,
                        None => {
                            self.uniform_buffers.push(UniformBuffer {
                                set_id: *set_id,
                                binding_id: *binding_id,
                                structure: Structure::new(StorageClass::Uniform),
                            });
                            self.uniform_buffers.len() - 1
                        }
                    };
                    let offset = declared_offset(node, pin.pin);
                    self.uniform_buffers[buffer]
                        .structure
                        .add_member_at(kind, data_type, pointer, pin, offset);
                    PinStorage::Uniform { buffer }
                }
            }
            other => bail!(
                "output pin {} of node {} ({other:?}) was read before its node was visited",
                pin.pin,
                pin.node.0
            ),
        };

        self.push_output_pin(pin, storage)
    }

    fn visit(&mut self, handle: GeneratorNodeHandle) -> Result<()> {
        let script = self.script;
        let node_id = self.nodes[handle.0].script_node;
        let node = script.node(node_id)?;

        match &node.kind {
            NodeKind::Constant(literal) => {
                if node.outputs.len() != 1 {
                    bail!(
                        "constant node {} has {} output pins, expected 1",
                        node_id.0,
                        node.outputs.len()
                    );
                }
                let constant = self.constants.get_or_create(*literal, &mut self.data_types);
                self.push_output_pin(
                    OutputPinRef {
                        node: node_id,
                        pin: 0,
                    },
                    PinStorage::Constant(constant),
                )?;
            }
            NodeKind::Composite | NodeKind::Function(_) | NodeKind::Operator(_) => {
                for (pin, output) in node.outputs.iter().enumerate() {
                    self.data_types.get_or_create(output.data_type);
                    self.push_output_pin(OutputPinRef { node: node_id, pin }, PinStorage::Pending)?;
                }
                self.main_instructions.push(handle);
            }
            NodeKind::Output => {
                for (index, input) in node.inputs.iter().enumerate() {
                    let location = index as u32;
                    if self.options.ignored_output_indices.contains(&location) {
                        continue;
                    }
                    check_interface_type(input.data_type, "output", location)?;
                    let data_type = self.data_types.get_or_create(input.data_type);
                    let pointer = self.pointers.get_or_create(StorageClass::Output, data_type);
                    self.outputs.add(location, data_type, pointer, false);
                }
                self.main_instructions.push(handle);
            }
            NodeKind::VertexOutput => {
                let position = self.data_types.get_or_create(VariableDataType::Vector4f32);
                let pointer = self.pointers.get_or_create(StorageClass::Output, position);
                self.vertex_output = Some(VertexOutputBlock::new(position, pointer));
                self.constants
                    .get_or_create(Literal::Int32(0), &mut self.data_types);
                self.main_instructions.push(handle);
            }
            NodeKind::Input | NodeKind::PushConstants { .. } | NodeKind::DescriptorBinding { .. } => {}
        }

        self.nodes[handle.0].visited = true;
        Ok(())
    }

    fn finish_tree(&mut self) -> Result<()> {
        self.push_constants.sort_by_offset();
        for buffer in &mut self.uniform_buffers {
            buffer.structure.sort_by_offset();
        }
        self.inputs.sort_by_location();
        self.outputs.sort_by_location();

        // Member indices used by OpAccessChain.
        let block_len = self
            .uniform_buffers
            .iter()
            .map(|b| b.structure.members.len())
            .chain(std::iter::once(self.push_constants.members.len()))
            .max()
            .unwrap_or(0);
        for index in 0..block_len {
            self.constants
                .get_or_create(Literal::Int32(index as i32), &mut self.data_types);
        }

        let push_constant_bytes = self.push_constants.size_bytes();
        if push_constant_bytes > PUSH_CONSTANT_BUDGET_BYTES {
            log::warn!(
                "push-constant block is {push_constant_bytes} bytes, above the {PUSH_CONSTANT_BUDGET_BYTES}-byte minimum every device supports"
            );
        }

        log::debug!(
            "built generator tree: {} nodes visited, {} main instructions, {} data types, {} constants",
            self.nodes.len(),
            self.main_instructions.len(),
            self.data_types.len(),
            self.constants.len()
        );

        if self.nodes.iter().any(|n| !n.visited) {
            bail!("generator tree has unvisited nodes after traversal");
        }
        Ok(())
    }
}
