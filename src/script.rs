//! Read-only visual shader script graph consumed by the SPIR-V generator.
//!
//! A [`Script`] owns its nodes in a flat arena; pins are addressed by
//! `(node, pin index)` pairs, and an input pin references the output pin that
//! feeds it. The builder methods exist for the DSL loader and tests; the
//! generator only reads.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScriptType {
    Vertex,
    Fragment,
}

/// Value type carried by a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariableDataType {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "int")]
    Int32,
    #[serde(rename = "float")]
    Float32,
    #[serde(rename = "vec2")]
    Vector2f32,
    #[serde(rename = "vec3")]
    Vector3f32,
    #[serde(rename = "vec4")]
    Vector4f32,
    #[serde(rename = "mat4")]
    Matrix4x4f32,
    #[serde(rename = "sampler1D")]
    Sampler1D,
    #[serde(rename = "sampler2D")]
    Sampler2D,
    #[serde(rename = "sampler3D")]
    Sampler3D,
}

impl VariableDataType {
    /// Byte size as laid out in a uniform or push-constant block.
    pub fn size_bytes(self) -> u32 {
        match self {
            VariableDataType::Bool | VariableDataType::Int32 | VariableDataType::Float32 => 4,
            VariableDataType::Vector2f32 => 8,
            VariableDataType::Vector3f32 => 12,
            VariableDataType::Vector4f32 => 16,
            VariableDataType::Matrix4x4f32 => 64,
            VariableDataType::Sampler1D
            | VariableDataType::Sampler2D
            | VariableDataType::Sampler3D => 0,
        }
    }

    /// Number of scalar components; 0 for non-vector aggregates and samplers.
    pub fn component_count(self) -> u32 {
        match self {
            VariableDataType::Bool | VariableDataType::Int32 | VariableDataType::Float32 => 1,
            VariableDataType::Vector2f32 => 2,
            VariableDataType::Vector3f32 => 3,
            VariableDataType::Vector4f32 => 4,
            _ => 0,
        }
    }

    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            VariableDataType::Sampler1D | VariableDataType::Sampler2D | VariableDataType::Sampler3D
        )
    }

    pub fn is_vector(self) -> bool {
        matches!(
            self,
            VariableDataType::Vector2f32 | VariableDataType::Vector3f32 | VariableDataType::Vector4f32
        )
    }
}

/// Literal value of a constant node or an input pin default.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Literal {
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "int")]
    Int32(i32),
    #[serde(rename = "float")]
    Float32(f32),
    #[serde(rename = "vec2")]
    Vector2f32([f32; 2]),
    #[serde(rename = "vec3")]
    Vector3f32([f32; 3]),
    #[serde(rename = "vec4")]
    Vector4f32([f32; 4]),
    #[serde(rename = "mat4")]
    Matrix4x4f32([f32; 16]),
}

impl Literal {
    pub fn data_type(&self) -> VariableDataType {
        match self {
            Literal::Bool(_) => VariableDataType::Bool,
            Literal::Int32(_) => VariableDataType::Int32,
            Literal::Float32(_) => VariableDataType::Float32,
            Literal::Vector2f32(_) => VariableDataType::Vector2f32,
            Literal::Vector3f32(_) => VariableDataType::Vector3f32,
            Literal::Vector4f32(_) => VariableDataType::Vector4f32,
            Literal::Matrix4x4f32(_) => VariableDataType::Matrix4x4f32,
        }
    }

    /// Zero value of `data_type`; samplers have no literal representation.
    pub fn zero(data_type: VariableDataType) -> Result<Literal> {
        Ok(match data_type {
            VariableDataType::Bool => Literal::Bool(false),
            VariableDataType::Int32 => Literal::Int32(0),
            VariableDataType::Float32 => Literal::Float32(0.0),
            VariableDataType::Vector2f32 => Literal::Vector2f32([0.0; 2]),
            VariableDataType::Vector3f32 => Literal::Vector3f32([0.0; 3]),
            VariableDataType::Vector4f32 => Literal::Vector4f32([0.0; 4]),
            VariableDataType::Matrix4x4f32 => Literal::Matrix4x4f32([0.0; 16]),
            other => bail!(
                "unsupported data type for a literal value: {other:?} ({})",
                other as u32
            ),
        })
    }

    /// 32-bit words of a scalar literal, or `None` for composite literals.
    pub fn scalar_bits(&self) -> Option<u32> {
        match *self {
            Literal::Bool(v) => Some(v as u32),
            Literal::Int32(v) => Some(v as u32),
            Literal::Float32(v) => Some(v.to_bits()),
            _ => None,
        }
    }
}

// Floats compare bitwise so that every distinct literal maps to one constant.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        fn bits(values: &[f32]) -> impl Iterator<Item = u32> + '_ {
            values.iter().map(|v| v.to_bits())
        }
        match (self, other) {
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Int32(a), Literal::Int32(b)) => a == b,
            (Literal::Float32(a), Literal::Float32(b)) => a.to_bits() == b.to_bits(),
            (Literal::Vector2f32(a), Literal::Vector2f32(b)) => bits(a).eq(bits(b)),
            (Literal::Vector3f32(a), Literal::Vector3f32(b)) => bits(a).eq(bits(b)),
            (Literal::Vector4f32(a), Literal::Vector4f32(b)) => bits(a).eq(bits(b)),
            (Literal::Matrix4x4f32(a), Literal::Matrix4x4f32(b)) => bits(a).eq(bits(b)),
            _ => false,
        }
    }
}

impl Eq for Literal {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorType {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionType {
    Sin,
    Cos,
    Tan,
    Abs,
    Floor,
    Pow,
    Min,
    Max,
    Cross,
    Dot,
    Length,
    Normalize,
    Texture1D,
    Texture2D,
    Texture3D,
}

impl FunctionType {
    pub fn input_count(self) -> usize {
        match self {
            FunctionType::Sin
            | FunctionType::Cos
            | FunctionType::Tan
            | FunctionType::Abs
            | FunctionType::Floor
            | FunctionType::Length
            | FunctionType::Normalize => 1,
            FunctionType::Pow
            | FunctionType::Min
            | FunctionType::Max
            | FunctionType::Cross
            | FunctionType::Dot
            | FunctionType::Texture1D
            | FunctionType::Texture2D
            | FunctionType::Texture3D => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    Sampler1D,
    Sampler2D,
    Sampler3D,
    UniformBuffer,
}

impl BindingKind {
    pub fn sampler_type(self) -> Option<VariableDataType> {
        match self {
            BindingKind::Sampler1D => Some(VariableDataType::Sampler1D),
            BindingKind::Sampler2D => Some(VariableDataType::Sampler2D),
            BindingKind::Sampler3D => Some(VariableDataType::Sampler3D),
            BindingKind::UniformBuffer => None,
        }
    }
}

/// Closed set of node kinds the generator knows how to lower.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Constant(Literal),
    Composite,
    Function(FunctionType),
    Operator(OperatorType),
    /// Output interface; each input pin is one output member.
    Output,
    /// Vertex position sink; input pin 0 is the position.
    VertexOutput,
    /// Input interface; each output pin is one input member.
    Input,
    /// Push-constant block; output pin `i` carries member id `member_ids[i]`.
    PushConstants { member_ids: Vec<u32> },
    DescriptorBinding {
        set_id: u32,
        binding_id: u32,
        kind: BindingKind,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Address of an output pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputPinRef {
    pub node: NodeId,
    pub pin: usize,
}

/// Address of an input pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputPinRef {
    pub node: NodeId,
    pub pin: usize,
}

#[derive(Clone, Debug)]
pub struct InputPin {
    pub data_type: VariableDataType,
    pub connection: Option<OutputPinRef>,
    pub default: Option<Literal>,
}

#[derive(Clone, Debug)]
pub struct OutputPin {
    pub data_type: VariableDataType,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub inputs: Vec<InputPin>,
    pub outputs: Vec<OutputPin>,
}

#[derive(Clone, Debug, Default)]
pub struct DescriptorSet {
    pub id: u32,
    pub bindings: Vec<NodeId>,
}

/// A vertex or fragment shader graph.
#[derive(Clone, Debug)]
pub struct Script {
    script_type: ScriptType,
    nodes: Vec<Node>,
    input_interface: NodeId,
    output_interface: NodeId,
    vertex_output: Option<NodeId>,
    push_constants: Option<NodeId>,
    descriptor_sets: Vec<DescriptorSet>,
}

impl Script {
    pub fn new(script_type: ScriptType) -> Self {
        let mut script = Script {
            script_type,
            nodes: Vec::new(),
            input_interface: NodeId(0),
            output_interface: NodeId(1),
            vertex_output: None,
            push_constants: None,
            descriptor_sets: Vec::new(),
        };
        script.input_interface = script.push_node(NodeKind::Input, Vec::new(), Vec::new());
        script.output_interface = script.push_node(NodeKind::Output, Vec::new(), Vec::new());
        if script_type == ScriptType::Vertex {
            let position = InputPin {
                data_type: VariableDataType::Vector4f32,
                connection: None,
                default: None,
            };
            script.vertex_output =
                Some(script.push_node(NodeKind::VertexOutput, vec![position], Vec::new()));
        }
        script
    }

    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| anyhow!("node not found: {}", id.0))
    }

    pub fn input_interface(&self) -> NodeId {
        self.input_interface
    }

    pub fn output_interface(&self) -> NodeId {
        self.output_interface
    }

    pub fn vertex_output(&self) -> Option<NodeId> {
        self.vertex_output
    }

    pub fn push_constants(&self) -> Option<NodeId> {
        self.push_constants
    }

    pub fn descriptor_sets(&self) -> &[DescriptorSet] {
        &self.descriptor_sets
    }

    pub fn output_pin(&self, pin: OutputPinRef) -> Result<&OutputPin> {
        self.node(pin.node)?
            .outputs
            .get(pin.pin)
            .ok_or_else(|| anyhow!("output pin {} not found on node {}", pin.pin, pin.node.0))
    }

    pub fn input_pin(&self, pin: InputPinRef) -> Result<&InputPin> {
        self.node(pin.node)?
            .inputs
            .get(pin.pin)
            .ok_or_else(|| anyhow!("input pin {} not found on node {}", pin.pin, pin.node.0))
    }

    fn push_node(
        &mut self,
        kind: NodeKind,
        inputs: Vec<InputPin>,
        outputs: Vec<OutputPin>,
    ) -> NodeId {
        self.nodes.push(Node {
            kind,
            inputs,
            outputs,
        });
        NodeId(self.nodes.len() - 1)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| anyhow!("node not found: {}", id.0))
    }

    /// Add a generic node with unconnected inputs of the given types.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        inputs: &[VariableDataType],
        outputs: &[VariableDataType],
    ) -> NodeId {
        let inputs = inputs
            .iter()
            .map(|&data_type| InputPin {
                data_type,
                connection: None,
                default: None,
            })
            .collect();
        let outputs = outputs
            .iter()
            .map(|&data_type| OutputPin { data_type })
            .collect();
        self.push_node(kind, inputs, outputs)
    }

    pub fn add_constant(&mut self, literal: Literal) -> OutputPinRef {
        let node = self.add_node(NodeKind::Constant(literal), &[], &[literal.data_type()]);
        OutputPinRef { node, pin: 0 }
    }

    pub fn add_operator(
        &mut self,
        op: OperatorType,
        lhs: VariableDataType,
        rhs: VariableDataType,
        result: VariableDataType,
    ) -> NodeId {
        self.add_node(NodeKind::Operator(op), &[lhs, rhs], &[result])
    }

    pub fn add_function(
        &mut self,
        function: FunctionType,
        inputs: &[VariableDataType],
        result: VariableDataType,
    ) -> NodeId {
        self.add_node(NodeKind::Function(function), inputs, &[result])
    }

    pub fn add_composite(
        &mut self,
        inputs: &[VariableDataType],
        result: VariableDataType,
    ) -> NodeId {
        self.add_node(NodeKind::Composite, inputs, &[result])
    }

    /// Append a member to the input interface.
    pub fn add_input_member(&mut self, data_type: VariableDataType) -> OutputPinRef {
        let node = self.input_interface;
        let outputs = &mut self.nodes[node.0].outputs;
        outputs.push(OutputPin { data_type });
        OutputPinRef {
            node,
            pin: outputs.len() - 1,
        }
    }

    /// Append a member to the output interface.
    pub fn add_output_member(&mut self, data_type: VariableDataType) -> InputPinRef {
        let node = self.output_interface;
        let inputs = &mut self.nodes[node.0].inputs;
        inputs.push(InputPin {
            data_type,
            connection: None,
            default: None,
        });
        InputPinRef {
            node,
            pin: inputs.len() - 1,
        }
    }

    /// Pin receiving the vertex position, for vertex scripts.
    pub fn vertex_position(&self) -> Option<InputPinRef> {
        self.vertex_output.map(|node| InputPinRef { node, pin: 0 })
    }

    /// Append a push-constant member; ids must be unique within the script.
    pub fn add_push_constant(
        &mut self,
        id: u32,
        data_type: VariableDataType,
    ) -> Result<OutputPinRef> {
        let node = match self.push_constants {
            Some(node) => node,
            None => {
                let node = self.push_node(
                    NodeKind::PushConstants {
                        member_ids: Vec::new(),
                    },
                    Vec::new(),
                    Vec::new(),
                );
                self.push_constants = Some(node);
                node
            }
        };
        let entry = self.node_mut(node)?;
        let NodeKind::PushConstants { member_ids } = &mut entry.kind else {
            bail!("push-constant node {} has an unexpected kind", node.0);
        };
        if member_ids.contains(&id) {
            bail!("duplicate push-constant id {id}");
        }
        member_ids.push(id);
        entry.outputs.push(OutputPin { data_type });
        Ok(OutputPinRef {
            node,
            pin: entry.outputs.len() - 1,
        })
    }

    /// Declare a descriptor binding. Sampler bindings get one output pin of
    /// the sampler type; uniform buffers get one output pin per member.
    pub fn add_descriptor_binding(
        &mut self,
        set_id: u32,
        binding_id: u32,
        kind: BindingKind,
        members: &[VariableDataType],
    ) -> Result<NodeId> {
        let outputs: Vec<VariableDataType> = match kind.sampler_type() {
            Some(sampler) => {
                if !members.is_empty() {
                    bail!("sampler binding {set_id}.{binding_id} cannot declare members");
                }
                vec![sampler]
            }
            None => {
                if let Some(bad) = members.iter().find(|t| t.is_sampler()) {
                    bail!("uniform buffer {set_id}.{binding_id} cannot hold a {bad:?} member");
                }
                members.to_vec()
            }
        };

        let set_index = match self.descriptor_sets.iter().position(|s| s.id == set_id) {
            Some(index) => index,
            None => {
                self.descriptor_sets.push(DescriptorSet {
                    id: set_id,
                    bindings: Vec::new(),
                });
                self.descriptor_sets.len() - 1
            }
        };
        for &existing in &self.descriptor_sets[set_index].bindings {
            if let NodeKind::DescriptorBinding { binding_id: b, .. } = self.nodes[existing.0].kind {
                if b == binding_id {
                    bail!("duplicate descriptor binding {set_id}.{binding_id}");
                }
            }
        }

        let node = self.add_node(
            NodeKind::DescriptorBinding {
                set_id,
                binding_id,
                kind,
            },
            &[],
            &outputs,
        );
        self.descriptor_sets[set_index].bindings.push(node);
        Ok(node)
    }

    /// Connect `from` into `to`; both pins must carry the same data type.
    pub fn connect(&mut self, from: OutputPinRef, to: InputPinRef) -> Result<()> {
        let from_type = self.output_pin(from)?.data_type;
        let to_type = self.input_pin(to)?.data_type;
        if from_type != to_type {
            bail!(
                "cannot connect {from_type:?} output of node {} into {to_type:?} input of node {}",
                from.node.0,
                to.node.0
            );
        }
        self.node_mut(to.node)?.inputs[to.pin].connection = Some(from);
        Ok(())
    }

    pub fn set_default(&mut self, to: InputPinRef, literal: Literal) -> Result<()> {
        let to_type = self.input_pin(to)?.data_type;
        if literal.data_type() != to_type {
            bail!(
                "default {:?} does not match {to_type:?} input of node {}",
                literal.data_type(),
                to.node.0
            );
        }
        self.node_mut(to.node)?.inputs[to.pin].default = Some(literal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_equality_is_bitwise() {
        assert_eq!(Literal::Float32(1.0), Literal::Float32(1.0));
        assert_ne!(Literal::Float32(0.0), Literal::Float32(-0.0));
        assert_eq!(Literal::Float32(f32::NAN), Literal::Float32(f32::NAN));
        assert_ne!(
            Literal::Vector4f32([1.0, 2.0, 3.0, 4.0]),
            Literal::Vector4f32([1.0, 2.0, 3.0, 5.0])
        );
        assert_ne!(Literal::Int32(1), Literal::Float32(1.0));
    }

    #[test]
    fn vertex_scripts_get_a_position_sink() {
        let vertex = Script::new(ScriptType::Vertex);
        let fragment = Script::new(ScriptType::Fragment);
        assert!(vertex.vertex_position().is_some());
        assert!(fragment.vertex_position().is_none());
    }

    #[test]
    fn connect_rejects_type_mismatch() {
        let mut script = Script::new(ScriptType::Fragment);
        let out = script.add_output_member(VariableDataType::Vector4f32);
        let c = script.add_constant(Literal::Float32(1.0));
        let err = script.connect(c, out).unwrap_err();
        assert!(err.to_string().contains("cannot connect"));
    }

    #[test]
    fn duplicate_bindings_and_push_constant_ids_are_rejected() {
        let mut script = Script::new(ScriptType::Fragment);
        script
            .add_push_constant(4, VariableDataType::Float32)
            .unwrap();
        assert!(script.add_push_constant(4, VariableDataType::Float32).is_err());

        script
            .add_descriptor_binding(0, 1, BindingKind::Sampler2D, &[])
            .unwrap();
        assert!(
            script
                .add_descriptor_binding(0, 1, BindingKind::UniformBuffer, &[VariableDataType::Float32])
                .is_err()
        );
        assert_eq!(script.descriptor_sets().len(), 1);
    }

    #[test]
    fn zero_literal_for_sampler_is_an_error() {
        assert!(Literal::zero(VariableDataType::Sampler2D).is_err());
        assert_eq!(
            Literal::zero(VariableDataType::Vector3f32).unwrap(),
            Literal::Vector3f32([0.0; 3])
        );
    }
}
