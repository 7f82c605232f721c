use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::graph;
use crate::script::{
    BindingKind, FunctionType, InputPinRef, Literal, NodeKind, OperatorType, OutputPinRef, Script,
    ScriptType, VariableDataType,
};

/// Endpoint node id of the input interface; port ids are input member ids.
pub const INPUT_NODE_ID: &str = "input";
/// Endpoint node id of the output interface; port ids are output member ids.
pub const OUTPUT_NODE_ID: &str = "output";
/// Endpoint node id of the push-constant block; port ids are member ports.
pub const PUSH_CONSTANTS_NODE_ID: &str = "push_constants";
/// Endpoint node id of the vertex position sink (port `position`).
pub const VERTEX_OUTPUT_NODE_ID: &str = "vertex_output";
pub const VERTEX_POSITION_PORT_ID: &str = "position";
/// Port id of the single output of a sampler binding.
pub const SAMPLER_PORT_ID: &str = "sampler";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineDSL {
    pub version: String,
    pub metadata: Metadata,
    pub vertex: ScriptDSL,
    pub fragment: ScriptDSL,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Metadata {
    pub name: String,
    pub created: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ScriptDSL {
    #[serde(default)]
    pub inputs: Vec<NodePort>,
    #[serde(default)]
    pub outputs: Vec<NodePort>,
    #[serde(default, rename = "pushConstants")]
    pub push_constants: Vec<PushConstantPort>,
    #[serde(default)]
    pub bindings: Vec<DescriptorBindingDecl>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl ScriptDSL {
    /// Reserved interface ids and declared binding ids.
    pub fn is_interface_node(&self, node_id: &str) -> bool {
        matches!(
            node_id,
            INPUT_NODE_ID | OUTPUT_NODE_ID | PUSH_CONSTANTS_NODE_ID | VERTEX_OUTPUT_NODE_ID
        ) || self.bindings.iter().any(|b| b.id == node_id)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Node {
    pub id: String,
    /// One of `Constant`, `Operator`, `Function`, `Composite`.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<NodePort>,
    #[serde(default)]
    pub outputs: Vec<NodePort>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodePort {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub port_type: VariableDataType,
    /// Value used when the port is left unconnected.
    #[serde(default)]
    pub default: Option<Literal>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PushConstantPort {
    /// Member id shared by both stages of a pipeline.
    pub id: u32,
    pub port: String,
    #[serde(rename = "type")]
    pub port_type: VariableDataType,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DescriptorBindingDecl {
    pub id: String,
    pub set: u32,
    pub binding: u32,
    pub kind: BindingKind,
    /// Uniform buffer members; empty for samplers.
    #[serde(default)]
    pub members: Vec<NodePort>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Connection {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Endpoint {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "portId")]
    pub port_id: String,
}

pub fn load_pipeline_from_path(path: impl AsRef<std::path::Path>) -> Result<PipelineDSL> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline json at {}", path.display()))?;
    let pipeline: PipelineDSL =
        serde_json::from_str(&text).context("failed to parse pipeline json")?;
    Ok(pipeline)
}

/// Build the vertex and fragment scripts of `pipeline`.
pub fn build_scripts(pipeline: &PipelineDSL) -> Result<(Script, Script)> {
    let vertex = build_script(&pipeline.vertex, ScriptType::Vertex)
        .with_context(|| format!("invalid vertex script in pipeline {}", pipeline.metadata.name))?;
    let fragment = build_script(&pipeline.fragment, ScriptType::Fragment).with_context(|| {
        format!("invalid fragment script in pipeline {}", pipeline.metadata.name)
    })?;
    Ok((vertex, fragment))
}

fn parse_enum<T: serde::de::DeserializeOwned>(node: &Node, key: &str) -> Result<T> {
    let value = node
        .params
        .get(key)
        .ok_or_else(|| anyhow!("{} node {} is missing param {key}", node.node_type, node.id))?;
    serde_json::from_value(value.clone())
        .with_context(|| format!("invalid {key} param on node {}", node.id))
}

fn node_kind(node: &Node) -> Result<NodeKind> {
    Ok(match node.node_type.as_str() {
        "Constant" => NodeKind::Constant(parse_enum::<Literal>(node, "value")?),
        "Operator" => NodeKind::Operator(parse_enum::<OperatorType>(node, "op")?),
        "Function" => NodeKind::Function(parse_enum::<FunctionType>(node, "function")?),
        "Composite" => NodeKind::Composite,
        other => bail!("unsupported node type {other} (node {})", node.id),
    })
}

type PortKey = (String, String);

fn port_key(node_id: &str, port_id: &str) -> PortKey {
    (node_id.to_string(), port_id.to_string())
}

/// Convert one script description into a [`Script`] graph.
pub fn build_script(dsl: &ScriptDSL, script_type: ScriptType) -> Result<Script> {
    let mut script = Script::new(script_type);
    let mut outputs: HashMap<PortKey, OutputPinRef> = HashMap::new();
    let mut inputs: HashMap<PortKey, InputPinRef> = HashMap::new();
    let mut defaults: Vec<(InputPinRef, Literal)> = Vec::new();

    for port in &dsl.inputs {
        let pin = script.add_input_member(port.port_type);
        outputs.insert(port_key(INPUT_NODE_ID, &port.id), pin);
    }
    for port in &dsl.outputs {
        let pin = script.add_output_member(port.port_type);
        inputs.insert(port_key(OUTPUT_NODE_ID, &port.id), pin);
        if let Some(literal) = port.default {
            defaults.push((pin, literal));
        }
    }
    if let Some(pin) = script.vertex_position() {
        inputs.insert(port_key(VERTEX_OUTPUT_NODE_ID, VERTEX_POSITION_PORT_ID), pin);
    }
    for member in &dsl.push_constants {
        let pin = script.add_push_constant(member.id, member.port_type)?;
        outputs.insert(port_key(PUSH_CONSTANTS_NODE_ID, &member.port), pin);
    }
    for binding in &dsl.bindings {
        let member_types: Vec<VariableDataType> =
            binding.members.iter().map(|m| m.port_type).collect();
        let node = script.add_descriptor_binding(
            binding.set,
            binding.binding,
            binding.kind,
            &member_types,
        )?;
        if binding.kind.sampler_type().is_some() {
            outputs.insert(
                port_key(&binding.id, SAMPLER_PORT_ID),
                OutputPinRef { node, pin: 0 },
            );
        } else {
            for (pin, member) in binding.members.iter().enumerate() {
                outputs.insert(port_key(&binding.id, &member.id), OutputPinRef { node, pin });
            }
        }
    }

    let nodes_by_id: HashMap<&str, &Node> = dsl.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    for node_id in graph::topo_sort(dsl)? {
        let node = nodes_by_id
            .get(node_id.as_str())
            .ok_or_else(|| anyhow!("node not found: {node_id}"))?;
        let kind = node_kind(node)?;
        let input_types: Vec<VariableDataType> = node.inputs.iter().map(|p| p.port_type).collect();
        let output_types: Vec<VariableDataType> = match &kind {
            NodeKind::Constant(literal) if node.outputs.is_empty() => vec![literal.data_type()],
            _ => node.outputs.iter().map(|p| p.port_type).collect(),
        };
        let id = script.add_node(kind, &input_types, &output_types);

        for (pin, port) in node.inputs.iter().enumerate() {
            let to = InputPinRef { node: id, pin };
            inputs.insert(port_key(&node.id, &port.id), to);
            if let Some(literal) = port.default {
                defaults.push((to, literal));
            }
        }
        if node.outputs.is_empty() {
            outputs.insert(port_key(&node.id, "value"), OutputPinRef { node: id, pin: 0 });
        }
        for (pin, port) in node.outputs.iter().enumerate() {
            outputs.insert(port_key(&node.id, &port.id), OutputPinRef { node: id, pin });
        }
    }

    for (to, literal) in defaults {
        script.set_default(to, literal)?;
    }

    for connection in &dsl.connections {
        let from = outputs
            .get(&port_key(&connection.from.node_id, &connection.from.port_id))
            .ok_or_else(|| {
                anyhow!(
                    "connection {} starts at unknown output {}.{}",
                    connection.id,
                    connection.from.node_id,
                    connection.from.port_id
                )
            })?;
        let to = inputs
            .get(&port_key(&connection.to.node_id, &connection.to.port_id))
            .ok_or_else(|| {
                anyhow!(
                    "connection {} ends at unknown input {}.{}",
                    connection.id,
                    connection.to.node_id,
                    connection.to.port_id
                )
            })?;
        script
            .connect(*from, *to)
            .with_context(|| format!("invalid connection {}", connection.id))?;
    }

    warn_unreachable_nodes(dsl, script_type);
    Ok(script)
}

fn warn_unreachable_nodes(dsl: &ScriptDSL, script_type: ScriptType) {
    let mut reachable: HashSet<String> = graph::upstream_reachable(dsl, OUTPUT_NODE_ID);
    if script_type == ScriptType::Vertex {
        reachable.extend(graph::upstream_reachable(dsl, VERTEX_OUTPUT_NODE_ID));
    }
    for node in &dsl.nodes {
        if !reachable.contains(&node.id) {
            log::warn!(
                "{script_type:?} script node {} ({}) does not reach any output and will not be compiled",
                node.id,
                node.node_type
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_json() -> &'static str {
        r#"{
            "outputs": [{ "id": "color", "type": "vec4" }],
            "pushConstants": [{ "id": 3, "port": "tint", "type": "vec4" }],
            "nodes": [
                { "id": "base", "type": "Constant",
                  "params": { "value": { "type": "vec4", "value": [1.0, 0.5, 0.25, 1.0] } } },
                { "id": "mul", "type": "Operator", "params": { "op": "Mul" },
                  "inputs": [{ "id": "a", "type": "vec4" }, { "id": "b", "type": "vec4" }],
                  "outputs": [{ "id": "result", "type": "vec4" }] }
            ],
            "connections": [
                { "id": "c0", "from": { "nodeId": "base", "portId": "value" }, "to": { "nodeId": "mul", "portId": "a" } },
                { "id": "c1", "from": { "nodeId": "push_constants", "portId": "tint" }, "to": { "nodeId": "mul", "portId": "b" } },
                { "id": "c2", "from": { "nodeId": "mul", "portId": "result" }, "to": { "nodeId": "output", "portId": "color" } }
            ]
        }"#
    }

    #[test]
    fn builds_script_from_json() {
        let dsl: ScriptDSL = serde_json::from_str(fragment_json()).unwrap();
        let script = build_script(&dsl, ScriptType::Fragment).unwrap();

        let output = script.node(script.output_interface()).unwrap();
        assert_eq!(output.inputs.len(), 1);
        let from = output.inputs[0].connection.expect("output is connected");
        assert!(matches!(
            script.node(from.node).unwrap().kind,
            NodeKind::Operator(OperatorType::Mul)
        ));
        assert!(script.push_constants().is_some());
    }

    #[test]
    fn unknown_ports_are_reported() {
        let mut dsl: ScriptDSL = serde_json::from_str(fragment_json()).unwrap();
        dsl.connections[2].to.port_id = "colour".to_string();
        let err = build_script(&dsl, ScriptType::Fragment).unwrap_err();
        assert!(format!("{err:#}").contains("output.colour"));
    }

    #[test]
    fn unsupported_node_types_are_rejected() {
        let mut dsl: ScriptDSL = serde_json::from_str(fragment_json()).unwrap();
        dsl.nodes[1].node_type = "Branch".to_string();
        let err = build_script(&dsl, ScriptType::Fragment).unwrap_err();
        assert!(err.to_string().contains("unsupported node type Branch"));
    }
}
