#![allow(dead_code)]

use std::path::PathBuf;

use node_forge_spirv::script::{Literal, OutputPinRef, Script, ScriptType, VariableDataType};
use rspirv::dr::{Instruction, Module, Operand};
use rspirv::spirv::{Decoration, Op, StorageClass, Word};

pub fn case_dir(case_name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cases")
        .join(case_name)
}

pub fn parse(words: &[u32]) -> Module {
    rspirv::dr::load_words(words)
        .unwrap_or_else(|e| panic!("generated module does not parse: {e:?}"))
}

pub fn instructions(module: &Module, op: Op) -> Vec<&Instruction> {
    module
        .all_inst_iter()
        .filter(|inst| inst.class.opcode == op)
        .collect()
}

pub fn count(module: &Module, op: Op) -> usize {
    instructions(module, op).len()
}

pub fn id_ref(operand: &Operand) -> Word {
    match operand {
        Operand::IdRef(id) => *id,
        other => panic!("expected an id operand, got {other:?}"),
    }
}

pub fn literal(operand: &Operand) -> u32 {
    match operand {
        Operand::LiteralBit32(v) => *v,
        other => panic!("expected a 32-bit literal, got {other:?}"),
    }
}

/// Result ids of every `OpVariable` in `storage_class`.
pub fn variables(module: &Module, storage_class: StorageClass) -> Vec<Word> {
    instructions(module, Op::Variable)
        .into_iter()
        .filter(|inst| inst.operands.first() == Some(&Operand::StorageClass(storage_class)))
        .filter_map(|inst| inst.result_id)
        .collect()
}

/// Literal operand of `OpDecorate target decoration <literal>`.
pub fn decoration(module: &Module, target: Word, decoration: Decoration) -> Option<u32> {
    instructions(module, Op::Decorate)
        .into_iter()
        .find(|inst| {
            inst.operands.first() == Some(&Operand::IdRef(target))
                && inst.operands.get(1) == Some(&Operand::Decoration(decoration))
        })
        .and_then(|inst| inst.operands.get(2).map(literal))
}

/// `Offset` decoration of every member of `structure`, in member order.
pub fn member_offsets(module: &Module, structure: Word) -> Vec<u32> {
    let mut offsets: Vec<(u32, u32)> = instructions(module, Op::MemberDecorate)
        .into_iter()
        .filter(|inst| {
            inst.operands.first() == Some(&Operand::IdRef(structure))
                && inst.operands.get(2) == Some(&Operand::Decoration(Decoration::Offset))
        })
        .map(|inst| (literal(&inst.operands[1]), literal(&inst.operands[3])))
        .collect();
    offsets.sort();
    offsets.into_iter().map(|(_, offset)| offset).collect()
}

/// Pointee of the pointer type of variable `id`.
pub fn variable_pointee(module: &Module, variable: Word) -> Word {
    let pointer_type = instructions(module, Op::Variable)
        .into_iter()
        .find(|inst| inst.result_id == Some(variable))
        .and_then(|inst| inst.result_type)
        .expect("variable exists");
    let pointer = instructions(module, Op::TypePointer)
        .into_iter()
        .find(|inst| inst.result_id == Some(pointer_type))
        .expect("pointer type exists");
    id_ref(&pointer.operands[1])
}

/// `(pointer, value)` of every `OpStore`.
pub fn stores(module: &Module) -> Vec<(Word, Word)> {
    instructions(module, Op::Store)
        .into_iter()
        .map(|inst| (id_ref(&inst.operands[0]), id_ref(&inst.operands[1])))
        .collect()
}

pub fn id_bound(module: &Module) -> Word {
    module.header.as_ref().expect("module has a header").bound
}

/// Every id defined or referenced anywhere in the module.
pub fn referenced_ids(module: &Module) -> Vec<Word> {
    let mut ids = Vec::new();
    for inst in module.all_inst_iter() {
        ids.extend(inst.result_id);
        ids.extend(inst.result_type);
        for operand in &inst.operands {
            if let Operand::IdRef(id) = operand {
                ids.push(*id);
            }
        }
    }
    ids
}

/// Fragment script writing `literals` to one output member each.
pub fn constant_outputs(literals: &[Literal]) -> Script {
    let mut script = Script::new(ScriptType::Fragment);
    for literal in literals {
        let out = script.add_output_member(literal.data_type());
        let value = script.add_constant(*literal);
        script.connect(value, out).expect("types match");
    }
    script
}

pub fn output(node: node_forge_spirv::script::NodeId) -> OutputPinRef {
    OutputPinRef { node, pin: 0 }
}

pub fn input(node: node_forge_spirv::script::NodeId, pin: usize) -> node_forge_spirv::script::InputPinRef {
    node_forge_spirv::script::InputPinRef { node, pin }
}

pub const VEC4: VariableDataType = VariableDataType::Vector4f32;
