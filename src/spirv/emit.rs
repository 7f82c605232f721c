//! Main function body: one instruction group per main-instruction node.

use anyhow::{Result, anyhow, bail};
use rspirv::spirv::{GLOp, Op, Word};

use super::Generator;
use super::tree::{
    GeneratorInputPin, GeneratorNodeHandle, GeneratorOutputPin, OutputPinHandle, PinStorage,
};
use crate::script::{FunctionType, Literal, NodeKind, OperatorType, VariableDataType};

/// Result type of a non-texture function for the given input types.
fn function_result_type(
    function: FunctionType,
    input_types: &[VariableDataType],
) -> Result<VariableDataType> {
    use VariableDataType::{Float32, Int32, Vector3f32};

    let floating = |t: VariableDataType| t == Float32 || t.is_vector();
    let expected = match (function, input_types) {
        (
            FunctionType::Sin
            | FunctionType::Cos
            | FunctionType::Tan
            | FunctionType::Floor
            | FunctionType::Normalize,
            &[x],
        ) if floating(x) => x,
        (FunctionType::Length, &[x]) if floating(x) => Float32,
        (FunctionType::Abs, &[x]) if x == Int32 || floating(x) => x,
        (FunctionType::Pow, &[a, b]) if a == b && floating(a) => a,
        (FunctionType::Min | FunctionType::Max, &[a, b]) if a == b && (a == Int32 || floating(a)) => a,
        (FunctionType::Cross, &[Vector3f32, Vector3f32]) => Vector3f32,
        (FunctionType::Dot, &[a, b]) if a == b && a.is_vector() => Float32,
        _ => {
            let codes: Vec<u32> = input_types.iter().map(|t| *t as u32).collect();
            bail!("unsupported data types for {function:?}: {input_types:?} ({codes:?})")
        }
    };
    Ok(expected)
}

impl Generator<'_> {
    pub(super) fn write_main(&mut self) -> Result<()> {
        self.buffer
            .add_op_function(self.void_type_id, self.main_function_id, self.function_type_id);
        let label = self.take_id();
        self.buffer.add_op_label(label);

        for index in 0..self.main_instructions.len() {
            let handle = self.main_instructions[index];
            self.emit_node(handle)?;
        }

        self.buffer.add_op_return();
        self.buffer.add_op_function_end();
        Ok(())
    }

    /// SSA id holding the value of `pin`, loading it out of its storage class
    /// first if needed. The pin is switched to `Function` storage afterwards,
    /// so a value is loaded at most once.
    pub(super) fn access_or_transform_storage_class_in_main(
        &mut self,
        pin: OutputPinHandle,
    ) -> Result<Word> {
        let GeneratorOutputPin {
            pin: source,
            storage,
            ..
        } = self.output_pins[pin.0];
        let value = match storage {
            PinStorage::Function(id) => return Ok(id),
            PinStorage::Constant(constant) => return Ok(self.constants.get(constant).id),
            PinStorage::Pending => bail!(
                "output pin {} of node {} is read before it is emitted",
                source.pin,
                source.node.0
            ),
            PinStorage::Input { location } => {
                let member = self.inputs.member(location)?;
                let (type_id, variable) = (self.data_types.get(member.data_type).id, member.id);
                let id = self.take_id();
                self.buffer.add_op_load(type_id, id, variable);
                id
            }
            PinStorage::UniformConstant { sampler } => {
                let sampler = self.samplers.get(sampler)?;
                let (type_id, variable) = (self.data_types.get(sampler.data_type).id, sampler.id);
                let id = self.take_id();
                self.buffer.add_op_load(type_id, id, variable);
                id
            }
            PinStorage::PushConstant => {
                let block = &self.push_constants;
                let index = block.member_index_of(source)?;
                let member = &block.members[index as usize];
                let chain = (
                    self.pointers.get(member.pointer).id,
                    self.data_types.get(member.data_type).id,
                    block.variable_id,
                );
                self.load_member(chain, index)?
            }
            PinStorage::Uniform { buffer } => {
                let block = &self
                    .uniform_buffers
                    .get(buffer)
                    .ok_or_else(|| anyhow!("uniform buffer #{buffer} was never registered"))?
                    .structure;
                let index = block.member_index_of(source)?;
                let member = &block.members[index as usize];
                let chain = (
                    self.pointers.get(member.pointer).id,
                    self.data_types.get(member.data_type).id,
                    block.variable_id,
                );
                self.load_member(chain, index)?
            }
        };
        self.output_pins[pin.0].storage = PinStorage::Function(value);
        Ok(value)
    }

    /// `OpAccessChain` + `OpLoad` of block member `index`.
    fn load_member(&mut self, (pointer_id, type_id, base): (Word, Word, Word), index: u32) -> Result<Word> {
        let index_id = self.constants.id_of(&Literal::Int32(index as i32))?;
        let chain = self.take_id();
        self.buffer
            .add_op_access_chain(pointer_id, chain, base, &[index_id]);
        let id = self.take_id();
        self.buffer.add_op_load(type_id, id, chain);
        Ok(id)
    }

    fn input_value(&mut self, node: GeneratorNodeHandle, index: usize) -> Result<Word> {
        let script_node = self.nodes[node.0].script_node;
        match self.nodes[node.0].inputs.get(index) {
            Some(GeneratorInputPin::Default(constant)) => Ok(self.constants.get(*constant).id),
            Some(GeneratorInputPin::Connected(pin)) => {
                self.access_or_transform_storage_class_in_main(*pin)
            }
            Some(GeneratorInputPin::Unresolved | GeneratorInputPin::Ignored) | None => bail!(
                "input pin {index} of node {} has no resolved value",
                script_node.0
            ),
        }
    }

    fn set_result(&mut self, node: GeneratorNodeHandle, id: Word) -> Result<()> {
        let pin = self.nodes[node.0]
            .outputs
            .first()
            .copied()
            .flatten()
            .ok_or_else(|| {
                anyhow!(
                    "node {} has no registered output pin",
                    self.nodes[node.0].script_node.0
                )
            })?;
        self.output_pins[pin.0].storage = PinStorage::Function(id);
        Ok(())
    }

    fn emit_node(&mut self, handle: GeneratorNodeHandle) -> Result<()> {
        let script = self.script;
        let node_id = self.nodes[handle.0].script_node;
        let node = script.node(node_id)?;

        match &node.kind {
            NodeKind::Operator(op) => {
                if node.inputs.len() != 2 || node.outputs.len() != 1 {
                    bail!(
                        "operator node {} has {} inputs and {} outputs, expected 2 and 1",
                        node_id.0,
                        node.inputs.len(),
                        node.outputs.len()
                    );
                }
                let lhs_type = node.inputs[0].data_type;
                let rhs_type = node.inputs[1].data_type;
                let result_type = node.outputs[0].data_type;
                let lhs = self.input_value(handle, 0)?;
                let rhs = self.input_value(handle, 1)?;
                self.emit_operator(handle, *op, (lhs_type, lhs), (rhs_type, rhs), result_type)
            }
            NodeKind::Function(function) => {
                let expected = function.input_count();
                if node.inputs.len() != expected || node.outputs.len() != 1 {
                    bail!(
                        "{function:?} node {} has {} inputs and {} outputs, expected {expected} and 1",
                        node_id.0,
                        node.inputs.len(),
                        node.outputs.len()
                    );
                }
                let input_types: Vec<VariableDataType> =
                    node.inputs.iter().map(|pin| pin.data_type).collect();
                let mut operands = Vec::with_capacity(expected);
                for index in 0..expected {
                    operands.push(self.input_value(handle, index)?);
                }
                self.emit_function(handle, *function, &input_types, &operands, node.outputs[0].data_type)
            }
            NodeKind::Composite => self.emit_composite(handle),
            NodeKind::Output => {
                for index in 0..node.inputs.len() {
                    if self.nodes[handle.0].inputs[index] == GeneratorInputPin::Ignored {
                        continue;
                    }
                    let variable = self.outputs.member(index as u32)?.id;
                    let value = self.input_value(handle, index)?;
                    self.buffer.add_op_store(variable, value);
                }
                Ok(())
            }
            NodeKind::VertexOutput => {
                let value = self.input_value(handle, 0)?;
                let block = self
                    .vertex_output
                    .as_ref()
                    .ok_or_else(|| anyhow!("vertex output block was never registered"))?;
                let (pointer_id, base) = (self.pointers.get(block.position_pointer).id, block.variable_id);
                let index_id = self.constants.id_of(&Literal::Int32(0))?;
                let chain = self.take_id();
                self.buffer
                    .add_op_access_chain(pointer_id, chain, base, &[index_id]);
                self.buffer.add_op_store(chain, value);
                Ok(())
            }
            other => bail!("node {} of kind {other:?} does not emit instructions", node_id.0),
        }
    }

    fn emit_operator(
        &mut self,
        handle: GeneratorNodeHandle,
        op: OperatorType,
        (lhs_type, lhs): (VariableDataType, Word),
        (rhs_type, rhs): (VariableDataType, Word),
        result_type: VariableDataType,
    ) -> Result<()> {
        use VariableDataType::{Float32, Int32, Matrix4x4f32, Vector4f32};

        let (opcode, first, second, expected) = match (op, lhs_type, rhs_type) {
            (OperatorType::Mul, Matrix4x4f32, Vector4f32) => {
                (Op::MatrixTimesVector, lhs, rhs, Vector4f32)
            }
            (OperatorType::Mul, Vector4f32, Matrix4x4f32) => {
                (Op::VectorTimesMatrix, lhs, rhs, Vector4f32)
            }
            (OperatorType::Mul, Matrix4x4f32, Matrix4x4f32) => {
                (Op::MatrixTimesMatrix, lhs, rhs, Matrix4x4f32)
            }
            (OperatorType::Mul, Matrix4x4f32, Float32) => {
                (Op::MatrixTimesScalar, lhs, rhs, Matrix4x4f32)
            }
            (OperatorType::Mul, Float32, Matrix4x4f32) => {
                (Op::MatrixTimesScalar, rhs, lhs, Matrix4x4f32)
            }
            (OperatorType::Mul, v, Float32) if v.is_vector() => (Op::VectorTimesScalar, lhs, rhs, v),
            (OperatorType::Mul, Float32, v) if v.is_vector() => (Op::VectorTimesScalar, rhs, lhs, v),
            (_, a, b) if a == b && a == Int32 => {
                let opcode = match op {
                    OperatorType::Add => Op::IAdd,
                    OperatorType::Sub => Op::ISub,
                    OperatorType::Mul => Op::IMul,
                    OperatorType::Div => Op::SDiv,
                };
                (opcode, lhs, rhs, Int32)
            }
            (_, a, b) if a == b && (a == Float32 || a.is_vector()) => {
                let opcode = match op {
                    OperatorType::Add => Op::FAdd,
                    OperatorType::Sub => Op::FSub,
                    OperatorType::Mul => Op::FMul,
                    OperatorType::Div => Op::FDiv,
                };
                (opcode, lhs, rhs, a)
            }
            (_, a, b) => bail!(
                "unsupported operand types for {op:?}: {a:?} ({}) and {b:?} ({})",
                a as u32,
                b as u32
            ),
        };

        if result_type != expected {
            bail!("{op:?} of {lhs_type:?} and {rhs_type:?} yields {expected:?}, but the node outputs {result_type:?}");
        }
        let type_id = self.data_types.id_of(result_type)?;
        let id = self.take_id();
        self.buffer.add_op_binary(opcode, type_id, id, first, second);
        self.set_result(handle, id)
    }

    fn emit_function(
        &mut self,
        handle: GeneratorNodeHandle,
        function: FunctionType,
        input_types: &[VariableDataType],
        operands: &[Word],
        result_type: VariableDataType,
    ) -> Result<()> {
        let sampler = match function {
            FunctionType::Texture1D => Some((VariableDataType::Sampler1D, VariableDataType::Float32)),
            FunctionType::Texture2D => Some((VariableDataType::Sampler2D, VariableDataType::Vector2f32)),
            FunctionType::Texture3D => Some((VariableDataType::Sampler3D, VariableDataType::Vector3f32)),
            _ => None,
        };
        if let Some(expected) = sampler {
            return self.emit_texture(handle, function, expected, input_types, operands, result_type);
        }

        let expected = function_result_type(function, input_types)?;
        if result_type != expected {
            bail!("{function:?} of {input_types:?} yields {expected:?}, but the node outputs {result_type:?}");
        }
        let integer = input_types.first() == Some(&VariableDataType::Int32);
        let type_id = self.data_types.id_of(result_type)?;
        let id = self.take_id();

        let instruction = match function {
            FunctionType::Dot => {
                self.buffer
                    .add_op_binary(Op::Dot, type_id, id, operands[0], operands[1]);
                return self.set_result(handle, id);
            }
            FunctionType::Sin => GLOp::Sin,
            FunctionType::Cos => GLOp::Cos,
            FunctionType::Tan => GLOp::Tan,
            FunctionType::Abs if integer => GLOp::SAbs,
            FunctionType::Abs => GLOp::FAbs,
            FunctionType::Floor => GLOp::Floor,
            FunctionType::Pow => GLOp::Pow,
            FunctionType::Min if integer => GLOp::SMin,
            FunctionType::Min => GLOp::FMin,
            FunctionType::Max if integer => GLOp::SMax,
            FunctionType::Max => GLOp::FMax,
            FunctionType::Cross => GLOp::Cross,
            FunctionType::Length => GLOp::Length,
            FunctionType::Normalize => GLOp::Normalize,
            FunctionType::Texture1D | FunctionType::Texture2D | FunctionType::Texture3D => {
                bail!("{function:?} is not a GLSL.std.450 instruction")
            }
        };
        self.buffer
            .add_op_ext_inst(type_id, id, self.glsl_id, instruction, operands);
        self.set_result(handle, id)
    }

    fn emit_texture(
        &mut self,
        handle: GeneratorNodeHandle,
        function: FunctionType,
        (sampler_type, coordinate_type): (VariableDataType, VariableDataType),
        input_types: &[VariableDataType],
        operands: &[Word],
        result_type: VariableDataType,
    ) -> Result<()> {
        let [image, coordinate] = operands else {
            bail!("{function:?} needs 2 inputs, got {}", operands.len());
        };
        if input_types != [sampler_type, coordinate_type] {
            bail!(
                "{function:?} expects ({sampler_type:?}, {coordinate_type:?}) inputs, got {input_types:?}"
            );
        }
        if result_type != VariableDataType::Vector4f32 {
            bail!("{function:?} yields Vector4f32, but the node outputs {result_type:?}");
        }
        let type_id = self.data_types.id_of(result_type)?;
        let id = self.take_id();
        self.buffer
            .add_op_image_sample_implicit_lod(type_id, id, *image, *coordinate);
        self.set_result(handle, id)
    }

    fn emit_composite(&mut self, handle: GeneratorNodeHandle) -> Result<()> {
        let script = self.script;
        let node_id = self.nodes[handle.0].script_node;
        let node = script.node(node_id)?;

        let [output] = node.outputs.as_slice() else {
            bail!(
                "composite node {} has {} outputs, expected 1",
                node_id.0,
                node.outputs.len()
            );
        };
        let result_type = output.data_type;
        if !result_type.is_vector() {
            bail!(
                "unsupported composite result type {result_type:?} ({})",
                result_type as u32
            );
        }

        let mut total = 0;
        for input in &node.inputs {
            if input.data_type != VariableDataType::Float32 && !input.data_type.is_vector() {
                bail!(
                    "unsupported composite input type {:?} ({})",
                    input.data_type,
                    input.data_type as u32
                );
            }
            total += input.data_type.component_count();
        }
        if total != result_type.component_count() {
            bail!(
                "composite node {} inputs have {total} components, expected {}",
                node_id.0,
                result_type.component_count()
            );
        }

        let float_type = self.data_types.id_of(VariableDataType::Float32)?;
        let mut constituents = Vec::with_capacity(total as usize);
        for (index, input) in node.inputs.iter().enumerate() {
            if input.data_type == VariableDataType::Float32 {
                constituents.push(self.input_value(handle, index)?);
                continue;
            }

            let constant = match self.nodes[handle.0].inputs[index] {
                GeneratorInputPin::Default(constant) => Some(constant),
                GeneratorInputPin::Connected(pin) => match self.output_pins[pin.0].storage {
                    PinStorage::Constant(constant) => Some(constant),
                    _ => None,
                },
                _ => None,
            };
            if let Some(constant) = constant {
                let components = &self.constants.get(constant).components;
                constituents.extend(components.iter().map(|c| self.constants.get(*c).id));
                continue;
            }

            let GeneratorInputPin::Connected(pin) = self.nodes[handle.0].inputs[index] else {
                bail!("input pin {index} of node {} has no resolved value", node_id.0);
            };
            let value = self.access_or_transform_storage_class_in_main(pin)?;
            for component in 0..input.data_type.component_count() {
                let id = match self.extracts.get(&(pin, component)) {
                    Some(&id) => id,
                    None => {
                        let id = self.take_id();
                        self.buffer
                            .add_op_composite_extract(float_type, id, value, component);
                        self.extracts.insert((pin, component), id);
                        id
                    }
                };
                constituents.push(id);
            }
        }

        let type_id = self.data_types.id_of(result_type)?;
        let id = self.take_id();
        self.buffer
            .add_op_composite_construct(type_id, id, &constituents);
        self.set_result(handle, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::VariableDataType::{Float32, Int32, Vector2f32, Vector3f32, Vector4f32};

    #[test]
    fn function_types_follow_their_operands() {
        assert_eq!(function_result_type(FunctionType::Sin, &[Vector4f32]).unwrap(), Vector4f32);
        assert_eq!(function_result_type(FunctionType::Length, &[Vector3f32]).unwrap(), Float32);
        assert_eq!(function_result_type(FunctionType::Dot, &[Vector2f32, Vector2f32]).unwrap(), Float32);
        assert_eq!(function_result_type(FunctionType::Max, &[Int32, Int32]).unwrap(), Int32);
        assert_eq!(function_result_type(FunctionType::Abs, &[Int32]).unwrap(), Int32);
        assert_eq!(
            function_result_type(FunctionType::Cross, &[Vector3f32, Vector3f32]).unwrap(),
            Vector3f32
        );
    }

    #[test]
    fn mismatched_function_operands_are_rejected() {
        let rejected: &[(FunctionType, &[VariableDataType])] = &[
            (FunctionType::Dot, &[Float32, Float32]),
            (FunctionType::Sin, &[Int32]),
            (FunctionType::Min, &[Float32, Vector2f32]),
            (FunctionType::Cross, &[Vector4f32, Vector4f32]),
            (FunctionType::Pow, &[Int32, Int32]),
            (FunctionType::Normalize, &[VariableDataType::Sampler2D]),
        ];
        for (function, inputs) in rejected {
            let err = function_result_type(*function, inputs).unwrap_err();
            assert!(err.to_string().contains("unsupported data types"), "{err:#}");
        }
    }
}
