//! Aggregate blocks (push constants, uniform buffers), samplers and the
//! input/output interface variables collected during traversal.

use anyhow::{Result, anyhow};
use rspirv::spirv::{BuiltIn, Decoration, StorageClass, Word};

use super::data_types::{DataTypeHandle, DataTypePointerStorage, DataTypeStorage, PointerHandle};
use super::module_buffer::ModuleBuffer;
use crate::script::{OutputPinRef, VariableDataType};

/// Minimum member stride of a push-constant or uniform block.
pub const MEMBER_STRIDE: u32 = 16;
/// Matrix column stride, in bytes.
const MATRIX_STRIDE: u32 = 16;

/// Bytes a member of `data_type` occupies in a block.
pub fn member_stride(data_type: VariableDataType) -> u32 {
    data_type.size_bytes().max(MEMBER_STRIDE)
}

#[derive(Clone, Debug)]
pub struct StructureMember {
    pub data_type: DataTypeHandle,
    pub kind: VariableDataType,
    pub offset: u32,
    /// Script pin this member is read through.
    pub source: OutputPinRef,
    /// Pointer type used by `OpAccessChain` into this member.
    pub pointer: PointerHandle,
}

/// A `Block`-decorated struct living in `storage_class`.
#[derive(Clone, Debug)]
pub struct Structure {
    pub storage_class: StorageClass,
    pub members: Vec<StructureMember>,
    next_offset: u32,
    pub id: Word,
    pub pointer_id: Word,
    pub variable_id: Word,
}

impl Structure {
    pub fn new(storage_class: StorageClass) -> Self {
        Self {
            storage_class,
            members: Vec::new(),
            next_offset: 0,
            id: 0,
            pointer_id: 0,
            variable_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Size of the block in bytes.
    pub fn size_bytes(&self) -> u32 {
        self.members
            .iter()
            .map(|m| m.offset + member_stride(m.kind))
            .max()
            .unwrap_or(0)
    }

    /// Append a member at the next free offset.
    pub fn add_member(
        &mut self,
        kind: VariableDataType,
        data_type: DataTypeHandle,
        pointer: PointerHandle,
        source: OutputPinRef,
    ) -> u32 {
        let offset = self.next_offset;
        self.add_member_at(kind, data_type, pointer, source, offset);
        offset
    }

    /// Append a member at an offset decided elsewhere (shared layouts).
    pub fn add_member_at(
        &mut self,
        kind: VariableDataType,
        data_type: DataTypeHandle,
        pointer: PointerHandle,
        source: OutputPinRef,
        offset: u32,
    ) {
        self.members.push(StructureMember {
            data_type,
            kind,
            offset,
            source,
            pointer,
        });
        self.next_offset = self.next_offset.max(offset + member_stride(kind));
    }

    /// Order members by offset; member indices are positions after this.
    pub fn sort_by_offset(&mut self) {
        self.members.sort_by_key(|m| m.offset);
    }

    pub fn member_index_of(&self, source: OutputPinRef) -> Result<u32> {
        self.members
            .iter()
            .position(|m| m.source == source)
            .map(|i| i as u32)
            .ok_or_else(|| {
                anyhow!(
                    "no {:?} block member registered for output pin {} of node {}",
                    self.storage_class,
                    source.pin,
                    source.node.0
                )
            })
    }

    pub fn allocate_ids(&mut self, next_id: &mut Word) {
        self.id = *next_id;
        self.pointer_id = *next_id + 1;
        self.variable_id = *next_id + 2;
        *next_id += 3;
    }

    pub fn write_decorations(&self, buffer: &mut ModuleBuffer) {
        buffer.add_op_decorate(self.id, Decoration::Block, &[]);
        for (index, member) in self.members.iter().enumerate() {
            let index = index as u32;
            buffer.add_op_member_decorate(self.id, index, Decoration::Offset, &[member.offset]);
            if member.kind == VariableDataType::Matrix4x4f32 {
                buffer.add_op_member_decorate(self.id, index, Decoration::ColMajor, &[]);
                buffer.add_op_member_decorate(
                    self.id,
                    index,
                    Decoration::MatrixStride,
                    &[MATRIX_STRIDE],
                );
            }
        }
    }

    pub fn write_type(&self, data_types: &DataTypeStorage, buffer: &mut ModuleBuffer) {
        let members: Vec<Word> = self
            .members
            .iter()
            .map(|m| data_types.get(m.data_type).id)
            .collect();
        buffer.add_op_type_struct(self.id, &members);
    }

    pub fn write_pointer(&self, buffer: &mut ModuleBuffer) {
        buffer.add_op_type_pointer(self.pointer_id, self.storage_class, self.id);
    }

    pub fn write_variable(&self, buffer: &mut ModuleBuffer) {
        buffer.add_op_variable(self.pointer_id, self.variable_id, self.storage_class);
    }
}

/// Implicit per-vertex output block; member 0 is the builtin position.
#[derive(Clone, Debug)]
pub struct VertexOutputBlock {
    pub position_type: DataTypeHandle,
    pub position_pointer: PointerHandle,
    pub id: Word,
    pub pointer_id: Word,
    pub variable_id: Word,
}

impl VertexOutputBlock {
    pub fn new(position_type: DataTypeHandle, position_pointer: PointerHandle) -> Self {
        Self {
            position_type,
            position_pointer,
            id: 0,
            pointer_id: 0,
            variable_id: 0,
        }
    }

    pub fn allocate_ids(&mut self, next_id: &mut Word) {
        self.id = *next_id;
        self.pointer_id = *next_id + 1;
        self.variable_id = *next_id + 2;
        *next_id += 3;
    }

    pub fn write_decorations(&self, buffer: &mut ModuleBuffer) {
        buffer.add_op_decorate(self.id, Decoration::Block, &[]);
        buffer.add_op_member_decorate_builtin(self.id, 0, BuiltIn::Position);
    }

    pub fn write_type(&self, data_types: &DataTypeStorage, buffer: &mut ModuleBuffer) {
        buffer.add_op_type_struct(self.id, &[data_types.get(self.position_type).id]);
    }

    pub fn write_pointer(&self, buffer: &mut ModuleBuffer) {
        buffer.add_op_type_pointer(self.pointer_id, StorageClass::Output, self.id);
    }

    pub fn write_variable(&self, buffer: &mut ModuleBuffer) {
        buffer.add_op_variable(self.pointer_id, self.variable_id, StorageClass::Output);
    }
}

/// Uniform buffer block bound at a descriptor (set, binding).
#[derive(Clone, Debug)]
pub struct UniformBuffer {
    pub set_id: u32,
    pub binding_id: u32,
    pub structure: Structure,
}

#[derive(Clone, Debug)]
pub struct Sampler {
    pub set_id: u32,
    pub binding_id: u32,
    pub source: OutputPinRef,
    pub data_type: DataTypeHandle,
    pub pointer: PointerHandle,
    pub id: Word,
}

#[derive(Clone, Debug, Default)]
pub struct SamplerStorage {
    samplers: Vec<Sampler>,
}

impl SamplerStorage {
    pub fn add(
        &mut self,
        set_id: u32,
        binding_id: u32,
        source: OutputPinRef,
        data_type: DataTypeHandle,
        pointer: PointerHandle,
    ) -> usize {
        if let Some(index) = self.samplers.iter().position(|s| s.source == source) {
            return index;
        }
        self.samplers.push(Sampler {
            set_id,
            binding_id,
            source,
            data_type,
            pointer,
            id: 0,
        });
        self.samplers.len() - 1
    }

    pub fn samplers(&self) -> &[Sampler] {
        &self.samplers
    }

    pub fn get(&self, index: usize) -> Result<&Sampler> {
        self.samplers
            .get(index)
            .ok_or_else(|| anyhow!("sampler #{index} was never registered"))
    }

    pub fn allocate_ids(&mut self, next_id: &mut Word) {
        for sampler in &mut self.samplers {
            sampler.id = *next_id;
            *next_id += 1;
        }
    }
}

/// One `Input` or `Output` interface variable.
#[derive(Clone, Debug)]
pub struct InterfaceMember {
    pub location: u32,
    pub data_type: DataTypeHandle,
    pub pointer: PointerHandle,
    /// Integer fragment inputs must not be interpolated.
    pub flat: bool,
    pub id: Word,
}

/// Interface variables of one storage class, each at its own location.
#[derive(Clone, Debug)]
pub struct InterfaceStorage {
    storage_class: StorageClass,
    members: Vec<InterfaceMember>,
}

impl InterfaceStorage {
    pub fn new(storage_class: StorageClass) -> Self {
        Self {
            storage_class,
            members: Vec::new(),
        }
    }

    pub fn members(&self) -> &[InterfaceMember] {
        &self.members
    }

    pub fn contains(&self, location: u32) -> bool {
        self.members.iter().any(|m| m.location == location)
    }

    pub fn add(
        &mut self,
        location: u32,
        data_type: DataTypeHandle,
        pointer: PointerHandle,
        flat: bool,
    ) {
        if self.contains(location) {
            return;
        }
        self.members.push(InterfaceMember {
            location,
            data_type,
            pointer,
            flat,
            id: 0,
        });
    }

    pub fn member(&self, location: u32) -> Result<&InterfaceMember> {
        self.members
            .iter()
            .find(|m| m.location == location)
            .ok_or_else(|| {
                anyhow!(
                    "no {:?} interface variable registered at location {location}",
                    self.storage_class
                )
            })
    }

    pub fn sort_by_location(&mut self) {
        self.members.sort_by_key(|m| m.location);
    }

    pub fn allocate_ids(&mut self, next_id: &mut Word) {
        for member in &mut self.members {
            member.id = *next_id;
            *next_id += 1;
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = Word> + '_ {
        self.members.iter().map(|m| m.id)
    }

    pub fn write_decorations(&self, buffer: &mut ModuleBuffer) {
        for member in &self.members {
            buffer.add_op_decorate(member.id, Decoration::Location, &[member.location]);
            if member.flat {
                buffer.add_op_decorate(member.id, Decoration::Flat, &[]);
            }
        }
    }

    pub fn write_variables(&self, pointers: &DataTypePointerStorage, buffer: &mut ModuleBuffer) {
        for member in &self.members {
            buffer.add_op_variable(
                pointers.get(member.pointer).id,
                member.id,
                self.storage_class,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NodeId;
    use proptest::prelude::*;

    fn pin(pin: usize) -> OutputPinRef {
        OutputPinRef {
            node: NodeId(7),
            pin,
        }
    }

    fn any_block_type() -> impl Strategy<Value = VariableDataType> {
        prop_oneof![
            Just(VariableDataType::Bool),
            Just(VariableDataType::Int32),
            Just(VariableDataType::Float32),
            Just(VariableDataType::Vector2f32),
            Just(VariableDataType::Vector3f32),
            Just(VariableDataType::Vector4f32),
            Just(VariableDataType::Matrix4x4f32),
        ]
    }

    #[test]
    fn member_lookup_reports_missing_pins() {
        let mut block = Structure::new(StorageClass::PushConstant);
        block.add_member(
            VariableDataType::Vector4f32,
            DataTypeHandle(0),
            PointerHandle(0),
            pin(0),
        );
        assert_eq!(block.member_index_of(pin(0)).unwrap(), 0);
        let err = block.member_index_of(pin(3)).unwrap_err();
        assert!(err.to_string().contains("PushConstant"));
    }

    #[test]
    fn explicit_offsets_sort_into_place() {
        let mut block = Structure::new(StorageClass::PushConstant);
        block.add_member_at(VariableDataType::Float32, DataTypeHandle(0), PointerHandle(0), pin(0), 32);
        block.add_member_at(VariableDataType::Float32, DataTypeHandle(0), PointerHandle(0), pin(1), 0);
        block.sort_by_offset();
        assert_eq!(block.member_index_of(pin(1)).unwrap(), 0);
        assert_eq!(block.member_index_of(pin(0)).unwrap(), 1);
        assert_eq!(block.size_bytes(), 48);
    }

    proptest! {
        #[test]
        fn offsets_follow_the_stride_law(kinds in prop::collection::vec(any_block_type(), 0..12)) {
            let mut block = Structure::new(StorageClass::Uniform);
            for (i, &kind) in kinds.iter().enumerate() {
                block.add_member(kind, DataTypeHandle(0), PointerHandle(0), pin(i));
            }
            let mut expected = 0;
            for (member, &kind) in block.members.iter().zip(&kinds) {
                prop_assert_eq!(member.offset, expected);
                expected += kind.size_bytes().max(16);
            }
            prop_assert_eq!(block.size_bytes(), expected);
        }
    }
}
