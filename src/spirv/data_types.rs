//! Deduplicating stores for data types and typed pointers.

use anyhow::{Result, anyhow};
use rspirv::spirv::{Dim, StorageClass, Word};

use super::module_buffer::ModuleBuffer;
use crate::script::VariableDataType;

/// Index of a data type inside [`DataTypeStorage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataTypeHandle(pub usize);

/// Index of a pointer type inside [`DataTypePointerStorage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerHandle(pub usize);

#[derive(Clone, Debug)]
pub struct DataType {
    pub kind: VariableDataType,
    /// Scalar component for vectors, column vector for matrices, float for samplers.
    pub component: Option<DataTypeHandle>,
    pub id: Word,
    /// Paired `OpTypeImage` id, samplers only.
    pub image_id: Word,
}

impl DataType {
    /// Declaration tier: a type may only reference types of a lower tier.
    fn tier(&self) -> u8 {
        match self.kind {
            VariableDataType::Bool | VariableDataType::Int32 | VariableDataType::Float32 => 0,
            VariableDataType::Vector2f32
            | VariableDataType::Vector3f32
            | VariableDataType::Vector4f32 => 1,
            VariableDataType::Sampler1D
            | VariableDataType::Sampler2D
            | VariableDataType::Sampler3D => 1,
            VariableDataType::Matrix4x4f32 => 2,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DataTypeStorage {
    types: Vec<DataType>,
}

impl DataTypeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn find(&self, kind: VariableDataType) -> Option<DataTypeHandle> {
        self.types
            .iter()
            .position(|t| t.kind == kind)
            .map(DataTypeHandle)
    }

    /// Look up `kind`, creating it (and the types it is built from) on a miss.
    pub fn get_or_create(&mut self, kind: VariableDataType) -> DataTypeHandle {
        if let Some(handle) = self.find(kind) {
            return handle;
        }
        let component = match kind {
            VariableDataType::Bool | VariableDataType::Int32 | VariableDataType::Float32 => None,
            VariableDataType::Vector2f32
            | VariableDataType::Vector3f32
            | VariableDataType::Vector4f32
            | VariableDataType::Sampler1D
            | VariableDataType::Sampler2D
            | VariableDataType::Sampler3D => Some(self.get_or_create(VariableDataType::Float32)),
            VariableDataType::Matrix4x4f32 => Some(self.get_or_create(VariableDataType::Vector4f32)),
        };
        self.types.push(DataType {
            kind,
            component,
            id: 0,
            image_id: 0,
        });
        DataTypeHandle(self.types.len() - 1)
    }

    pub fn get(&self, handle: DataTypeHandle) -> &DataType {
        &self.types[handle.0]
    }

    /// Id of an already registered type.
    pub fn id_of(&self, kind: VariableDataType) -> Result<Word> {
        let handle = self
            .find(kind)
            .ok_or_else(|| anyhow!("data type {kind:?} was never registered"))?;
        Ok(self.types[handle.0].id)
    }

    /// Handles in declaration order: every type after the types it references.
    pub fn sorted_handles(&self) -> Vec<DataTypeHandle> {
        let mut handles: Vec<DataTypeHandle> = (0..self.types.len()).map(DataTypeHandle).collect();
        handles.sort_by_key(|h| self.types[h.0].tier());
        handles
    }

    pub fn allocate_ids(&mut self, next_id: &mut Word) {
        for handle in self.sorted_handles() {
            let ty = &mut self.types[handle.0];
            if ty.kind.is_sampler() {
                ty.image_id = *next_id;
                *next_id += 1;
            }
            ty.id = *next_id;
            *next_id += 1;
        }
    }

    pub fn contains(&self, kind: VariableDataType) -> bool {
        self.find(kind).is_some()
    }

    pub fn write(&self, buffer: &mut ModuleBuffer) {
        for handle in self.sorted_handles() {
            let ty = &self.types[handle.0];
            let component_id = ty.component.map(|c| self.types[c.0].id).unwrap_or(0);
            match ty.kind {
                VariableDataType::Bool => buffer.add_op_type_bool(ty.id),
                VariableDataType::Int32 => buffer.add_op_type_int(ty.id, 32, true),
                VariableDataType::Float32 => buffer.add_op_type_float(ty.id, 32),
                VariableDataType::Vector2f32 => buffer.add_op_type_vector(ty.id, component_id, 2),
                VariableDataType::Vector3f32 => buffer.add_op_type_vector(ty.id, component_id, 3),
                VariableDataType::Vector4f32 => buffer.add_op_type_vector(ty.id, component_id, 4),
                VariableDataType::Matrix4x4f32 => buffer.add_op_type_matrix(ty.id, component_id, 4),
                VariableDataType::Sampler1D => {
                    buffer.add_op_type_image(ty.image_id, component_id, Dim::Dim1D);
                    buffer.add_op_type_sampled_image(ty.id, ty.image_id);
                }
                VariableDataType::Sampler2D => {
                    buffer.add_op_type_image(ty.image_id, component_id, Dim::Dim2D);
                    buffer.add_op_type_sampled_image(ty.id, ty.image_id);
                }
                VariableDataType::Sampler3D => {
                    buffer.add_op_type_image(ty.image_id, component_id, Dim::Dim3D);
                    buffer.add_op_type_sampled_image(ty.id, ty.image_id);
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataTypePointer {
    pub storage_class: StorageClass,
    pub data_type: DataTypeHandle,
    pub id: Word,
}

/// One pointer type per (storage class, data type) pair.
#[derive(Clone, Debug, Default)]
pub struct DataTypePointerStorage {
    pointers: Vec<DataTypePointer>,
}

impl DataTypePointerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(
        &self,
        storage_class: StorageClass,
        data_type: DataTypeHandle,
    ) -> Option<PointerHandle> {
        self.pointers
            .iter()
            .position(|p| p.storage_class == storage_class && p.data_type == data_type)
            .map(PointerHandle)
    }

    pub fn get_or_create(
        &mut self,
        storage_class: StorageClass,
        data_type: DataTypeHandle,
    ) -> PointerHandle {
        if let Some(handle) = self.find(storage_class, data_type) {
            return handle;
        }
        self.pointers.push(DataTypePointer {
            storage_class,
            data_type,
            id: 0,
        });
        PointerHandle(self.pointers.len() - 1)
    }

    pub fn get(&self, handle: PointerHandle) -> &DataTypePointer {
        &self.pointers[handle.0]
    }

    /// Id of an already registered pointer type.
    pub fn id_of(&self, storage_class: StorageClass, data_type: DataTypeHandle) -> Result<Word> {
        let handle = self.find(storage_class, data_type).ok_or_else(|| {
            anyhow!(
                "pointer type ({storage_class:?}, data type #{}) was never registered",
                data_type.0
            )
        })?;
        Ok(self.pointers[handle.0].id)
    }

    /// Assign ids to every pointer of `storage_class`, in creation order.
    pub fn allocate_ids(&mut self, storage_class: StorageClass, next_id: &mut Word) {
        for pointer in self
            .pointers
            .iter_mut()
            .filter(|p| p.storage_class == storage_class)
        {
            pointer.id = *next_id;
            *next_id += 1;
        }
    }

    pub fn write(&self, data_types: &DataTypeStorage, buffer: &mut ModuleBuffer) {
        for pointer in &self.pointers {
            buffer.add_op_type_pointer(
                pointer.id,
                pointer.storage_class,
                data_types.get(pointer.data_type).id,
            );
        }
    }
}
