//! Deduplicating constant store.
//!
//! Each distinct literal becomes exactly one constant instruction. Composite
//! constants reference their component constants, which are deduplicated the
//! same way.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use rspirv::spirv::Word;

use super::data_types::{DataTypeHandle, DataTypeStorage};
use super::module_buffer::ModuleBuffer;
use crate::script::{Literal, VariableDataType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantHandle(pub usize);

#[derive(Clone, Debug)]
pub struct Constant {
    pub literal: Literal,
    pub data_type: DataTypeHandle,
    /// Component constants of a composite, in order.
    pub components: Vec<ConstantHandle>,
    pub id: Word,
}

#[derive(Clone, Debug, Default)]
pub struct ConstantStorage {
    constants: Vec<Constant>,
    buckets: BTreeMap<VariableDataType, Vec<ConstantHandle>>,
}

impl ConstantStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn find(&self, literal: &Literal) -> Option<ConstantHandle> {
        self.buckets
            .get(&literal.data_type())?
            .iter()
            .copied()
            .find(|h| self.constants[h.0].literal == *literal)
    }

    pub fn get(&self, handle: ConstantHandle) -> &Constant {
        &self.constants[handle.0]
    }

    /// Id of an already registered literal.
    pub fn id_of(&self, literal: &Literal) -> Result<Word> {
        let handle = self
            .find(literal)
            .ok_or_else(|| anyhow!("constant {literal:?} was never registered"))?;
        Ok(self.constants[handle.0].id)
    }

    pub fn get_or_create(
        &mut self,
        literal: Literal,
        data_types: &mut DataTypeStorage,
    ) -> ConstantHandle {
        if let Some(handle) = self.find(&literal) {
            return handle;
        }

        let components = match literal {
            Literal::Bool(_) | Literal::Int32(_) | Literal::Float32(_) => Vec::new(),
            Literal::Vector2f32(v) => self.create_scalars(&v, data_types),
            Literal::Vector3f32(v) => self.create_scalars(&v, data_types),
            Literal::Vector4f32(v) => self.create_scalars(&v, data_types),
            Literal::Matrix4x4f32(m) => m
                .chunks_exact(4)
                .map(|column| {
                    let column = [column[0], column[1], column[2], column[3]];
                    self.get_or_create(Literal::Vector4f32(column), data_types)
                })
                .collect(),
        };

        let data_type = data_types.get_or_create(literal.data_type());
        self.constants.push(Constant {
            literal,
            data_type,
            components,
            id: 0,
        });
        let handle = ConstantHandle(self.constants.len() - 1);
        self.buckets
            .entry(literal.data_type())
            .or_default()
            .push(handle);
        handle
    }

    fn create_scalars(
        &mut self,
        values: &[f32],
        data_types: &mut DataTypeStorage,
    ) -> Vec<ConstantHandle> {
        values
            .iter()
            .map(|&v| self.get_or_create(Literal::Float32(v), data_types))
            .collect()
    }

    /// Handles with every composite after its components.
    fn sorted_handles(&self) -> Vec<ConstantHandle> {
        let mut handles: Vec<ConstantHandle> =
            (0..self.constants.len()).map(ConstantHandle).collect();
        handles.sort_by_key(|h| match self.constants[h.0].literal {
            Literal::Bool(_) | Literal::Int32(_) | Literal::Float32(_) => 0,
            Literal::Vector2f32(_) | Literal::Vector3f32(_) | Literal::Vector4f32(_) => 1,
            Literal::Matrix4x4f32(_) => 2,
        });
        handles
    }

    /// Assign ids and emit every constant, scalars before composites.
    pub fn write(
        &mut self,
        data_types: &DataTypeStorage,
        next_id: &mut Word,
        buffer: &mut ModuleBuffer,
    ) {
        for handle in self.sorted_handles() {
            let id = *next_id;
            *next_id += 1;
            self.constants[handle.0].id = id;

            let constant = &self.constants[handle.0];
            let type_id = data_types.get(constant.data_type).id;
            match constant.literal {
                Literal::Bool(v) => buffer.add_op_constant_bool(type_id, id, v),
                Literal::Int32(_) | Literal::Float32(_) => {
                    let bits = constant.literal.scalar_bits().unwrap_or_default();
                    buffer.add_op_constant(type_id, id, bits);
                }
                _ => {
                    let constituents: Vec<Word> = constant
                        .components
                        .iter()
                        .map(|c| self.constants[c.0].id)
                        .collect();
                    buffer.add_op_constant_composite(type_id, id, &constituents);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_literals_share_one_constant() {
        let mut types = DataTypeStorage::new();
        let mut constants = ConstantStorage::new();
        let a = constants.get_or_create(Literal::Vector4f32([1.0, 2.0, 3.0, 4.0]), &mut types);
        let b = constants.get_or_create(Literal::Vector4f32([1.0, 2.0, 3.0, 4.0]), &mut types);
        let c = constants.get_or_create(Literal::Vector4f32([1.0, 2.0, 3.0, 5.0]), &mut types);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 1, 2, 3, 4, 5 + two composites
        assert_eq!(constants.len(), 7);
        assert_eq!(
            constants.get(a).components[..3],
            constants.get(c).components[..3]
        );
    }

    #[test]
    fn composites_are_written_after_their_components() {
        let mut types = DataTypeStorage::new();
        let mut constants = ConstantStorage::new();
        let mat = constants.get_or_create(
            Literal::Matrix4x4f32([
                1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
            ]),
            &mut types,
        );
        constants.get_or_create(Literal::Int32(0), &mut types);

        let mut next_id = 1;
        types.allocate_ids(&mut next_id);
        let mut buffer = ModuleBuffer::new();
        constants.write(&types, &mut next_id, &mut buffer);

        let matrix = constants.get(mat);
        for &column in &matrix.components {
            let column = constants.get(column);
            assert!(column.id < matrix.id);
            for &scalar in &column.components {
                assert!(constants.get(scalar).id < column.id);
            }
        }
        // scalars 0, 1, int 0, four columns, one matrix
        assert_eq!(constants.len(), 8);
        let int_id = constants.id_of(&Literal::Int32(0)).unwrap();
        assert!(matrix.components.iter().all(|&c| constants.get(c).id > int_id));
    }
}
