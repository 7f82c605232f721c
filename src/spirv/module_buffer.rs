//! Binary SPIR-V instruction encoder.
//!
//! Appends one instruction at a time to a flat word buffer. Knows the binary
//! layout of each opcode it supports and nothing about what the ids mean.

use anyhow::{Result, bail};
use rspirv::spirv::{
    self, AddressingModel, BuiltIn, Capability, Decoration, Dim, ExecutionMode, ExecutionModel,
    FunctionControl, GLOp, ImageFormat, MemoryModel, Op, StorageClass, Word,
};

/// SPIR-V 1.0.
pub const SPIRV_VERSION: Word = 0x0001_0000;
/// Unregistered generator.
pub const GENERATOR_MAGIC: Word = 0;
pub const HEADER_WORD_COUNT: usize = 5;
const ID_BOUND_INDEX: usize = 3;

/// Words needed for a null-terminated, word-padded literal string.
pub fn literal_string_word_count(s: &str) -> usize {
    s.len() / 4 + 1
}

fn op_header(op: Op, word_count: usize) -> Word {
    (op as Word) | ((word_count as Word) << 16)
}

#[derive(Clone, Debug, Default)]
pub struct ModuleBuffer {
    words: Vec<Word>,
}

impl ModuleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn into_words(self) -> Vec<Word> {
        self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Splice `words` in before position `at`.
    pub fn insert_words(&mut self, at: usize, words: &[Word]) {
        let at = at.min(self.words.len());
        self.words.splice(at..at, words.iter().copied());
    }

    fn push_op(&mut self, op: Op, operands: &[Word]) {
        self.words.push(op_header(op, operands.len() + 1));
        self.words.extend_from_slice(operands);
    }

    fn push_literal_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        for i in 0..literal_string_word_count(s) {
            let mut word: Word = 0;
            for j in 0..4 {
                if let Some(&b) = bytes.get(i * 4 + j) {
                    word |= (b as Word) << (j * 8);
                }
            }
            self.words.push(word);
        }
    }

    /// Insert the five-word module header at position 0.
    pub fn add_header(&mut self, id_bound: Word) {
        let header = [spirv::MAGIC_NUMBER, SPIRV_VERSION, GENERATOR_MAGIC, id_bound, 0];
        self.insert_words(0, &header);
    }

    /// Patch the id bound once every id is known.
    pub fn update_id_bound(&mut self, id_bound: Word) -> Result<()> {
        if self.words.len() <= ID_BOUND_INDEX {
            bail!(
                "cannot patch id bound: module has {} words, expected at least {}",
                self.words.len(),
                ID_BOUND_INDEX + 1
            );
        }
        self.words[ID_BOUND_INDEX] = id_bound;
        Ok(())
    }

    pub fn add_op_capability(&mut self, capability: Capability) {
        self.push_op(Op::Capability, &[capability as Word]);
    }

    pub fn add_op_ext_inst_import(&mut self, result_id: Word, name: &str) {
        self.words.push(op_header(
            Op::ExtInstImport,
            2 + literal_string_word_count(name),
        ));
        self.words.push(result_id);
        self.push_literal_string(name);
    }

    pub fn add_op_memory_model(&mut self, addressing: AddressingModel, memory: MemoryModel) {
        self.push_op(Op::MemoryModel, &[addressing as Word, memory as Word]);
    }

    pub fn add_op_entry_point(
        &mut self,
        model: ExecutionModel,
        function_id: Word,
        name: &str,
        interface: &[Word],
    ) {
        self.words.push(op_header(
            Op::EntryPoint,
            3 + literal_string_word_count(name) + interface.len(),
        ));
        self.words.push(model as Word);
        self.words.push(function_id);
        self.push_literal_string(name);
        self.words.extend_from_slice(interface);
    }

    pub fn add_op_execution_mode(&mut self, function_id: Word, mode: ExecutionMode) {
        self.push_op(Op::ExecutionMode, &[function_id, mode as Word]);
    }

    pub fn add_op_name(&mut self, target: Word, name: &str) {
        self.words
            .push(op_header(Op::Name, 2 + literal_string_word_count(name)));
        self.words.push(target);
        self.push_literal_string(name);
    }

    pub fn add_op_member_name(&mut self, structure: Word, member: u32, name: &str) {
        self.words.push(op_header(
            Op::MemberName,
            3 + literal_string_word_count(name),
        ));
        self.words.push(structure);
        self.words.push(member);
        self.push_literal_string(name);
    }

    pub fn add_op_decorate(&mut self, target: Word, decoration: Decoration, literals: &[Word]) {
        self.words
            .push(op_header(Op::Decorate, 3 + literals.len()));
        self.words.push(target);
        self.words.push(decoration as Word);
        self.words.extend_from_slice(literals);
    }

    pub fn add_op_member_decorate(
        &mut self,
        structure: Word,
        member: u32,
        decoration: Decoration,
        literals: &[Word],
    ) {
        self.words
            .push(op_header(Op::MemberDecorate, 4 + literals.len()));
        self.words.push(structure);
        self.words.push(member);
        self.words.push(decoration as Word);
        self.words.extend_from_slice(literals);
    }

    pub fn add_op_member_decorate_builtin(&mut self, structure: Word, member: u32, builtin: BuiltIn) {
        self.add_op_member_decorate(structure, member, Decoration::BuiltIn, &[builtin as Word]);
    }

    pub fn add_op_type_void(&mut self, result_id: Word) {
        self.push_op(Op::TypeVoid, &[result_id]);
    }

    pub fn add_op_type_bool(&mut self, result_id: Word) {
        self.push_op(Op::TypeBool, &[result_id]);
    }

    pub fn add_op_type_int(&mut self, result_id: Word, width: u32, signed: bool) {
        self.push_op(Op::TypeInt, &[result_id, width, signed as Word]);
    }

    pub fn add_op_type_float(&mut self, result_id: Word, width: u32) {
        self.push_op(Op::TypeFloat, &[result_id, width]);
    }

    pub fn add_op_type_vector(&mut self, result_id: Word, component_type: Word, count: u32) {
        self.push_op(Op::TypeVector, &[result_id, component_type, count]);
    }

    pub fn add_op_type_matrix(&mut self, result_id: Word, column_type: Word, columns: u32) {
        self.push_op(Op::TypeMatrix, &[result_id, column_type, columns]);
    }

    /// Sampled, non-arrayed, single-sampled image with unknown format.
    pub fn add_op_type_image(&mut self, result_id: Word, sampled_type: Word, dim: Dim) {
        self.push_op(
            Op::TypeImage,
            &[
                result_id,
                sampled_type,
                dim as Word,
                0, // depth
                0, // arrayed
                0, // multisampled
                1, // sampled
                ImageFormat::Unknown as Word,
            ],
        );
    }

    pub fn add_op_type_sampled_image(&mut self, result_id: Word, image_type: Word) {
        self.push_op(Op::TypeSampledImage, &[result_id, image_type]);
    }

    pub fn add_op_type_struct(&mut self, result_id: Word, members: &[Word]) {
        self.words
            .push(op_header(Op::TypeStruct, 2 + members.len()));
        self.words.push(result_id);
        self.words.extend_from_slice(members);
    }

    pub fn add_op_type_pointer(
        &mut self,
        result_id: Word,
        storage_class: StorageClass,
        pointee: Word,
    ) {
        self.push_op(Op::TypePointer, &[result_id, storage_class as Word, pointee]);
    }

    pub fn add_op_type_function(&mut self, result_id: Word, return_type: Word) {
        self.push_op(Op::TypeFunction, &[result_id, return_type]);
    }

    pub fn add_op_constant_bool(&mut self, result_type: Word, result_id: Word, value: bool) {
        let op = if value {
            Op::ConstantTrue
        } else {
            Op::ConstantFalse
        };
        self.push_op(op, &[result_type, result_id]);
    }

    pub fn add_op_constant(&mut self, result_type: Word, result_id: Word, value: Word) {
        self.push_op(Op::Constant, &[result_type, result_id, value]);
    }

    pub fn add_op_constant_composite(
        &mut self,
        result_type: Word,
        result_id: Word,
        constituents: &[Word],
    ) {
        self.words
            .push(op_header(Op::ConstantComposite, 3 + constituents.len()));
        self.words.push(result_type);
        self.words.push(result_id);
        self.words.extend_from_slice(constituents);
    }

    pub fn add_op_variable(
        &mut self,
        result_type: Word,
        result_id: Word,
        storage_class: StorageClass,
    ) {
        self.push_op(
            Op::Variable,
            &[result_type, result_id, storage_class as Word],
        );
    }

    pub fn add_op_function(&mut self, result_type: Word, result_id: Word, function_type: Word) {
        self.push_op(
            Op::Function,
            &[
                result_type,
                result_id,
                FunctionControl::NONE.bits(),
                function_type,
            ],
        );
    }

    pub fn add_op_label(&mut self, result_id: Word) {
        self.push_op(Op::Label, &[result_id]);
    }

    pub fn add_op_return(&mut self) {
        self.push_op(Op::Return, &[]);
    }

    pub fn add_op_function_end(&mut self) {
        self.push_op(Op::FunctionEnd, &[]);
    }

    pub fn add_op_load(&mut self, result_type: Word, result_id: Word, pointer: Word) {
        self.push_op(Op::Load, &[result_type, result_id, pointer]);
    }

    pub fn add_op_store(&mut self, pointer: Word, object: Word) {
        self.push_op(Op::Store, &[pointer, object]);
    }

    pub fn add_op_access_chain(
        &mut self,
        result_type: Word,
        result_id: Word,
        base: Word,
        indices: &[Word],
    ) {
        self.words
            .push(op_header(Op::AccessChain, 4 + indices.len()));
        self.words.push(result_type);
        self.words.push(result_id);
        self.words.push(base);
        self.words.extend_from_slice(indices);
    }

    /// Any two-operand arithmetic instruction (`OpFAdd`, `OpMatrixTimesVector`, ...).
    pub fn add_op_binary(
        &mut self,
        op: Op,
        result_type: Word,
        result_id: Word,
        lhs: Word,
        rhs: Word,
    ) {
        self.push_op(op, &[result_type, result_id, lhs, rhs]);
    }

    pub fn add_op_ext_inst(
        &mut self,
        result_type: Word,
        result_id: Word,
        set: Word,
        instruction: GLOp,
        operands: &[Word],
    ) {
        self.words
            .push(op_header(Op::ExtInst, 5 + operands.len()));
        self.words.push(result_type);
        self.words.push(result_id);
        self.words.push(set);
        self.words.push(instruction as Word);
        self.words.extend_from_slice(operands);
    }

    pub fn add_op_image_sample_implicit_lod(
        &mut self,
        result_type: Word,
        result_id: Word,
        sampled_image: Word,
        coordinate: Word,
    ) {
        self.push_op(
            Op::ImageSampleImplicitLod,
            &[result_type, result_id, sampled_image, coordinate],
        );
    }

    pub fn add_op_composite_construct(
        &mut self,
        result_type: Word,
        result_id: Word,
        constituents: &[Word],
    ) {
        self.words
            .push(op_header(Op::CompositeConstruct, 3 + constituents.len()));
        self.words.push(result_type);
        self.words.push(result_id);
        self.words.extend_from_slice(constituents);
    }

    pub fn add_op_composite_extract(
        &mut self,
        result_type: Word,
        result_id: Word,
        composite: Word,
        index: u32,
    ) {
        self.push_op(
            Op::CompositeExtract,
            &[result_type, result_id, composite, index],
        );
    }
}
