//! SPIR-V generator for visual shader scripts.
//!
//! `generate` runs two passes over a [`Script`]:
//! - `tree`: walk the graph back from its roots, wrap every visited node and
//!   fill the type / constant / block stores.
//! - `writer` + `emit`: assign ids in declaration order, write the module
//!   sections, then replay the main-instruction list into the function body.
//!
//! All working state lives in one [`Generator`] built per call.

pub mod constants;
pub mod data_types;
pub mod debug_names;
mod emit;
pub mod module_buffer;
pub mod structures;
pub mod template;
mod tree;
mod writer;

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use rspirv::spirv::{StorageClass, Word};

use self::constants::ConstantStorage;
use self::data_types::{DataTypePointerStorage, DataTypeStorage};
use self::module_buffer::ModuleBuffer;
use self::structures::{InterfaceStorage, SamplerStorage, Structure, UniformBuffer, VertexOutputBlock};
use self::tree::{GeneratorNode, GeneratorNodeHandle, GeneratorOutputPin, OutputPinHandle};
use crate::script::{NodeId, OutputPinRef, Script};

pub use self::template::{
    CombinedShaderTemplate, DescriptorSetLayout, PushConstantLocation,
    create_combined_shader_template,
};

/// Push-constant budget guaranteed by every Vulkan implementation.
pub const PUSH_CONSTANT_BUDGET_BYTES: u32 = 128;

#[derive(Clone, Debug, Default)]
pub struct GeneratorOptions<'a> {
    /// Output-interface members to leave out of the module.
    pub ignored_output_indices: BTreeSet<u32>,
    /// Skip input-interface members nothing reads (fragment shaders).
    pub ignore_unused_inputs: bool,
    /// Layout shared with the other stage of the pipeline.
    pub template: Option<&'a CombinedShaderTemplate>,
    /// Emit `OpName`/`OpMemberName` entries.
    pub debug_names: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerateResult {
    pub words: Vec<Word>,
    /// Input-interface members with no consumer; only filled when
    /// `ignore_unused_inputs` is set.
    pub ignored_input_indices: Vec<u32>,
}

impl GenerateResult {
    /// The module as bytes in host byte order, ready for a shader-module upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

/// Translate `script` into a SPIR-V module.
///
/// Either a complete module is returned or an error; there is no partial output.
pub fn generate(script: &Script, options: &GeneratorOptions) -> Result<GenerateResult> {
    let result = Generator::new(script, options).run();
    if let Err(e) = &result {
        log::error!("SPIR-V generation failed: {e:#}");
    }
    result
}

pub(crate) struct Generator<'a> {
    script: &'a Script,
    options: &'a GeneratorOptions<'a>,

    data_types: DataTypeStorage,
    pointers: DataTypePointerStorage,
    constants: ConstantStorage,
    inputs: InterfaceStorage,
    outputs: InterfaceStorage,
    vertex_output: Option<VertexOutputBlock>,
    push_constants: Structure,
    uniform_buffers: Vec<UniformBuffer>,
    samplers: SamplerStorage,

    nodes: Vec<GeneratorNode>,
    output_pins: Vec<GeneratorOutputPin>,
    node_map: HashMap<NodeId, GeneratorNodeHandle>,
    output_map: HashMap<OutputPinRef, OutputPinHandle>,
    main_instructions: Vec<GeneratorNodeHandle>,
    extracts: HashMap<(OutputPinHandle, u32), Word>,

    next_id: Word,
    glsl_id: Word,
    void_type_id: Word,
    function_type_id: Word,
    main_function_id: Word,
    buffer: ModuleBuffer,
}

impl<'a> Generator<'a> {
    fn new(script: &'a Script, options: &'a GeneratorOptions<'a>) -> Self {
        Self {
            script,
            options,
            data_types: DataTypeStorage::new(),
            pointers: DataTypePointerStorage::new(),
            constants: ConstantStorage::new(),
            inputs: InterfaceStorage::new(StorageClass::Input),
            outputs: InterfaceStorage::new(StorageClass::Output),
            vertex_output: None,
            push_constants: Structure::new(StorageClass::PushConstant),
            uniform_buffers: Vec::new(),
            samplers: SamplerStorage::default(),
            nodes: Vec::new(),
            output_pins: Vec::new(),
            node_map: HashMap::new(),
            output_map: HashMap::new(),
            main_instructions: Vec::new(),
            extracts: HashMap::new(),
            next_id: 1,
            glsl_id: 0,
            void_type_id: 0,
            function_type_id: 0,
            main_function_id: 0,
            buffer: ModuleBuffer::new(),
        }
    }

    fn run(mut self) -> Result<GenerateResult> {
        self.build_tree()?;
        let ignored_input_indices = self.ignored_input_indices()?;
        let words = self.write_module()?;
        Ok(GenerateResult {
            words,
            ignored_input_indices,
        })
    }

    fn take_id(&mut self) -> Word {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ignored_input_indices(&self) -> Result<Vec<u32>> {
        if !self.options.ignore_unused_inputs {
            return Ok(Vec::new());
        }
        let input_count = self.script.node(self.script.input_interface())?.outputs.len() as u32;
        Ok((0..input_count)
            .filter(|&location| !self.inputs.contains(location))
            .collect())
    }
}
