//! Id allocation and the module sections ahead of the function body.

use anyhow::Result;
use rspirv::spirv::{
    AddressingModel, Capability, Decoration, ExecutionMode, ExecutionModel, MemoryModel,
    StorageClass, Word,
};

use super::Generator;
use crate::script::{ScriptType, VariableDataType};

const GLSL_STD_450: &str = "GLSL.std.450";
const ENTRY_POINT_NAME: &str = "main";

impl Generator<'_> {
    /// Give every declaration its id. Constants and function-body results
    /// are numbered later, while they are written.
    fn allocate_ids(&mut self) {
        self.void_type_id = self.take_id();
        self.function_type_id = self.take_id();

        self.data_types.allocate_ids(&mut self.next_id);

        self.pointers
            .allocate_ids(StorageClass::Input, &mut self.next_id);
        self.inputs.allocate_ids(&mut self.next_id);

        self.pointers
            .allocate_ids(StorageClass::Output, &mut self.next_id);
        self.outputs.allocate_ids(&mut self.next_id);
        if let Some(block) = &mut self.vertex_output {
            block.allocate_ids(&mut self.next_id);
        }

        self.pointers
            .allocate_ids(StorageClass::PushConstant, &mut self.next_id);
        if !self.push_constants.is_empty() {
            self.push_constants.allocate_ids(&mut self.next_id);
        }

        self.pointers
            .allocate_ids(StorageClass::UniformConstant, &mut self.next_id);
        self.samplers.allocate_ids(&mut self.next_id);

        self.pointers
            .allocate_ids(StorageClass::Uniform, &mut self.next_id);
        for buffer in &mut self.uniform_buffers {
            buffer.structure.allocate_ids(&mut self.next_id);
        }

        self.glsl_id = self.take_id();
        self.main_function_id = self.take_id();
    }

    fn descriptor_indices(&self, set_id: u32, binding_id: u32) -> Result<(u32, u32)> {
        match self.options.template {
            Some(template) => template.descriptor_indices(set_id, binding_id),
            None => Ok((set_id, binding_id)),
        }
    }

    fn interface_ids(&self) -> Vec<Word> {
        let mut ids: Vec<Word> = self.inputs.ids().chain(self.outputs.ids()).collect();
        if let Some(block) = &self.vertex_output {
            ids.push(block.variable_id);
        }
        ids
    }

    fn write_decorations(&mut self) -> Result<()> {
        self.inputs.write_decorations(&mut self.buffer);
        self.outputs.write_decorations(&mut self.buffer);
        if let Some(block) = &self.vertex_output {
            block.write_decorations(&mut self.buffer);
        }
        if !self.push_constants.is_empty() {
            self.push_constants.write_decorations(&mut self.buffer);
        }

        for sampler in self.samplers.samplers() {
            let (set, binding) = self.descriptor_indices(sampler.set_id, sampler.binding_id)?;
            self.buffer
                .add_op_decorate(sampler.id, Decoration::DescriptorSet, &[set]);
            self.buffer
                .add_op_decorate(sampler.id, Decoration::Binding, &[binding]);
        }
        for buffer in &self.uniform_buffers {
            let (set, binding) = self.descriptor_indices(buffer.set_id, buffer.binding_id)?;
            buffer.structure.write_decorations(&mut self.buffer);
            let variable = buffer.structure.variable_id;
            self.buffer
                .add_op_decorate(variable, Decoration::DescriptorSet, &[set]);
            self.buffer
                .add_op_decorate(variable, Decoration::Binding, &[binding]);
        }
        Ok(())
    }

    fn write_types(&mut self) {
        self.buffer.add_op_type_void(self.void_type_id);
        self.buffer
            .add_op_type_function(self.function_type_id, self.void_type_id);
        self.data_types.write(&mut self.buffer);

        if let Some(block) = &self.vertex_output {
            block.write_type(&self.data_types, &mut self.buffer);
        }
        if !self.push_constants.is_empty() {
            self.push_constants
                .write_type(&self.data_types, &mut self.buffer);
        }
        for buffer in &self.uniform_buffers {
            buffer.structure.write_type(&self.data_types, &mut self.buffer);
        }

        self.pointers.write(&self.data_types, &mut self.buffer);
        if let Some(block) = &self.vertex_output {
            block.write_pointer(&mut self.buffer);
        }
        if !self.push_constants.is_empty() {
            self.push_constants.write_pointer(&mut self.buffer);
        }
        for buffer in &self.uniform_buffers {
            buffer.structure.write_pointer(&mut self.buffer);
        }
    }

    fn write_variables(&mut self) {
        self.inputs.write_variables(&self.pointers, &mut self.buffer);
        self.outputs.write_variables(&self.pointers, &mut self.buffer);
        if let Some(block) = &self.vertex_output {
            block.write_variable(&mut self.buffer);
        }
        if !self.push_constants.is_empty() {
            self.push_constants.write_variable(&mut self.buffer);
        }
        for sampler in self.samplers.samplers() {
            self.buffer.add_op_variable(
                self.pointers.get(sampler.pointer).id,
                sampler.id,
                StorageClass::UniformConstant,
            );
        }
        for buffer in &self.uniform_buffers {
            buffer.structure.write_variable(&mut self.buffer);
        }
    }

    pub(super) fn write_module(&mut self) -> Result<Vec<Word>> {
        self.allocate_ids();

        self.buffer.add_header(0);
        self.buffer.add_op_capability(Capability::Shader);
        if self.data_types.contains(VariableDataType::Sampler1D) {
            self.buffer.add_op_capability(Capability::Sampled1D);
        }
        self.buffer.add_op_ext_inst_import(self.glsl_id, GLSL_STD_450);
        self.buffer
            .add_op_memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        let model = match self.script.script_type() {
            ScriptType::Vertex => ExecutionModel::Vertex,
            ScriptType::Fragment => ExecutionModel::Fragment,
        };
        let interface = self.interface_ids();
        self.buffer
            .add_op_entry_point(model, self.main_function_id, ENTRY_POINT_NAME, &interface);
        if model == ExecutionModel::Fragment {
            self.buffer
                .add_op_execution_mode(self.main_function_id, ExecutionMode::OriginUpperLeft);
        }

        let debug_offset = self.buffer.len();
        self.write_decorations()?;
        self.write_types();
        self.write_variables();
        self.constants
            .write(&self.data_types, &mut self.next_id, &mut self.buffer);
        self.write_main()?;

        self.buffer.update_id_bound(self.next_id)?;
        if self.options.debug_names {
            self.write_debug_names(debug_offset);
        }
        log::debug!(
            "wrote {:?} module: {} words, id bound {}",
            self.script.script_type(),
            self.buffer.len(),
            self.next_id
        );

        Ok(std::mem::take(&mut self.buffer).into_words())
    }
}
