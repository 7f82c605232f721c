//! Compile a vertex + fragment script pair into matching SPIR-V modules.
//!
//! The fragment stage is compiled first with unused inputs dropped; the slots
//! it does not read are then skipped by the vertex stage's output stores.

use anyhow::{Context, Result, bail};

use crate::script::{Script, ScriptType};
use crate::spirv::{
    CombinedShaderTemplate, GenerateResult, GeneratorOptions, create_combined_shader_template,
    generate,
};

#[derive(Clone, Debug)]
pub struct CompiledPipeline {
    pub template: CombinedShaderTemplate,
    pub vertex: GenerateResult,
    pub fragment: GenerateResult,
}

pub fn compile_pipeline(
    vertex: &Script,
    fragment: &Script,
    debug_names: bool,
) -> Result<CompiledPipeline> {
    if vertex.script_type() != ScriptType::Vertex {
        bail!("expected a vertex script, got {:?}", vertex.script_type());
    }
    if fragment.script_type() != ScriptType::Fragment {
        bail!("expected a fragment script, got {:?}", fragment.script_type());
    }

    let template = create_combined_shader_template(&[vertex, fragment])
        .context("failed to build combined shader template")?;

    let fragment_options = GeneratorOptions {
        ignore_unused_inputs: true,
        template: Some(&template),
        debug_names,
        ..Default::default()
    };
    let fragment_result =
        generate(fragment, &fragment_options).context("fragment shader generation failed")?;

    let vertex_options = GeneratorOptions {
        ignored_output_indices: fragment_result.ignored_input_indices.iter().copied().collect(),
        ignore_unused_inputs: false,
        template: Some(&template),
        debug_names,
    };
    let vertex_result =
        generate(vertex, &vertex_options).context("vertex shader generation failed")?;

    log::info!(
        "compiled pipeline: vertex {} words, fragment {} words, {} vertex outputs skipped",
        vertex_result.words.len(),
        fragment_result.words.len(),
        fragment_result.ignored_input_indices.len()
    );

    Ok(CompiledPipeline {
        template,
        vertex: vertex_result,
        fragment: fragment_result,
    })
}
