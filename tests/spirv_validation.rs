mod common;

use common::*;
use node_forge_spirv::pipeline::compile_pipeline;
use node_forge_spirv::script::{
    BindingKind, FunctionType, Literal, OperatorType, Script, ScriptType, VariableDataType,
};
use node_forge_spirv::spirv::{GeneratorOptions, generate};
use node_forge_spirv::validation::{spirv_to_wgsl, validate_spirv};

fn mvp_vertex() -> Script {
    let mut script = Script::new(ScriptType::Vertex);
    let position = script.add_input_member(VEC4);
    let color = script.add_input_member(VEC4);
    let mvp = script
        .add_push_constant(0, VariableDataType::Matrix4x4f32)
        .unwrap();
    let mul = script.add_operator(OperatorType::Mul, VariableDataType::Matrix4x4f32, VEC4, VEC4);
    script.connect(mvp, input(mul, 0)).unwrap();
    script.connect(position, input(mul, 1)).unwrap();
    let sink = script.vertex_position().unwrap();
    script.connect(output(mul), sink).unwrap();

    let varying = script.add_output_member(VEC4);
    script.connect(color, varying).unwrap();
    let unused = script.add_output_member(VEC4);
    script.connect(position, unused).unwrap();
    script
}

fn tinted_fragment() -> Script {
    let mut script = Script::new(ScriptType::Fragment);
    let color = script.add_input_member(VEC4);
    script.add_input_member(VEC4);
    let tint = script.add_push_constant(1, VEC4).unwrap();
    let brightness = script
        .add_descriptor_binding(0, 0, BindingKind::UniformBuffer, &[VEC4])
        .unwrap();
    let mul = script.add_operator(OperatorType::Mul, VEC4, VEC4, VEC4);
    let bias = script.add_operator(OperatorType::Add, VEC4, VEC4, VEC4);
    script.connect(color, input(mul, 0)).unwrap();
    script.connect(tint, input(mul, 1)).unwrap();
    script.connect(output(mul), input(bias, 0)).unwrap();
    script.connect(output(brightness), input(bias, 1)).unwrap();
    let out = script.add_output_member(VEC4);
    script.connect(output(bias), out).unwrap();
    script
}

#[test]
fn constant_fragment_validates() {
    let script = constant_outputs(&[
        Literal::Vector4f32([1.0, 0.0, 0.0, 1.0]),
        Literal::Vector4f32([1.0, 0.0, 0.0, 1.0]),
    ]);
    let result = generate(&script, &GeneratorOptions::default()).unwrap();
    let (module, _) = validate_spirv(&result.words).unwrap();
    assert_eq!(module.entry_points.len(), 1);
    assert_eq!(module.entry_points[0].name, "main");
    assert_eq!(module.entry_points[0].stage, naga::ShaderStage::Fragment);
}

#[test]
fn pipeline_stages_validate() {
    for debug_names in [false, true] {
        let compiled = compile_pipeline(&mvp_vertex(), &tinted_fragment(), debug_names).unwrap();
        assert_eq!(compiled.fragment.ignored_input_indices, vec![1]);

        let (vertex, _) = validate_spirv(&compiled.vertex.words).unwrap();
        assert_eq!(vertex.entry_points[0].stage, naga::ShaderStage::Vertex);
        let (fragment, _) = validate_spirv(&compiled.fragment.words).unwrap();
        assert_eq!(fragment.entry_points[0].stage, naga::ShaderStage::Fragment);
    }
}

#[test]
fn math_functions_validate() {
    let mut script = Script::new(ScriptType::Fragment);
    let normal = script.add_input_member(VariableDataType::Vector3f32);
    let light = script
        .add_push_constant(3, VariableDataType::Vector3f32)
        .unwrap();
    let n = script.add_function(
        FunctionType::Normalize,
        &[VariableDataType::Vector3f32],
        VariableDataType::Vector3f32,
    );
    let dot = script.add_function(
        FunctionType::Dot,
        &[VariableDataType::Vector3f32, VariableDataType::Vector3f32],
        VariableDataType::Float32,
    );
    let clamp = script.add_function(
        FunctionType::Max,
        &[VariableDataType::Float32, VariableDataType::Float32],
        VariableDataType::Float32,
    );
    let composite = script.add_composite(
        &[VariableDataType::Vector3f32, VariableDataType::Float32],
        VEC4,
    );
    script.connect(normal, input(n, 0)).unwrap();
    script.connect(output(n), input(dot, 0)).unwrap();
    script.connect(light, input(dot, 1)).unwrap();
    script.connect(output(dot), input(clamp, 0)).unwrap();
    script.connect(normal, input(composite, 0)).unwrap();
    script.connect(output(clamp), input(composite, 1)).unwrap();
    let out = script.add_output_member(VEC4);
    script.connect(output(composite), out).unwrap();

    let result = generate(&script, &GeneratorOptions::default()).unwrap();
    validate_spirv(&result.words).unwrap();
}

#[test]
fn generated_modules_translate_to_wgsl() {
    let compiled = compile_pipeline(&mvp_vertex(), &tinted_fragment(), false).unwrap();
    let wgsl = spirv_to_wgsl(&compiled.vertex.words).unwrap();
    assert!(wgsl.contains("fn main"), "{wgsl}");
    assert!(wgsl.contains("@vertex"), "{wgsl}");
}
