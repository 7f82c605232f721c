mod common;

use common::*;
use node_forge_spirv::dsl;
use node_forge_spirv::pipeline::{CompiledPipeline, compile_pipeline};
use node_forge_spirv::validation::validate_spirv;
use rspirv::spirv::{Decoration, Op, StorageClass};

fn compile_case(case_name: &str) -> CompiledPipeline {
    let path = case_dir(case_name).join("pipeline.json");
    let pipeline = dsl::load_pipeline_from_path(&path)
        .unwrap_or_else(|e| panic!("failed to load {}: {e:#}", path.display()));
    let (vertex, fragment) = dsl::build_scripts(&pipeline)
        .unwrap_or_else(|e| panic!("failed to build {case_name}: {e:#}"));
    compile_pipeline(&vertex, &fragment, true)
        .unwrap_or_else(|e| panic!("failed to compile {case_name}: {e:#}"))
}

#[test]
fn lit_mesh_compiles_and_validates() {
    let compiled = compile_case("lit-mesh");

    // the fragment never reads its uv input
    assert_eq!(compiled.fragment.ignored_input_indices, vec![1]);
    assert_eq!(compiled.template.push_constant_size, 80);

    let vertex = parse(&compiled.vertex.words);
    assert_eq!(variables(&vertex, StorageClass::Input).len(), 3);
    let locations: Vec<u32> = variables(&vertex, StorageClass::Output)
        .into_iter()
        .filter_map(|id| decoration(&vertex, id, Decoration::Location))
        .collect();
    assert_eq!(locations, vec![0]);
    assert_eq!(count(&vertex, Op::MatrixTimesVector), 1);

    let fragment = parse(&compiled.fragment.words);
    let push = variables(&fragment, StorageClass::PushConstant)[0];
    assert_eq!(member_offsets(&fragment, variable_pointee(&fragment, push)), vec![64]);
    let material = variables(&fragment, StorageClass::Uniform)[0];
    assert_eq!(
        member_offsets(&fragment, variable_pointee(&fragment, material)),
        vec![0, 16]
    );
    assert_eq!(count(&fragment, Op::VectorTimesScalar), 1);
    assert_eq!(count(&fragment, Op::Dot), 1);

    validate_spirv(&compiled.vertex.words).unwrap();
    validate_spirv(&compiled.fragment.words).unwrap();
}

#[test]
fn textured_quad_compiles() {
    let compiled = compile_case("textured-quad");
    assert!(compiled.fragment.ignored_input_indices.is_empty());

    let vertex = parse(&compiled.vertex.words);
    assert_eq!(count(&vertex, Op::CompositeExtract), 2);
    assert_eq!(count(&vertex, Op::CompositeConstruct), 1);

    let fragment = parse(&compiled.fragment.words);
    let sampler = variables(&fragment, StorageClass::UniformConstant)[0];
    assert_eq!(decoration(&fragment, sampler, Decoration::DescriptorSet), Some(0));
    assert_eq!(decoration(&fragment, sampler, Decoration::Binding), Some(0));
    assert_eq!(count(&fragment, Op::ImageSampleImplicitLod), 1);
    // the dangling constant node is not compiled
    assert_eq!(count(&fragment, Op::ConstantComposite), 0);
}

#[test]
fn missing_case_file_names_the_path() {
    let path = case_dir("does-not-exist").join("pipeline.json");
    let err = dsl::load_pipeline_from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("does-not-exist"));
}
