use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use schema_forge::binding::{HeadlessContext, HeadlessDevice};
use schema_forge::compiler::{NagaCompiler, ShaderSourceSet};
use schema_forge::schema::ShaderStage;
use schema_forge::{BuildOptions, SchemaRegistry, ShaderPipeline};

fn case_dir(case_name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cases")
        .join(case_name)
}

fn build(jobs: usize) -> ShaderPipeline {
    let schema = Arc::new(SchemaRegistry::load_default().unwrap());
    ShaderPipeline::build_all_programs(
        schema,
        &ShaderSourceSet::embedded(),
        &NagaCompiler,
        &BuildOptions::default().with_jobs(jobs),
    )
    .unwrap_or_else(|e| panic!("default schema failed to build: {e}"))
}

fn input_names(pipeline: &ShaderPipeline, program: &str, enabled: &[&str]) -> BTreeSet<String> {
    pipeline
        .select_named(program, enabled)
        .unwrap()
        .reflection
        .names()
        .map(str::to_string)
        .collect()
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn default_schema_builds_every_permutation() {
    let pipeline = build(4);
    let sizes: Vec<(&str, usize)> = pipeline.tables().map(|t| (t.program(), t.len())).collect();
    assert_eq!(
        sizes,
        vec![("ClearAccumulation", 1), ("PathTrace", 16), ("Present", 4)]
    );

    let table = pipeline.table("PathTrace").unwrap();
    for (i, variant) in table.iter().enumerate() {
        assert_eq!(variant.permutation as usize, i);
        assert!(variant.bytecode.contains("fn main("));
    }
}

#[test]
fn reflection_tracks_what_each_permutation_reads() {
    let pipeline = build(4);

    let base = set(&["Scene", "Spheres", "Accumulation", "Output"]);
    assert_eq!(input_names(&pipeline, "PathTrace", &[]), base);
    assert_eq!(input_names(&pipeline, "PathTrace", &["ACCUMULATE", "SHOW_NORMALS"]), base);

    let mut with_env = base.clone();
    with_env.extend(set(&["Environment", "LinearClamp"]));
    assert_eq!(input_names(&pipeline, "PathTrace", &["USE_ENVIRONMENT"]), with_env);

    let mut with_noise = base.clone();
    with_noise.insert("BlueNoise".to_string());
    assert_eq!(input_names(&pipeline, "PathTrace", &["USE_BLUE_NOISE"]), with_noise);

    let all = pipeline
        .select_named("PathTrace", &["ACCUMULATE", "USE_ENVIRONMENT", "USE_BLUE_NOISE", "SHOW_NORMALS"])
        .unwrap();
    assert_eq!(all.permutation, 15);
    assert_eq!(all.reflection.inputs().len(), 7);
    assert!(all.reflection.inputs().iter().all(|i| i.stages == vec![ShaderStage::Compute]));

    let present = pipeline.select_named("Present", &["TONEMAP"]).unwrap();
    let inputs = present.reflection.inputs();
    let names: Vec<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Scene", "Accumulation"]);
    assert!(inputs.iter().all(|i| i.stages == vec![ShaderStage::Pixel]));

    assert_eq!(
        input_names(&pipeline, "ClearAccumulation", &[] as &[&str]),
        set(&["Accumulation"])
    );
}

#[test]
fn every_variant_binds_against_the_schema_resources() {
    let pipeline = build(4);
    let mut device = HeadlessDevice::new();
    let mut resources = pipeline.create_resources(&mut device).unwrap();
    assert_eq!(resources.len(), 7);

    let mut ctx = HeadlessContext::new();
    for table in pipeline.tables() {
        for variant in table.iter() {
            ctx.clear();
            let report = pipeline
                .bind_for_draw(variant, &resources, &mut ctx)
                .unwrap_or_else(|e| panic!("{} p{}: {e}", table.program(), variant.permutation));
            assert_eq!(report.bindings.len(), ctx.calls().len());
            assert_eq!(report.bindings.len(), variant.reflection.inputs().len());
        }
    }

    resources.destroy(&mut device).unwrap();
    assert_eq!(device.live_count(), 0);
}

#[test]
fn sequential_and_parallel_builds_are_identical() {
    let sequential = build(1);
    let parallel = build(4);
    for (a, b) in sequential.tables().zip(parallel.tables()) {
        assert_eq!(a.program(), b.program());
        assert_eq!(a.len(), b.len());
        for (va, vb) in a.iter().zip(b.iter()) {
            assert_eq!(va.permutation, vb.permutation);
            assert_eq!(va.bytecode, vb.bytecode, "{} p{}", a.program(), va.permutation);
            assert_eq!(va.reflection, vb.reflection);
        }
    }
}

#[test]
fn generated_include_matches_golden() {
    let update_goldens = std::env::var("UPDATE_GOLDENS").is_ok_and(|v| v != "0");
    let pipeline = build(1);
    let generated = pipeline.layouts().source();
    let golden_path = case_dir("schema_generation").join("default.schema.wgsl");

    if update_goldens {
        std::fs::write(&golden_path, generated)
            .unwrap_or_else(|e| panic!("write {:?}: {e}", golden_path));
    } else {
        let expected = std::fs::read_to_string(&golden_path)
            .unwrap_or_else(|e| panic!("read {:?}: {e}", golden_path));
        assert_eq!(generated, expected, "generated schema include golden mismatch");
    }

    // The include must stand on its own as a WGSL module.
    naga::front::wgsl::parse_str(generated).unwrap_or_else(|e| {
        panic!("generated include failed to parse: {e:?}\nWGSL:\n{generated}")
    });
}
