use std::sync::Arc;

use schema_forge::binding::{HeadlessContext, HeadlessDevice};
use schema_forge::compiler::{NagaCompiler, ShaderSourceSet, SlotKind};
use schema_forge::error::ReflectionMismatchError;
use schema_forge::schema::{
    BufferSchema, FieldDecl, ProgramSchema, SchemaDecl, SchemaRegistry, ShaderStage,
};
use schema_forge::{BuildOptions, ShaderPipeline};

const SHADE: &str = r#"#include "schema.wgsl"

@compute @workgroup_size(1)
fn main() {
    let tint = Scene.tint;
    Spheres[0].center = Spheres[0].center * tint;
}
"#;

fn pipeline() -> ShaderPipeline {
    let registry = SchemaRegistry::new(vec![
        SchemaDecl::Buffer(BufferSchema::constant(
            "Scene",
            vec![FieldDecl::new("tint", "f32x4")],
        )),
        SchemaDecl::Buffer(
            BufferSchema::structured("Spheres", 8, vec![FieldDecl::new("center", "f32x4")])
                .with_struct_name("Sphere")
                .gpu_writable(),
        ),
        SchemaDecl::Program(ProgramSchema::compute("Shade", "main", "shade.wgsl")),
    ])
    .unwrap();
    let sources = ShaderSourceSet::new().with("shade.wgsl", SHADE);
    ShaderPipeline::build_all_programs(
        Arc::new(registry),
        &sources,
        &NagaCompiler,
        &BuildOptions::default().with_jobs(1),
    )
    .unwrap()
}

#[test]
fn binds_every_reflected_input_once() {
    let pipeline = pipeline();
    let variant = pipeline.select_variant("Shade", &[]).unwrap();

    let inputs = variant.reflection.inputs();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].name, "Scene");
    assert_eq!(inputs[0].kind, SlotKind::ConstantBuffer);
    assert_eq!(inputs[1].name, "Spheres");
    assert_eq!(inputs[1].stages, vec![ShaderStage::Compute]);

    let mut device = HeadlessDevice::new();
    let resources = pipeline.create_resources(&mut device).unwrap();
    let mut ctx = HeadlessContext::new();
    let report = pipeline.bind_for_draw(variant, &resources, &mut ctx).unwrap();

    assert_eq!(ctx.calls().len(), 2);
    assert_eq!(report.bindings.len(), 2);
    assert_eq!(ctx.calls()[0].handle, resources.handle("Scene").unwrap());
    assert_eq!(ctx.calls()[1].handle, resources.handle("Spheres").unwrap());
    assert_eq!(ctx.calls()[1].slot, inputs[1].slot);
}

#[test]
fn missing_resource_is_named_and_nothing_is_bound() {
    let pipeline = pipeline();
    let variant = pipeline.select_variant("Shade", &[]).unwrap();

    let mut device = HeadlessDevice::new();
    let mut resources = pipeline.create_resources(&mut device).unwrap();
    let spheres = resources.remove("Spheres").unwrap();

    let mut ctx = HeadlessContext::new();
    let err = pipeline.bind_for_draw(variant, &resources, &mut ctx).unwrap_err();
    assert!(matches!(err, ReflectionMismatchError::MissingResource { .. }));
    assert_eq!(err.name(), "Spheres");
    assert!(ctx.calls().is_empty());

    // Re-registering the resource makes the next draw succeed.
    resources.insert("Spheres", spheres.kind, spheres.handle);
    pipeline.bind_for_draw(variant, &resources, &mut ctx).unwrap();
    assert_eq!(ctx.calls().len(), 2);
}

#[test]
fn wrong_resource_kind_is_rejected() {
    let pipeline = pipeline();
    let variant = pipeline.select_variant("Shade", &[]).unwrap();

    let mut device = HeadlessDevice::new();
    let mut resources = pipeline.create_resources(&mut device).unwrap();
    let scene = *resources.get("Scene").unwrap();
    resources.insert("Spheres", scene.kind, scene.handle);

    let mut ctx = HeadlessContext::new();
    let err = pipeline.bind_for_draw(variant, &resources, &mut ctx).unwrap_err();
    assert!(matches!(err, ReflectionMismatchError::KindMismatch { .. }));
    assert_eq!(err.name(), "Spheres");
    assert!(ctx.calls().is_empty());
}
