#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use schema_forge::compiler::{
    CompileFailure, CompileRequest, CompiledModule, Reflection, ShaderCompiler,
};
use schema_forge::schema::{BufferSchema, FieldDecl, ProgramSchema, SchemaDecl};

/// Compiler double: counts invocations and encodes the symbol set in the
/// returned bytecode. Fails every permutation where `fail_on` is set.
#[derive(Default)]
pub struct RecordingCompiler {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl RecordingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_when(branch: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(branch.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShaderCompiler for RecordingCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledModule, CompileFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(branch) = &self.fail_on {
            if request.defines.get(branch).map(String::as_str) == Some("1") {
                return Err(CompileFailure::new(format!("{branch} is broken")));
            }
        }
        let symbols: Vec<String> = request
            .defines
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Ok(CompiledModule {
            bytecode: format!("{}:{}", request.program, symbols.join(",")),
            reflection: Reflection::default(),
        })
    }
}

/// Program `name` reading a `Values` constant buffer, with the given branches.
pub fn values_schema(name: &str, branches: &[&str], source_file: &str) -> Vec<SchemaDecl> {
    vec![
        SchemaDecl::Buffer(BufferSchema::constant(
            "Values",
            vec![FieldDecl::new("v", "u32x4")],
        )),
        SchemaDecl::Buffer(
            BufferSchema::structured("Out", 4, vec![FieldDecl::new("value", "u32x4")]).gpu_writable(),
        ),
        SchemaDecl::Program(ProgramSchema::compute(name, "main", source_file).with_branches(branches)),
    ]
}

pub fn branch_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("BRANCH_{i}")).collect()
}
