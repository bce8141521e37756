//! Device compiler seam and its naga implementation: preprocess, parse,
//! validate, reflect and re-emit normalised WGSL for one permutation.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::compiler::preprocess::preprocess;
use crate::compiler::reflection::{Reflection, reflect_module};
use crate::compiler::sources::ShaderSourceSet;
use crate::schema::ShaderStage;

/// Validation capability set a program targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetProfile {
    /// Everything naga can validate (`"wgsl"`).
    Full,
    /// Portable WebGPU subset (`"webgpu"`).
    WebGpu,
}

impl TargetProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "wgsl" => Some(Self::Full),
            "webgpu" => Some(Self::WebGpu),
            _ => None,
        }
    }

    fn capabilities(self) -> naga::valid::Capabilities {
        match self {
            Self::Full => naga::valid::Capabilities::all(),
            Self::WebGpu => naga::valid::Capabilities::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointDecl {
    pub name: String,
    pub stage: ShaderStage,
}

/// One device compiler invocation.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub program: &'a str,
    pub source_name: &'a str,
    pub source: &'a str,
    pub entry_points: &'a [EntryPointDecl],
    pub profile: TargetProfile,
    /// Symbol set for this permutation, passed to the preprocessor.
    pub defines: &'a BTreeMap<String, String>,
    pub includes: &'a ShaderSourceSet,
}

#[derive(Debug, Clone)]
pub struct CompiledModule {
    /// Normalised WGSL handed to the device.
    pub bytecode: String,
    pub reflection: Reflection,
}

#[derive(Error, Debug, Clone)]
#[error("{diagnostic}")]
pub struct CompileFailure {
    pub diagnostic: String,
    pub expanded_source: Option<String>,
}

impl CompileFailure {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
            expanded_source: None,
        }
    }
}

/// Device compiler. Invoked concurrently for independent permutations.
pub trait ShaderCompiler: Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledModule, CompileFailure>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NagaCompiler;

impl ShaderCompiler for NagaCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledModule, CompileFailure> {
        let expanded = preprocess(
            request.source_name,
            request.source,
            request.defines,
            request.includes,
        )
        .map_err(|e| CompileFailure::new(e.to_string()))?;

        let failure = |diagnostic: String| CompileFailure {
            diagnostic,
            expanded_source: Some(expanded.clone()),
        };

        let module = naga::front::wgsl::parse_str(&expanded).map_err(|e| {
            failure(format!(
                "{}: WGSL parse failed:\n{}",
                request.source_name,
                e.emit_to_string(&expanded)
            ))
        })?;

        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            request.profile.capabilities(),
        )
        .validate(&module)
        .map_err(|e| {
            failure(format!(
                "{}: WGSL validation failed:\n{}",
                request.source_name,
                e.emit_to_string(&expanded)
            ))
        })?;

        let reflection = reflect_module(&module, &info, request.entry_points)
            .map_err(|e| failure(format!("{}: {e}", request.source_name)))?;

        let bytecode = naga::back::wgsl::write_string(
            &module,
            &info,
            naga::back::wgsl::WriterFlags::empty(),
        )
        .map_err(|e| failure(format!("{}: WGSL writer failed: {e}", request.source_name)))?;

        Ok(CompiledModule {
            bytecode,
            reflection,
        })
    }
}

/// Source text with 1-based line numbers, for diagnostics.
pub fn numbered_listing(source: &str) -> String {
    let mut output = String::new();
    for (line_num, line) in source.lines().enumerate() {
        let _ = writeln!(output, "{:4} | {}", line_num + 1, line);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPUTE: &str = r#"
@group(0) @binding(0) var<storage, read_write> Out: array<u32, 4>;

@compute @workgroup_size(1)
fn main() {
#if DOUBLE
    Out[0] = 2u;
#else
    Out[0] = 1u;
#endif
}
"#;

    fn compile(source: &str, defines: &[(&str, &str)], stage: ShaderStage) -> Result<CompiledModule, CompileFailure> {
        let defines: BTreeMap<String, String> = defines
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let entry_points = [EntryPointDecl {
            name: "main".to_string(),
            stage,
        }];
        let includes = ShaderSourceSet::new();
        NagaCompiler.compile(&CompileRequest {
            program: "Test",
            source_name: "test.wgsl",
            source,
            entry_points: &entry_points,
            profile: TargetProfile::Full,
            defines: &defines,
            includes: &includes,
        })
    }

    #[test]
    fn defines_select_the_compiled_branch() {
        let on = compile(COMPUTE, &[("DOUBLE", "1")], ShaderStage::Compute).unwrap();
        let off = compile(COMPUTE, &[("DOUBLE", "0")], ShaderStage::Compute).unwrap();
        assert!(on.bytecode.contains("2u"));
        assert!(off.bytecode.contains("1u"));
        assert!(!off.bytecode.contains("2u"));
        assert_eq!(on.reflection.names().collect::<Vec<_>>(), vec!["Out"]);
    }

    #[test]
    fn parse_errors_carry_the_expanded_source() {
        let broken = "@compute @workgroup_size(1)\nfn main() {\n    let x = ;\n}\n";
        let err = compile(broken, &[], ShaderStage::Compute).unwrap_err();
        assert!(err.diagnostic.contains("test.wgsl"));
        assert!(err.expanded_source.unwrap().contains("let x = ;"));
    }

    #[test]
    fn wrong_entry_stage_fails() {
        let err = compile(COMPUTE, &[("DOUBLE", "0")], ShaderStage::Pixel).unwrap_err();
        assert!(err.diagnostic.contains("expected pixel"));
    }

    #[test]
    fn preprocessor_errors_have_no_expanded_source() {
        let err = compile("#if 1\nfn main() {}\n", &[], ShaderStage::Compute).unwrap_err();
        assert!(err.expanded_source.is_none());
        assert!(err.diagnostic.contains("never closed"));
    }

    #[test]
    fn profiles_parse_by_name() {
        assert_eq!(TargetProfile::from_name("wgsl"), Some(TargetProfile::Full));
        assert_eq!(TargetProfile::from_name("webgpu"), Some(TargetProfile::WebGpu));
        assert_eq!(TargetProfile::from_name("hlsl"), None);
    }

    #[test]
    fn listing_numbers_lines() {
        assert_eq!(numbered_listing("a\nb"), "   1 | a\n   2 | b\n");
    }
}
