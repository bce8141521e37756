//! Error taxonomy for schema compilation, permutation builds, resource
//! creation and per-draw binding.

use std::path::PathBuf;

use thiserror::Error;

use crate::binding::resources::ResourceKind;
use crate::compiler::permutation::BranchSymbols;
use crate::compiler::reflection::SlotKind;
use crate::schema::MAX_STATIC_BRANCHES;

/// Problems detected while validating or laying out the schema. Always raised
/// before the device compiler or the device is touched.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("duplicate schema name '{name}' (declared as {first} and as {second})")]
    DuplicateName {
        name: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("'{name}' is not a valid WGSL identifier ({context})")]
    InvalidIdentifier { name: String, context: String },

    #[error("field '{owner}.{field}' has host type '{ty}' with no device type mapping")]
    UnmappedType {
        owner: String,
        field: String,
        ty: String,
    },

    #[error(
        "program '{program}' declares {count} static branches (max {max})",
        max = MAX_STATIC_BRANCHES
    )]
    TooManyBranches { program: String, count: usize },

    #[error(
        "program '{program}': static branch '{branch}' has bit index {bit_index}, expected {expected}"
    )]
    NonContiguousBranch {
        program: String,
        branch: String,
        bit_index: u32,
        expected: u32,
    },

    #[error("program '{program}' declares static branch '{branch}' twice")]
    DuplicateBranch { program: String, branch: String },

    #[error("'{owner}' references unknown {expected} '{name}'")]
    UnknownReference {
        owner: String,
        name: String,
        expected: &'static str,
    },

    #[error("program '{program}' uses unknown target profile '{profile}'")]
    UnknownProfile { program: String, profile: String },

    #[error("invalid declaration '{name}': {reason}")]
    InvalidDeclaration { name: String, reason: String },

    #[error(
        "field '{owner}.{field}' sits at host offset {offset} but its device type needs {align}-byte alignment"
    )]
    ImplicitPadding {
        owner: String,
        field: String,
        offset: u32,
        align: u32,
    },

    #[error("struct '{owner}' packs to {size} bytes but its device stride must be a multiple of {align}")]
    UnalignedStride { owner: String, size: u32, align: u32 },

    #[error("device layout of '{owner}' disagrees with the host layout: {detail}")]
    LayoutMismatch { owner: String, detail: String },

    #[error("failed to parse schema json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A permutation the device compiler rejected.
#[derive(Error, Debug, Clone)]
#[error(
    "program '{program}' permutation {permutation} [{symbols}] failed to compile from '{source_file}':\n{diagnostic}"
)]
pub struct CompileError {
    pub program: String,
    pub source_file: String,
    pub permutation: u32,
    pub symbols: BranchSymbols,
    pub diagnostic: String,
    /// Preprocessed source handed to the compiler, when preprocessing got that far.
    pub expanded_source: Option<String>,
    /// Where the diagnostic was persisted, if an artifact directory was configured.
    pub artifact: Option<PathBuf>,
}

#[derive(Error, Debug)]
#[error("failed to create {kind} '{resource}': {reason}")]
pub struct ResourceCreationError {
    pub resource: String,
    pub kind: &'static str,
    pub reason: String,
}

/// A compiled variant reads an input the resource registry cannot satisfy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectionMismatchError {
    #[error(
        "program '{program}' permutation {permutation} reads '{name}' but no resource with that name is registered"
    )]
    MissingResource {
        name: String,
        program: String,
        permutation: u32,
    },

    #[error(
        "program '{program}' permutation {permutation} binds '{name}' as {expected:?} but the registered resource is a {actual:?}"
    )]
    KindMismatch {
        name: String,
        program: String,
        permutation: u32,
        expected: SlotKind,
        actual: ResourceKind,
    },
}

impl ReflectionMismatchError {
    pub fn name(&self) -> &str {
        match self {
            Self::MissingResource { name, .. } | Self::KindMismatch { name, .. } => name,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("unknown program '{0}'")]
    UnknownProgram(String),

    #[error("program '{program}' has {expected} static branches, got {actual} flags")]
    FlagCount {
        program: String,
        expected: usize,
        actual: usize,
    },

    #[error("program '{program}' has no static branch named '{branch}'")]
    UnknownBranch { program: String, branch: String },

    #[error("program '{program}' has no compiled variant at permutation {permutation}")]
    MissingVariant { program: String, permutation: u32 },
}

/// Everything that can abort initialization.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Resource(#[from] ResourceCreationError),

    #[error("program '{program}' source file '{file}' is not in the shader source set")]
    MissingSource { program: String, file: String },

    #[error("program '{program}': permutation {permutation} produced no variant")]
    IncompleteTable { program: String, permutation: u32 },

    #[error("failed to write build artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_error_names_resource_and_permutation() {
        let e = ReflectionMismatchError::MissingResource {
            name: "Spheres".to_string(),
            program: "PathTrace".to_string(),
            permutation: 5,
        };
        assert_eq!(e.name(), "Spheres");
        let msg = e.to_string();
        assert!(msg.contains("Spheres"));
        assert!(msg.contains("PathTrace"));
        assert!(msg.contains("permutation 5"));
    }

    #[test]
    fn too_many_branches_mentions_limit() {
        let e = SchemaError::TooManyBranches {
            program: "Wide".to_string(),
            count: 33,
        };
        let msg = e.to_string();
        assert!(msg.contains("33"));
        assert!(msg.contains("32"));
    }
}
