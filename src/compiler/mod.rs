pub mod artifacts;
pub mod layout;
pub mod permutation;
pub mod preprocess;
pub mod reflection;
pub mod sources;
pub mod types;
pub mod utils;
pub mod validation;

pub use artifacts::ArtifactSink;
pub use layout::{CompiledLayouts, FieldAccessError, FieldLayout, HostLayout, compile_layouts};
pub use permutation::{
    BranchSymbols, CompiledVariant, PermutationBuilder, VariantTable, permutation_index,
};
pub use reflection::{BoundInput, Reflection, SlotIndex, SlotKind};
pub use sources::ShaderSourceSet;
pub use types::HostType;
pub use validation::{
    CompileFailure, CompileRequest, CompiledModule, EntryPointDecl, NagaCompiler, ShaderCompiler,
    TargetProfile,
};
