pub mod binding;
pub mod compiler;
pub mod error;
pub mod pipeline;
pub mod scene;
pub mod schema;

pub use error::{
    BuildError, CompileError, ReflectionMismatchError, ResourceCreationError, SchemaError,
    SelectError,
};
pub use pipeline::{BuildOptions, ShaderPipeline};
pub use schema::SchemaRegistry;
