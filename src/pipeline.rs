use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::binding::binder::{self, BindReport};
use crate::binding::device::{DeviceContext, ResourceDevice};
use crate::binding::resources::ResourceRegistry;
use crate::compiler::artifacts::ArtifactSink;
use crate::compiler::layout::{CompiledLayouts, compile_layouts};
use crate::compiler::permutation::{CompiledVariant, PermutationBuilder, VariantTable};
use crate::compiler::sources::ShaderSourceSet;
use crate::compiler::validation::ShaderCompiler;
use crate::error::{BuildError, ReflectionMismatchError, SelectError};
use crate::schema::SchemaRegistry;

/// Knobs for one initialization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Receives `schema.wgsl` and failed-permutation reports when set.
    pub artifact_dir: Option<PathBuf>,
    /// Worker threads for permutation compiles; 1 compiles sequentially.
    pub jobs: usize,
    /// Name programs use to `#include` the generated declarations.
    pub generated_include: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            artifact_dir: None,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            generated_include: "schema.wgsl".to_string(),
        }
    }
}

impl BuildOptions {
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_generated_include(mut self, name: impl Into<String>) -> Self {
        self.generated_include = name.into();
        self
    }
}

/// Compiled schema plus every program's variant table. Read-only after build.
#[derive(Debug)]
pub struct ShaderPipeline {
    schema: Arc<SchemaRegistry>,
    layouts: CompiledLayouts,
    tables: BTreeMap<String, VariantTable>,
}

impl ShaderPipeline {
    /// Compile layouts, then every permutation of every program. The first
    /// fatal failure is logged and returned.
    #[instrument(skip_all, fields(programs = schema.programs().count(), jobs = options.jobs))]
    pub fn build_all_programs<C: ShaderCompiler + ?Sized>(
        schema: Arc<SchemaRegistry>,
        sources: &ShaderSourceSet,
        compiler: &C,
        options: &BuildOptions,
    ) -> Result<Self, BuildError> {
        let result = Self::build(schema, sources, compiler, options);
        match &result {
            Ok(pipeline) => info!(
                programs = pipeline.tables.len(),
                variants = pipeline.tables.values().map(VariantTable::len).sum::<usize>(),
                "shader pipeline ready"
            ),
            Err(BuildError::Compile(e)) => error!(
                program = %e.program,
                permutation = e.permutation,
                flags = %e.symbols,
                artifact = ?e.artifact,
                "{}",
                e.diagnostic
            ),
            Err(e) => error!(error = %e, "shader pipeline build failed"),
        }
        result
    }

    fn build<C: ShaderCompiler + ?Sized>(
        schema: Arc<SchemaRegistry>,
        sources: &ShaderSourceSet,
        compiler: &C,
        options: &BuildOptions,
    ) -> Result<Self, BuildError> {
        let layouts = compile_layouts(&schema)?;
        layouts.verify_device_layout()?;

        let sink = options.artifact_dir.as_ref().map(ArtifactSink::new);
        if let Some(sink) = &sink {
            sink.write_generated(&options.generated_include, layouts.source())
                .map_err(|source| BuildError::Artifact {
                    path: sink.dir().join(&options.generated_include),
                    source,
                })?;
        }

        let sources = sources
            .clone()
            .with(options.generated_include.clone(), layouts.source());
        let builder = PermutationBuilder::new(compiler, &sources)
            .with_jobs(options.jobs)
            .with_artifacts(sink.as_ref());

        let mut tables = BTreeMap::new();
        for program in schema.programs() {
            let table = builder.build(program)?;
            tables.insert(program.name.clone(), table);
        }

        Ok(Self {
            schema,
            layouts,
            tables,
        })
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn layouts(&self) -> &CompiledLayouts {
        &self.layouts
    }

    pub fn table(&self, program: &str) -> Option<&VariantTable> {
        self.tables.get(program)
    }

    pub fn tables(&self) -> impl Iterator<Item = &VariantTable> {
        self.tables.values()
    }

    pub fn select_variant(&self, program: &str, flags: &[bool]) -> Result<&CompiledVariant, SelectError> {
        self.table(program)
            .ok_or_else(|| SelectError::UnknownProgram(program.to_string()))?
            .select(flags)
    }

    pub fn select_named<S: AsRef<str>>(
        &self,
        program: &str,
        enabled: &[S],
    ) -> Result<&CompiledVariant, SelectError> {
        self.table(program)
            .ok_or_else(|| SelectError::UnknownProgram(program.to_string()))?
            .select_named(enabled)
    }

    /// Create the schema's resources on `device`.
    pub fn create_resources<D: ResourceDevice + ?Sized>(
        &self,
        device: &mut D,
    ) -> Result<ResourceRegistry, BuildError> {
        Ok(ResourceRegistry::create(&self.schema, &self.layouts, device)?)
    }

    pub fn bind_for_draw<X: DeviceContext + ?Sized>(
        &self,
        variant: &CompiledVariant,
        resources: &ResourceRegistry,
        ctx: &mut X,
    ) -> Result<BindReport, ReflectionMismatchError> {
        binder::bind_for_draw(variant, resources, ctx).inspect_err(|e| {
            warn!(program = %variant.program, permutation = variant.permutation, "{e}");
        })
    }
}
