//! Permutation build manager: compiles every combination of a program's
//! static branches and stores the results in a dense table addressed by
//! `Σ flags[i] << i`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded};
use tracing::{debug, info, instrument, warn};

use crate::compiler::artifacts::ArtifactSink;
use crate::compiler::reflection::Reflection;
use crate::compiler::sources::ShaderSourceSet;
use crate::compiler::validation::{
    CompileFailure, CompileRequest, EntryPointDecl, ShaderCompiler, TargetProfile,
};
use crate::error::{BuildError, CompileError, SchemaError, SelectError};
use crate::schema::{MAX_STATIC_BRANCHES, ProgramSchema};

/// Bitmask index of a flag vector: bit `i` is `flags[i]`. `None` past
/// `MAX_STATIC_BRANCHES` flags.
pub fn permutation_index(flags: &[bool]) -> Option<u32> {
    if flags.len() > MAX_STATIC_BRANCHES {
        return None;
    }
    Some(
        flags
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &on)| acc | (u32::from(on) << i)),
    )
}

/// Symbol set of one permutation. Reconstructible from the branch names and
/// the index alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSymbols {
    names: Vec<String>,
    permutation: u32,
}

impl BranchSymbols {
    pub fn new(names: Vec<String>, permutation: u32) -> Self {
        Self { names, permutation }
    }

    pub fn permutation(&self) -> u32 {
        self.permutation
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn flags(&self) -> Vec<bool> {
        (0..self.names.len())
            .map(|i| (self.permutation >> i) & 1 == 1)
            .collect()
    }

    pub fn is_set(&self, name: &str) -> Option<bool> {
        let i = self.names.iter().position(|n| n == name)?;
        Some((self.permutation >> i) & 1 == 1)
    }

    /// `NAME -> "1" | "0"` for every branch.
    pub fn defines(&self) -> BTreeMap<String, String> {
        self.names
            .iter()
            .zip(self.flags())
            .map(|(name, on)| (name.clone(), if on { "1" } else { "0" }.to_string()))
            .collect()
    }

    /// The symbol set as `#define` lines.
    pub fn header(&self) -> String {
        self.names
            .iter()
            .zip(self.flags())
            .map(|(name, on)| format!("#define {name} {}\n", u8::from(on)))
            .collect()
    }
}

impl fmt::Display for BranchSymbols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, on)) in self.names.iter().zip(self.flags()).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={}", u8::from(on))?;
        }
        Ok(())
    }
}

/// One compiled permutation. Immutable once built.
#[derive(Debug, Clone)]
pub struct CompiledVariant {
    pub program: Arc<str>,
    pub permutation: u32,
    pub symbols: BranchSymbols,
    pub bytecode: Arc<str>,
    pub reflection: Arc<Reflection>,
}

/// Dense `2^B` table of a program's variants.
#[derive(Debug, Clone)]
pub struct VariantTable {
    program: String,
    branches: Vec<String>,
    variants: Vec<CompiledVariant>,
}

impl VariantTable {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, permutation: u32) -> Option<&CompiledVariant> {
        self.variants.get(permutation as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledVariant> {
        self.variants.iter()
    }

    /// O(1) lookup; `flags` must have one entry per static branch.
    pub fn select(&self, flags: &[bool]) -> Result<&CompiledVariant, SelectError> {
        let flag_count = || SelectError::FlagCount {
            program: self.program.clone(),
            expected: self.branches.len(),
            actual: flags.len(),
        };
        if flags.len() != self.branches.len() {
            return Err(flag_count());
        }
        let permutation = permutation_index(flags).ok_or_else(flag_count)?;
        self.lookup(permutation)
    }

    /// Select by the names of the enabled branches; the rest are off.
    pub fn select_named<S: AsRef<str>>(&self, enabled: &[S]) -> Result<&CompiledVariant, SelectError> {
        let mut permutation = 0u32;
        for name in enabled {
            let name = name.as_ref();
            let bit = self
                .branches
                .iter()
                .position(|b| b == name)
                .ok_or_else(|| SelectError::UnknownBranch {
                    program: self.program.clone(),
                    branch: name.to_string(),
                })?;
            permutation |= 1 << bit;
        }
        self.lookup(permutation)
    }

    fn lookup(&self, permutation: u32) -> Result<&CompiledVariant, SelectError> {
        // Tables are complete after a successful build.
        self.get(permutation)
            .ok_or_else(|| SelectError::MissingVariant {
                program: self.program.clone(),
                permutation,
            })
    }
}

/// Compiles every permutation of a program, optionally on worker threads.
pub struct PermutationBuilder<'a, C: ShaderCompiler + ?Sized> {
    compiler: &'a C,
    sources: &'a ShaderSourceSet,
    jobs: usize,
    artifacts: Option<&'a ArtifactSink>,
}

impl<'a, C: ShaderCompiler + ?Sized> PermutationBuilder<'a, C> {
    pub fn new(compiler: &'a C, sources: &'a ShaderSourceSet) -> Self {
        Self {
            compiler,
            sources,
            jobs: 1,
            artifacts: None,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Option<&'a ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    #[instrument(skip_all, fields(program = %program.name, branches = program.static_branches.len()))]
    pub fn build(&self, program: &ProgramSchema) -> Result<VariantTable, BuildError> {
        let branch_count = program.static_branches.len();
        if branch_count > MAX_STATIC_BRANCHES {
            return Err(SchemaError::TooManyBranches {
                program: program.name.clone(),
                count: branch_count,
            }
            .into());
        }
        let profile = TargetProfile::from_name(&program.target_profile).ok_or_else(|| {
            SchemaError::UnknownProfile {
                program: program.name.clone(),
                profile: program.target_profile.clone(),
            }
        })?;
        let source =
            self.sources
                .get(&program.source_file)
                .ok_or_else(|| BuildError::MissingSource {
                    program: program.name.clone(),
                    file: program.source_file.clone(),
                })?;

        let entry_points: Vec<EntryPointDecl> = program
            .entry_points()
            .into_iter()
            .map(|(name, stage)| EntryPointDecl {
                name: name.to_string(),
                stage,
            })
            .collect();
        let names = program.branch_names();
        let program_name: Arc<str> = Arc::from(program.name.as_str());
        let count = program.permutation_count();

        let compile_one = |permutation: u32| -> Result<CompiledVariant, CompileError> {
            let symbols = BranchSymbols::new(names.clone(), permutation);
            let defines = symbols.defines();
            let request = CompileRequest {
                program: &program.name,
                source_name: &program.source_file,
                source,
                entry_points: &entry_points,
                profile,
                defines: &defines,
                includes: self.sources,
            };
            match self.compiler.compile(&request) {
                Ok(module) => {
                    debug!(permutation, flags = %symbols, "permutation compiled");
                    Ok(CompiledVariant {
                        program: program_name.clone(),
                        permutation,
                        symbols,
                        bytecode: Arc::from(module.bytecode),
                        reflection: Arc::new(module.reflection),
                    })
                }
                Err(CompileFailure {
                    diagnostic,
                    expanded_source,
                }) => Err(CompileError {
                    program: program.name.clone(),
                    source_file: program.source_file.clone(),
                    permutation,
                    symbols,
                    diagnostic,
                    expanded_source,
                    artifact: None,
                }),
            }
        };

        let started = Instant::now();
        let workers = self.jobs.min(count as usize).max(1);
        let built = if workers <= 1 {
            (0..count).map(|p| compile_one(p as u32)).collect()
        } else {
            build_parallel(count, workers, &compile_one)
        };

        let variants = match built {
            Ok(variants) => variants,
            Err(mut error) => {
                if let Some(sink) = self.artifacts {
                    match sink.write_failure(&error) {
                        Ok(path) => error.artifact = Some(path),
                        Err(e) => warn!(error = %e, "failed to persist compile diagnostic"),
                    }
                }
                return Err(error.into());
            }
        };

        if variants.len() as u64 != count {
            return Err(BuildError::IncompleteTable {
                program: program.name.clone(),
                permutation: variants.len() as u32,
            });
        }

        info!(
            permutations = count,
            workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "program built"
        );

        Ok(VariantTable {
            program: program.name.clone(),
            branches: names,
            variants,
        })
    }
}

/// Fan permutation indices out to `workers` threads. Every permutation is
/// compiled; when several fail the lowest index is reported.
fn build_parallel<F>(count: u64, workers: usize, compile_one: &F) -> Result<Vec<CompiledVariant>, CompileError>
where
    F: Fn(u32) -> Result<CompiledVariant, CompileError> + Sync,
{
    let mut slots: Vec<Option<CompiledVariant>> = vec![None; count as usize];
    let mut first_failure: Option<CompileError> = None;

    std::thread::scope(|scope| {
        let (task_tx, task_rx) = bounded::<u32>(workers * 2);
        let (result_tx, result_rx) = unbounded();

        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for permutation in task_rx.iter() {
                    if result_tx.send((permutation, compile_one(permutation))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(task_rx);
        drop(result_tx);

        for permutation in 0..count {
            if task_tx.send(permutation as u32).is_err() {
                break;
            }
        }
        drop(task_tx);

        for (permutation, result) in result_rx.iter() {
            match result {
                Ok(variant) => slots[permutation as usize] = Some(variant),
                Err(error) => {
                    if first_failure
                        .as_ref()
                        .is_none_or(|f| error.permutation < f.permutation)
                    {
                        first_failure = Some(error);
                    }
                }
            }
        }
    });

    if let Some(error) = first_failure {
        return Err(error);
    }
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str], permutation: u32) -> BranchSymbols {
        BranchSymbols::new(names.iter().map(|s| s.to_string()).collect(), permutation)
    }

    #[test]
    fn index_is_bitmask_of_flags() {
        assert_eq!(permutation_index(&[]), Some(0));
        assert_eq!(permutation_index(&[true, false, true]), Some(5));
        assert_eq!(permutation_index(&[false, false, false, true]), Some(8));
        assert_eq!(permutation_index(&[true; 32]), Some(u32::MAX));
    }

    #[test]
    fn more_than_thirty_two_flags_have_no_index() {
        assert_eq!(permutation_index(&[false; 33]), None);
        assert_eq!(permutation_index(&[true; 40]), None);
    }

    #[test]
    fn missing_slot_is_its_own_select_error() {
        let table = VariantTable {
            program: "Partial".to_string(),
            branches: vec!["A".to_string()],
            variants: Vec::new(),
        };
        assert_eq!(
            table.select(&[true]).unwrap_err(),
            SelectError::MissingVariant {
                program: "Partial".to_string(),
                permutation: 1,
            }
        );
        assert!(matches!(
            table.select(&[true, false]),
            Err(SelectError::FlagCount { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn symbols_render_defines_and_flags() {
        let s = symbols(&["A", "B", "C"], 5);
        assert_eq!(s.flags(), vec![true, false, true]);
        assert_eq!(s.to_string(), "A=1 B=0 C=1");
        assert_eq!(s.header(), "#define A 1\n#define B 0\n#define C 1\n");
        assert_eq!(s.defines().get("B").map(String::as_str), Some("0"));
        assert_eq!(s.is_set("C"), Some(true));
        assert_eq!(s.is_set("D"), None);
    }

    #[test]
    fn program_without_branches_has_empty_symbols() {
        let s = symbols(&[], 0);
        assert_eq!(s.to_string(), "");
        assert!(s.defines().is_empty());
    }
}
