use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::compiler::validation::numbered_listing;
use crate::error::CompileError;

/// Directory that receives the generated include and failed-permutation reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSink {
    dir: PathBuf,
}

impl ArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn failure_path(&self, program: &str, permutation: u32) -> PathBuf {
        self.dir.join(format!("{program}.p{permutation}.failed.txt"))
    }

    pub fn write_generated(&self, name: &str, source: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, source)?;
        debug!(path = %path.display(), "wrote generated include");
        Ok(path)
    }

    pub fn write_failure(&self, error: &CompileError) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.failure_path(&error.program, error.permutation);
        std::fs::write(&path, failure_report(error))?;
        Ok(path)
    }
}

/// Everything needed to reproduce one failed permutation.
pub fn failure_report(error: &CompileError) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "program: {}", error.program);
    let _ = writeln!(report, "source: {}", error.source_file);
    let _ = writeln!(report, "permutation: {}", error.permutation);
    let _ = writeln!(report, "flags: {}", error.symbols);
    report.push('\n');
    report.push_str(&error.symbols.header());
    report.push_str("\ndiagnostic:\n");
    report.push_str(&error.diagnostic);
    if !error.diagnostic.ends_with('\n') {
        report.push('\n');
    }
    if let Some(expanded) = &error.expanded_source {
        report.push_str("\nexpanded source:\n");
        report.push_str(&numbered_listing(expanded));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::permutation::BranchSymbols;

    fn failure() -> CompileError {
        CompileError {
            program: "Blend".to_string(),
            source_file: "blend.wgsl".to_string(),
            permutation: 4,
            symbols: BranchSymbols::new(vec!["A".into(), "B".into(), "C".into()], 4),
            diagnostic: "unexpected token".to_string(),
            expanded_source: Some("fn main() {}".to_string()),
            artifact: None,
        }
    }

    #[test]
    fn report_names_permutation_flags_and_source() {
        let report = failure_report(&failure());
        assert!(report.contains("program: Blend\n"));
        assert!(report.contains("source: blend.wgsl\n"));
        assert!(report.contains("permutation: 4\n"));
        assert!(report.contains("flags: A=0 B=0 C=1\n"));
        assert!(report.contains("#define A 0\n#define B 0\n#define C 1\n"));
        assert!(report.contains("   1 | fn main() {}\n"));
    }

    #[test]
    fn failure_file_is_keyed_by_program_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ArtifactSink::new(dir.path().join("out"));
        let path = sink.write_failure(&failure()).unwrap();
        assert_eq!(path, dir.path().join("out").join("Blend.p4.failed.txt"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("unexpected token"));
    }
}
