use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Shader files addressable by name, for program sources and `#include`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSourceSet {
    files: BTreeMap<String, String>,
}

impl ShaderSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shaders the default schema's programs are written against.
    pub fn embedded() -> Self {
        let mut set = Self::new();
        set.insert("common.wgsl", include_str!("../../shaders/common.wgsl"));
        set.insert("path_trace.wgsl", include_str!("../../shaders/path_trace.wgsl"));
        set.insert("present.wgsl", include_str!("../../shaders/present.wgsl"));
        set.insert(
            "clear_accumulation.wgsl",
            include_str!("../../shaders/clear_accumulation.wgsl"),
        );
        set
    }

    /// Load every `*.wgsl` file directly under `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut set = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read shader directory {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list shader directory {}", dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("wgsl") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read shader {}", path.display()))?;
            set.insert(name, source);
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.files.insert(name.into(), source.into());
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_set_has_every_default_program_source() {
        let set = ShaderSourceSet::embedded();
        for name in ["common.wgsl", "path_trace.wgsl", "present.wgsl", "clear_accumulation.wgsl"] {
            assert!(set.contains(name), "missing {name}");
        }
        assert!(!set.contains("schema.wgsl"));
    }

    #[test]
    fn from_dir_reads_only_wgsl_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wgsl"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = ShaderSourceSet::from_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a.wgsl"), Some("fn a() {}"));
    }
}
