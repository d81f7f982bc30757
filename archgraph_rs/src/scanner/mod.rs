//! Dependency scanners, one per ecosystem.
//!
//! A scanner is a pure transformation `(scan context, manifest path,
//! bytes) -> [Dependency]`. Scanners degrade gracefully: one malformed
//! entry is logged and skipped, never failing the whole invocation. The
//! depth and `show_indirect` policy live on the context and are applied
//! by the caller; only the name filter is the scanner's job.
//!
//! # Submodules
//!
//! - [`golang`] - `go.mod` / `go.sum`
//! - [`node`] - `package.json` plus the three lockfile dialects
//! - [`java`] - `pom.xml` (XML first, regex fallback) and Gradle scripts
//! - [`python`] - requirements, setup.py, pyproject.toml, Pipfile
//! - [`docker`] - Dockerfiles and compose files
//! - [`helm`] - Chart.yaml / requirements.yaml

pub mod docker;
pub mod golang;
pub mod helm;
pub mod java;
pub mod node;
pub mod python;

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::ScanError;
use crate::types::{CancelFlag, Dependency};

/// Shared state of one dependency scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub root: PathBuf,
    /// Optional name filter; dependencies not matching are dropped.
    pub filter: Option<GlobSet>,
    /// Directory depth limit, evaluated by the caller during the walk.
    pub max_depth: Option<usize>,
    /// Whether indirect dependencies should be reported. Evaluated by
    /// the caller; scanners still emit them flagged.
    pub show_indirect: bool,
    pub cancel: CancelFlag,
}

impl ScanContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ScanContext {
            root: root.into(),
            filter: None,
            max_depth: None,
            show_indirect: true,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_filter(mut self, pattern: &str) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pattern)?);
        self.filter = Some(builder.build()?);
        Ok(self)
    }

    /// Apply the context's name filter to a scanner's result list.
    pub fn apply_filter(&self, deps: Vec<Dependency>) -> Vec<Dependency> {
        match &self.filter {
            None => deps,
            Some(set) => deps
                .into_iter()
                .filter(|d| set.is_match(&d.name))
                .collect(),
        }
    }
}

/// The per-ecosystem scanning capability, registered in the scanner
/// registry and dispatched by manifest file name.
pub trait DependencyScanner: Send + Sync {
    /// Canonical lowercase ecosystem label (`go`, `npm`, ...).
    fn language(&self) -> &'static str;

    /// Glob patterns over manifest file names this scanner accepts.
    fn manifest_globs(&self) -> &'static [&'static str];

    /// Scan one manifest.
    fn scan_file(
        &self,
        context: &ScanContext,
        path: &Path,
        content: &[u8],
    ) -> Result<Vec<Dependency>, ScanError>;
}

/// Strip common semver range prefixes (`^`, `~`, `>=`, `=`, `v`, ...).
pub(crate) fn strip_semver_prefix(version: &str) -> String {
    version
        .trim()
        .trim_start_matches(['^', '~', '=', '>', '<', 'v'])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DependencyType;

    #[test]
    fn filter_drops_non_matching_names() {
        let ctx = ScanContext::new(".").with_filter("github.com/*").unwrap();
        let deps = vec![
            Dependency::new("github.com/x/y", "1.0.0", DependencyType::Go, "go.mod"),
            Dependency::new("gopkg.in/yaml.v3", "3.0.1", DependencyType::Go, "go.mod"),
        ];
        let filtered = ctx.apply_filter(deps);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "github.com/x/y");
    }

    #[test]
    fn semver_prefixes_are_stripped() {
        assert_eq!(strip_semver_prefix("^1.2.3"), "1.2.3");
        assert_eq!(strip_semver_prefix("~0.4.0"), "0.4.0");
        assert_eq!(strip_semver_prefix(">=2.0"), "2.0");
        assert_eq!(strip_semver_prefix("v18.2.0"), "18.2.0");
        assert_eq!(strip_semver_prefix("1.0.0"), "1.0.0");
    }
}
