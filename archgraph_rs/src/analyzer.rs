//! Generic per-file analysis orchestration.
//!
//! The state machine per file: staleness check, extractor dispatch,
//! extraction, transactional persist, metadata touch. A fresh file loads
//! from the cache; any miss or corruption falls through to a fresh
//! extraction. Rule-mode analysis bypasses the cache entirely and hands
//! the ephemeral result to the caller.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::cache::{AstCache, EmptyCacheView, PersistStats};
use crate::config::ArchConfig;
use crate::error::{AnalyzeError, ExtractorError};
use crate::extractor::AstResult;
use crate::fs_utils;
use crate::registry::{Registries, known_extensions};
use crate::types::CancelFlag;

/// What happened to one file.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// Metadata matched and the stored graph was reused.
    Cached { nodes: usize },
    /// Fresh extraction, persisted.
    Analyzed { stats: PersistStats },
    /// No extractor claims this file.
    SkippedNoExtractor,
    /// The external parser runtime is absent.
    SkippedToolchainMissing { tool: String },
}

/// Aggregate of one analysis run.
#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub analyzed: usize,
    pub cached: usize,
    pub skipped: usize,
    /// (file, error) pairs; failures never abort the run.
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

/// Drives extraction and persistence for a set of files.
pub struct Analyzer {
    cache: Arc<AstCache>,
    registries: Arc<Registries>,
    parallelism: usize,
    cancel: CancelFlag,
}

impl Analyzer {
    pub fn new(
        cache: Arc<AstCache>,
        registries: Arc<Registries>,
        config: &ArchConfig,
        cancel: CancelFlag,
    ) -> Self {
        Analyzer {
            cache,
            registries,
            parallelism: config.effective_parallelism(),
            cancel,
        }
    }

    pub fn cache(&self) -> &Arc<AstCache> {
        &self.cache
    }

    /// Analyse one file through the full state machine.
    pub fn analyze_file(&self, path: &Path) -> Result<FileOutcome, AnalyzeError> {
        if self.cancel.is_cancelled() {
            return Err(AnalyzeError::Cancelled);
        }

        if !self.cache.needs_reanalysis(path)? {
            let nodes = self
                .cache
                .get_ast_nodes_by_file(&path.to_string_lossy())?;
            if !nodes.is_empty() {
                tracing::debug!(file = %path.display(), "cache fresh, skipping extraction");
                return Ok(FileOutcome::Cached { nodes: nodes.len() });
            }
            // Metadata said fresh but the graph is gone; re-extract.
        }

        let Some((extractor, language)) = self.registries.extractors.for_file(path) else {
            return Ok(FileOutcome::SkippedNoExtractor);
        };

        let content = std::fs::read(path).map_err(ExtractorError::Io)?;
        match extractor.extract_file(self.cache.as_ref(), path, &content) {
            Ok(mut result) => {
                if let Ok((mtime, _)) = fs_utils::file_identity(path) {
                    for node in &mut result.nodes {
                        node.last_modified = Some(mtime);
                    }
                }
                let stats = self.cache.persist_file_graph(&result)?;
                self.cache.update_file_metadata(path)?;
                tracing::debug!(
                    file = %path.display(),
                    language,
                    nodes = stats.nodes,
                    relationships = stats.relationships,
                    "analyzed"
                );
                Ok(FileOutcome::Analyzed { stats })
            }
            Err(ExtractorError::ToolchainMissing(tool)) => {
                tracing::warn!(file = %path.display(), tool, "parser runtime missing, skipping file");
                Ok(FileOutcome::SkippedToolchainMissing { tool })
            }
            Err(ExtractorError::Cancelled) => Err(AnalyzeError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// Rule-mode analysis: run the extractor and return the ephemeral
    /// result without touching the cache.
    pub fn analyze_file_ephemeral(&self, path: &Path) -> Result<Option<AstResult>, ExtractorError> {
        let Some((extractor, _)) = self.registries.extractors.for_file(path) else {
            return Ok(None);
        };
        let content = std::fs::read(path)?;
        extractor
            .extract_file(&EmptyCacheView, path, &content)
            .map(Some)
    }

    /// Analyse many files on a worker pool. Per-file failures are
    /// recorded and the run continues; cancellation stops scheduling new
    /// files.
    pub fn analyze_paths(&self, files: &[PathBuf]) -> AnalysisReport {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .build();
        let outcomes: Vec<(String, Result<FileOutcome, AnalyzeError>)> = match pool {
            Ok(pool) => pool.install(|| {
                files
                    .par_iter()
                    .map(|path| (path.display().to_string(), self.analyze_file(path)))
                    .collect()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "worker pool unavailable, analysing serially");
                files
                    .iter()
                    .map(|path| (path.display().to_string(), self.analyze_file(path)))
                    .collect()
            }
        };

        let mut report = AnalysisReport::default();
        for (file, outcome) in outcomes {
            match outcome {
                Ok(FileOutcome::Analyzed { .. }) => report.analyzed += 1,
                Ok(FileOutcome::Cached { .. }) => report.cached += 1,
                Ok(FileOutcome::SkippedNoExtractor)
                | Ok(FileOutcome::SkippedToolchainMissing { .. }) => report.skipped += 1,
                Err(AnalyzeError::Cancelled) => report.cancelled = true,
                Err(e) => report.failed.push((file, e.to_string())),
            }
        }
        report
    }

    /// Gather and analyse every supported file under `root`.
    pub fn analyze_root(&self, root: &Path) -> AnalysisReport {
        let extensions: HashSet<String> =
            known_extensions().iter().map(|e| e.to_string()).collect();
        let files = fs_utils::gather_files(root, Some(&extensions));
        tracing::info!(root = %root.display(), files = files.len(), "starting analysis");
        self.analyze_paths(&files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registries;

    fn analyzer() -> (Analyzer, Arc<AstCache>) {
        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        let registries = Arc::new(default_registries(&ArchConfig::default(), CancelFlag::new()));
        let analyzer = Analyzer::new(
            Arc::clone(&cache),
            registries,
            &ArchConfig { parallelism: 2, ..ArchConfig::default() },
            CancelFlag::new(),
        );
        (analyzer, cache)
    }

    #[test]
    fn analyze_then_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main\n\nfunc main() {\n\tprintln(\"x\")\n}\n").unwrap();

        let (analyzer, cache) = analyzer();
        let first = analyzer.analyze_file(&file).unwrap();
        assert!(matches!(first, FileOutcome::Analyzed { .. }));
        assert!(!cache.needs_reanalysis(&file).unwrap());

        let second = analyzer.analyze_file(&file).unwrap();
        assert!(matches!(second, FileOutcome::Cached { .. }));
    }

    #[test]
    fn edit_invalidates_and_keeps_surviving_ids() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.go");
        std::fs::write(&file, "package lib\n\nfunc Keep() {}\n").unwrap();

        let (analyzer, cache) = analyzer();
        analyzer.analyze_file(&file).unwrap();
        let file_key = file.to_string_lossy().to_string();
        let keep_id = cache
            .get_ast_nodes_by_file(&file_key)
            .unwrap()
            .into_iter()
            .find(|n| n.key.method_name == "Keep")
            .and_then(|n| n.id)
            .unwrap();

        std::fs::write(&file, "package lib\n\nfunc Keep() {}\n\nfunc Added() {}\n").unwrap();
        let outcome = analyzer.analyze_file(&file).unwrap();
        assert!(matches!(outcome, FileOutcome::Analyzed { .. }));

        let nodes = cache.get_ast_nodes_by_file(&file_key).unwrap();
        let keep = nodes.iter().find(|n| n.key.method_name == "Keep").unwrap();
        assert_eq!(keep.id, Some(keep_id));
        assert!(nodes.iter().any(|n| n.key.method_name == "Added"));
    }

    #[test]
    fn unsupported_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("style.css");
        std::fs::write(&file, "body {}\n").unwrap();

        let (analyzer, _) = analyzer();
        let outcome = analyzer.analyze_file(&file).unwrap();
        assert!(matches!(outcome, FileOutcome::SkippedNoExtractor));
    }

    #[test]
    fn parse_failure_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.go");
        std::fs::write(&file, "func orphan() {}\n").unwrap(); // no package clause

        let (analyzer, cache) = analyzer();
        assert!(analyzer.analyze_file(&file).is_err());
        assert!(cache
            .get_ast_nodes_by_file(&file.to_string_lossy())
            .unwrap()
            .is_empty());
        assert!(cache.needs_reanalysis(&file).unwrap());
    }

    #[test]
    fn cancellation_stops_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main\n").unwrap();

        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        let cancel = CancelFlag::new();
        let registries = Arc::new(default_registries(&ArchConfig::default(), cancel.clone()));
        let analyzer = Analyzer::new(
            Arc::clone(&cache),
            registries,
            &ArchConfig::default(),
            cancel.clone(),
        );
        cancel.cancel();
        assert!(matches!(
            analyzer.analyze_file(&file),
            Err(AnalyzeError::Cancelled)
        ));
    }

    #[test]
    fn analyze_paths_reports_mixed_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.go"), "package ok\n\nfunc Run() {}\n").unwrap();
        std::fs::write(dir.path().join("bad.go"), "not go at all\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# Title\n").unwrap();

        let (analyzer, _) = analyzer();
        let report = analyzer.analyze_root(dir.path());
        assert_eq!(report.analyzed, 2); // ok.go + README.md
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("bad.go"));
    }

    #[test]
    fn ephemeral_analysis_does_not_persist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main\n\nfunc main() {}\n").unwrap();

        let (analyzer, cache) = analyzer();
        let result = analyzer.analyze_file_ephemeral(&file).unwrap().unwrap();
        assert!(!result.nodes.is_empty());
        assert!(cache
            .get_ast_nodes_by_file(&file.to_string_lossy())
            .unwrap()
            .is_empty());
    }
}
