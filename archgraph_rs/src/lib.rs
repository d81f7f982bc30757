//! # archgraph
//!
//! **Multi-language source indexer with architecture rules** - extracts a
//! uniform AST graph (nodes, typed relationships, library references)
//! from Go, Python, JavaScript/TypeScript, Java and Markdown sources,
//! keeps it in an incremental SQLite cache keyed by file identity, scans
//! build manifests for third-party dependencies with resolved repository
//! URLs, and evaluates architecture rules against the stored graph.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use archgraph::{analyzer::Analyzer, cache::AstCache, config::ArchConfig,
//!                 registry::default_registries, types::CancelFlag};
//!
//! let root = Path::new(".");
//! let config = ArchConfig::load(root);
//! let cancel = CancelFlag::new();
//! let cache = Arc::new(AstCache::open_for_project(root).unwrap());
//! let registries = Arc::new(default_registries(&config, cancel.clone()));
//!
//! let analyzer = Analyzer::new(cache, registries, &config, cancel);
//! let report = analyzer.analyze_root(root);
//! println!("analyzed {} files", report.analyzed);
//! ```
//!
//! ## Checking rules
//!
//! ```rust,no_run
//! use std::path::Path;
//! use archgraph::{cache::AstCache, rules};
//!
//! let root = Path::new(".");
//! let cache = AstCache::open_for_project(root).unwrap();
//! let tree = rules::load_rule_tree(root).unwrap();
//! for violation in rules::check_calls(&cache, &tree, None).unwrap() {
//!     println!("{}:{} {}", violation.file, violation.line, violation.message);
//! }
//! ```

/// Generic per-file analysis orchestration: staleness check, extractor
/// dispatch, transactional persist, parallel driver.
pub mod analyzer;

/// The SQLite-backed AST graph cache and the dependency-alias table.
pub mod cache;

/// Optional `.archgraph/config.toml` support.
pub mod config;

/// Tagged error kinds shared across the crate.
pub mod error;

/// Per-language AST extractors and the subprocess parser transport.
pub mod extractor;

/// Filesystem utilities: project walking and content hashing.
pub mod fs_utils;

/// Extractor and dependency-scanner registries with pattern dispatch.
pub mod registry;

/// Git URL resolution with HEAD validation, rate limiting and TTL cache.
pub mod resolve;

/// `.ARCHUNIT` rules and the two rule engines.
pub mod rules;

/// Per-ecosystem build-manifest dependency scanners.
pub mod scanner;

/// Common types: nodes, keys, relationships, dependencies, violations.
pub mod types;

/// Synthetic `sql://`, `openapi://` and `virtual://` paths.
pub mod vpath;

pub use analyzer::{AnalysisReport, Analyzer, FileOutcome};
pub use cache::AstCache;
pub use config::ArchConfig;
pub use registry::{Registries, default_registries};
pub use resolve::GitUrlResolver;
pub use types::{CancelFlag, Dependency, DependencyType, Violation, ViolationSource};
