//! AST extractors, one per language.
//!
//! An extractor is a pure transformation `(read-only cache view, path,
//! bytes) -> AstResult`: deterministic for equal bytes, never writing to
//! the cache. The generic analyzer owns persisting the result.
//!
//! # Submodules
//!
//! - [`go`] - in-process Go extraction
//! - [`python`] - external `python3` parser via the subprocess contract
//! - [`javascript`] - external `node` parser (also handles TypeScript)
//! - [`java`] - external parser binary via the subprocess contract
//! - [`markdown`] - heading/fence structure extraction
//! - [`subprocess`] - the shared JSON child-process transport

pub mod go;
pub mod java;
pub mod javascript;
pub mod markdown;
pub mod python;
pub mod subprocess;

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::CacheView;
use crate::error::ExtractorError;
use crate::types::{AstNode, NodeKey, NodeKind, RelationshipKind};

/// A relationship produced by an extractor, endpoints addressed by key.
///
/// `from_key` is mandatory: every relationship names the node it was
/// observed in. `to_key` is `None` for targets outside the analysed file;
/// the raw evidence stays in `text`.
#[derive(Debug, Clone)]
pub struct PendingRelationship {
    pub from_key: NodeKey,
    pub to_key: Option<NodeKey>,
    pub line: u32,
    pub kind: RelationshipKind,
    pub text: String,
}

/// A reference to an external library symbol, produced by an extractor.
#[derive(Debug, Clone)]
pub struct LibraryRef {
    pub from_key: NodeKey,
    pub package: String,
    pub class: String,
    pub method: String,
    /// Origin tag: `stdlib`, `third-party`, or a named framework.
    pub framework: String,
    /// Kind of the referenced library symbol.
    pub kind: NodeKind,
    pub rel_kind: RelationshipKind,
    pub line: u32,
    pub text: String,
}

/// The normalised output of one file extraction. Owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct AstResult {
    pub file_path: String,
    pub language: String,
    pub package_name: Option<String>,
    pub nodes: Vec<AstNode>,
    pub relationships: Vec<PendingRelationship>,
    pub libraries: Vec<LibraryRef>,
}

impl AstResult {
    pub fn new(file_path: impl Into<String>, language: impl Into<String>) -> Self {
        AstResult {
            file_path: file_path.into(),
            language: language.into(),
            ..Default::default()
        }
    }
}

/// The per-language extraction capability. Registered in the extractor
/// registry and dispatched by file extension.
pub trait Extractor: Send + Sync {
    /// Canonical lowercase language label (`go`, `python`, ...).
    fn language(&self) -> &'static str;

    /// File extensions (without dot) this extractor accepts.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Extract the AST graph of one file.
    fn extract_file(
        &self,
        cache: &dyn CacheView,
        path: &Path,
        content: &[u8],
    ) -> Result<AstResult, ExtractorError>;
}

static SHORT_CIRCUIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"&&|\|\|").expect("static regex"));

/// Count decision points in a code snippet: one per branching keyword plus
/// one per short-circuit operator. Cyclomatic complexity is this plus one,
/// so a straight-line body scores 1.
pub(crate) fn decision_points(body: &str, keywords: &[&str]) -> u32 {
    let mut count = 0u32;
    for keyword in keywords {
        let pattern = format!(r"\b{}\b", regex::escape(keyword));
        // Keyword sets are tiny and static; compile cost is irrelevant
        // next to the I/O around an extraction.
        if let Ok(re) = Regex::new(&pattern) {
            count += re.find_iter(body).count() as u32;
        }
    }
    count + SHORT_CIRCUIT.find_iter(body).count() as u32
}

/// Decode extractor input as UTF-8, surfacing a parse failure on binary
/// garbage instead of silently lossy-decoding it.
pub(crate) fn decode_utf8<'a>(path: &Path, content: &'a [u8]) -> Result<&'a str, ExtractorError> {
    std::str::from_utf8(content).map_err(|e| {
        ExtractorError::parse_failed(path.to_string_lossy(), format!("not valid UTF-8: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_points_counts_keywords_and_short_circuits() {
        let body = "if a && b { } for i := range xs { if done || failed { } }";
        // two ifs, one for, one &&, one ||
        assert_eq!(decision_points(body, &["if", "for", "case"]), 5);
    }

    #[test]
    fn decision_points_ignores_identifiers_containing_keywords() {
        let body = "verify(iffy, forbidden)";
        assert_eq!(decision_points(body, &["if", "for"]), 0);
    }
}
