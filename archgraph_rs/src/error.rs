//! Tagged error kinds.
//!
//! Callers branch on variants, never on message text. Rule violations are
//! data, not errors; nothing in here models a failed rule check.

use thiserror::Error;

/// Errors produced by extractors.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Malformed input. The file is skipped and the cache is left untouched.
    #[error("parse failed for {path}: {details}")]
    ParseFailed { path: String, details: String },

    /// The external parser runtime is not installed. Skip with a warning,
    /// not a scan failure.
    #[error("parser toolchain missing: {0}")]
    ToolchainMissing(String),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractorError {
    pub fn parse_failed(path: impl Into<String>, details: impl Into<String>) -> Self {
        ExtractorError::ParseFailed {
            path: path.into(),
            details: details.into(),
        }
    }
}

/// Persistence failures. Fatal for the current file only; the store rolls
/// back and the scan continues.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned by lookups that require a row to exist. Plain absence is
    /// reported as `Ok(None)` by the `get_*` operations instead.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors produced by dependency scanners.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("manifest parse failed for {path}: {details}")]
    ParseFailed { path: String, details: String },

    #[error("scan cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn parse_failed(path: impl Into<String>, details: impl Into<String>) -> Self {
        ScanError::ParseFailed {
            path: path.into(),
            details: details.into(),
        }
    }
}

/// Errors from the Git URL resolution service. Both network and HTTP
/// failures are treated as "URL invalid" by callers; an empty result is
/// cached to suppress retries inside the TTL window.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("network error: {0}")]
    Network(String),

    #[error("http status {0}")]
    HttpStatus(u16),

    #[error("resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Rule loading failures. A syntax error cancels the whole scan before any
/// analysis work runs.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule syntax error at {file}:{line}: {details}")]
    Syntax {
        file: String,
        line: usize,
        details: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file analysis failures, as surfaced by the generic analyzer.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("analysis cancelled")]
    Cancelled,
}
