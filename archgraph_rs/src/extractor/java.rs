//! Java extraction via the bundled parser binary.
//!
//! The binary speaks the same JSON contract as the script-based parsers;
//! it is located on PATH (or via `ARCHGRAPH_JAVA_PARSER`) and its absence
//! skips Java files rather than failing the scan. Visibility maps onto
//! the single `is_private` flag: only `private` is private.

use std::path::Path;
use std::time::Duration;

use crate::cache::CacheView;
use crate::error::ExtractorError;
use crate::types::CancelFlag;

use super::subprocess::{normalize_payload, run_parser};
use super::{AstResult, Extractor};

const PARSER_ENV: &str = "ARCHGRAPH_JAVA_PARSER";
const DEFAULT_PARSER: &str = "archgraph-java-parser";

fn classify_package(package: &str) -> &'static str {
    if package.starts_with("java.") || package.starts_with("javax.") || package == "java" {
        return "stdlib";
    }
    if package.starts_with("org.springframework") {
        return "spring";
    }
    if package.starts_with("jakarta.") {
        return "jakarta";
    }
    "third-party"
}

/// Extractor for `.java` sources.
#[derive(Debug)]
pub struct JavaExtractor {
    timeout: Duration,
    cancel: CancelFlag,
}

impl Default for JavaExtractor {
    fn default() -> Self {
        JavaExtractor::new(Duration::from_secs(30), CancelFlag::new())
    }
}

impl JavaExtractor {
    pub fn new(timeout: Duration, cancel: CancelFlag) -> Self {
        JavaExtractor { timeout, cancel }
    }

    fn parser_program() -> String {
        std::env::var(PARSER_ENV).unwrap_or_else(|_| DEFAULT_PARSER.to_string())
    }
}

impl Extractor for JavaExtractor {
    fn language(&self) -> &'static str {
        "java"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn extract_file(
        &self,
        _cache: &dyn CacheView,
        path: &Path,
        content: &[u8],
    ) -> Result<AstResult, ExtractorError> {
        let program = Self::parser_program();
        let payload = run_parser(&program, None, path, content, self.timeout, &self.cancel)?;
        Ok(normalize_payload(path, "java", payload, &classify_package))
    }
}
