//! Python extraction via an external `python3` child process.
//!
//! The helper script (embedded at build time) walks the stdlib `ast`
//! module and prints the JSON parser contract on stdout. A machine
//! without `python3` skips Python files with a warning.

use std::path::Path;
use std::time::Duration;

use crate::cache::CacheView;
use crate::error::ExtractorError;
use crate::types::CancelFlag;

use super::subprocess::{normalize_payload, run_parser};
use super::{AstResult, Extractor};

const PARSER_SCRIPT: &str = include_str!("../../assets/ast_parser.py");

/// Modules shipped with CPython. Not exhaustive; unknown modules fall
/// back to `third-party`, which is the safe direction.
const PY_STDLIB: &[&str] = &[
    "abc", "argparse", "asyncio", "base64", "collections", "contextlib", "copy", "csv",
    "dataclasses", "datetime", "enum", "functools", "glob", "hashlib", "http", "io", "itertools",
    "json", "logging", "math", "os", "pathlib", "random", "re", "shutil", "socket", "sqlite3",
    "string", "struct", "subprocess", "sys", "tempfile", "threading", "time", "typing",
    "unittest", "urllib", "uuid", "xml",
];

const PY_FRAMEWORKS: [(&str, &str); 5] = [
    ("django", "django"),
    ("flask", "flask"),
    ("fastapi", "fastapi"),
    ("pytest", "pytest"),
    ("celery", "celery"),
];

fn classify_module(module: &str) -> &'static str {
    let root = module.split('.').next().unwrap_or(module);
    for (prefix, framework) in PY_FRAMEWORKS {
        if root == prefix {
            return framework;
        }
    }
    if PY_STDLIB.contains(&root) { "stdlib" } else { "third-party" }
}

/// Extractor for `.py` sources.
#[derive(Debug)]
pub struct PythonExtractor {
    timeout: Duration,
    cancel: CancelFlag,
}

impl Default for PythonExtractor {
    fn default() -> Self {
        PythonExtractor::new(Duration::from_secs(30), CancelFlag::new())
    }
}

impl PythonExtractor {
    pub fn new(timeout: Duration, cancel: CancelFlag) -> Self {
        PythonExtractor { timeout, cancel }
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> &'static str {
        "python"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn extract_file(
        &self,
        _cache: &dyn CacheView,
        path: &Path,
        content: &[u8],
    ) -> Result<AstResult, ExtractorError> {
        let payload = run_parser(
            "python3",
            Some(("ast_parser.py", PARSER_SCRIPT)),
            path,
            content,
            self.timeout,
            &self.cancel,
        )?;
        Ok(normalize_payload(path, "python", payload, &classify_module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_modules() {
        assert_eq!(classify_module("os"), "stdlib");
        assert_eq!(classify_module("os.path"), "stdlib");
        assert_eq!(classify_module("django.db"), "django");
        assert_eq!(classify_module("requests"), "third-party");
    }
}
