//! JavaScript and TypeScript extraction via an external `node` process.
//!
//! One extractor serves both languages; the helper script tolerates the
//! TypeScript syntax it needs to (type annotations are stripped before
//! structure scanning, not type-checked).

use std::path::Path;
use std::time::Duration;

use crate::cache::CacheView;
use crate::error::ExtractorError;
use crate::types::CancelFlag;

use super::subprocess::{normalize_payload, run_parser};
use super::{AstResult, Extractor};

const PARSER_SCRIPT: &str = include_str!("../../assets/ast_parser.js");

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dns", "events", "fs", "http",
    "https", "net", "os", "path", "process", "querystring", "readline", "stream",
    "string_decoder", "timers", "tls", "url", "util", "worker_threads", "zlib",
];

const JS_FRAMEWORKS: [(&str, &str); 6] = [
    ("react", "react"),
    ("express", "express"),
    ("vue", "vue"),
    ("next", "next"),
    ("angular", "angular"),
    ("svelte", "svelte"),
];

fn classify_module(module: &str) -> &'static str {
    let bare = module.strip_prefix("node:").unwrap_or(module);
    let root = bare.split('/').next().unwrap_or(bare);
    if module.starts_with("node:") || NODE_BUILTINS.contains(&root) {
        return "stdlib";
    }
    let root = root.trim_start_matches('@');
    for (prefix, framework) in JS_FRAMEWORKS {
        if root == prefix || root.starts_with(&format!("{prefix}-")) {
            return framework;
        }
    }
    "third-party"
}

/// Extractor for `.js`, `.ts`, `.jsx` and `.tsx` sources.
#[derive(Debug)]
pub struct JavaScriptExtractor {
    timeout: Duration,
    cancel: CancelFlag,
}

impl Default for JavaScriptExtractor {
    fn default() -> Self {
        JavaScriptExtractor::new(Duration::from_secs(30), CancelFlag::new())
    }
}

impl JavaScriptExtractor {
    pub fn new(timeout: Duration, cancel: CancelFlag) -> Self {
        JavaScriptExtractor { timeout, cancel }
    }
}

impl Extractor for JavaScriptExtractor {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["js", "ts", "jsx", "tsx"]
    }

    fn extract_file(
        &self,
        _cache: &dyn CacheView,
        path: &Path,
        content: &[u8],
    ) -> Result<AstResult, ExtractorError> {
        let payload = run_parser(
            "node",
            Some(("ast_parser.js", PARSER_SCRIPT)),
            path,
            content,
            self.timeout,
            &self.cancel,
        )?;
        Ok(normalize_payload(path, "javascript", payload, &classify_module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_modules() {
        assert_eq!(classify_module("fs"), "stdlib");
        assert_eq!(classify_module("node:fs/promises"), "stdlib");
        assert_eq!(classify_module("react"), "react");
        assert_eq!(classify_module("react-dom"), "react");
        assert_eq!(classify_module("@angular/core"), "angular");
        assert_eq!(classify_module("lodash"), "third-party");
    }
}
