//! Go module scanning: `go.mod` and `go.sum`.

use std::path::Path;

use crate::error::ScanError;
use crate::types::{Dependency, DependencyType};

use super::{DependencyScanner, ScanContext};

/// Scanner for the Go module ecosystem.
#[derive(Debug, Default)]
pub struct GoScanner;

/// `golang.org/x/*` is maintained by the Go team; classify it as stdlib
/// rather than a third-party module.
fn classify(name: &str) -> DependencyType {
    if name.starts_with("golang.org/x/") {
        DependencyType::Stdlib
    } else {
        DependencyType::Go
    }
}

impl DependencyScanner for GoScanner {
    fn language(&self) -> &'static str {
        "go"
    }

    fn manifest_globs(&self) -> &'static [&'static str] {
        &["go.mod", "go.sum"]
    }

    fn scan_file(
        &self,
        context: &ScanContext,
        path: &Path,
        content: &[u8],
    ) -> Result<Vec<Dependency>, ScanError> {
        if context.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let source = String::from_utf8_lossy(content);
        let manifest = path.to_string_lossy().to_string();

        let deps = match path.file_name().and_then(|n| n.to_str()) {
            Some("go.mod") => scan_go_mod(&source, &manifest),
            Some("go.sum") => scan_go_sum(&source, &manifest),
            _ => Vec::new(),
        };
        Ok(context.apply_filter(deps))
    }
}

fn scan_go_mod(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    let mut in_require = false;
    let mut in_replace = false;

    for line in source.lines() {
        let trimmed = line.split("//").next().unwrap_or("").trim();
        let indirect = line.contains("// indirect");
        if trimmed.is_empty() {
            continue;
        }

        if trimmed == "require (" {
            in_require = true;
            continue;
        }
        if trimmed == "replace (" {
            in_replace = true;
            continue;
        }
        if (in_require || in_replace) && trimmed == ")" {
            in_require = false;
            in_replace = false;
            continue;
        }

        if in_replace || trimmed.starts_with("replace ") {
            let spec = trimmed.strip_prefix("replace ").unwrap_or(trimmed);
            apply_replace(spec, &mut deps, manifest);
            continue;
        }

        let spec = if in_require {
            trimmed
        } else if let Some(rest) = trimmed.strip_prefix("require ") {
            rest
        } else {
            continue;
        };

        let mut parts = spec.split_whitespace();
        let (Some(name), Some(version)) = (parts.next(), parts.next()) else {
            tracing::debug!(line = trimmed, "skipping malformed require line");
            continue;
        };
        let mut dep = Dependency::new(name, version, classify(name), manifest);
        dep.indirect = indirect;
        deps.push(dep);
    }
    deps
}

/// Apply a `replace` directive. Local path replacements keep the original
/// module name and encode the target as `local:<path>`.
fn apply_replace(spec: &str, deps: &mut Vec<Dependency>, manifest: &str) {
    let Some((from, to)) = spec.split_once("=>") else {
        return;
    };
    let from_name = from.split_whitespace().next().unwrap_or("").to_string();
    if from_name.is_empty() {
        return;
    }
    let mut to_parts = to.split_whitespace();
    let (target, target_version) = (to_parts.next().unwrap_or(""), to_parts.next());

    let version = if target.starts_with('.') || target.starts_with('/') {
        format!("local:{target}")
    } else if let Some(v) = target_version {
        v.to_string()
    } else {
        target.to_string()
    };

    match deps.iter_mut().find(|d| d.name == from_name) {
        Some(existing) => existing.version = version,
        None => {
            deps.push(Dependency::new(
                &from_name,
                version,
                classify(&from_name),
                manifest,
            ));
        }
    }
}

/// go.sum lists every module hash; keep one entry per (name, version),
/// skipping the `/go.mod` hash lines.
fn scan_go_sum(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    for line in source.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(version)) = (parts.next(), parts.next()) else {
            continue;
        };
        let version = version.trim_end_matches("/go.mod");
        if deps
            .iter()
            .any(|d| d.name == name && d.version == version)
        {
            continue;
        }
        deps.push(Dependency::new(name, version, classify(name), manifest));
    }
    deps
}
