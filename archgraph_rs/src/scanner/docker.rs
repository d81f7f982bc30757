//! Container image scanning: Dockerfiles and compose files.
//!
//! Every `FROM` stage of a Dockerfile and every `image:` entry of a
//! compose file becomes a dependency of type `docker`, named by the
//! image reference without its tag (the tag is the version).

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ScanError;
use crate::types::{Dependency, DependencyType};

use super::{DependencyScanner, ScanContext};

static FROM_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*FROM\s+(?:--platform=\S+\s+)?(\S+)").expect("static regex")
});

static COMPOSE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*image:\s*['"]?([^'"\s]+)"#).expect("static regex"));

/// Scanner for container build and compose manifests.
#[derive(Debug, Default)]
pub struct DockerScanner;

impl DependencyScanner for DockerScanner {
    fn language(&self) -> &'static str {
        "docker"
    }

    fn manifest_globs(&self) -> &'static [&'static str] {
        &["Dockerfile", "Dockerfile.*", "docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"]
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
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        let deps = if name.starts_with("Dockerfile") {
            scan_dockerfile(&source, &manifest)
        } else {
            scan_compose(&source, &manifest)
        };
        Ok(context.apply_filter(deps))
    }
}

/// `image[:tag]` -> `(image, tag)`. Digest references keep the digest as
/// the version.
fn split_image_ref(reference: &str) -> (String, String) {
    if let Some((image, digest)) = reference.split_once('@') {
        return (image.to_string(), digest.to_string());
    }
    // The last colon separates the tag unless it belongs to a registry
    // port (a slash after it).
    match reference.rfind(':') {
        Some(pos) if !reference[pos + 1..].contains('/') => (
            reference[..pos].to_string(),
            reference[pos + 1..].to_string(),
        ),
        _ => (reference.to_string(), String::new()),
    }
}

fn scan_dockerfile(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    let mut stage_names: Vec<String> = Vec::new();

    for caps in FROM_LINE.captures_iter(source) {
        let reference = &caps[1];
        // `FROM builder` referencing an earlier `AS builder` stage is
        // not an external image.
        if stage_names.iter().any(|s| s.eq_ignore_ascii_case(reference)) {
            continue;
        }
        if reference.eq_ignore_ascii_case("scratch") {
            continue;
        }
        let (image, tag) = split_image_ref(reference);
        if !deps.iter().any(|d| d.name == image && d.version == tag) {
            deps.push(Dependency::new(image, tag, DependencyType::Docker, manifest));
        }

        // Track stage aliases following this FROM.
        let line_start = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let rest_of_line = source[line_start..].lines().next().unwrap_or("");
        if let Some(alias) = rest_of_line
            .split_whitespace()
            .skip_while(|w| !w.eq_ignore_ascii_case("as"))
            .nth(1)
        {
            stage_names.push(alias.to_string());
        }
    }
    deps
}

fn scan_compose(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    for caps in COMPOSE_IMAGE.captures_iter(source) {
        let (image, tag) = split_image_ref(&caps[1]);
        if !deps.iter().any(|d| d.name == image && d.version == tag) {
            deps.push(Dependency::new(image, tag, DependencyType::Docker, manifest));
        }
    }
    deps
}
