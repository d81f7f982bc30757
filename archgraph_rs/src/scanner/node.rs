//! Node ecosystem scanning: `package.json` and the three lockfile
//! dialects (`package-lock.json`, `yarn.lock`, `pnpm-lock.yaml`).

use std::path::Path;

use serde_json::Value as JsonValue;

use crate::error::ScanError;
use crate::types::{Dependency, DependencyType};

use super::{DependencyScanner, ScanContext, strip_semver_prefix};

/// Scanner for npm-style manifests and lockfiles.
#[derive(Debug, Default)]
pub struct NodeScanner;

impl DependencyScanner for NodeScanner {
    fn language(&self) -> &'static str {
        "npm"
    }

    fn manifest_globs(&self) -> &'static [&'static str] {
        &["package.json", "package-lock.json", "yarn.lock", "pnpm-lock.yaml"]
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
        let manifest = path.to_string_lossy().to_string();
        let deps = match path.file_name().and_then(|n| n.to_str()) {
            Some("package.json") => scan_package_json(content, &manifest)?,
            Some("package-lock.json") => scan_package_lock(content, &manifest)?,
            Some("yarn.lock") => scan_yarn_lock(&String::from_utf8_lossy(content), &manifest),
            Some("pnpm-lock.yaml") => scan_pnpm_lock(&String::from_utf8_lossy(content), &manifest),
            _ => Vec::new(),
        };
        Ok(context.apply_filter(deps))
    }
}

fn scan_package_json(content: &[u8], manifest: &str) -> Result<Vec<Dependency>, ScanError> {
    let json: JsonValue = serde_json::from_slice(content)
        .map_err(|e| ScanError::parse_failed(manifest, e.to_string()))?;
    let mut deps = Vec::new();
    for (section, indirect) in [("dependencies", false), ("devDependencies", false)] {
        let Some(map) = json.get(section).and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, version) in map {
            let version = version.as_str().unwrap_or("");
            let mut dep = Dependency::new(
                name,
                strip_semver_prefix(version),
                DependencyType::Npm,
                manifest,
            );
            dep.indirect = indirect;
            deps.push(dep);
        }
    }
    Ok(deps)
}

/// npm v7+ lockfiles carry a `packages` map keyed by install path;
/// older files only have the recursive `dependencies` tree. Prefer the
/// former, fall back to the top level of the latter.
fn scan_package_lock(content: &[u8], manifest: &str) -> Result<Vec<Dependency>, ScanError> {
    let json: JsonValue = serde_json::from_slice(content)
        .map_err(|e| ScanError::parse_failed(manifest, e.to_string()))?;
    let mut deps = Vec::new();

    if let Some(packages) = json.get("packages").and_then(|v| v.as_object()) {
        for (install_path, entry) in packages {
            if install_path.is_empty() {
                continue; // the root project itself
            }
            let Some(name) = install_path
                .rsplit_once("node_modules/")
                .map(|(_, name)| name)
            else {
                continue;
            };
            let version = entry.get("version").and_then(|v| v.as_str()).unwrap_or("");
            let mut dep = Dependency::new(name, version, DependencyType::Npm, manifest);
            dep.indirect = install_path.matches("node_modules/").count() > 1;
            deps.push(dep);
        }
        return Ok(deps);
    }

    if let Some(dependencies) = json.get("dependencies").and_then(|v| v.as_object()) {
        for (name, entry) in dependencies {
            let version = entry.get("version").and_then(|v| v.as_str()).unwrap_or("");
            deps.push(Dependency::new(name, version, DependencyType::Npm, manifest));
        }
    }
    Ok(deps)
}

/// yarn.lock entries look like:
///
/// ```text
/// "@scope/pkg@^1.0.0", "@scope/pkg@^1.2.0":
///   version "1.2.3"
/// ```
fn scan_yarn_lock(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    let mut current: Option<String> = None;

    for line in source.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') && line.trim_end().ends_with(':') {
            let first_spec = line
                .trim_end()
                .trim_end_matches(':')
                .split(',')
                .next()
                .unwrap_or("")
                .trim()
                .trim_matches('"');
            current = yarn_entry_name(first_spec);
            continue;
        }
        if let Some(name) = &current
            && let Some(version) = line.trim().strip_prefix("version")
        {
            let version = version.trim().trim_matches('"');
            if !deps.iter().any(|d| d.name == *name && d.version == version) {
                deps.push(Dependency::new(name, version, DependencyType::Npm, manifest));
            }
            current = None;
        }
    }
    deps
}

/// `@scope/pkg@^1.0.0` -> `@scope/pkg`; `pkg@1.x` -> `pkg`.
fn yarn_entry_name(spec: &str) -> Option<String> {
    let at = spec.rfind('@')?;
    if at == 0 {
        return None;
    }
    Some(spec[..at].to_string())
}

/// pnpm lockfiles key the `packages:` section either as `/name/version:`
/// (v6) or `name@version:` (v9). Both are line-parseable without a YAML
/// dependency.
fn scan_pnpm_lock(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    let mut in_packages = false;

    for line in source.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') {
            in_packages = line.trim_end() == "packages:";
            continue;
        }
        if !in_packages {
            continue;
        }
        let trimmed = line.trim();
        if !trimmed.ends_with(':') || line.starts_with("    ") {
            continue;
        }
        let spec = trimmed.trim_end_matches(':').trim_matches('\'').trim_matches('"');
        let parsed = if let Some(rest) = spec.strip_prefix('/') {
            rest.rsplit_once('/')
                .map(|(name, version)| (name.to_string(), version.to_string()))
        } else {
            spec.rfind('@').filter(|at| *at > 0).map(|at| {
                (spec[..at].to_string(), spec[at + 1..].to_string())
            })
        };
        let Some((name, version)) = parsed else {
            continue;
        };
        // pnpm encodes peer info after the version in parentheses.
        let version = version.split('(').next().unwrap_or(&version).to_string();
        if !deps.iter().any(|d| d.name == name && d.version == version) {
            deps.push(Dependency::new(name, version, DependencyType::Npm, manifest));
        }
    }
    deps
}
