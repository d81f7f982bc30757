//! Helm chart scanning: `Chart.yaml` (v3) and `requirements.yaml` (v2).
//!
//! Both formats list subchart dependencies as a YAML sequence of
//! `name`/`version`/`repository` entries; the repository URL lands in
//! the dependency's `homepage`.

use std::path::Path;

use crate::error::ScanError;
use crate::types::{Dependency, DependencyType};

use super::{DependencyScanner, ScanContext};

/// Scanner for Helm chart manifests.
#[derive(Debug, Default)]
pub struct HelmScanner;

impl DependencyScanner for HelmScanner {
    fn language(&self) -> &'static str {
        "helm"
    }

    fn manifest_globs(&self) -> &'static [&'static str] {
        &["Chart.yaml", "Chart.yml", "requirements.yaml", "requirements.yml"]
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
        Ok(context.apply_filter(scan_chart(&source, &manifest)))
    }
}

fn yaml_value(line: &str, key: &str) -> Option<String> {
    let trimmed = line.trim().trim_start_matches("- ").trim_start();
    trimmed
        .strip_prefix(key)?
        .strip_prefix(':')
        .map(|v| v.trim().trim_matches(&['"', '\''][..]).to_string())
}

fn scan_chart(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    let mut in_dependencies = false;
    let mut current: Option<Dependency> = None;

    for line in source.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t') || line.starts_with('-');
        if !indented {
            if let Some(dep) = current.take() {
                deps.push(dep);
            }
            in_dependencies = line.trim_end() == "dependencies:";
            continue;
        }
        if !in_dependencies {
            continue;
        }

        if line.trim_start().starts_with("- ") {
            if let Some(dep) = current.take() {
                deps.push(dep);
            }
            current = Some(Dependency::new(
                String::new(),
                String::new(),
                DependencyType::Helm,
                manifest,
            ));
        }
        let Some(dep) = current.as_mut() else {
            continue;
        };
        if let Some(name) = yaml_value(line, "name") {
            dep.name = name;
        } else if let Some(version) = yaml_value(line, "version") {
            dep.version = version;
        } else if let Some(repository) = yaml_value(line, "repository") {
            dep.homepage = Some(repository);
        }
    }
    if let Some(dep) = current.take() {
        deps.push(dep);
    }
    deps.retain(|d| {
        if d.name.is_empty() {
            tracing::debug!(manifest = d.source, "skipping chart dependency without a name");
            false
        } else {
            true
        }
    });
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(name: &str, content: &str) -> Vec<Dependency> {
        HelmScanner
            .scan_file(&ScanContext::new("."), Path::new(name), content.as_bytes())
            .unwrap()
    }

    #[test]
    fn chart_yaml_dependencies() {
        let deps = scan(
            "Chart.yaml",
            r#"apiVersion: v2
name: my-app
version: 0.1.0
dependencies:
  - name: postgresql
    version: "12.1.2"
    repository: https://charts.bitnami.com/bitnami
  - name: redis
    version: 17.0.0
    repository: "https://charts.bitnami.com/bitnami"
maintainers:
  - name: someone
"#,
        );
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "postgresql");
        assert_eq!(deps[0].version, "12.1.2");
        assert_eq!(deps[0].dep_type, DependencyType::Helm);
        assert_eq!(
            deps[0].homepage.as_deref(),
            Some("https://charts.bitnami.com/bitnami")
        );
        assert_eq!(deps[1].name, "redis");
    }

    #[test]
    fn maintainers_are_not_dependencies() {
        let deps = scan(
            "Chart.yaml",
            "name: app\nmaintainers:\n  - name: alice\n  - name: bob\n",
        );
        assert!(deps.is_empty());
    }

    #[test]
    fn requirements_yaml_v2() {
        let deps = scan(
            "requirements.yaml",
            "dependencies:\n- name: cert-manager\n  version: v1.13.0\n  repository: https://charts.jetstack.io\n",
        );
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "cert-manager");
        assert_eq!(deps[0].version, "v1.13.0");
    }
}
