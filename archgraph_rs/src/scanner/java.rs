//! Java ecosystem scanning: `pom.xml` and Gradle build scripts.
//!
//! Maven coordinates are emitted as `group:artifact`. The pom parse is
//! XML-first; a document the XML parser rejects goes through a regex
//! fallback so a stray unescaped ampersand does not hide every
//! dependency.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ScanError;
use crate::types::{Dependency, DependencyType};

use super::{DependencyScanner, ScanContext};

static POM_DEP_FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<dependency>\s*.*?<groupId>([^<]+)</groupId>\s*.*?<artifactId>([^<]+)</artifactId>(?:\s*.*?<version>([^<]+)</version>)?.*?</dependency>",
    )
    .expect("static regex")
});

static GRADLE_DEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^\s*(?:implementation|api|compileOnly|runtimeOnly|testImplementation|testRuntimeOnly|annotationProcessor|compile|classpath)\s*\(?\s*['"]([^'"]+)['"]"#,
    )
    .expect("static regex")
});

/// Scanner for Maven and Gradle manifests.
#[derive(Debug, Default)]
pub struct JavaScanner;

impl DependencyScanner for JavaScanner {
    fn language(&self) -> &'static str {
        "maven"
    }

    fn manifest_globs(&self) -> &'static [&'static str] {
        &["pom.xml", "build.gradle", "build.gradle.kts"]
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
            Some("pom.xml") => scan_pom(&source, &manifest),
            Some(name) if name.starts_with("build.gradle") => scan_gradle(&source, &manifest),
            _ => Vec::new(),
        };
        Ok(context.apply_filter(deps))
    }
}

fn scan_pom(source: &str, manifest: &str) -> Vec<Dependency> {
    match roxmltree::Document::parse(source) {
        Ok(doc) => scan_pom_xml(&doc, manifest),
        Err(e) => {
            tracing::warn!(path = manifest, error = %e, "pom.xml parse failed, using regex fallback");
            scan_pom_fallback(source, manifest)
        }
    }
}

fn scan_pom_xml(doc: &roxmltree::Document<'_>, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    for node in doc
        .descendants()
        .filter(|n| n.has_tag_name("dependency"))
    {
        let child_text = |tag: &str| {
            node.children()
                .find(|c| c.has_tag_name(tag))
                .and_then(|c| c.text())
                .map(str::trim)
                .unwrap_or("")
                .to_string()
        };
        let group = child_text("groupId");
        let artifact = child_text("artifactId");
        if group.is_empty() || artifact.is_empty() {
            continue;
        }
        let name = format!("{group}:{artifact}");
        if deps.iter().any(|d| d.name == name) {
            continue;
        }
        deps.push(Dependency::new(
            name,
            child_text("version"),
            DependencyType::Maven,
            manifest,
        ));
    }
    deps
}

fn scan_pom_fallback(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    for caps in POM_DEP_FALLBACK.captures_iter(source) {
        let name = format!("{}:{}", caps[1].trim(), caps[2].trim());
        if deps.iter().any(|d| d.name == name) {
            continue;
        }
        let version = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
        deps.push(Dependency::new(name, version, DependencyType::Maven, manifest));
    }
    deps
}

fn scan_gradle(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    for caps in GRADLE_DEP.captures_iter(source) {
        let coordinate = &caps[1];
        let mut parts = coordinate.split(':');
        let (Some(group), Some(artifact)) = (parts.next(), parts.next()) else {
            tracing::debug!(coordinate, "skipping non-coordinate gradle dependency");
            continue;
        };
        let version = parts.next().unwrap_or("");
        let name = format!("{group}:{artifact}");
        if deps.iter().any(|d| d.name == name) {
            continue;
        }
        deps.push(Dependency::new(name, version, DependencyType::Maven, manifest));
    }
    deps
}
