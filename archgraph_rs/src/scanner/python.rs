//! Python ecosystem scanning: requirements files, `setup.py`,
//! `pyproject.toml` and Pipfiles.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use toml::Value as TomlValue;

use crate::error::ScanError;
use crate::types::{Dependency, DependencyType};

use super::{DependencyScanner, ScanContext};

static SETUP_REQUIRES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)install_requires\s*=\s*\[(.*?)\]").expect("static regex")
});

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).expect("static regex"));

/// Scanner for pip-style manifests.
#[derive(Debug, Default)]
pub struct PythonScanner;

impl DependencyScanner for PythonScanner {
    fn language(&self) -> &'static str {
        "pip"
    }

    fn manifest_globs(&self) -> &'static [&'static str] {
        &[
            "requirements.txt",
            "requirements-*.txt",
            "setup.py",
            "pyproject.toml",
            "Pipfile",
            "Pipfile.lock",
        ]
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
            Some("setup.py") => scan_setup_py(&source, &manifest),
            Some("pyproject.toml") => scan_pyproject(&source, &manifest),
            Some("Pipfile") => scan_pipfile(&source, &manifest),
            Some("Pipfile.lock") => scan_pipfile_lock(content, &manifest)?,
            Some(name) if name.starts_with("requirements") => {
                scan_requirements(&source, &manifest)
            }
            _ => Vec::new(),
        };
        Ok(context.apply_filter(deps))
    }
}

/// Split a PEP 508 requirement like `requests[socks]>=2.0,<3` into
/// `(name, version)`.
fn split_requirement(spec: &str) -> Option<(String, String)> {
    let spec = spec.split(';').next().unwrap_or(spec).trim();
    if spec.is_empty() {
        return None;
    }
    let name_end = spec
        .find(['=', '>', '<', '~', '!', '['])
        .unwrap_or(spec.len());
    let name = spec[..name_end].trim();
    if name.is_empty() {
        return None;
    }
    let rest = &spec[name_end..];
    let rest = match rest.find(']') {
        Some(close) => &rest[close + 1..],
        None if rest.starts_with('[') => "",
        None => rest,
    };
    let version = rest
        .split(',')
        .next()
        .unwrap_or("")
        .trim_start_matches(['=', '>', '<', '~', '!'])
        .trim()
        .to_string();
    Some((name.to_string(), version))
}

fn scan_requirements(source: &str, manifest: &str) -> Vec<Dependency> {
    let mut deps = Vec::new();
    for line in source.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        if let Some((name, version)) = split_requirement(line) {
            deps.push(Dependency::new(name, version, DependencyType::Pip, manifest));
        }
    }
    deps
}

fn scan_setup_py(source: &str, manifest: &str) -> Vec<Dependency> {
    let Some(caps) = SETUP_REQUIRES.captures(source) else {
        return Vec::new();
    };
    QUOTED
        .captures_iter(&caps[1])
        .filter_map(|c| split_requirement(&c[1]))
        .map(|(name, version)| Dependency::new(name, version, DependencyType::Pip, manifest))
        .collect()
}

fn scan_pyproject(source: &str, manifest: &str) -> Vec<Dependency> {
    let Ok(toml) = source.parse::<TomlValue>() else {
        tracing::warn!(path = manifest, "pyproject.toml parse failed");
        return Vec::new();
    };
    let mut deps = Vec::new();

    // PEP 621 list form.
    if let Some(list) = toml
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        for entry in list.iter().filter_map(|v| v.as_str()) {
            if let Some((name, version)) = split_requirement(entry) {
                deps.push(Dependency::new(name, version, DependencyType::Pip, manifest));
            }
        }
    }

    // Poetry table form.
    if let Some(table) = toml
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table())
    {
        for (name, value) in table {
            if name == "python" {
                continue;
            }
            let version = toml_version(value);
            deps.push(Dependency::new(name, version, DependencyType::Pip, manifest));
        }
    }
    deps
}

fn scan_pipfile(source: &str, manifest: &str) -> Vec<Dependency> {
    let Ok(toml) = source.parse::<TomlValue>() else {
        tracing::warn!(path = manifest, "Pipfile parse failed");
        return Vec::new();
    };
    let mut deps = Vec::new();
    for section in ["packages", "dev-packages"] {
        let Some(table) = toml.get(section).and_then(|v| v.as_table()) else {
            continue;
        };
        for (name, value) in table {
            deps.push(Dependency::new(
                name,
                toml_version(value),
                DependencyType::Pip,
                manifest,
            ));
        }
    }
    deps
}

fn toml_version(value: &TomlValue) -> String {
    let raw = match value {
        TomlValue::String(s) => s.clone(),
        TomlValue::Table(t) => t
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    };
    let raw = raw.trim();
    if raw == "*" {
        return String::new();
    }
    raw.trim_start_matches(['=', '>', '<', '~', '^', '!'])
        .trim()
        .to_string()
}

fn scan_pipfile_lock(content: &[u8], manifest: &str) -> Result<Vec<Dependency>, ScanError> {
    let json: serde_json::Value = serde_json::from_slice(content)
        .map_err(|e| ScanError::parse_failed(manifest, e.to_string()))?;
    let mut deps = Vec::new();
    for section in ["default", "develop"] {
        let Some(map) = json.get(section).and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, entry) in map {
            let version = entry
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim_start_matches("==")
                .to_string();
            deps.push(Dependency::new(name, version, DependencyType::Pip, manifest));
        }
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(name: &str, content: &str) -> Vec<Dependency> {
        PythonScanner
            .scan_file(&ScanContext::new("."), Path::new(name), content.as_bytes())
            .unwrap()
    }

    #[test]
    fn requirements_with_extras_and_markers() {
        let deps = scan(
            "requirements.txt",
            "# comment\nrequests[socks]>=2.28,<3\nflask==2.3.2\nclick\n-r other.txt\n",
        );
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].name, "requests");
        assert_eq!(deps[0].version, "2.28");
        assert_eq!(deps[1].name, "flask");
        assert_eq!(deps[1].version, "2.3.2");
        assert_eq!(deps[2].name, "click");
        assert_eq!(deps[2].version, "");
    }

    #[test]
    fn setup_py_install_requires() {
        let deps = scan(
            "setup.py",
            r#"from setuptools import setup
setup(
    name="tool",
    install_requires=[
        "pyyaml>=6.0",
        "rich",
    ],
)
"#,
        );
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "pyyaml");
        assert_eq!(deps[0].version, "6.0");
    }

    #[test]
    fn pyproject_pep621_and_poetry() {
        let deps = scan(
            "pyproject.toml",
            r#"[project]
name = "tool"
dependencies = ["httpx>=0.27", "typer"]

[tool.poetry.dependencies]
python = "^3.11"
pydantic = "^2.5"
uvicorn = { version = ">=0.29", extras = ["standard"] }
"#,
        );
        let names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["httpx", "typer", "pydantic", "uvicorn"]);
        let pydantic = deps.iter().find(|d| d.name == "pydantic").unwrap();
        assert_eq!(pydantic.version, "2.5");
    }

    #[test]
    fn pipfile_and_lock() {
        let pipfile = scan(
            "Pipfile",
            "[packages]\nrequests = \"*\"\ndjango = \"==4.2\"\n\n[dev-packages]\npytest = \"*\"\n",
        );
        assert_eq!(pipfile.len(), 3);
        let django = pipfile.iter().find(|d| d.name == "django").unwrap();
        assert_eq!(django.version, "4.2");

        let lock = scan(
            "Pipfile.lock",
            r#"{"default": {"requests": {"version": "==2.31.0"}}, "develop": {}}"#,
        );
        assert_eq!(lock.len(), 1);
        assert_eq!(lock[0].version, "2.31.0");
    }
}
