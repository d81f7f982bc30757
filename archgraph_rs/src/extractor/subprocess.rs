//! Shared child-process transport for out-of-process parsers.
//!
//! Python, JavaScript/TypeScript and Java parsing is delegated to external
//! parsers speaking a small JSON contract on stdout:
//!
//! ```json
//! {"module": "pkg", "nodes": [...], "imports": [...], "relationships": [...]}
//! ```
//!
//! The caller owns the temp directory holding any helper script, launches
//! the child with a deadline, and deserialises the payload. A missing
//! runtime is a skip (`ToolchainMissing`), not a parse failure.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::ExtractorError;
use crate::types::{AstNode, CancelFlag, NodeKey, NodeKind, Parameter, RelationshipKind, ReturnValue};

use super::{AstResult, LibraryRef, PendingRelationship};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Deserialize)]
pub(crate) struct ParserPayload {
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub nodes: Vec<ParserNode>,
    #[serde(default)]
    pub imports: Vec<ParserImport>,
    #[serde(default)]
    pub relationships: Vec<ParserRelationship>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParserNode {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub parameter_count: Option<u32>,
    #[serde(default)]
    pub return_count: Option<u32>,
    #[serde(default)]
    pub parameters: Vec<ParserParameter>,
    #[serde(default)]
    pub return_values: Vec<ParserReturn>,
    #[serde(default)]
    pub cyclomatic_complexity: Option<u32>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub is_private: Option<bool>,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParserParameter {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParserReturn {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParserImport {
    pub module: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParserRelationship {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub line: u32,
    #[serde(rename = "type", default)]
    pub rel_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Launch an external parser and deserialise its stdout payload.
///
/// The parser is a pure function of `content`: the bytes are written to
/// an input file inside a scoped temp dir (removed on all exit paths)
/// and the child reads that file, never the original. When `script` is
/// given it lands in the same temp dir and becomes the program's first
/// argument. The child is killed when `deadline` passes or `cancel`
/// fires.
pub(crate) fn run_parser(
    program: &str,
    script: Option<(&str, &str)>,
    source_path: &Path,
    content: &[u8],
    deadline: Duration,
    cancel: &CancelFlag,
) -> Result<ParserPayload, ExtractorError> {
    // Dropped at the end of this function, deleting script and input.
    let scratch = tempfile::Builder::new()
        .prefix("archgraph_parser")
        .tempdir()?;
    let input_name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    let input_path = scratch.path().join(input_name);
    std::fs::write(&input_path, content)?;

    let mut command = Command::new(program);
    if let Some((script_name, script_source)) = script {
        let script_path = scratch.path().join(script_name);
        std::fs::write(&script_path, script_source)?;
        command.arg(&script_path);
    }
    command
        .arg(&input_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractorError::ToolchainMissing(program.to_string()));
        }
        Err(e) => return Err(ExtractorError::Io(e)),
    };

    // Drain pipes on threads so a chatty child never blocks on a full pipe.
    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractorError::Cancelled);
        }
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if started.elapsed() > deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExtractorError::parse_failed(
                        source_path.to_string_lossy(),
                        format!("{program} exceeded {}s deadline", deadline.as_secs()),
                    ));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        let detail = String::from_utf8_lossy(&stderr);
        return Err(ExtractorError::parse_failed(
            source_path.to_string_lossy(),
            format!("{program} exited with {status}: {}", detail.trim()),
        ));
    }

    serde_json::from_slice(&stdout).map_err(|e| {
        ExtractorError::parse_failed(
            source_path.to_string_lossy(),
            format!("bad parser payload: {e}"),
        )
    })
}

/// Normalise a parser payload into an [`AstResult`].
///
/// `classify` maps an import module to its framework tag; imports whose
/// module starts with `.` or `/` are file-relative and produce no library
/// reference.
pub(crate) fn normalize_payload(
    path: &Path,
    language: &str,
    payload: ParserPayload,
    classify: &dyn Fn(&str) -> &'static str,
) -> AstResult {
    let file_path = path.to_string_lossy().to_string();
    let package = payload
        .module
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });

    let mut result = AstResult::new(&file_path, language);
    result.package_name = Some(package.clone());

    let package_key = NodeKey::package(&file_path, &package);
    let mut package_node = AstNode::new(package_key.clone());
    package_node.start_line = 1;

    // Class names first, so methods can attach to their parent type.
    let class_names: HashSet<&str> = payload
        .nodes
        .iter()
        .filter(|n| matches!(n.node_type.as_str(), "class" | "interface" | "struct" | "enum"))
        .map(|n| n.name.as_str())
        .collect();

    let mut key_by_name: HashMap<String, NodeKey> = HashMap::new();
    let mut max_line = 1u32;

    for parser_node in &payload.nodes {
        let parent_class = parser_node
            .parent
            .as_deref()
            .filter(|p| class_names.contains(p))
            .unwrap_or("");

        let key = match parser_node.node_type.as_str() {
            "class" | "interface" | "struct" | "enum" => {
                NodeKey::type_node(&file_path, &package, &parser_node.name)
            }
            "function" | "method" | "constructor" | "arrow_function" => {
                NodeKey::method(&file_path, &package, parent_class, &parser_node.name)
            }
            "field" | "property" | "attribute" => {
                NodeKey::field(&file_path, &package, parent_class, &parser_node.name)
            }
            "variable" | "const" | "let" => {
                NodeKey::variable(&file_path, &package, &parser_node.name)
            }
            other => {
                tracing::debug!(kind = other, name = %parser_node.name, "skipping unknown node kind");
                continue;
            }
        };

        let mut node = AstNode::new(key.clone())
            .with_lines(parser_node.start_line.max(1), parser_node.end_line.max(parser_node.start_line.max(1)));
        node.is_private = parser_node
            .is_private
            .unwrap_or_else(|| parser_node.visibility.as_deref() == Some("private"));
        if key.kind == NodeKind::Method {
            node.cyclomatic_complexity = Some(parser_node.cyclomatic_complexity.unwrap_or(1).max(1));
            node.parameter_count = Some(
                parser_node
                    .parameter_count
                    .unwrap_or(parser_node.parameters.len() as u32),
            );
            node.return_count = Some(
                parser_node
                    .return_count
                    .unwrap_or(parser_node.return_values.len() as u32),
            );
            node.parameters = parser_node
                .parameters
                .iter()
                .map(|p| Parameter::new(p.name.clone(), p.param_type.clone()))
                .collect();
            node.return_values = parser_node
                .return_values
                .iter()
                .map(|r| ReturnValue {
                    name: r.name.clone(),
                    value_type: r.value_type.clone(),
                })
                .collect();
        }
        max_line = max_line.max(node.end_line);

        key_by_name.insert(parser_node.name.clone(), key.clone());
        if !parent_class.is_empty() {
            key_by_name.insert(format!("{parent_class}.{}", parser_node.name), key);
        }
        result.nodes.push(node);
    }

    package_node.end_line = max_line;
    package_node.line_count = max_line;
    result.nodes.insert(0, package_node);

    let mut alias_to_module: HashMap<&str, &str> = HashMap::new();
    for import in &payload.imports {
        if import.module.starts_with('.') || import.module.starts_with('/') {
            continue;
        }
        if let Some(alias) = import.alias.as_deref() {
            alias_to_module.insert(alias, import.module.as_str());
        }
        alias_to_module.insert(import.module.as_str(), import.module.as_str());
        result.libraries.push(LibraryRef {
            from_key: package_key.clone(),
            package: import.module.clone(),
            class: String::new(),
            method: String::new(),
            framework: classify(&import.module).to_string(),
            kind: NodeKind::Package,
            rel_kind: RelationshipKind::Imports,
            line: import.line,
            text: import.module.clone(),
        });
    }

    for rel in &payload.relationships {
        let Some(from_key) = key_by_name.get(&rel.from).cloned() else {
            tracing::debug!(from = %rel.from, "relationship from unknown node, skipping");
            continue;
        };
        let kind = match rel.rel_type.as_str() {
            "" | "call" => RelationshipKind::Call,
            "inherits" | "extends" => RelationshipKind::Inherits,
            "implements" => RelationshipKind::Implements,
            "imports" => RelationshipKind::Imports,
            _ => RelationshipKind::References,
        };
        let text = rel.text.clone().unwrap_or_else(|| rel.to.clone());

        if let Some(to_key) = key_by_name.get(&rel.to) {
            result.relationships.push(PendingRelationship {
                from_key,
                to_key: Some(to_key.clone()),
                line: rel.line,
                kind,
                text,
            });
            continue;
        }

        // `alias.symbol` against a known import is a library reference.
        if let Some((qualifier, symbol)) = rel.to.split_once('.')
            && let Some(module) = alias_to_module.get(qualifier)
        {
            result.libraries.push(LibraryRef {
                from_key,
                package: (*module).to_string(),
                class: String::new(),
                method: symbol.to_string(),
                framework: classify(module).to_string(),
                kind: NodeKind::Method,
                rel_kind: kind,
                line: rel.line,
                text,
            });
            continue;
        }

        result.relationships.push(PendingRelationship {
            from_key,
            to_key: None,
            line: rel.line,
            kind,
            text,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> ParserPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn normalize_builds_hierarchy_and_library_refs() {
        let raw = r#"{
            "module": "app.services",
            "nodes": [
                {"type": "class", "name": "UserService", "start_line": 10, "end_line": 40},
                {"type": "method", "name": "create", "start_line": 12, "end_line": 20,
                 "parent": "UserService", "cyclomatic_complexity": 3,
                 "parameters": [{"name": "payload", "type": "dict"}]},
                {"type": "function", "name": "helper", "start_line": 42, "end_line": 44,
                 "is_private": true}
            ],
            "imports": [
                {"module": "os", "line": 1},
                {"module": "requests", "alias": "rq", "line": 2},
                {"module": ".local", "line": 3}
            ],
            "relationships": [
                {"from": "create", "to": "helper", "line": 15, "type": "call"},
                {"from": "create", "to": "rq.get", "line": 16, "type": "call"},
                {"from": "create", "to": "unknown_thing", "line": 17, "type": "call"}
            ]
        }"#;
        let classify = |module: &str| if module == "os" { "stdlib" } else { "third-party" };
        let result =
            normalize_payload(Path::new("app/services.py"), "python", payload(raw), &classify);

        assert_eq!(result.package_name.as_deref(), Some("app.services"));

        let create = result
            .nodes
            .iter()
            .find(|n| n.key.method_name == "create")
            .unwrap();
        assert_eq!(create.key.type_name, "UserService");
        assert_eq!(create.cyclomatic_complexity, Some(3));
        assert_eq!(create.parameter_count, Some(1));

        let helper = result
            .nodes
            .iter()
            .find(|n| n.key.method_name == "helper")
            .unwrap();
        assert!(helper.is_private);

        // Relative import produced no library ref; two modules did.
        let import_refs: Vec<_> = result
            .libraries
            .iter()
            .filter(|l| l.rel_kind == RelationshipKind::Imports)
            .collect();
        assert_eq!(import_refs.len(), 2);

        // call to local node resolved by key
        let local_call = result
            .relationships
            .iter()
            .find(|r| r.text == "helper")
            .unwrap();
        assert!(local_call.to_key.is_some());

        // aliased import call became a library method ref
        let lib_call = result
            .libraries
            .iter()
            .find(|l| l.method == "get")
            .unwrap();
        assert_eq!(lib_call.package, "requests");
        assert_eq!(lib_call.framework, "third-party");

        // unknown target stays unresolved with its raw text
        let unresolved = result
            .relationships
            .iter()
            .find(|r| r.text == "unknown_thing")
            .unwrap();
        assert!(unresolved.to_key.is_none());
    }

    #[test]
    fn complexity_is_floored_at_one() {
        let raw = r#"{"nodes": [{"type": "function", "name": "f", "start_line": 1, "end_line": 1,
                       "cyclomatic_complexity": 0}]}"#;
        let result =
            normalize_payload(Path::new("f.py"), "python", payload(raw), &|_| "third-party");
        let f = result.nodes.iter().find(|n| n.key.method_name == "f").unwrap();
        assert_eq!(f.cyclomatic_complexity, Some(1));
    }

    #[test]
    fn visibility_private_maps_to_is_private() {
        let raw = r#"{"nodes": [
            {"type": "method", "name": "a", "visibility": "private"},
            {"type": "method", "name": "b", "visibility": "protected"},
            {"type": "method", "name": "c", "visibility": "public"}
        ]}"#;
        let result =
            normalize_payload(Path::new("X.java"), "java", payload(raw), &|_| "stdlib");
        let vis = |name: &str| {
            result
                .nodes
                .iter()
                .find(|n| n.key.method_name == name)
                .unwrap()
                .is_private
        };
        assert!(vis("a"));
        assert!(!vis("b"));
        assert!(!vis("c"));
    }
}
