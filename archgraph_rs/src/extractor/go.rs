//! In-process Go extraction.
//!
//! Lightweight line-oriented parsing, no full parser: good enough to
//! recover the declaration structure and call graph gofmt-formatted
//! sources expose, without an external toolchain.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::CacheView;
use crate::error::ExtractorError;
use crate::types::{AstNode, NodeKey, NodeKind, Parameter, RelationshipKind, ReturnValue};

use super::{AstResult, Extractor, LibraryRef, PendingRelationship, decision_points, decode_utf8};

const GO_DECISION_KEYWORDS: &[&str] = &["if", "for", "case"];

const GO_KEYWORDS: &[&str] = &[
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough",
    "for", "func", "go", "goto", "if", "import", "interface", "map", "package", "range",
    "return", "select", "struct", "switch", "type", "var",
];

/// Frameworks recognised by import-path prefix. Anything with a dotted
/// first segment that is not listed here is tagged `third-party`.
const FRAMEWORK_PREFIXES: [(&str, &str); 8] = [
    ("github.com/gin-gonic/gin", "gin"),
    ("github.com/labstack/echo", "echo"),
    ("github.com/go-chi/chi", "chi"),
    ("github.com/gorilla/mux", "mux"),
    ("gorm.io/gorm", "gorm"),
    ("github.com/spf13/cobra", "cobra"),
    ("github.com/stretchr/testify", "testify"),
    ("google.golang.org/grpc", "grpc"),
];

static FUNC_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^func\s+(?:\((?P<recv>\w+)\s+\*?(?P<recvtype>[\w.]+)\)\s+)?(?P<name>\w+)\s*\(")
        .expect("static regex")
});

static QUALIFIED_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<qual>[A-Za-z_]\w*)\.(?P<name>[A-Za-z_]\w*)\s*\(").expect("static regex"));

static BARE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^.\w])(?P<name>[A-Za-z_]\w*)\s*\(").expect("static regex"));

struct GoImport {
    alias: String,
    path: String,
}

/// Extractor for `.go` sources.
#[derive(Debug, Default)]
pub struct GoExtractor;

impl Extractor for GoExtractor {
    fn language(&self) -> &'static str {
        "go"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn extract_file(
        &self,
        _cache: &dyn CacheView,
        path: &Path,
        content: &[u8],
    ) -> Result<AstResult, ExtractorError> {
        let source = decode_utf8(path, content)?;
        let file_path = path.to_string_lossy().to_string();
        let lines: Vec<&str> = source.lines().collect();

        let package = parse_package_clause(&lines).ok_or_else(|| {
            ExtractorError::parse_failed(&file_path, "missing package clause")
        })?;
        let imports = parse_imports(&lines);

        let mut result = AstResult::new(&file_path, "go");
        result.package_name = Some(package.clone());

        // One package node per file; imports hang off it.
        let package_key = NodeKey::package(&file_path, &package);
        result
            .nodes
            .push(AstNode::new(package_key.clone()).with_lines(1, lines.len() as u32));
        for import in &imports {
            result.libraries.push(LibraryRef {
                from_key: package_key.clone(),
                package: import.path.clone(),
                class: String::new(),
                method: String::new(),
                framework: classify_import(&import.path).to_string(),
                kind: NodeKind::Package,
                rel_kind: RelationshipKind::Imports,
                line: 0,
                text: import.path.clone(),
            });
        }

        parse_types(&lines, &file_path, &package, &mut result);
        parse_package_values(&lines, &file_path, &package, &mut result);

        let functions = parse_functions(&lines, &file_path, &package);
        let local_funcs: HashMap<String, NodeKey> = functions
            .iter()
            .map(|f| (f.name.clone(), f.key.clone()))
            .collect();
        let alias_map: HashMap<&str, &str> = imports
            .iter()
            .map(|i| (i.alias.as_str(), i.path.as_str()))
            .collect();

        for func in functions {
            result.nodes.push(func.node.clone());
            collect_calls(&lines, &func, &local_funcs, &alias_map, &mut result);
        }

        Ok(result)
    }
}

struct GoFunction {
    name: String,
    receiver_var: String,
    receiver_type: String,
    key: NodeKey,
    node: AstNode,
    /// Body line range, zero-based inclusive indices into `lines`.
    body: Option<(usize, usize)>,
}

fn parse_package_clause(lines: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        line.trim()
            .strip_prefix("package ")
            .map(|rest| rest.split_whitespace().next().unwrap_or("").to_string())
            .filter(|name| !name.is_empty())
    })
}

fn parse_imports(lines: &[&str]) -> Vec<GoImport> {
    let mut imports = Vec::new();
    let mut in_block = false;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("import (") || trimmed == "import(" {
            in_block = true;
            continue;
        }
        if in_block {
            if trimmed.starts_with(')') {
                in_block = false;
                continue;
            }
            if let Some(import) = parse_import_spec(trimmed) {
                imports.push(import);
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("import ")
            && let Some(import) = parse_import_spec(rest.trim())
        {
            imports.push(import);
        }
    }
    imports
}

fn parse_import_spec(segment: &str) -> Option<GoImport> {
    let quote_start = segment.find('"')?;
    let explicit_alias = segment[..quote_start].trim();
    let tail = &segment[quote_start + 1..];
    let path = tail[..tail.find('"')?].trim();
    if path.is_empty() {
        return None;
    }
    let alias = match explicit_alias {
        "" => default_import_alias(path),
        "_" | "." => return None,
        other => other.to_string(),
    };
    Some(GoImport {
        alias,
        path: path.to_string(),
    })
}

/// Last path segment, skipping trailing version suffixes like `v2`.
fn default_import_alias(path: &str) -> String {
    let mut segments = path.rsplit('/');
    let last = segments.next().unwrap_or(path);
    let is_version = last.len() > 1
        && last.starts_with('v')
        && last[1..].chars().all(|c| c.is_ascii_digit());
    if is_version {
        segments.next().unwrap_or(last).to_string()
    } else {
        last.to_string()
    }
}

fn classify_import(path: &str) -> &'static str {
    for (prefix, framework) in FRAMEWORK_PREFIXES {
        if path == prefix || path.starts_with(&format!("{prefix}/")) {
            return framework;
        }
    }
    let first = path.split('/').next().unwrap_or(path);
    if first.contains('.') { "third-party" } else { "stdlib" }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn parse_types(lines: &[&str], file_path: &str, package: &str, result: &mut AstResult) {
    let mut idx = 0;
    while idx < lines.len() {
        let trimmed = lines[idx].trim();
        let Some(rest) = trimmed.strip_prefix("type ") else {
            idx += 1;
            continue;
        };
        let Some(name) = rest.split_whitespace().next() else {
            idx += 1;
            continue;
        };

        let mut node =
            AstNode::new(NodeKey::type_node(file_path, package, name));
        node.is_private = !is_exported(name);

        if rest.contains("struct {") || rest.contains("struct{") {
            let (end, fields, embedded) = parse_struct_fields(lines, idx);
            node = node.with_lines(idx as u32 + 1, end as u32 + 1);
            let type_key = node.key.clone();
            result.nodes.push(node);
            for (field_name, field_line) in fields {
                let mut field =
                    AstNode::new(NodeKey::field(file_path, package, name, &field_name))
                        .with_lines(field_line as u32 + 1, field_line as u32 + 1);
                field.is_private = !is_exported(&field_name);
                result.nodes.push(field);
            }
            // Embedding is Go's inheritance; same-package embeds resolve
            // by key, qualified ones stay external.
            for (embed_name, embed_line) in embedded {
                let to_key = (!embed_name.contains('.'))
                    .then(|| NodeKey::type_node(file_path, package, &embed_name));
                result.relationships.push(PendingRelationship {
                    from_key: type_key.clone(),
                    to_key,
                    line: embed_line as u32 + 1,
                    kind: RelationshipKind::Inherits,
                    text: embed_name,
                });
            }
            idx = end + 1;
        } else if rest.contains("interface {") || rest.contains("interface{") {
            let end = find_block_end(lines, idx);
            node = node.with_lines(idx as u32 + 1, end as u32 + 1);
            result.nodes.push(node);
            idx = end + 1;
        } else {
            node = node.with_lines(idx as u32 + 1, idx as u32 + 1);
            result.nodes.push(node);
            idx += 1;
        }
    }
}

/// Named fields and embedded types of a struct block starting at
/// `start`. An embedded field is a lone type token (optionally starred
/// or qualified), with or without a tag.
fn parse_struct_fields(
    lines: &[&str],
    start: usize,
) -> (usize, Vec<(String, usize)>, Vec<(String, usize)>) {
    let end = find_block_end(lines, start);
    let mut fields = Vec::new();
    let mut embedded = Vec::new();
    for (offset, line) in lines[start + 1..end].iter().enumerate() {
        let line_idx = start + 1 + offset;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('}') {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        let second = tokens.next();
        if second.is_none() || second.is_some_and(|s| s.starts_with('`')) {
            let embed = first.trim_start_matches('*');
            if embed
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
            {
                embedded.push((embed.to_string(), line_idx));
            }
            continue;
        }
        // "Name Type" or "A, B Type"
        for name in first.split(',') {
            let name = name.trim();
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                fields.push((name.to_string(), line_idx));
            }
        }
    }
    (end, fields, embedded)
}

/// Index of the line closing the brace block opened at `start`.
fn find_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        depth += brace_delta(line);
        if depth <= 0 && idx > start {
            return idx;
        }
        if idx == start && depth == 0 && line.contains('}') {
            return idx;
        }
    }
    lines.len().saturating_sub(1)
}

/// Net brace depth change of a line, ignoring braces inside string and
/// rune literals and line comments.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0i32;
    let mut chars = line.chars().peekable();
    let mut in_string: Option<char> = None;
    while let Some(c) = chars.next() {
        match in_string {
            Some(quote) => {
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '"' | '`' | '\'' => in_string = Some(c),
                '/' if chars.peek() == Some(&'/') => break,
                '{' => delta += 1,
                '}' => delta -= 1,
                _ => {}
            },
        }
    }
    delta
}

fn parse_functions(lines: &[&str], file_path: &str, package: &str) -> Vec<GoFunction> {
    let mut functions = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        let Some(caps) = FUNC_DECL.captures(line.trim_start()) else {
            idx += 1;
            continue;
        };
        let name = caps["name"].to_string();
        let receiver_var = caps.name("recv").map(|m| m.as_str().to_string()).unwrap_or_default();
        let receiver_type = caps
            .name("recvtype")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        // Signatures may wrap; gather lines until the body opens.
        let mut signature = line.trim().to_string();
        let mut sig_end = idx;
        while !signature.contains('{') && sig_end + 1 < lines.len() && sig_end - idx < 10 {
            sig_end += 1;
            signature.push(' ');
            signature.push_str(lines[sig_end].trim());
        }

        let (parameters, return_values) = parse_signature(&signature, &name);
        let body = if signature.contains('{') {
            let end = find_block_end(lines, idx);
            Some((sig_end, end))
        } else {
            None
        };
        let end_line = body.map(|(_, end)| end).unwrap_or(sig_end);

        let key = NodeKey::method(file_path, package, &receiver_type, &name);
        let mut node = AstNode::new(key.clone())
            .with_lines(idx as u32 + 1, end_line as u32 + 1);
        node.is_private = !is_exported(&name);
        node.parameter_count = Some(parameters.len() as u32);
        node.return_count = Some(return_values.len() as u32);
        node.parameters = parameters;
        node.return_values = return_values;
        node.cyclomatic_complexity = Some(body_complexity(lines, body));

        functions.push(GoFunction {
            name,
            receiver_var,
            receiver_type,
            key,
            node,
            body,
        });
        idx = end_line + 1;
    }
    functions
}

fn body_complexity(lines: &[&str], body: Option<(usize, usize)>) -> u32 {
    let Some((start, end)) = body else {
        return 1;
    };
    let body_text = lines[start..=end.min(lines.len() - 1)].join("\n");
    1 + decision_points(&body_text, GO_DECISION_KEYWORDS)
}

/// Split `func Name(params) returns {` into parameter and return lists.
fn parse_signature(signature: &str, name: &str) -> (Vec<Parameter>, Vec<ReturnValue>) {
    let Some(name_pos) = signature.find(&format!("{name}(")) else {
        return (Vec::new(), Vec::new());
    };
    let after_name = &signature[name_pos + name.len()..];
    let Some(params_raw) = balanced_parens(after_name) else {
        return (Vec::new(), Vec::new());
    };
    let parameters = parse_parameters(params_raw);

    let rest = after_name[params_raw.len() + 2..].trim();
    let rest = rest.split('{').next().unwrap_or("").trim();
    let returns = parse_returns(rest);
    (parameters, returns)
}

/// Content of the leading balanced paren group of `s` (which must start
/// with `(`), or `None` when unterminated.
fn balanced_parens(s: &str) -> Option<&str> {
    let mut depth = 0i32;
    for (idx, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[1..idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Go parameter lists group names: `a, b string, c int`. Names without a
/// type inherit the next typed entry's type.
fn parse_parameters(raw: &str) -> Vec<Parameter> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let mut parameters = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for entry in split_top_level(raw) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(' ') {
            Some((entry_name, entry_type)) => {
                for waiting in pending.drain(..) {
                    parameters.push(Parameter::new(waiting, entry_type.trim()));
                }
                parameters.push(Parameter::new(entry_name.trim(), entry_type.trim()));
            }
            None => pending.push(entry.to_string()),
        }
    }
    // Leftover single tokens are unnamed typed params: `func f(int, error)`.
    for type_only in pending {
        parameters.push(Parameter::new("", type_only));
    }
    parameters
}

fn parse_returns(raw: &str) -> Vec<ReturnValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Some(inner) = raw.strip_prefix('(') {
        let inner = inner.strip_suffix(')').unwrap_or(inner);
        return split_top_level(inner)
            .into_iter()
            .filter(|e| !e.trim().is_empty())
            .map(|entry| {
                let entry = entry.trim();
                match entry.split_once(' ') {
                    Some((name, value_type)) => ReturnValue {
                        name: name.to_string(),
                        value_type: value_type.trim().to_string(),
                    },
                    None => ReturnValue {
                        name: String::new(),
                        value_type: entry.to_string(),
                    },
                }
            })
            .collect();
    }
    vec![ReturnValue {
        name: String::new(),
        value_type: raw.to_string(),
    }]
}

/// Split on commas that are not nested inside parens, brackets or braces.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_package_values(lines: &[&str], file_path: &str, package: &str, result: &mut AstResult) {
    let mut depth = 0i32;
    let mut in_group: Option<&str> = None;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if depth == 0 {
            if trimmed.starts_with("var (") {
                in_group = Some("var");
                continue;
            }
            if trimmed.starts_with("const (") {
                in_group = Some("const");
                continue;
            }
            if in_group.is_some() {
                if trimmed.starts_with(')') {
                    in_group = None;
                } else {
                    push_value_names(trimmed, idx, file_path, package, result);
                }
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("var ") {
                push_value_names(rest, idx, file_path, package, result);
            } else if let Some(rest) = trimmed.strip_prefix("const ") {
                push_value_names(rest, idx, file_path, package, result);
            }
        }
        depth += brace_delta(line);
    }
}

fn push_value_names(segment: &str, idx: usize, file_path: &str, package: &str, result: &mut AstResult) {
    let lhs = segment.split('=').next().unwrap_or(segment);
    // Drop a trailing type annotation: "Foo, Bar int".
    let names: Vec<&str> = lhs.split(',').collect();
    for (pos, raw) in names.iter().enumerate() {
        let mut name = raw.trim();
        if pos == names.len() - 1
            && let Some(first) = name.split_whitespace().next()
        {
            name = first;
        }
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            continue;
        }
        if !is_exported(name) {
            continue;
        }
        let node = AstNode::new(NodeKey::variable(file_path, package, name))
            .with_lines(idx as u32 + 1, idx as u32 + 1);
        result.nodes.push(node);
    }
}

fn collect_calls(
    lines: &[&str],
    func: &GoFunction,
    local_funcs: &HashMap<String, NodeKey>,
    alias_map: &HashMap<&str, &str>,
    result: &mut AstResult,
) {
    let Some((start, end)) = func.body else {
        return;
    };
    for (offset, line) in lines[start..=end.min(lines.len() - 1)].iter().enumerate() {
        let line_no = (start + offset) as u32 + 1;
        let code = line.split("//").next().unwrap_or(line);

        for caps in QUALIFIED_CALL.captures_iter(code) {
            let qualifier = &caps["qual"];
            let callee = &caps["name"];
            let evidence = format!("{qualifier}.{callee}");

            if let Some(import_path) = alias_map.get(qualifier) {
                result.libraries.push(LibraryRef {
                    from_key: func.key.clone(),
                    package: (*import_path).to_string(),
                    class: String::new(),
                    method: callee.to_string(),
                    framework: classify_import(import_path).to_string(),
                    kind: NodeKind::Method,
                    rel_kind: RelationshipKind::Call,
                    line: line_no,
                    text: evidence,
                });
            } else if !func.receiver_var.is_empty() && qualifier == func.receiver_var {
                // Call through the receiver: same type, maybe not yet seen.
                let target = NodeKey::method(
                    &func.key.file_path,
                    &func.key.package,
                    &func.receiver_type,
                    callee,
                );
                result.relationships.push(PendingRelationship {
                    from_key: func.key.clone(),
                    to_key: Some(target),
                    line: line_no,
                    kind: RelationshipKind::Call,
                    text: evidence,
                });
            } else {
                result.relationships.push(PendingRelationship {
                    from_key: func.key.clone(),
                    to_key: None,
                    line: line_no,
                    kind: RelationshipKind::Call,
                    text: evidence,
                });
            }
        }

        for caps in BARE_CALL.captures_iter(code) {
            let callee = &caps["name"];
            if GO_KEYWORDS.contains(&callee) || callee == func.name.as_str() {
                continue;
            }
            if let Some(target) = local_funcs.get(callee) {
                result.relationships.push(PendingRelationship {
                    from_key: func.key.clone(),
                    to_key: Some(target.clone()),
                    line: line_no,
                    kind: RelationshipKind::Call,
                    text: callee.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmptyCacheView;

    fn extract(source: &str) -> AstResult {
        GoExtractor
            .extract_file(&EmptyCacheView, Path::new("main.go"), source.as_bytes())
            .unwrap()
    }

    #[test]
    fn missing_package_clause_is_a_parse_failure() {
        let err = GoExtractor
            .extract_file(&EmptyCacheView, Path::new("bad.go"), b"func main() {}\n")
            .unwrap_err();
        assert!(matches!(err, ExtractorError::ParseFailed { .. }));
    }

    #[test]
    fn extracts_types_fields_and_methods() {
        let src = r#"package server

type Handler struct {
	Name    string
	timeout int
}

func (h *Handler) Serve(port int) error {
	return nil
}

func helper() {}
"#;
        let result = extract(src);
        assert_eq!(result.package_name.as_deref(), Some("server"));

        let type_node = result
            .nodes
            .iter()
            .find(|n| n.key.kind == NodeKind::Type && n.key.type_name == "Handler")
            .unwrap();
        assert!(!type_node.is_private);

        let fields: Vec<_> = result
            .nodes
            .iter()
            .filter(|n| n.key.kind == NodeKind::Field)
            .collect();
        assert_eq!(fields.len(), 2);
        assert!(fields.iter().any(|f| f.key.field_name == "timeout" && f.is_private));

        let serve = result
            .nodes
            .iter()
            .find(|n| n.key.method_name == "Serve")
            .unwrap();
        assert_eq!(serve.key.type_name, "Handler");
        assert_eq!(serve.parameter_count, Some(1));
        assert_eq!(serve.parameters[0].name, "port");
        assert_eq!(serve.return_count, Some(1));

        let helper = result
            .nodes
            .iter()
            .find(|n| n.key.method_name == "helper")
            .unwrap();
        assert!(helper.is_private);
        assert_eq!(helper.key.type_name, "");
    }

    #[test]
    fn grouped_parameters_share_their_type() {
        let src = "package m\n\nfunc add(a, b int) int {\n\treturn a + b\n}\n";
        let result = extract(src);
        let add = result.nodes.iter().find(|n| n.key.method_name == "add").unwrap();
        assert_eq!(add.parameters.len(), 2);
        assert_eq!(add.parameters[0].name, "a");
        assert_eq!(add.parameters[0].param_type, "int");
        assert_eq!(add.parameters[1].name, "b");
        assert_eq!(add.parameters[1].param_type, "int");
    }

    #[test]
    fn complexity_counts_decision_points() {
        let src = r#"package m

func classify(n int) string {
	if n > 10 && n < 100 {
		return "mid"
	}
	for i := 0; i < n; i++ {
		switch i {
		case 1:
			return "one"
		case 2:
			return "two"
		}
	}
	return "other"
}
"#;
        let result = extract(src);
        let node = result.nodes.iter().find(|n| n.key.method_name == "classify").unwrap();
        // 1 + if + && + for + case + case
        assert_eq!(node.cyclomatic_complexity, Some(6));
    }

    #[test]
    fn straight_line_function_has_complexity_one() {
        let result = extract("package m\n\nfunc id(x int) int {\n\treturn x\n}\n");
        let node = result.nodes.iter().find(|n| n.key.method_name == "id").unwrap();
        assert_eq!(node.cyclomatic_complexity, Some(1));
    }

    #[test]
    fn imported_calls_become_library_references() {
        let src = r#"package main

import (
	"fmt"
	"github.com/gin-gonic/gin"
)

func main() {
	fmt.Println("x")
	r := gin.New()
	r.Run()
}
"#;
        let result = extract(src);
        let fmt_call = result
            .libraries
            .iter()
            .find(|l| l.package == "fmt" && l.method == "Println")
            .unwrap();
        assert_eq!(fmt_call.framework, "stdlib");
        assert_eq!(fmt_call.rel_kind, RelationshipKind::Call);
        assert_eq!(fmt_call.from_key.method_name, "main");
        assert_eq!(fmt_call.line, 9);

        let gin_call = result
            .libraries
            .iter()
            .find(|l| l.package == "github.com/gin-gonic/gin")
            .expect("gin call recorded");
        assert_eq!(gin_call.framework, "gin");

        // r.Run() has an unknown qualifier: unresolved external call.
        assert!(result
            .relationships
            .iter()
            .any(|r| r.to_key.is_none() && r.text == "r.Run"));
    }

    #[test]
    fn local_function_calls_resolve_by_key() {
        let src = r#"package m

func outer() {
	inner()
}

func inner() {}
"#;
        let result = extract(src);
        let call = result
            .relationships
            .iter()
            .find(|r| r.text == "inner")
            .unwrap();
        let to = call.to_key.as_ref().unwrap();
        assert_eq!(to.method_name, "inner");
        assert_eq!(call.from_key.method_name, "outer");
    }

    #[test]
    fn receiver_calls_resolve_to_same_type() {
        let src = r#"package m

type Svc struct{}

func (s *Svc) Run() {
	s.step()
}

func (s *Svc) step() {}
"#;
        let result = extract(src);
        let call = result
            .relationships
            .iter()
            .find(|r| r.text == "s.step")
            .unwrap();
        let to = call.to_key.as_ref().unwrap();
        assert_eq!(to.type_name, "Svc");
        assert_eq!(to.method_name, "step");
    }

    #[test]
    fn struct_embedding_becomes_inherits() {
        let src = r#"package m

type Base struct{}

type Derived struct {
	Base
	log.Logger
	Name string
}
"#;
        let result = extract(src);
        let local = result
            .relationships
            .iter()
            .find(|r| r.kind == RelationshipKind::Inherits && r.text == "Base")
            .unwrap();
        assert_eq!(local.from_key.type_name, "Derived");
        assert_eq!(local.to_key.as_ref().unwrap().type_name, "Base");

        let external = result
            .relationships
            .iter()
            .find(|r| r.kind == RelationshipKind::Inherits && r.text == "log.Logger")
            .unwrap();
        assert!(external.to_key.is_none());

        // The named field is still a field, not an embed.
        assert!(result
            .nodes
            .iter()
            .any(|n| n.key.kind == NodeKind::Field && n.key.field_name == "Name"));
    }

    #[test]
    fn exported_package_values_become_variables() {
        let src = r#"package m

var DefaultTimeout = 30

const (
	MaxRetries = 3
	minDelay   = 1
)
"#;
        let result = extract(src);
        let vars: Vec<_> = result
            .nodes
            .iter()
            .filter(|n| n.key.kind == NodeKind::Variable)
            .map(|n| n.key.field_name.clone())
            .collect();
        assert!(vars.contains(&"DefaultTimeout".to_string()));
        assert!(vars.contains(&"MaxRetries".to_string()));
        assert!(!vars.contains(&"minDelay".to_string()));
    }

    #[test]
    fn import_aliases_are_tracked() {
        let src = r#"package m

import (
	log "github.com/sirupsen/logrus"
)

func run() {
	log.Info("hi")
}
"#;
        let result = extract(src);
        let call = result
            .libraries
            .iter()
            .find(|l| l.method == "Info")
            .unwrap();
        assert_eq!(call.package, "github.com/sirupsen/logrus");
        assert_eq!(call.framework, "third-party");
    }
}
