//! The pattern/relationship query language.
//!
//! A ruleset is a sequence of statements evaluated against the stored
//! graph:
//!
//! ```text
//! LIMIT(method:*) { cyclomatic_complexity > 10 }
//! FORBID(package:service.* -> package:database/sql.*)
//! REQUIRE(package:api type:*Handler)
//! ALLOW(package:service.audit.* -> package:database/sql.*)
//! ```
//!
//! Patterns are `field:value` terms over `{file_path, package, type,
//! method, field}` with `*` wildcards (mapped to SQL `LIKE` for the node
//! scan). A package pattern `X.*` also matches `X` itself, so forbidding
//! `database/sql.*` covers direct calls into the package. `ALLOW` has no
//! direct effect; it carves exceptions out of `FORBID` matches.

use std::path::Path;

use crate::cache::{AstCache, NodeFilter};
use crate::error::{CacheError, RuleError};
use crate::types::{
    AstNode, CalledRef, CallerRef, LibraryNode, RelationshipKind, Violation, ViolationSource,
};

use super::wildcard_match;

/// A node pattern: each present field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AqlPattern {
    pub file_path: Option<String>,
    pub package: Option<String>,
    pub type_name: Option<String>,
    pub method: Option<String>,
    pub field: Option<String>,
}

impl AqlPattern {
    fn parse(text: &str, err: &impl Fn(String) -> RuleError) -> Result<Self, RuleError> {
        let mut pattern = AqlPattern::default();
        let terms = text
            .split([',', ' ', '\t', '\n'])
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let mut any = false;
        for term in terms {
            any = true;
            let (field, value) = match term.split_once(':') {
                Some((field, value)) => (field.trim(), value.trim()),
                // A bare value is a package pattern.
                None => ("package", term),
            };
            if value.is_empty() {
                return Err(err(format!("empty value for field '{field}'")));
            }
            let slot = match field {
                "file" | "file_path" => &mut pattern.file_path,
                "package" | "pkg" => &mut pattern.package,
                "type" | "class" => &mut pattern.type_name,
                "method" => &mut pattern.method,
                "field" => &mut pattern.field,
                other => return Err(err(format!("unknown pattern field '{other}'"))),
            };
            *slot = Some(value.to_string());
        }
        if !any {
            return Err(err("empty pattern".to_string()));
        }
        Ok(pattern)
    }

    /// The SQL-side filter. Package terms are widened (`X.*` also
    /// matches `X`), so the precise check happens in [`matches_node`];
    /// the filter only has to be a superset.
    fn to_filter(&self) -> NodeFilter {
        NodeFilter {
            file_path: self.file_path.clone(),
            package: self.package.as_ref().map(|p| widen_package_pattern(p)),
            type_name: self.type_name.clone(),
            method: self.method.clone(),
            field: self.field.clone(),
        }
    }

    pub fn matches_node(&self, node: &AstNode) -> bool {
        self.file_path
            .as_ref()
            .is_none_or(|p| wildcard_match(p, &node.key.file_path))
            && self
                .package
                .as_ref()
                .is_none_or(|p| package_match(p, &node.key.package))
            && self
                .type_name
                .as_ref()
                .is_none_or(|p| wildcard_match(p, &node.key.type_name))
            && self
                .method
                .as_ref()
                .is_none_or(|p| wildcard_match(p, &node.key.method_name))
            && self
                .field
                .as_ref()
                .is_none_or(|p| wildcard_match(p, &node.key.field_name))
    }

    /// Library nodes carry no file or field; those constraints only
    /// match when fully wildcarded.
    pub fn matches_library(&self, library: &LibraryNode) -> bool {
        self.file_path.as_deref().is_none_or(|p| p == "*")
            && self.field.as_deref().is_none_or(|p| p == "*")
            && self
                .package
                .as_ref()
                .is_none_or(|p| package_match(p, &library.package))
            && self
                .type_name
                .as_ref()
                .is_none_or(|p| wildcard_match(p, &library.class))
            && self
                .method
                .as_ref()
                .is_none_or(|p| wildcard_match(p, &library.method))
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        let mut push = |name: &str, value: &Option<String>| {
            if let Some(v) = value {
                parts.push(format!("{name}:{v}"));
            }
        };
        push("file_path", &self.file_path);
        push("package", &self.package);
        push("type", &self.type_name);
        push("method", &self.method);
        push("field", &self.field);
        parts.join(" ")
    }
}

/// `X.*` matches `X` itself as well as anything under it.
fn package_match(pattern: &str, value: &str) -> bool {
    if wildcard_match(pattern, value) {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => wildcard_match(prefix, value),
        None => false,
    }
}

/// LIKE-side widening for [`package_match`].
fn widen_package_pattern(pattern: &str) -> String {
    match pattern.strip_suffix(".*") {
        Some(prefix) => format!("{prefix}*"),
        None => pattern.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CyclomaticComplexity,
    ParameterCount,
    ReturnCount,
    LineCount,
    NameLength,
}

impl Metric {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "cyclomatic_complexity" => Some(Metric::CyclomaticComplexity),
            "parameter_count" => Some(Metric::ParameterCount),
            "return_count" => Some(Metric::ReturnCount),
            "line_count" => Some(Metric::LineCount),
            "name_length" => Some(Metric::NameLength),
            _ => None,
        }
    }

    fn value_of(&self, node: &AstNode) -> Option<i64> {
        match self {
            Metric::CyclomaticComplexity => node.cyclomatic_complexity.map(i64::from),
            Metric::ParameterCount => node.parameter_count.map(i64::from),
            Metric::ReturnCount => node.return_count.map(i64::from),
            Metric::LineCount => Some(i64::from(node.line_count)),
            Metric::NameLength => {
                let key = &node.key;
                let leaf = [&key.method_name, &key.field_name, &key.type_name, &key.package]
                    .into_iter()
                    .find(|s| !s.is_empty())?;
                Some(leaf.chars().count() as i64)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Metric::CyclomaticComplexity => "cyclomatic_complexity",
            Metric::ParameterCount => "parameter_count",
            Metric::ReturnCount => "return_count",
            Metric::LineCount => "line_count",
            Metric::NameLength => "name_length",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn eval(&self, left: i64, right: i64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone)]
struct PredicateTerm {
    metric: Metric,
    op: CmpOp,
    value: i64,
}

/// A conjunction of metric comparisons.
#[derive(Debug, Clone)]
pub struct Predicate {
    terms: Vec<PredicateTerm>,
}

impl Predicate {
    fn parse(text: &str, err: &impl Fn(String) -> RuleError) -> Result<Self, RuleError> {
        let mut terms = Vec::new();
        for clause in text.split_terminator("AND").flat_map(|c| c.split_terminator("and")) {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            let op_pos = clause
                .find(['>', '<', '=', '!'])
                .ok_or_else(|| err(format!("no comparison in '{clause}'")))?;
            let metric_name = clause[..op_pos].trim();
            let metric = Metric::parse(metric_name)
                .ok_or_else(|| err(format!("unknown metric '{metric_name}'")))?;

            let rest = &clause[op_pos..];
            let (op, value_text) = if let Some(v) = rest.strip_prefix(">=") {
                (CmpOp::Ge, v)
            } else if let Some(v) = rest.strip_prefix("<=") {
                (CmpOp::Le, v)
            } else if let Some(v) = rest.strip_prefix("==") {
                (CmpOp::Eq, v)
            } else if let Some(v) = rest.strip_prefix("!=") {
                (CmpOp::Ne, v)
            } else if let Some(v) = rest.strip_prefix('>') {
                (CmpOp::Gt, v)
            } else if let Some(v) = rest.strip_prefix('<') {
                (CmpOp::Lt, v)
            } else if let Some(v) = rest.strip_prefix('=') {
                (CmpOp::Eq, v)
            } else {
                return Err(err(format!("bad comparison in '{clause}'")));
            };
            let value: i64 = value_text
                .trim()
                .parse()
                .map_err(|_| err(format!("bad number in '{clause}'")))?;
            terms.push(PredicateTerm { metric, op, value });
        }
        if terms.is_empty() {
            return Err(err("empty predicate".to_string()));
        }
        Ok(Predicate { terms })
    }

    /// True when every term holds. A node missing a metric fails the
    /// term.
    fn eval(&self, node: &AstNode) -> bool {
        self.terms.iter().all(|term| {
            term.metric
                .value_of(node)
                .is_some_and(|value| term.op.eval(value, term.value))
        })
    }

    fn describe(&self) -> String {
        self.terms
            .iter()
            .map(|t| format!("{} {} {}", t.metric.name(), t.op.symbol(), t.value))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// The failing metrics of a node, for the violation message.
    fn observed(&self, node: &AstNode) -> String {
        self.terms
            .iter()
            .filter_map(|t| {
                t.metric
                    .value_of(node)
                    .map(|v| format!("{} = {v}", t.metric.name()))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One parsed statement.
#[derive(Debug, Clone)]
pub enum AqlStatement {
    Limit { pattern: AqlPattern, predicate: Predicate },
    Forbid { pattern: AqlPattern },
    ForbidEdge { from: AqlPattern, to: AqlPattern },
    Require { pattern: AqlPattern },
    RequireEdge { from: AqlPattern, to: AqlPattern },
    Allow { pattern: AqlPattern },
    AllowEdge { from: AqlPattern, to: AqlPattern },
}

/// A parsed AQL ruleset.
#[derive(Debug, Clone, Default)]
pub struct AqlRuleSet {
    pub statements: Vec<AqlStatement>,
}

/// Parse an AQL source. `origin` names the source in errors.
pub fn parse_aql(source: &str, origin: &str) -> Result<AqlRuleSet, RuleError> {
    // Strip comments, keeping line structure for error positions.
    let stripped: String = source
        .lines()
        .map(|line| {
            let line = line.split('#').next().unwrap_or("");
            line.split("//").next().unwrap_or("")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut statements = Vec::new();
    let bytes = stripped.as_bytes();
    let mut pos = 0usize;

    let line_of = |pos: usize| stripped[..pos].matches('\n').count() + 1;

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let err_at = |pos: usize, details: String| RuleError::Syntax {
            file: origin.to_string(),
            line: line_of(pos),
            details,
        };

        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let keyword = stripped[start..pos].to_ascii_uppercase();
        if keyword.is_empty() {
            return Err(err_at(pos, format!("unexpected character '{}'", stripped[pos..].chars().next().unwrap_or('?'))));
        }

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'(' {
            return Err(err_at(start, format!("expected '(' after {keyword}")));
        }
        let open = pos;
        let mut depth = 0i32;
        let mut close = None;
        while pos < bytes.len() {
            match bytes[pos] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(pos);
                        break;
                    }
                }
                _ => {}
            }
            pos += 1;
        }
        let close = close.ok_or_else(|| err_at(open, "unterminated '('".to_string()))?;
        let inner = &stripped[open + 1..close];
        pos = close + 1;

        // Optional predicate block.
        let mut predicate_text: Option<&str> = None;
        let mut lookahead = pos;
        while lookahead < bytes.len() && bytes[lookahead].is_ascii_whitespace() {
            lookahead += 1;
        }
        if lookahead < bytes.len() && bytes[lookahead] == b'{' {
            let brace_open = lookahead;
            let brace_close = stripped[brace_open..]
                .find('}')
                .map(|off| brace_open + off)
                .ok_or_else(|| err_at(brace_open, "unterminated '{'".to_string()))?;
            predicate_text = Some(&stripped[brace_open + 1..brace_close]);
            pos = brace_close + 1;
        }

        let mk_err = |details: String| RuleError::Syntax {
            file: origin.to_string(),
            line: line_of(start),
            details,
        };

        let edge = inner.split_once("->");
        let statement = match (keyword.as_str(), edge, predicate_text) {
            ("LIMIT", None, Some(pred)) => AqlStatement::Limit {
                pattern: AqlPattern::parse(inner, &mk_err)?,
                predicate: Predicate::parse(pred, &mk_err)?,
            },
            ("LIMIT", _, None) => return Err(mk_err("LIMIT requires a { predicate }".to_string())),
            (_, _, Some(_)) => {
                return Err(mk_err(format!("{keyword} does not take a predicate")))
            }
            ("FORBID", None, None) => AqlStatement::Forbid {
                pattern: AqlPattern::parse(inner, &mk_err)?,
            },
            ("FORBID", Some((from, to)), None) => AqlStatement::ForbidEdge {
                from: AqlPattern::parse(from, &mk_err)?,
                to: AqlPattern::parse(to, &mk_err)?,
            },
            ("REQUIRE", None, None) => AqlStatement::Require {
                pattern: AqlPattern::parse(inner, &mk_err)?,
            },
            ("REQUIRE", Some((from, to)), None) => AqlStatement::RequireEdge {
                from: AqlPattern::parse(from, &mk_err)?,
                to: AqlPattern::parse(to, &mk_err)?,
            },
            ("ALLOW", None, None) => AqlStatement::Allow {
                pattern: AqlPattern::parse(inner, &mk_err)?,
            },
            ("ALLOW", Some((from, to)), None) => AqlStatement::AllowEdge {
                from: AqlPattern::parse(from, &mk_err)?,
                to: AqlPattern::parse(to, &mk_err)?,
            },
            (other, _, _) => return Err(mk_err(format!("unknown statement '{other}'"))),
        };
        statements.push(statement);
    }

    Ok(AqlRuleSet { statements })
}

/// A call edge leaving a node, resolved to either another node or a
/// library node.
enum CallTarget {
    Node(AstNode),
    Library(LibraryNode),
}

fn outgoing_calls(cache: &AstCache, node: &AstNode) -> Result<Vec<(CallTarget, u32)>, CacheError> {
    let Some(id) = node.id else {
        return Ok(Vec::new());
    };
    let mut targets = Vec::new();
    for rel in cache.get_ast_relationships(id, Some(RelationshipKind::Call))? {
        if let Some(to_id) = rel.to_ast_id
            && let Some(target) = cache.get_ast_node(to_id)?
        {
            targets.push((CallTarget::Node(target), rel.line));
        }
    }
    for rel in cache.get_library_relationships(id, Some(RelationshipKind::Call))? {
        if let Some(library) = cache.get_library_node(rel.library_id)? {
            targets.push((CallTarget::Library(library), rel.line));
        }
    }
    Ok(targets)
}

fn caller_ref(node: &AstNode) -> CallerRef {
    CallerRef {
        file_path: node.key.file_path.clone(),
        package: node.key.package.clone(),
        type_name: node.key.type_name.clone(),
        method: node.key.method_name.clone(),
    }
}

fn called_ref(target: &CallTarget) -> CalledRef {
    match target {
        CallTarget::Node(node) => CalledRef {
            package: node.key.package.clone(),
            class: (!node.key.type_name.is_empty()).then(|| node.key.type_name.clone()),
            method: node.key.method_name.clone(),
            external: false,
        },
        CallTarget::Library(library) => CalledRef {
            package: library.package.clone(),
            class: (!library.class.is_empty()).then(|| library.class.clone()),
            method: library.method.clone(),
            external: true,
        },
    }
}

fn node_violation(node: &AstNode, message: String) -> Violation {
    Violation {
        file: node.key.file_path.clone(),
        line: node.start_line,
        column: None,
        caller: caller_ref(node),
        called: CalledRef::default(),
        message,
        source: ViolationSource::Aql,
    }
}

/// Evaluate a ruleset against the stored graph.
pub fn evaluate(cache: &AstCache, rules: &AqlRuleSet) -> Result<Vec<Violation>, CacheError> {
    let allow_nodes: Vec<&AqlPattern> = rules
        .statements
        .iter()
        .filter_map(|s| match s {
            AqlStatement::Allow { pattern } => Some(pattern),
            _ => None,
        })
        .collect();
    let allow_edges: Vec<(&AqlPattern, &AqlPattern)> = rules
        .statements
        .iter()
        .filter_map(|s| match s {
            AqlStatement::AllowEdge { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();

    let edge_allowed = |node: &AstNode, target: &CallTarget| {
        allow_edges.iter().any(|(from, to)| {
            from.matches_node(node)
                && match target {
                    CallTarget::Node(n) => to.matches_node(n),
                    CallTarget::Library(l) => to.matches_library(l),
                }
        })
    };

    let mut violations = Vec::new();

    for statement in &rules.statements {
        match statement {
            AqlStatement::Limit { pattern, predicate } => {
                for node in cache.query_nodes(&pattern.to_filter())? {
                    if pattern.matches_node(&node) && predicate.eval(&node) {
                        let message = format!(
                            "{} violates limit '{}' ({})",
                            node.key.display_name(),
                            predicate.describe(),
                            predicate.observed(&node),
                        );
                        violations.push(node_violation(&node, message));
                    }
                }
            }
            AqlStatement::Forbid { pattern } => {
                for node in cache.query_nodes(&pattern.to_filter())? {
                    if !pattern.matches_node(&node) {
                        continue;
                    }
                    if allow_nodes.iter().any(|allow| allow.matches_node(&node)) {
                        continue;
                    }
                    let message = format!(
                        "{} is forbidden by pattern '{}'",
                        node.key.display_name(),
                        pattern.describe(),
                    );
                    violations.push(node_violation(&node, message));
                }
            }
            AqlStatement::ForbidEdge { from, to } => {
                for node in cache.query_nodes(&from.to_filter())? {
                    if !from.matches_node(&node) {
                        continue;
                    }
                    for (target, line) in outgoing_calls(cache, &node)? {
                        let hit = match &target {
                            CallTarget::Node(n) => to.matches_node(n),
                            CallTarget::Library(l) => to.matches_library(l),
                        };
                        if !hit || edge_allowed(&node, &target) {
                            continue;
                        }
                        let called = called_ref(&target);
                        violations.push(Violation {
                            file: node.key.file_path.clone(),
                            line,
                            column: None,
                            caller: caller_ref(&node),
                            message: format!(
                                "forbidden call {} -> {}.{}",
                                node.key.display_name(),
                                called.package,
                                called.method,
                            ),
                            called,
                            source: ViolationSource::Aql,
                        });
                    }
                }
            }
            AqlStatement::Require { pattern } => {
                let matched = cache
                    .query_nodes(&pattern.to_filter())?
                    .into_iter()
                    .any(|node| pattern.matches_node(&node));
                if !matched {
                    violations.push(Violation {
                        file: String::new(),
                        line: 0,
                        column: None,
                        caller: CallerRef::default(),
                        called: CalledRef::default(),
                        message: format!(
                            "required pattern '{}' has no matches",
                            pattern.describe(),
                        ),
                        source: ViolationSource::Aql,
                    });
                }
            }
            AqlStatement::RequireEdge { from, to } => {
                for node in cache.query_nodes(&from.to_filter())? {
                    if !from.matches_node(&node) {
                        continue;
                    }
                    let has_edge = outgoing_calls(cache, &node)?.iter().any(|(target, _)| {
                        match target {
                            CallTarget::Node(n) => to.matches_node(n),
                            CallTarget::Library(l) => to.matches_library(l),
                        }
                    });
                    if !has_edge {
                        let message = format!(
                            "{} has no call to '{}'",
                            node.key.display_name(),
                            to.describe(),
                        );
                        violations.push(node_violation(&node, message));
                    }
                }
            }
            AqlStatement::Allow { .. } | AqlStatement::AllowEdge { .. } => {}
        }
    }
    Ok(violations)
}

/// Gather `.aql` rule files under `root`, concatenated per file.
pub fn load_aql_sources(root: &Path) -> Result<Vec<(std::path::PathBuf, String)>, RuleError> {
    let mut sources = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && (crate::fs_utils::is_skipped_dir(&name) || name.starts_with('.')))
        });
    for entry in walker.filter_map(Result::ok) {
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("aql")
        {
            let content = std::fs::read_to_string(entry.path())?;
            sources.push((entry.into_path(), content));
        }
    }
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKey, NodeKind};

    fn method(file: &str, pkg: &str, type_name: &str, name: &str, cc: u32) -> AstNode {
        let mut node = AstNode::new(NodeKey::method(file, pkg, type_name, name)).with_lines(10, 30);
        node.cyclomatic_complexity = Some(cc);
        node.parameter_count = Some(2);
        node.return_count = Some(1);
        node
    }

    fn parse(src: &str) -> AqlRuleSet {
        parse_aql(src, "rules.aql").unwrap()
    }

    #[test]
    fn parses_all_statement_forms() {
        let rules = parse(
            r#"
# keep methods small
LIMIT(method:*) { cyclomatic_complexity > 10 AND parameter_count >= 2 }
FORBID(package:legacy.*)
FORBID(package:service.* -> package:database/sql.*)
REQUIRE(type:*Handler)
REQUIRE(package:api.* -> package:auth.*)
ALLOW(package:legacy.bridge)
ALLOW(package:service.audit -> package:database/sql.*)
"#,
        );
        assert_eq!(rules.statements.len(), 7);
        assert!(matches!(rules.statements[0], AqlStatement::Limit { .. }));
        assert!(matches!(rules.statements[2], AqlStatement::ForbidEdge { .. }));
        assert!(matches!(rules.statements[4], AqlStatement::RequireEdge { .. }));
        assert!(matches!(rules.statements[6], AqlStatement::AllowEdge { .. }));
    }

    #[test]
    fn rejects_bad_syntax() {
        assert!(matches!(
            parse_aql("LIMIT(method:*)", "f.aql"),
            Err(RuleError::Syntax { .. })
        ));
        assert!(matches!(
            parse_aql("FORBID(package:x) { line_count > 3 }", "f.aql"),
            Err(RuleError::Syntax { .. })
        ));
        assert!(matches!(
            parse_aql("PERMIT(package:x)", "f.aql"),
            Err(RuleError::Syntax { .. })
        ));
        assert!(matches!(
            parse_aql("FORBID(wrong:x)", "f.aql"),
            Err(RuleError::Syntax { .. })
        ));
        assert!(matches!(
            parse_aql("LIMIT(method:*) { bogus_metric > 1 }", "f.aql"),
            Err(RuleError::Syntax { .. })
        ));
    }

    #[test]
    fn limit_flags_only_predicate_matches() {
        let cache = AstCache::open_in_memory().unwrap();
        cache.store_ast_node(&method("a.go", "svc", "", "Big", 14)).unwrap();
        cache.store_ast_node(&method("a.go", "svc", "", "Small", 2)).unwrap();

        let rules = parse("LIMIT(method:*) { cyclomatic_complexity > 10 }");
        let violations = evaluate(&cache, &rules).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].caller.method, "Big");
        assert_eq!(violations[0].source, ViolationSource::Aql);
        assert!(violations[0].message.contains("cyclomatic_complexity = 14"));
    }

    #[test]
    fn forbid_pattern_with_allow_exception() {
        let cache = AstCache::open_in_memory().unwrap();
        cache.store_ast_node(&method("a.go", "legacy.core", "", "Old", 1)).unwrap();
        cache.store_ast_node(&method("a.go", "legacy.bridge", "", "Keep", 1)).unwrap();

        let rules = parse("FORBID(package:legacy.*)\nALLOW(package:legacy.bridge)");
        let violations = evaluate(&cache, &rules).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].caller.package, "legacy.core");
    }

    #[test]
    fn forbid_edge_to_library_package() {
        let cache = AstCache::open_in_memory().unwrap();
        let svc = method("svc/user.go", "service", "", "GetUser", 3);
        let id = cache.store_ast_node(&svc).unwrap();
        let lib = cache
            .store_library_node("database/sql", "", "QueryRow", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        cache
            .store_library_relationship(id, lib, 17, RelationshipKind::Call, "sql.QueryRow")
            .unwrap();

        let rules = parse("FORBID(package:service.* -> package:database/sql.*)");
        let violations = evaluate(&cache, &rules).unwrap();
        assert_eq!(violations.len(), 1);
        let v = &violations[0];
        assert_eq!(v.line, 17);
        assert_eq!(v.caller.method, "GetUser");
        assert_eq!(v.called.package, "database/sql");
        assert_eq!(v.called.method, "QueryRow");
        assert!(v.called.external);
    }

    #[test]
    fn forbid_edge_respects_allow_edge() {
        let cache = AstCache::open_in_memory().unwrap();
        let audit = method("svc/audit.go", "service.audit", "", "Log", 1);
        let id = cache.store_ast_node(&audit).unwrap();
        let lib = cache
            .store_library_node("database/sql", "", "Exec", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        cache
            .store_library_relationship(id, lib, 5, RelationshipKind::Call, "sql.Exec")
            .unwrap();

        let rules = parse(
            "FORBID(package:service.* -> package:database/sql.*)\n\
             ALLOW(package:service.audit -> package:database/sql.*)",
        );
        assert!(evaluate(&cache, &rules).unwrap().is_empty());
    }

    #[test]
    fn require_pattern_reports_absence_once() {
        let cache = AstCache::open_in_memory().unwrap();
        cache.store_ast_node(&method("a.go", "svc", "", "Run", 1)).unwrap();

        let rules = parse("REQUIRE(type:*Handler)");
        let violations = evaluate(&cache, &rules).unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("*Handler"));

        let satisfied = parse("REQUIRE(method:Run)");
        assert!(evaluate(&cache, &satisfied).unwrap().is_empty());
    }

    #[test]
    fn require_edge_flags_nodes_without_the_call() {
        let cache = AstCache::open_in_memory().unwrap();
        let with = method("api/a.go", "api", "", "Create", 1);
        let with_id = cache.store_ast_node(&with).unwrap();
        let without = method("api/b.go", "api", "", "Delete", 1);
        cache.store_ast_node(&without).unwrap();

        let auth = cache
            .store_library_node("auth", "", "Check", "", NodeKind::Method, "go", "third-party")
            .unwrap();
        cache
            .store_library_relationship(with_id, auth, 3, RelationshipKind::Call, "auth.Check")
            .unwrap();

        let rules = parse("REQUIRE(package:api method:* -> package:auth.*)");
        let violations = evaluate(&cache, &rules).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].caller.method, "Delete");
    }

    #[test]
    fn package_suffix_pattern_matches_bare_package() {
        assert!(package_match("database/sql.*", "database/sql"));
        assert!(package_match("database/sql.*", "database/sql.driver"));
        assert!(!package_match("database/sql.*", "database/sqlite"));
        assert!(package_match("service.*", "service"));
    }
}
