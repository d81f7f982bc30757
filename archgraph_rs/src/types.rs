//! Common types used throughout the crate.
//!
//! The graph model is deliberately flat: nodes and relationships are plain
//! rows keyed by integer ids, cycles included. Consumers load a node by id
//! and walk outgoing edges through the cache; nothing owns anything by
//! back-reference.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Kind of an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Package,
    Type,
    Method,
    Field,
    Variable,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Package => "package",
            NodeKind::Type => "type",
            NodeKind::Method => "method",
            NodeKind::Field => "field",
            NodeKind::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "package" => Some(NodeKind::Package),
            "type" => Some(NodeKind::Type),
            "method" => Some(NodeKind::Method),
            "field" => Some(NodeKind::Field),
            "variable" => Some(NodeKind::Variable),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of an AST node across re-analyses of the same file.
///
/// Two nodes with the same key are the same node; the cache enforces this
/// with a unique constraint and reuses the integer id on upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub file_path: String,
    pub package: String,
    pub type_name: String,
    pub method_name: String,
    pub field_name: String,
    pub kind: NodeKind,
}

impl NodeKey {
    pub fn package(file_path: impl Into<String>, package: impl Into<String>) -> Self {
        NodeKey {
            file_path: file_path.into(),
            package: package.into(),
            type_name: String::new(),
            method_name: String::new(),
            field_name: String::new(),
            kind: NodeKind::Package,
        }
    }

    pub fn type_node(
        file_path: impl Into<String>,
        package: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        NodeKey {
            file_path: file_path.into(),
            package: package.into(),
            type_name: type_name.into(),
            method_name: String::new(),
            field_name: String::new(),
            kind: NodeKind::Type,
        }
    }

    pub fn method(
        file_path: impl Into<String>,
        package: impl Into<String>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        NodeKey {
            file_path: file_path.into(),
            package: package.into(),
            type_name: type_name.into(),
            method_name: method_name.into(),
            field_name: String::new(),
            kind: NodeKind::Method,
        }
    }

    pub fn field(
        file_path: impl Into<String>,
        package: impl Into<String>,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        NodeKey {
            file_path: file_path.into(),
            package: package.into(),
            type_name: type_name.into(),
            method_name: String::new(),
            field_name: field_name.into(),
            kind: NodeKind::Field,
        }
    }

    pub fn variable(
        file_path: impl Into<String>,
        package: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        NodeKey {
            file_path: file_path.into(),
            package: package.into(),
            type_name: String::new(),
            method_name: String::new(),
            field_name: name.into(),
            kind: NodeKind::Variable,
        }
    }

    /// Human-readable `pkg.Type.method` form used in messages.
    pub fn display_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.package.is_empty() {
            parts.push(&self.package);
        }
        if !self.type_name.is_empty() {
            parts.push(&self.type_name);
        }
        if !self.method_name.is_empty() {
            parts.push(&self.method_name);
        }
        if !self.field_name.is_empty() {
            parts.push(&self.field_name);
        }
        if parts.is_empty() {
            self.file_path.clone()
        } else {
            parts.join(".")
        }
    }
}

/// One named parameter of a method, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub name_length: usize,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        let name = name.into();
        let name_length = name.chars().count();
        Parameter {
            name,
            param_type: param_type.into(),
            name_length,
        }
    }
}

/// One return value of a method, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValue {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

/// A single node of the AST graph.
///
/// `id` is `None` until the node has been persisted; extractors always
/// produce id-less nodes and the cache assigns (or reuses) ids on store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    pub id: Option<i64>,
    pub key: NodeKey,
    pub start_line: u32,
    pub end_line: u32,
    pub line_count: u32,
    pub cyclomatic_complexity: Option<u32>,
    pub parameter_count: Option<u32>,
    pub return_count: Option<u32>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_values: Vec<ReturnValue>,
    pub is_private: bool,
    pub last_modified: Option<i64>,
}

impl AstNode {
    pub fn new(key: NodeKey) -> Self {
        AstNode {
            id: None,
            key,
            start_line: 0,
            end_line: 0,
            line_count: 0,
            cyclomatic_complexity: None,
            parameter_count: None,
            return_count: None,
            parameters: Vec::new(),
            return_values: Vec::new(),
            is_private: false,
            last_modified: None,
        }
    }

    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.start_line = start;
        self.end_line = end;
        self.line_count = end.saturating_sub(start) + 1;
        self
    }
}

/// Kind of a typed relationship between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Call,
    Inherits,
    Implements,
    References,
    Imports,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Call => "call",
            RelationshipKind::Inherits => "inherits",
            RelationshipKind::Implements => "implements",
            RelationshipKind::References => "references",
            RelationshipKind::Imports => "imports",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(RelationshipKind::Call),
            "inherits" => Some(RelationshipKind::Inherits),
            "implements" => Some(RelationshipKind::Implements),
            "references" => Some(RelationshipKind::References),
            "imports" => Some(RelationshipKind::Imports),
            _ => None,
        }
    }
}

/// A stored relationship row. `to_ast_id` is `None` when the target could
/// not be resolved inside the analysed file; `text` keeps the raw evidence
/// for later heuristic matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstRelationship {
    pub from_ast_id: i64,
    pub to_ast_id: Option<i64>,
    pub line: u32,
    pub kind: RelationshipKind,
    pub text: String,
}

/// A deduplicated reference to an external library symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryNode {
    pub id: Option<i64>,
    pub package: String,
    pub class: String,
    pub method: String,
    pub field: String,
    pub kind: NodeKind,
    pub language: String,
    /// Origin ecosystem tag: `stdlib`, `third-party`, or a named framework.
    pub framework: String,
}

/// A stored edge from an AST node to a library node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRelationship {
    pub ast_id: i64,
    pub library_id: i64,
    pub line: u32,
    pub kind: RelationshipKind,
    pub text: String,
}

/// On-disk identity of an analysed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub content_hash: String,
    pub mtime: i64,
    pub size: u64,
    pub last_analyzed: i64,
}

/// Ecosystem of a third-party dependency. Closed enum surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Go,
    Stdlib,
    Npm,
    Maven,
    Pip,
    Docker,
    Helm,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Go => "go",
            DependencyType::Stdlib => "stdlib",
            DependencyType::Npm => "npm",
            DependencyType::Maven => "maven",
            DependencyType::Pip => "pip",
            DependencyType::Docker => "docker",
            DependencyType::Helm => "helm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "go" => Some(DependencyType::Go),
            "stdlib" => Some(DependencyType::Stdlib),
            "npm" => Some(DependencyType::Npm),
            "maven" => Some(DependencyType::Maven),
            "pip" => Some(DependencyType::Pip),
            "docker" => Some(DependencyType::Docker),
            "helm" => Some(DependencyType::Helm),
            _ => None,
        }
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One third-party dependency found in a build manifest.
///
/// Produced by a scanner and returned to the caller; never persisted in
/// the AST tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    /// Manifest file the dependency came from.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub indirect: bool,
}

impl Dependency {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        dep_type: DependencyType,
        source: impl Into<String>,
    ) -> Self {
        Dependency {
            name: name.into(),
            version: version.into(),
            dep_type,
            source: source.into(),
            git_url: None,
            homepage: None,
            indirect: false,
        }
    }
}

/// Cached resolution of `(package name, ecosystem)` to a Git repository URL.
///
/// An empty `git_url` is a valid cached outcome: it suppresses repeated
/// lookups for unresolvable packages until the row expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyAlias {
    pub package_name: String,
    pub package_type: DependencyType,
    pub git_url: String,
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

/// Rule engine that produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSource {
    #[serde(rename = "archunit")]
    Archunit,
    #[serde(rename = "aql")]
    Aql,
    #[serde(rename = "ai-analyzer")]
    AiAnalyzer,
}

impl ViolationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationSource::Archunit => "archunit",
            ViolationSource::Aql => "aql",
            ViolationSource::AiAnalyzer => "ai-analyzer",
        }
    }
}

/// The calling side of a violation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerRef {
    pub file_path: String,
    pub package: String,
    pub type_name: String,
    pub method: String,
}

/// The called side of a violation. May reference an external symbol that
/// was never resolved to a stored node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalledRef {
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub method: String,
    #[serde(default)]
    pub external: bool,
}

/// A single rule violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub caller: CallerRef,
    pub called: CalledRef,
    pub message: String,
    pub source: ViolationSource,
}

/// Cooperative cancellation flag shared across workers.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
