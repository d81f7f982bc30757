//! Persistent AST graph cache backed by SQLite.
//!
//! This module implements the "index once, query everything" side of the
//! crate: nodes, relationships, library references, file metadata and
//! dependency aliases all live in one database so a per-file rewrite can be
//! a single transaction. Readers observe either the previous snapshot of a
//! file or the next one, never a mix.
//!
//! Node identity is the synthetic [`NodeKey`]; the `ast_nodes` table carries
//! a unique constraint over the key columns and upserts reuse the existing
//! integer id, which keeps ids stable across re-analyses.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::Lazy;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::extractor::AstResult;
use crate::fs_utils;
use crate::types::{
    AstNode, AstRelationship, DependencyAlias, DependencyType, FileMetadata, LibraryNode,
    LibraryRelationship, NodeKey, NodeKind, Parameter, RelationshipKind, ReturnValue,
};

/// Environment variable to override the cache base directory.
const CACHE_DIR_ENV: &str = "ARCHGRAPH_CACHE_DIR";

/// Database file name inside the per-project cache directory.
const DB_FILE: &str = "graph.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ast_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    package_name TEXT NOT NULL DEFAULT '',
    type_name TEXT NOT NULL DEFAULT '',
    method_name TEXT NOT NULL DEFAULT '',
    field_name TEXT NOT NULL DEFAULT '',
    node_type TEXT NOT NULL,
    start_line INTEGER NOT NULL DEFAULT 0,
    end_line INTEGER NOT NULL DEFAULT 0,
    line_count INTEGER NOT NULL DEFAULT 0,
    cyclomatic_complexity INTEGER,
    parameter_count INTEGER,
    return_count INTEGER,
    parameters TEXT,
    return_values TEXT,
    is_private INTEGER NOT NULL DEFAULT 0,
    last_modified INTEGER,
    UNIQUE(file_path, package_name, type_name, method_name, field_name, node_type)
);
CREATE INDEX IF NOT EXISTS idx_ast_nodes_file ON ast_nodes(file_path);

CREATE TABLE IF NOT EXISTS ast_relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_ast_id INTEGER NOT NULL,
    to_ast_id INTEGER,
    line INTEGER NOT NULL DEFAULT 0,
    relationship_type TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_ast_rel_from ON ast_relationships(from_ast_id);

CREATE TABLE IF NOT EXISTS library_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    package TEXT NOT NULL DEFAULT '',
    class TEXT NOT NULL DEFAULT '',
    method TEXT NOT NULL DEFAULT '',
    field TEXT NOT NULL DEFAULT '',
    node_type TEXT NOT NULL,
    language TEXT NOT NULL DEFAULT '',
    framework TEXT NOT NULL DEFAULT '',
    UNIQUE(package, class, method, field, node_type, language, framework)
);

CREATE TABLE IF NOT EXISTS library_relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ast_id INTEGER NOT NULL,
    library_id INTEGER NOT NULL,
    line INTEGER NOT NULL DEFAULT 0,
    relationship_type TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_lib_rel_ast ON library_relationships(ast_id);

CREATE TABLE IF NOT EXISTS file_metadata (
    file_path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    last_analyzed INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dependency_aliases (
    package_name TEXT NOT NULL,
    package_type TEXT NOT NULL,
    git_url TEXT NOT NULL DEFAULT '',
    last_checked INTEGER NOT NULL,
    PRIMARY KEY(package_name, package_type)
);
"#;

/// Returns the global cache base directory for archgraph artifacts.
///
/// Priority:
/// 1. `ARCHGRAPH_CACHE_DIR` environment variable
/// 2. Platform default: `$XDG_CACHE_HOME/archgraph` or `~/Library/Caches/archgraph`
/// 3. Fallback: OS temp dir (for environments without a home/cache directory)
pub fn cache_base_dir() -> PathBuf {
    if let Ok(custom) = std::env::var(CACHE_DIR_ENV) {
        let custom = custom.trim();
        if !custom.is_empty() {
            return PathBuf::from(custom);
        }
    }
    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("archgraph");
    }
    std::env::temp_dir().join("archgraph")
}

/// Returns the cache directory for a specific project.
///
/// Layout: `<cache_base>/projects/<project_id>/`
/// where `project_id` is the first 16 hex chars of SHA-256(canonical root).
pub fn project_cache_dir(root: &Path) -> PathBuf {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let hash = hasher.finalize();
    let project_id = format!("{:x}", hash).chars().take(16).collect::<String>();
    cache_base_dir().join("projects").join(project_id)
}

/// Read-only view handed to extractors. Lets them pre-fill ids for hot
/// nodes without giving them a write surface.
pub trait CacheView: Send + Sync {
    fn get_ast_id(&self, key: &NodeKey) -> Result<Option<i64>, CacheError>;
}

/// A view that knows nothing. Used in rule-mode analysis and tests.
#[derive(Debug, Default)]
pub struct EmptyCacheView;

impl CacheView for EmptyCacheView {
    fn get_ast_id(&self, _key: &NodeKey) -> Result<Option<i64>, CacheError> {
        Ok(None)
    }
}

/// Counts reported by a per-file persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub nodes: usize,
    pub relationships: usize,
    pub library_refs: usize,
}

/// A call edge joined with caller and callee detail, as consumed by the
/// simple rule checker.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub caller_file: String,
    pub caller_package: String,
    pub caller_type: String,
    pub caller_method: String,
    pub line: u32,
    pub called_package: String,
    pub called_class: String,
    pub called_method: String,
    /// True when the callee is a library node or an unresolved external.
    pub external: bool,
}

/// Wildcard filter over node key columns. `*` matches any run of
/// characters; everything else is literal. Missing fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub file_path: Option<String>,
    pub package: Option<String>,
    pub type_name: Option<String>,
    pub method: Option<String>,
    pub field: Option<String>,
}

impl NodeFilter {
    pub fn is_empty(&self) -> bool {
        self.file_path.is_none()
            && self.package.is_none()
            && self.type_name.is_none()
            && self.method.is_none()
            && self.field.is_none()
    }
}

/// Translate a `*`-wildcard pattern into a SQL LIKE pattern.
/// `%` and `_` in the input are escaped so they stay literal.
fn like_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}

/// The durable AST graph store.
///
/// One connection behind a mutex: every mutating operation runs in the
/// single writer lane, and the per-file rewrite is one transaction.
pub struct AstCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for AstCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstCache").field("path", &self.path).finish()
    }
}

impl AstCache {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(AstCache {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the cache for a project root, in the per-project cache dir.
    pub fn open_for_project(root: &Path) -> Result<Self, CacheError> {
        Self::open(&project_cache_dir(root).join(DB_FILE))
    }

    /// In-memory database, used by tests and rule-mode pipelines.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(AstCache {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Staleness
    // ------------------------------------------------------------------

    /// True when `path` has no metadata row or its on-disk identity
    /// differs from the recorded one. mtime+size match short-circuits the
    /// hash; otherwise the content hash decides.
    pub fn needs_reanalysis(&self, path: &Path) -> Result<bool, CacheError> {
        let key = path.to_string_lossy().to_string();
        let row: Option<(String, i64, i64)> = self
            .lock()
            .query_row(
                "SELECT content_hash, mtime, size FROM file_metadata WHERE file_path = ?1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((hash, mtime, size)) = row else {
            return Ok(true);
        };
        let Ok((disk_mtime, disk_size)) = fs_utils::file_identity(path) else {
            return Ok(true);
        };
        if disk_mtime == mtime && disk_size as i64 == size {
            return Ok(false);
        }
        match fs_utils::sha256_file(path) {
            Ok(disk_hash) => Ok(disk_hash != hash),
            Err(_) => Ok(true),
        }
    }

    /// Record the current on-disk identity of `path`.
    pub fn update_file_metadata(&self, path: &Path) -> Result<(), CacheError> {
        let key = path.to_string_lossy().to_string();
        let hash = fs_utils::sha256_file(path)?;
        let (mtime, size) = fs_utils::file_identity(path)?;
        let now = chrono::Utc::now().timestamp();
        self.lock().execute(
            "INSERT OR REPLACE INTO file_metadata (file_path, content_hash, mtime, size, last_analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, hash, mtime, size as i64, now],
        )?;
        Ok(())
    }

    pub fn get_file_metadata(&self, path: &Path) -> Result<Option<FileMetadata>, CacheError> {
        let key = path.to_string_lossy().to_string();
        let row = self
            .lock()
            .query_row(
                "SELECT file_path, content_hash, mtime, size, last_analyzed
                 FROM file_metadata WHERE file_path = ?1",
                params![key],
                |r| {
                    Ok(FileMetadata {
                        file_path: r.get(0)?,
                        content_hash: r.get(1)?,
                        mtime: r.get(2)?,
                        size: r.get::<_, i64>(3)? as u64,
                        last_analyzed: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Upsert by key; an existing key keeps its id and has the mutable
    /// columns refreshed.
    pub fn store_ast_node(&self, node: &AstNode) -> Result<i64, CacheError> {
        let conn = self.lock();
        Self::store_ast_node_on(&conn, node)
    }

    fn store_ast_node_on(conn: &Connection, node: &AstNode) -> Result<i64, CacheError> {
        let parameters = serde_json::to_string(&node.parameters).unwrap_or_default();
        let return_values = serde_json::to_string(&node.return_values).unwrap_or_default();
        let id: i64 = conn.query_row(
            "INSERT INTO ast_nodes
                 (file_path, package_name, type_name, method_name, field_name, node_type,
                  start_line, end_line, line_count, cyclomatic_complexity,
                  parameter_count, return_count, parameters, return_values,
                  is_private, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(file_path, package_name, type_name, method_name, field_name, node_type)
             DO UPDATE SET
                 start_line = excluded.start_line,
                 end_line = excluded.end_line,
                 line_count = excluded.line_count,
                 cyclomatic_complexity = excluded.cyclomatic_complexity,
                 parameter_count = excluded.parameter_count,
                 return_count = excluded.return_count,
                 parameters = excluded.parameters,
                 return_values = excluded.return_values,
                 is_private = excluded.is_private,
                 last_modified = excluded.last_modified
             RETURNING id",
            params![
                node.key.file_path,
                node.key.package,
                node.key.type_name,
                node.key.method_name,
                node.key.field_name,
                node.key.kind.as_str(),
                node.start_line,
                node.end_line,
                node.line_count,
                node.cyclomatic_complexity,
                node.parameter_count,
                node.return_count,
                parameters,
                return_values,
                node.is_private,
                node.last_modified,
            ],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn get_ast_id(&self, key: &NodeKey) -> Result<Option<i64>, CacheError> {
        let conn = self.lock();
        Self::get_ast_id_on(&conn, key)
    }

    fn get_ast_id_on(conn: &Connection, key: &NodeKey) -> Result<Option<i64>, CacheError> {
        let id = conn
            .query_row(
                "SELECT id FROM ast_nodes
                 WHERE file_path = ?1 AND package_name = ?2 AND type_name = ?3
                   AND method_name = ?4 AND field_name = ?5 AND node_type = ?6",
                params![
                    key.file_path,
                    key.package,
                    key.type_name,
                    key.method_name,
                    key.field_name,
                    key.kind.as_str()
                ],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_ast_node(&self, id: i64) -> Result<Option<AstNode>, CacheError> {
        let conn = self.lock();
        let node = conn
            .query_row(
                &format!("{} WHERE id = ?1", NODE_SELECT),
                params![id],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    pub fn get_ast_nodes_by_file(&self, path: &str) -> Result<Vec<AstNode>, CacheError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{} WHERE file_path = ?1 ORDER BY id", NODE_SELECT))?;
        let nodes = stmt
            .query_map(params![path], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Nodes matching a wildcard filter, `*` mapped to SQL `LIKE`.
    pub fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<AstNode>, CacheError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        let mut push = |column: &str, pattern: &Option<String>| {
            if let Some(p) = pattern {
                clauses.push(format!("{column} LIKE ? ESCAPE '\\'"));
                values.push(like_pattern(p));
            }
        };
        push("file_path", &filter.file_path);
        push("package_name", &filter.package);
        push("type_name", &filter.type_name);
        push("method_name", &filter.method);
        push("field_name", &filter.field);

        let sql = if clauses.is_empty() {
            format!("{} ORDER BY id", NODE_SELECT)
        } else {
            format!("{} WHERE {} ORDER BY id", NODE_SELECT, clauses.join(" AND "))
        };

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    pub fn store_ast_relationship(
        &self,
        from_ast_id: i64,
        to_ast_id: Option<i64>,
        line: u32,
        kind: RelationshipKind,
        text: &str,
    ) -> Result<(), CacheError> {
        let conn = self.lock();
        Self::store_ast_relationship_on(&conn, from_ast_id, to_ast_id, line, kind, text)
    }

    fn store_ast_relationship_on(
        conn: &Connection,
        from_ast_id: i64,
        to_ast_id: Option<i64>,
        line: u32,
        kind: RelationshipKind,
        text: &str,
    ) -> Result<(), CacheError> {
        conn.execute(
            "INSERT INTO ast_relationships (from_ast_id, to_ast_id, line, relationship_type, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![from_ast_id, to_ast_id, line, kind.as_str(), text],
        )?;
        Ok(())
    }

    pub fn get_ast_relationships(
        &self,
        from_ast_id: i64,
        kind: Option<RelationshipKind>,
    ) -> Result<Vec<AstRelationship>, CacheError> {
        let conn = self.lock();
        let mut out = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT from_ast_id, to_ast_id, line, relationship_type, text
             FROM ast_relationships WHERE from_ast_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![from_ast_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<i64>>(1)?,
                r.get::<_, u32>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?;
        for row in rows {
            let (from, to, line, kind_str, text) = row?;
            let Some(parsed) = RelationshipKind::parse(&kind_str) else {
                continue;
            };
            if kind.is_some() && kind != Some(parsed) {
                continue;
            }
            out.push(AstRelationship {
                from_ast_id: from,
                to_ast_id: to,
                line,
                kind: parsed,
                text,
            });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Library nodes
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn store_library_node(
        &self,
        package: &str,
        class: &str,
        method: &str,
        field: &str,
        kind: NodeKind,
        language: &str,
        framework: &str,
    ) -> Result<i64, CacheError> {
        let conn = self.lock();
        Self::store_library_node_on(&conn, package, class, method, field, kind, language, framework)
    }

    #[allow(clippy::too_many_arguments)]
    fn store_library_node_on(
        conn: &Connection,
        package: &str,
        class: &str,
        method: &str,
        field: &str,
        kind: NodeKind,
        language: &str,
        framework: &str,
    ) -> Result<i64, CacheError> {
        // Tuple upsert: dedupe on the full identity, nothing to update.
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM library_nodes
                 WHERE package = ?1 AND class = ?2 AND method = ?3 AND field = ?4
                   AND node_type = ?5 AND language = ?6 AND framework = ?7",
                params![package, class, method, field, kind.as_str(), language, framework],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO library_nodes (package, class, method, field, node_type, language, framework)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![package, class, method, field, kind.as_str(), language, framework],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_library_node(&self, id: i64) -> Result<Option<LibraryNode>, CacheError> {
        let conn = self.lock();
        let node = conn
            .query_row(
                "SELECT id, package, class, method, field, node_type, language, framework
                 FROM library_nodes WHERE id = ?1",
                params![id],
                |r| {
                    Ok(LibraryNode {
                        id: Some(r.get(0)?),
                        package: r.get(1)?,
                        class: r.get(2)?,
                        method: r.get(3)?,
                        field: r.get(4)?,
                        kind: NodeKind::parse(&r.get::<_, String>(5)?)
                            .unwrap_or(NodeKind::Package),
                        language: r.get(6)?,
                        framework: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(node)
    }

    pub fn store_library_relationship(
        &self,
        ast_id: i64,
        library_id: i64,
        line: u32,
        kind: RelationshipKind,
        text: &str,
    ) -> Result<(), CacheError> {
        let conn = self.lock();
        Self::store_library_relationship_on(&conn, ast_id, library_id, line, kind, text)
    }

    fn store_library_relationship_on(
        conn: &Connection,
        ast_id: i64,
        library_id: i64,
        line: u32,
        kind: RelationshipKind,
        text: &str,
    ) -> Result<(), CacheError> {
        conn.execute(
            "INSERT INTO library_relationships (ast_id, library_id, line, relationship_type, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ast_id, library_id, line, kind.as_str(), text],
        )?;
        Ok(())
    }

    pub fn get_library_relationships(
        &self,
        ast_id: i64,
        kind: Option<RelationshipKind>,
    ) -> Result<Vec<LibraryRelationship>, CacheError> {
        let conn = self.lock();
        let mut out = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT ast_id, library_id, line, relationship_type, text
             FROM library_relationships WHERE ast_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![ast_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, u32>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?;
        for row in rows {
            let (ast, lib, line, kind_str, text) = row?;
            let Some(parsed) = RelationshipKind::parse(&kind_str) else {
                continue;
            };
            if kind.is_some() && kind != Some(parsed) {
                continue;
            }
            out.push(LibraryRelationship {
                ast_id: ast,
                library_id: lib,
                line,
                kind: parsed,
                text,
            });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Per-file lifecycle
    // ------------------------------------------------------------------

    /// Wipe nodes and relationships rooted at `path`. Library nodes stay;
    /// other files may still refer to them.
    pub fn delete_ast_for_file(&self, path: &str) -> Result<(), CacheError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        Self::delete_ast_for_file_tx(&tx, path)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_ast_for_file_tx(tx: &rusqlite::Transaction<'_>, path: &str) -> Result<(), CacheError> {
        tx.execute(
            "DELETE FROM ast_relationships
             WHERE from_ast_id IN (SELECT id FROM ast_nodes WHERE file_path = ?1)
                OR to_ast_id IN (SELECT id FROM ast_nodes WHERE file_path = ?1)",
            params![path],
        )?;
        tx.execute(
            "DELETE FROM library_relationships
             WHERE ast_id IN (SELECT id FROM ast_nodes WHERE file_path = ?1)",
            params![path],
        )?;
        tx.execute("DELETE FROM ast_nodes WHERE file_path = ?1", params![path])?;
        tx.execute("DELETE FROM file_metadata WHERE file_path = ?1", params![path])?;
        Ok(())
    }

    /// Replace the stored graph for one file with an extraction result, as
    /// a single transaction: delete old rows, write nodes (building the
    /// key→id map), rewrite relationship endpoints through the map, then
    /// write library nodes and their edges. Partial failure rolls back and
    /// leaves the previous snapshot intact.
    pub fn persist_file_graph(&self, result: &AstResult) -> Result<PersistStats, CacheError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stats = PersistStats::default();

        Self::delete_ast_for_file_tx(&tx, &result.file_path)?;

        let mut id_map: HashMap<NodeKey, i64> = HashMap::with_capacity(result.nodes.len());
        for node in &result.nodes {
            let id = Self::store_ast_node_on(&tx, node)?;
            id_map.insert(node.key.clone(), id);
            stats.nodes += 1;
        }

        for rel in &result.relationships {
            let Some(&from_id) = id_map.get(&rel.from_key) else {
                tracing::warn!(
                    file = %result.file_path,
                    from = %rel.from_key.display_name(),
                    "dropping relationship with unknown source key"
                );
                continue;
            };
            let to_id = match &rel.to_key {
                Some(key) => match id_map.get(key) {
                    Some(&id) => Some(id),
                    None => Self::get_ast_id_on(&tx, key)?,
                },
                None => None,
            };
            Self::store_ast_relationship_on(&tx, from_id, to_id, rel.line, rel.kind, &rel.text)?;
            stats.relationships += 1;
        }

        for lib in &result.libraries {
            let Some(&ast_id) = id_map.get(&lib.from_key) else {
                tracing::warn!(
                    file = %result.file_path,
                    from = %lib.from_key.display_name(),
                    "dropping library reference with unknown source key"
                );
                continue;
            };
            let library_id = Self::store_library_node_on(
                &tx,
                &lib.package,
                &lib.class,
                &lib.method,
                "",
                lib.kind,
                &result.language,
                &lib.framework,
            )?;
            Self::store_library_relationship_on(&tx, ast_id, library_id, lib.line, lib.rel_kind, &lib.text)?;
            stats.library_refs += 1;
        }

        tx.commit()?;
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Rule engine support
    // ------------------------------------------------------------------

    /// All call edges joined with caller and callee detail. When `files`
    /// is given, only calls whose caller lives in one of those files are
    /// returned.
    pub fn call_sites(&self, files: Option<&[String]>) -> Result<Vec<CallSite>, CacheError> {
        let file_set: Option<HashSet<&str>> =
            files.map(|f| f.iter().map(String::as_str).collect());
        let keep = |file: &str| file_set.as_ref().is_none_or(|set| set.contains(file));
        let mut out = Vec::new();

        let conn = self.lock();
        {
            let mut stmt = conn.prepare(
                "SELECT n.file_path, n.package_name, n.type_name, n.method_name,
                        lr.line, ln.package, ln.class, ln.method
                 FROM library_relationships lr
                 JOIN ast_nodes n ON n.id = lr.ast_id
                 JOIN library_nodes ln ON ln.id = lr.library_id
                 WHERE lr.relationship_type = 'call'
                 ORDER BY lr.id",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(CallSite {
                    caller_file: r.get(0)?,
                    caller_package: r.get(1)?,
                    caller_type: r.get(2)?,
                    caller_method: r.get(3)?,
                    line: r.get(4)?,
                    called_package: r.get(5)?,
                    called_class: r.get(6)?,
                    called_method: r.get(7)?,
                    external: true,
                })
            })?;
            for row in rows {
                let site = row?;
                if keep(&site.caller_file) {
                    out.push(site);
                }
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT n.file_path, n.package_name, n.type_name, n.method_name,
                        r.line, t.package_name, t.type_name, t.method_name
                 FROM ast_relationships r
                 JOIN ast_nodes n ON n.id = r.from_ast_id
                 JOIN ast_nodes t ON t.id = r.to_ast_id
                 WHERE r.relationship_type = 'call' AND r.to_ast_id IS NOT NULL
                 ORDER BY r.id",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(CallSite {
                    caller_file: r.get(0)?,
                    caller_package: r.get(1)?,
                    caller_type: r.get(2)?,
                    caller_method: r.get(3)?,
                    line: r.get(4)?,
                    called_package: r.get(5)?,
                    called_class: r.get(6)?,
                    called_method: r.get(7)?,
                    external: false,
                })
            })?;
            for row in rows {
                let site = row?;
                if keep(&site.caller_file) {
                    out.push(site);
                }
            }
        }
        {
            // Unresolved externals: derive package.method from the raw text.
            let mut stmt = conn.prepare(
                "SELECT n.file_path, n.package_name, n.type_name, n.method_name, r.line, r.text
                 FROM ast_relationships r
                 JOIN ast_nodes n ON n.id = r.from_ast_id
                 WHERE r.relationship_type = 'call' AND r.to_ast_id IS NULL
                 ORDER BY r.id",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, u32>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })?;
            for row in rows {
                let (file, package, type_name, method, line, text) = row?;
                if !keep(&file) {
                    continue;
                }
                let target = text.split('(').next().unwrap_or(&text).trim();
                let (called_package, called_method) = match target.rsplit_once('.') {
                    Some((pkg, m)) => (pkg.to_string(), m.to_string()),
                    None => (String::new(), target.to_string()),
                };
                out.push(CallSite {
                    caller_file: file,
                    caller_package: package,
                    caller_type: type_name,
                    caller_method: method,
                    line,
                    called_package,
                    called_class: String::new(),
                    called_method,
                    external: true,
                });
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Dependency aliases
    // ------------------------------------------------------------------

    pub fn get_dependency_alias(
        &self,
        name: &str,
        dep_type: DependencyType,
    ) -> Result<Option<DependencyAlias>, CacheError> {
        let row = self
            .lock()
            .query_row(
                "SELECT git_url, last_checked FROM dependency_aliases
                 WHERE package_name = ?1 AND package_type = ?2",
                params![name, dep_type.as_str()],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(git_url, checked)| DependencyAlias {
            package_name: name.to_string(),
            package_type: dep_type,
            git_url,
            last_checked: chrono::DateTime::from_timestamp(checked, 0).unwrap_or_default(),
        }))
    }

    pub fn store_dependency_alias(&self, alias: &DependencyAlias) -> Result<(), CacheError> {
        self.lock().execute(
            "INSERT OR REPLACE INTO dependency_aliases (package_name, package_type, git_url, last_checked)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                alias.package_name,
                alias.package_type.as_str(),
                alias.git_url,
                alias.last_checked.timestamp()
            ],
        )?;
        Ok(())
    }

    /// Test-only wipe of every table.
    pub fn clear_all_data(&self) -> Result<(), CacheError> {
        self.lock().execute_batch(
            "DELETE FROM ast_relationships;
             DELETE FROM library_relationships;
             DELETE FROM library_nodes;
             DELETE FROM ast_nodes;
             DELETE FROM file_metadata;
             DELETE FROM dependency_aliases;",
        )?;
        Ok(())
    }
}

impl CacheView for AstCache {
    fn get_ast_id(&self, key: &NodeKey) -> Result<Option<i64>, CacheError> {
        AstCache::get_ast_id(self, key)
    }
}

const NODE_SELECT: &str = "SELECT id, file_path, package_name, type_name, method_name, field_name, \
     node_type, start_line, end_line, line_count, cyclomatic_complexity, parameter_count, \
     return_count, parameters, return_values, is_private, last_modified FROM ast_nodes";

fn row_to_node(r: &rusqlite::Row<'_>) -> rusqlite::Result<AstNode> {
    let kind_str: String = r.get(6)?;
    let parameters: Option<String> = r.get(13)?;
    let return_values: Option<String> = r.get(14)?;
    Ok(AstNode {
        id: Some(r.get(0)?),
        key: NodeKey {
            file_path: r.get(1)?,
            package: r.get(2)?,
            type_name: r.get(3)?,
            method_name: r.get(4)?,
            field_name: r.get(5)?,
            kind: NodeKind::parse(&kind_str).unwrap_or(NodeKind::Type),
        },
        start_line: r.get(7)?,
        end_line: r.get(8)?,
        line_count: r.get(9)?,
        cyclomatic_complexity: r.get(10)?,
        parameter_count: r.get(11)?,
        return_count: r.get(12)?,
        parameters: parameters
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<Parameter>>(s).ok())
            .unwrap_or_default(),
        return_values: return_values
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<ReturnValue>>(s).ok())
            .unwrap_or_default(),
        is_private: r.get(15)?,
        last_modified: r.get(16)?,
    })
}

// ----------------------------------------------------------------------
// Process-wide store
// ----------------------------------------------------------------------

static GLOBAL_CACHE: Lazy<RwLock<Option<Arc<AstCache>>>> = Lazy::new(|| RwLock::new(None));

/// One-shot initialisation of the process-wide store. Idempotent: a second
/// call returns the already-installed instance. Use sites should receive
/// the store explicitly; this latch exists for program start only.
pub fn init_global(cache: AstCache) -> Arc<AstCache> {
    let mut guard = GLOBAL_CACHE.write().unwrap_or_else(|p| p.into_inner());
    if let Some(existing) = guard.as_ref() {
        tracing::debug!("global cache already initialised, keeping existing instance");
        return Arc::clone(existing);
    }
    let arc = Arc::new(cache);
    *guard = Some(Arc::clone(&arc));
    arc
}

/// The process-wide store, if initialised.
pub fn global() -> Option<Arc<AstCache>> {
    GLOBAL_CACHE
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .clone()
}

/// Tear down the process-wide store. Tests only.
pub fn reset_global() {
    let mut guard = GLOBAL_CACHE.write().unwrap_or_else(|p| p.into_inner());
    *guard = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{LibraryRef, PendingRelationship};
    use crate::types::RelationshipKind;

    fn method_node(file: &str, pkg: &str, type_name: &str, name: &str) -> AstNode {
        let mut node = AstNode::new(NodeKey::method(file, pkg, type_name, name)).with_lines(1, 5);
        node.cyclomatic_complexity = Some(1);
        node
    }

    #[test]
    fn store_node_reuses_id_for_same_key() {
        let cache = AstCache::open_in_memory().unwrap();
        let node = method_node("a.go", "main", "", "Run");
        let first = cache.store_ast_node(&node).unwrap();

        let mut updated = node.clone();
        updated.cyclomatic_complexity = Some(7);
        let second = cache.store_ast_node(&updated).unwrap();
        assert_eq!(first, second);

        let stored = cache.get_ast_node(first).unwrap().unwrap();
        assert_eq!(stored.cyclomatic_complexity, Some(7));
    }

    #[test]
    fn get_ast_id_finds_stored_key() {
        let cache = AstCache::open_in_memory().unwrap();
        let node = method_node("a.go", "main", "", "Run");
        let id = cache.store_ast_node(&node).unwrap();
        assert_eq!(cache.get_ast_id(&node.key).unwrap(), Some(id));

        let other = NodeKey::method("a.go", "main", "", "Missing");
        assert_eq!(cache.get_ast_id(&other).unwrap(), None);
    }

    #[test]
    fn relationship_with_null_target_round_trips() {
        let cache = AstCache::open_in_memory().unwrap();
        let id = cache
            .store_ast_node(&method_node("a.go", "main", "", "Run"))
            .unwrap();
        cache
            .store_ast_relationship(id, None, 12, RelationshipKind::Call, "fmt.Println(\"x\")")
            .unwrap();

        let rels = cache
            .get_ast_relationships(id, Some(RelationshipKind::Call))
            .unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].to_ast_id, None);
        assert_eq!(rels[0].text, "fmt.Println(\"x\")");
    }

    #[test]
    fn library_node_dedupes_by_tuple() {
        let cache = AstCache::open_in_memory().unwrap();
        let a = cache
            .store_library_node("fmt", "", "Println", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        let b = cache
            .store_library_node("fmt", "", "Println", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        assert_eq!(a, b);

        let c = cache
            .store_library_node("fmt", "", "Printf", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn delete_ast_for_file_preserves_library_nodes() {
        let cache = AstCache::open_in_memory().unwrap();
        let id = cache
            .store_ast_node(&method_node("a.go", "main", "", "Run"))
            .unwrap();
        let lib = cache
            .store_library_node("fmt", "", "Println", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        cache
            .store_library_relationship(id, lib, 3, RelationshipKind::Call, "fmt.Println")
            .unwrap();

        cache.delete_ast_for_file("a.go").unwrap();
        assert!(cache.get_ast_nodes_by_file("a.go").unwrap().is_empty());
        assert!(cache.get_library_node(lib).unwrap().is_some());
        assert!(cache.get_library_relationships(id, None).unwrap().is_empty());
    }

    #[test]
    fn needs_reanalysis_tracks_file_identity() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main\n").unwrap();

        let cache = AstCache::open_in_memory().unwrap();
        assert!(cache.needs_reanalysis(&file).unwrap());

        cache.update_file_metadata(&file).unwrap();
        assert!(!cache.needs_reanalysis(&file).unwrap());

        std::fs::write(&file, "package main\n\nfunc main() {}\n").unwrap();
        assert!(cache.needs_reanalysis(&file).unwrap());
    }

    #[test]
    fn persist_file_graph_replaces_previous_snapshot() {
        let cache = AstCache::open_in_memory().unwrap();
        let run = method_node("a.go", "main", "", "Run");
        let result = AstResult {
            file_path: "a.go".to_string(),
            language: "go".to_string(),
            package_name: Some("main".to_string()),
            nodes: vec![run.clone()],
            relationships: vec![PendingRelationship {
                from_key: run.key.clone(),
                to_key: None,
                line: 3,
                kind: RelationshipKind::Call,
                text: "fmt.Println(\"x\")".to_string(),
            }],
            libraries: vec![LibraryRef {
                from_key: run.key.clone(),
                package: "fmt".to_string(),
                class: String::new(),
                method: "Println".to_string(),
                framework: "stdlib".to_string(),
                kind: NodeKind::Method,
                rel_kind: RelationshipKind::Call,
                line: 3,
                text: "fmt.Println(\"x\")".to_string(),
            }],
        };
        let stats = cache.persist_file_graph(&result).unwrap();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.relationships, 1);
        assert_eq!(stats.library_refs, 1);
        let run_id = cache.get_ast_id(&run.key).unwrap().unwrap();

        // Second persist with an extra node: the survivor keeps its id,
        // nothing stale remains.
        let helper = method_node("a.go", "main", "", "Helper");
        let mut second = result.clone();
        second.nodes.push(helper.clone());
        cache.persist_file_graph(&second).unwrap();

        let nodes = cache.get_ast_nodes_by_file("a.go").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(cache.get_ast_id(&run.key).unwrap(), Some(run_id));
        assert!(cache.get_ast_id(&helper.key).unwrap().is_some());
    }

    #[test]
    fn query_nodes_maps_star_to_like() {
        let cache = AstCache::open_in_memory().unwrap();
        cache
            .store_ast_node(&method_node("svc/user.go", "service", "User", "Create"))
            .unwrap();
        cache
            .store_ast_node(&method_node("svc/user.go", "service", "User", "Delete"))
            .unwrap();
        cache
            .store_ast_node(&method_node("db/conn.go", "database", "Conn", "Open"))
            .unwrap();

        let filter = NodeFilter {
            package: Some("serv*".to_string()),
            ..Default::default()
        };
        assert_eq!(cache.query_nodes(&filter).unwrap().len(), 2);

        let filter = NodeFilter {
            method: Some("Create".to_string()),
            ..Default::default()
        };
        assert_eq!(cache.query_nodes(&filter).unwrap().len(), 1);

        // Literal underscores must not act as wildcards.
        cache
            .store_ast_node(&method_node("x.go", "pkg", "", "do_thing"))
            .unwrap();
        let filter = NodeFilter {
            method: Some("do_thing".to_string()),
            ..Default::default()
        };
        assert_eq!(cache.query_nodes(&filter).unwrap().len(), 1);
        let filter = NodeFilter {
            method: Some("doXthing".to_string()),
            ..Default::default()
        };
        assert!(cache.query_nodes(&filter).unwrap().is_empty());
    }

    #[test]
    fn call_sites_joins_library_calls() {
        let cache = AstCache::open_in_memory().unwrap();
        let id = cache
            .store_ast_node(&method_node("a.go", "main", "", "Run"))
            .unwrap();
        let lib = cache
            .store_library_node("fmt", "", "Println", "", NodeKind::Method, "go", "stdlib")
            .unwrap();
        cache
            .store_library_relationship(id, lib, 9, RelationshipKind::Call, "fmt.Println")
            .unwrap();

        let sites = cache.call_sites(None).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].called_package, "fmt");
        assert_eq!(sites[0].called_method, "Println");
        assert_eq!(sites[0].line, 9);
        assert!(sites[0].external);

        let filtered = cache.call_sites(Some(&["b.go".to_string()])).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn dependency_alias_round_trips() {
        let cache = AstCache::open_in_memory().unwrap();
        assert!(cache
            .get_dependency_alias("github.com/x/y", DependencyType::Go)
            .unwrap()
            .is_none());

        let alias = DependencyAlias {
            package_name: "github.com/x/y".to_string(),
            package_type: DependencyType::Go,
            git_url: "https://github.com/x/y".to_string(),
            last_checked: chrono::Utc::now(),
        };
        cache.store_dependency_alias(&alias).unwrap();

        let loaded = cache
            .get_dependency_alias("github.com/x/y", DependencyType::Go)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.git_url, "https://github.com/x/y");

        // Empty URLs are a valid cached outcome.
        let empty = DependencyAlias {
            package_name: "left-pad".to_string(),
            package_type: DependencyType::Npm,
            git_url: String::new(),
            last_checked: chrono::Utc::now(),
        };
        cache.store_dependency_alias(&empty).unwrap();
        let loaded = cache
            .get_dependency_alias("left-pad", DependencyType::Npm)
            .unwrap()
            .unwrap();
        assert!(loaded.git_url.is_empty());
    }

    #[test]
    fn clear_all_data_wipes_everything() {
        let cache = AstCache::open_in_memory().unwrap();
        cache
            .store_ast_node(&method_node("a.go", "main", "", "Run"))
            .unwrap();
        cache.clear_all_data().unwrap();
        assert!(cache.get_ast_nodes_by_file("a.go").unwrap().is_empty());
    }
}
