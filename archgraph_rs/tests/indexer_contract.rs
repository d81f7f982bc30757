//! End-to-end contract tests over the library surface: index a temp
//! project, then exercise the cache, rules, scanners and resolver the
//! way the CLI wires them together.

use std::path::Path;
use std::sync::Arc;

use archgraph::analyzer::{Analyzer, FileOutcome};
use archgraph::cache::{self, AstCache};
use archgraph::config::ArchConfig;
use archgraph::registry::default_registries;
use archgraph::resolve::GitUrlResolver;
use archgraph::rules;
use archgraph::scanner::{DependencyScanner, ScanContext};
use archgraph::scanner::golang::GoScanner;
use archgraph::types::{CancelFlag, DependencyType, NodeKind, ViolationSource};

fn build_analyzer(cache: Arc<AstCache>) -> Analyzer {
    let config = ArchConfig { parallelism: 2, ..ArchConfig::default() };
    let cancel = CancelFlag::new();
    let registries = Arc::new(default_registries(&config, cancel.clone()));
    Analyzer::new(cache, registries, &config, cancel)
}

#[test]
fn go_call_rule_emits_violation_at_call_site() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(
        root.join("main.go"),
        "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"x\")\n}\n",
    )
    .unwrap();
    std::fs::write(root.join(".ARCHUNIT"), "!fmt:Println\n").unwrap();

    let store = Arc::new(AstCache::open_in_memory().unwrap());
    let analyzer = build_analyzer(Arc::clone(&store));
    let report = analyzer.analyze_root(root);
    assert_eq!(report.analyzed, 1);
    assert!(report.failed.is_empty());

    let tree = rules::load_rule_tree(root).unwrap();
    let violations = rules::check_calls(&store, &tree, None).unwrap();
    assert_eq!(violations.len(), 1);

    let v = &violations[0];
    assert!(v.caller.file_path.ends_with("main.go"));
    assert_eq!(v.line, 6);
    assert_eq!(v.called.package, "fmt");
    assert_eq!(v.called.method, "Println");
    assert_eq!(v.source, ViolationSource::Archunit);
}

#[test]
fn markdown_structure_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(
        root.join("README.md"),
        "## Installation\n\n```bash\nmake install\n```\n\n## Usage\n\n```go\nrun()\n```\n\n## API Reference\n\n```json\n{}\n```\n",
    )
    .unwrap();

    let store = Arc::new(AstCache::open_in_memory().unwrap());
    let analyzer = build_analyzer(Arc::clone(&store));
    let report = analyzer.analyze_root(root);
    assert_eq!(report.analyzed, 1);

    let path = root.join("README.md").to_string_lossy().to_string();
    let nodes = store.get_ast_nodes_by_file(&path).unwrap();

    let packages: Vec<_> = nodes.iter().filter(|n| n.key.kind == NodeKind::Package).collect();
    assert_eq!(packages.len(), 1);

    let type_names: Vec<&str> = nodes
        .iter()
        .filter(|n| n.key.kind == NodeKind::Type)
        .map(|n| n.key.type_name.as_str())
        .collect();
    assert_eq!(type_names, vec!["Installation", "Usage", "API Reference"]);

    let methods: Vec<&str> = nodes
        .iter()
        .filter(|n| n.key.kind == NodeKind::Method)
        .map(|n| n.key.method_name.as_str())
        .collect();
    assert_eq!(methods.len(), 3);
    assert!(methods.iter().all(|m| m.starts_with("code_")));
    assert!(methods.contains(&"code_bash_3"));
}

#[test]
fn aql_forbid_edge_from_service_to_sql() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(
        root.join("user.go"),
        "package service\n\nimport \"database/sql\"\n\nfunc GetUser(db *sql.DB) {\n\tsql.Named(\"id\", 1)\n}\n",
    )
    .unwrap();

    let store = Arc::new(AstCache::open_in_memory().unwrap());
    let analyzer = build_analyzer(Arc::clone(&store));
    let report = analyzer.analyze_root(root);
    assert_eq!(report.analyzed, 1, "failures: {:?}", report.failed);

    let ruleset = rules::aql::parse_aql(
        "FORBID(package:service.* -> package:database/sql.*)",
        "rules.aql",
    )
    .unwrap();
    let violations = rules::aql::evaluate(&store, &ruleset).unwrap();
    assert_eq!(violations.len(), 1);

    let v = &violations[0];
    assert_eq!(v.caller.method, "GetUser");
    assert_eq!(v.called.package, "database/sql");
    assert!(v.called.external);
    assert_eq!(v.source, ViolationSource::Aql);
}

#[test]
fn incremental_reanalysis_keeps_surviving_ids() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let file = root.join("svc.go");
    std::fs::write(&file, "package svc\n\nfunc Keep() {}\n").unwrap();

    let store = Arc::new(AstCache::open_in_memory().unwrap());
    let analyzer = build_analyzer(Arc::clone(&store));
    assert!(matches!(
        analyzer.analyze_file(&file).unwrap(),
        FileOutcome::Analyzed { .. }
    ));

    let path = file.to_string_lossy().to_string();
    let keep_id = store
        .get_ast_nodes_by_file(&path)
        .unwrap()
        .into_iter()
        .find(|n| n.key.method_name == "Keep")
        .and_then(|n| n.id)
        .unwrap();

    // Unchanged file is served from the cache.
    assert!(matches!(
        analyzer.analyze_file(&file).unwrap(),
        FileOutcome::Cached { .. }
    ));

    std::fs::write(&file, "package svc\n\nfunc Keep() {}\n\nfunc Added() {}\n").unwrap();
    assert!(store.needs_reanalysis(&file).unwrap());
    assert!(matches!(
        analyzer.analyze_file(&file).unwrap(),
        FileOutcome::Analyzed { .. }
    ));

    let nodes = store.get_ast_nodes_by_file(&path).unwrap();
    let keep = nodes.iter().find(|n| n.key.method_name == "Keep").unwrap();
    let added = nodes.iter().find(|n| n.key.method_name == "Added");
    assert_eq!(keep.id, Some(keep_id), "surviving key must keep its id");
    assert!(added.is_some());
    assert_eq!(
        nodes.iter().filter(|n| n.key.kind == NodeKind::Method).count(),
        2,
        "no stale method nodes"
    );
}

#[test]
fn go_mod_replace_becomes_local_version() {
    let content = "module example.com/app\n\nrequire github.com/x/y v1.0.0\n\nreplace github.com/x/y => ../y\n";
    let deps = GoScanner
        .scan_file(&ScanContext::new("."), Path::new("go.mod"), content.as_bytes())
        .unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].name, "github.com/x/y");
    assert_eq!(deps[0].version, "local:../y");
    assert_eq!(deps[0].dep_type, DependencyType::Go);
}

#[test]
fn resolver_caches_go_module_alias() {
    let store = Arc::new(AstCache::open_in_memory().unwrap());
    // Offline resolver: heuristic candidates are kept without validation.
    let resolver = GitUrlResolver::new(Arc::clone(&store), 24, true, CancelFlag::new());

    let url = resolver
        .resolve_git_url("github.com/flanksource/commons", DependencyType::Go)
        .unwrap();
    assert_eq!(url, "https://github.com/flanksource/commons");

    let alias = store
        .get_dependency_alias("github.com/flanksource/commons", DependencyType::Go)
        .unwrap()
        .expect("alias row written");
    assert_eq!(alias.git_url, url);
    let age = chrono::Utc::now() - alias.last_checked;
    assert!(age < chrono::Duration::hours(24), "alias must be fresh");

    assert_eq!(
        resolver
            .resolve_git_url("gopkg.in/yaml.v3", DependencyType::Go)
            .unwrap(),
        "https://github.com/go-yaml/yaml"
    );
}

#[test]
#[serial_test::serial]
fn global_store_latch_is_one_shot_and_resettable() {
    cache::reset_global();
    assert!(cache::global().is_none());

    let first = cache::init_global(AstCache::open_in_memory().unwrap());
    let second = cache::init_global(AstCache::open_in_memory().unwrap());
    assert!(Arc::ptr_eq(&first, &second), "second init keeps the first store");
    assert!(cache::global().is_some());

    cache::reset_global();
    assert!(cache::global().is_none());
}

#[test]
fn ruleset_scope_is_monotonic_over_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("svc/internal/deep")).unwrap();
    std::fs::write(root.join(".ARCHUNIT"), "!fmt\n").unwrap();
    std::fs::write(root.join("svc/internal/.ARCHUNIT"), "+fmt\n").unwrap();

    let tree = rules::load_rule_tree(root).unwrap();
    let top = tree.rules_for(&root.join("main.go")).unwrap();
    assert_eq!(top.dir, root);
    for file in ["svc/internal/a.go", "svc/internal/deep/b.go"] {
        let set = tree.rules_for(&root.join(file)).unwrap();
        assert_eq!(set.dir, root.join("svc/internal"), "{file}");
    }
}
