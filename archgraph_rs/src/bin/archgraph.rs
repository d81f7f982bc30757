//! archgraph CLI - scan a project, list dependencies, check rules.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use archgraph::analyzer::Analyzer;
use archgraph::cache::{self, AstCache};
use archgraph::config::ArchConfig;
use archgraph::registry::default_registries;
use archgraph::resolve::{GitUrlResolver, resolve_dependency_urls};
use archgraph::rules;
use archgraph::scanner::ScanContext;
use archgraph::types::{CancelFlag, Dependency, Violation};

#[derive(Parser)]
#[command(name = "archgraph", version, about = "Source indexer with architecture rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Index all supported sources under a directory
    Scan {
        /// Project root
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Worker threads (0 = number of cores)
        #[arg(long, default_value_t = 0)]
        jobs: usize,
    },
    /// List third-party dependencies from build manifests
    Deps {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Resolve canonical git repository URLs
        #[arg(long)]
        resolve: bool,
        /// Only dependencies whose name matches this glob
        #[arg(long)]
        filter: Option<String>,
        /// Include indirect dependencies
        #[arg(long)]
        indirect: bool,
        /// Maximum directory depth to search for manifests
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Evaluate .ARCHUNIT and .aql rules against the indexed graph
    Check {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan { path, jobs } => run_scan(&path, jobs),
        Command::Deps {
            path,
            resolve,
            filter,
            indirect,
            max_depth,
        } => run_deps(&path, resolve, filter.as_deref(), indirect, max_depth, cli.json),
        Command::Check { path } => run_check(&path, cli.json),
    }
}

fn open_cache(root: &Path, config: &ArchConfig) -> Result<Arc<AstCache>> {
    let store = match &config.cache_dir {
        Some(dir) => AstCache::open(&PathBuf::from(dir).join("graph.db"))?,
        None => AstCache::open_for_project(root)?,
    };
    Ok(cache::init_global(store))
}

fn run_scan(root: &Path, jobs: usize) -> Result<()> {
    let mut config = ArchConfig::load(root);
    if jobs > 0 {
        config.parallelism = jobs;
    }
    let cancel = CancelFlag::new();
    let store = open_cache(root, &config)?;
    let registries = Arc::new(default_registries(&config, cancel.clone()));
    let analyzer = Analyzer::new(store, registries, &config, cancel);

    let report = analyzer.analyze_root(root);
    println!(
        "analyzed {} files ({} cached, {} skipped, {} failed)",
        report.analyzed,
        report.cached,
        report.skipped,
        report.failed.len()
    );
    for (file, error) in &report.failed {
        eprintln!("  {file}: {error}");
    }
    if report.cancelled {
        bail!("scan cancelled");
    }
    Ok(())
}

fn run_deps(
    root: &Path,
    resolve: bool,
    filter: Option<&str>,
    indirect: bool,
    max_depth: Option<usize>,
    json: bool,
) -> Result<()> {
    let config = ArchConfig::load(root);
    let cancel = CancelFlag::new();
    let registries = default_registries(&config, cancel.clone());

    let mut context = ScanContext::new(root);
    context.show_indirect = indirect;
    context.max_depth = max_depth;
    context.cancel = cancel.clone();
    if let Some(pattern) = filter {
        context = context
            .with_filter(pattern)
            .with_context(|| format!("bad filter glob '{pattern}'"))?;
    }

    let mut deps: Vec<Dependency> = Vec::new();
    for manifest in archgraph::fs_utils::gather_files(root, None) {
        if let Some(limit) = context.max_depth {
            let depth = manifest
                .strip_prefix(root)
                .map(|p| p.components().count())
                .unwrap_or(0);
            if depth > limit {
                continue;
            }
        }
        let Some(scanner) = registries.scanners.for_file(&manifest) else {
            continue;
        };
        let content = std::fs::read(&manifest)
            .with_context(|| format!("reading {}", manifest.display()))?;
        match scanner.scan_file(&context, &manifest, &content) {
            Ok(found) => deps.extend(found),
            Err(e) => tracing::warn!(manifest = %manifest.display(), error = %e, "manifest scan failed"),
        }
    }
    if !context.show_indirect {
        deps.retain(|d| !d.indirect);
    }

    if resolve {
        let store = open_cache(root, &config)?;
        let resolver = GitUrlResolver::new(store, config.alias_ttl_hours, config.offline, cancel);
        resolve_dependency_urls(&resolver, &mut deps);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&deps)?);
    } else {
        for dep in &deps {
            let url = dep.git_url.as_deref().unwrap_or("");
            println!("{}\t{}\t{}\t{}", dep.dep_type, dep.name, dep.version, url);
        }
        println!("{} dependencies", deps.len());
    }
    Ok(())
}

fn run_check(root: &Path, json: bool) -> Result<()> {
    let config = ArchConfig::load(root);
    let cancel = CancelFlag::new();

    // Rule syntax is validated before any analysis work runs.
    let tree = rules::load_rule_tree(root)?;
    let aql_sources = rules::aql::load_aql_sources(root)?;
    let mut aql_rules = Vec::new();
    for (path, source) in &aql_sources {
        aql_rules.push(rules::aql::parse_aql(source, &path.display().to_string())?);
    }
    if tree.is_empty() && aql_rules.is_empty() {
        println!("no rules found under {}", root.display());
        return Ok(());
    }

    let store = open_cache(root, &config)?;
    let registries = Arc::new(default_registries(&config, cancel.clone()));
    let analyzer = Analyzer::new(Arc::clone(&store), registries, &config, cancel);
    let report = analyzer.analyze_root(root);
    if report.cancelled {
        bail!("scan cancelled");
    }

    let mut violations: Vec<Violation> = rules::check_calls(&store, &tree, None)?;
    for ruleset in &aql_rules {
        violations.extend(rules::aql::evaluate(&store, ruleset)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&violations)?);
    } else {
        for v in &violations {
            println!("{}:{}: {} [{}]", v.file, v.line, v.message, v.source.as_str());
        }
        println!("{} violations", violations.len());
    }
    if violations.is_empty() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
