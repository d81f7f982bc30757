//! `.ARCHUNIT` rule files: discovery, parsing, scope selection.
//!
//! One rule per line, `#` comments, blank lines ignored:
//!
//! ```text
//! line   := [ "[" glob "]" ] effect? (pattern ":" method? | pattern)
//! effect := "+" | "!"
//! ```
//!
//! `+` marks an override (wins over deny), `!` a deny, no prefix an
//! allow. A ruleset's scope is the directory holding its file; the
//! deepest ruleset on a file's path wins.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use walkdir::WalkDir;

use crate::error::RuleError;
use crate::fs_utils;

use super::wildcard_match;

/// File name of a ruleset.
pub const RULE_FILE_NAME: &str = ".ARCHUNIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    Allow,
    Deny,
    Override,
}

/// One parsed rule line.
#[derive(Debug, Clone)]
pub struct Rule {
    pub effect: RuleEffect,
    /// Raw glob text, kept for messages.
    pub file_glob: Option<String>,
    matcher: Option<GlobMatcher>,
    pub package_pattern: String,
    pub method_pattern: Option<String>,
    /// 1-based line in the source file.
    pub line: usize,
}

impl Rule {
    fn applies_to_file(&self, relative_path: &str) -> bool {
        match &self.matcher {
            None => true,
            Some(matcher) => matcher.is_match(relative_path),
        }
    }

    fn matches_call(&self, package: &str, method: &str) -> bool {
        if !wildcard_match(&self.package_pattern, package) {
            return false;
        }
        match &self.method_pattern {
            None => true,
            Some(pattern) => wildcard_match(pattern, method),
        }
    }
}

/// The rules of one `.ARCHUNIT` file, scoped to its directory.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Scope directory (the one containing the rule file).
    pub dir: PathBuf,
    pub source: PathBuf,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Decide whether a call to `package.method` from `file` (path
    /// relative to the scope) is allowed. Overrides win over denies win
    /// over allows; within one effect class the first matching rule in
    /// file order decides. No matching rule means allowed.
    pub fn is_allowed_for_file(&self, package: &str, method: &str, file: &str) -> bool {
        for effect in [RuleEffect::Override, RuleEffect::Deny, RuleEffect::Allow] {
            for rule in self.rules.iter().filter(|r| r.effect == effect) {
                if rule.applies_to_file(file) && rule.matches_call(package, method) {
                    return effect != RuleEffect::Deny;
                }
            }
        }
        true
    }

    /// The deny rule that would fire for this call, for messages.
    pub fn denying_rule(&self, package: &str, method: &str, file: &str) -> Option<&Rule> {
        for rule in &self.rules {
            if rule.effect == RuleEffect::Override
                && rule.applies_to_file(file)
                && rule.matches_call(package, method)
            {
                return None;
            }
        }
        self.rules.iter().find(|rule| {
            rule.effect == RuleEffect::Deny
                && rule.applies_to_file(file)
                && rule.matches_call(package, method)
        })
    }
}

/// Parse one rule line. Blank lines and comments yield `None`.
pub fn parse_rule_line(
    raw: &str,
    source: &Path,
    line_no: usize,
) -> Result<Option<Rule>, RuleError> {
    let line = raw.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }

    let syntax_err = |details: &str| RuleError::Syntax {
        file: source.display().to_string(),
        line: line_no,
        details: details.to_string(),
    };

    let (file_glob, rest) = if let Some(after) = line.strip_prefix('[') {
        let close = after.find(']').ok_or_else(|| syntax_err("unterminated file glob"))?;
        let glob = after[..close].trim();
        if glob.is_empty() {
            return Err(syntax_err("empty file glob"));
        }
        (Some(glob.to_string()), after[close + 1..].trim())
    } else {
        (None, line)
    };

    let (effect, rest) = match rest.chars().next() {
        Some('+') => (RuleEffect::Override, rest[1..].trim()),
        Some('!') => (RuleEffect::Deny, rest[1..].trim()),
        Some(_) => (RuleEffect::Allow, rest),
        None => return Err(syntax_err("missing pattern")),
    };
    if rest.is_empty() {
        return Err(syntax_err("missing pattern"));
    }

    let (package_pattern, method_pattern) = match rest.split_once(':') {
        Some((pkg, method)) => {
            let method = method.trim();
            (
                pkg.trim().to_string(),
                if method.is_empty() { None } else { Some(method.to_string()) },
            )
        }
        None => (rest.to_string(), None),
    };
    if package_pattern.is_empty() {
        return Err(syntax_err("empty package pattern"));
    }

    let matcher = match &file_glob {
        None => None,
        Some(glob) => Some(
            Glob::new(glob)
                .map_err(|e| syntax_err(&format!("bad file glob: {e}")))?
                .compile_matcher(),
        ),
    };

    Ok(Some(Rule {
        effect,
        file_glob,
        matcher,
        package_pattern,
        method_pattern,
        line: line_no,
    }))
}

fn parse_rule_file(path: &Path) -> Result<RuleSet, RuleError> {
    let content = std::fs::read_to_string(path)?;
    let mut rules = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if let Some(rule) = parse_rule_line(line, path, idx + 1)? {
            rules.push(rule);
        }
    }
    Ok(RuleSet {
        dir: path.parent().unwrap_or(Path::new("")).to_path_buf(),
        source: path.to_path_buf(),
        rules,
    })
}

/// All rulesets under `root`, scope-selectable.
#[derive(Debug, Default)]
pub struct RuleTree {
    /// Sorted by descending scope depth, so the first prefix match wins.
    rulesets: Vec<RuleSet>,
}

impl RuleTree {
    pub fn is_empty(&self) -> bool {
        self.rulesets.is_empty()
    }

    pub fn rulesets(&self) -> &[RuleSet] {
        &self.rulesets
    }

    /// The ruleset governing `file`: the one whose scope directory is
    /// the deepest prefix of the path.
    pub fn rules_for(&self, file: &Path) -> Option<&RuleSet> {
        self.rulesets
            .iter()
            .find(|set| file.starts_with(&set.dir))
    }
}

/// Walk `root` collecting every `.ARCHUNIT` file. A syntax error in any
/// of them aborts the whole load, before analysis work starts.
pub fn load_rule_tree(root: &Path) -> Result<RuleTree, RuleError> {
    let mut rulesets = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && (fs_utils::is_skipped_dir(&name) || name.starts_with('.')))
        });

    for entry in walker.filter_map(Result::ok) {
        if entry.file_type().is_file() && entry.file_name() == RULE_FILE_NAME {
            rulesets.push(parse_rule_file(entry.path())?);
        }
    }
    // Deepest scope first; longer path wins ties by construction.
    rulesets.sort_by(|a, b| {
        b.dir
            .components()
            .count()
            .cmp(&a.dir.components().count())
            .then_with(|| b.dir.cmp(&a.dir))
    });
    tracing::debug!(count = rulesets.len(), root = %root.display(), "loaded rulesets");
    Ok(RuleTree { rulesets })
}
