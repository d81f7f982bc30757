//! Architecture rules: the `.ARCHUNIT` file format and the two engines
//! that evaluate rules against the stored graph.
//!
//! # Submodules
//!
//! - [`loader`] - `.ARCHUNIT` discovery, parsing and most-specific-ruleset
//!   selection
//! - [`engine`] - the simple call checker (package/method allow-deny)
//! - [`aql`] - the pattern/relationship query language

pub mod aql;
pub mod engine;
pub mod loader;

pub use engine::check_calls;
pub use loader::{Rule, RuleEffect, RuleSet, RuleTree, load_rule_tree};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

static WILDCARD_CACHE: Lazy<Mutex<HashMap<String, Regex>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Match `value` against a `*`-wildcard pattern. Everything except `*`
/// is literal; the whole value must match.
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }
    let mut cache = WILDCARD_CACHE.lock().unwrap_or_else(|p| p.into_inner());
    let regex = cache.entry(pattern.to_string()).or_insert_with(|| {
        let escaped = regex::escape(pattern).replace(r"\*", ".*");
        Regex::new(&format!("^{escaped}$")).expect("escaped pattern is valid")
    });
    regex.is_match(value)
}
