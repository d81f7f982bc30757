//! The simple call checker: every call edge in the graph is tested
//! against the package/method allow-deny rules that govern the caller's
//! file.

use std::path::Path;

use crate::cache::AstCache;
use crate::error::CacheError;
use crate::types::{CalledRef, CallerRef, Violation, ViolationSource};

use super::loader::RuleTree;

/// Check all stored calls (optionally restricted to `files`) against the
/// rule tree and return the violations.
pub fn check_calls(
    cache: &AstCache,
    tree: &RuleTree,
    files: Option<&[String]>,
) -> Result<Vec<Violation>, CacheError> {
    if tree.is_empty() {
        return Ok(Vec::new());
    }
    let mut violations = Vec::new();

    for site in cache.call_sites(files)? {
        let caller_path = Path::new(&site.caller_file);
        let Some(ruleset) = tree.rules_for(caller_path) else {
            continue;
        };
        let relative = caller_path
            .strip_prefix(&ruleset.dir)
            .unwrap_or(caller_path)
            .to_string_lossy()
            .to_string();

        if ruleset.is_allowed_for_file(&site.called_package, &site.called_method, &relative) {
            continue;
        }
        let rule_text = ruleset
            .denying_rule(&site.called_package, &site.called_method, &relative)
            .map(|rule| match &rule.method_pattern {
                Some(method) => format!("{}:{}", rule.package_pattern, method),
                None => rule.package_pattern.clone(),
            })
            .unwrap_or_default();

        violations.push(Violation {
            file: site.caller_file.clone(),
            line: site.line,
            column: None,
            caller: CallerRef {
                file_path: site.caller_file.clone(),
                package: site.caller_package.clone(),
                type_name: site.caller_type.clone(),
                method: site.caller_method.clone(),
            },
            called: CalledRef {
                package: site.called_package.clone(),
                class: (!site.called_class.is_empty()).then(|| site.called_class.clone()),
                method: site.called_method.clone(),
                external: site.external,
            },
            message: format!(
                "call to {}.{} is denied by rule '{}' ({})",
                site.called_package,
                site.called_method,
                rule_text,
                ruleset.source.display()
            ),
            source: ViolationSource::Archunit,
        });
    }
    Ok(violations)
}
