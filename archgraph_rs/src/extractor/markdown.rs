//! Markdown structure extraction.
//!
//! The document is a package node; each heading becomes a type node whose
//! parent is the nearest enclosing heading of lower level, and each fenced
//! code block becomes a method node named `code_<lang>_<line>` with a
//! complexity estimate taken from control-flow keywords in the snippet.

use std::path::Path;

use crate::cache::CacheView;
use crate::error::ExtractorError;
use crate::types::{AstNode, NodeKey, RelationshipKind};

use super::{AstResult, Extractor, PendingRelationship, decision_points, decode_utf8};

/// Control-flow keywords across the languages commonly quoted in docs.
const SNIPPET_KEYWORDS: &[&str] = &["if", "for", "while", "case", "catch", "elif", "except"];

/// Extractor for `.md` documents.
#[derive(Debug, Default)]
pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn language(&self) -> &'static str {
        "markdown"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["md"]
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

        let document = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());

        let mut result = AstResult::new(&file_path, "markdown");
        result.package_name = Some(document.clone());

        let package_key = NodeKey::package(&file_path, &document);
        result
            .nodes
            .push(AstNode::new(package_key.clone()).with_lines(1, lines.len().max(1) as u32));

        // Stack of (heading level, heading title) for parent tracking.
        let mut heading_stack: Vec<(usize, String)> = Vec::new();
        let mut in_fence = false;
        let mut fence_lang = String::new();
        let mut fence_start = 0usize;
        let mut fence_body = String::new();
        let mut fence_marker = "```";

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();

            if in_fence {
                if trimmed.starts_with(fence_marker) {
                    in_fence = false;
                    push_code_node(
                        &mut result,
                        &file_path,
                        &document,
                        &heading_stack,
                        &fence_lang,
                        fence_start,
                        idx,
                        &fence_body,
                    );
                    fence_body.clear();
                } else {
                    fence_body.push_str(line);
                    fence_body.push('\n');
                }
                continue;
            }

            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                fence_marker = if trimmed.starts_with("~~~") { "~~~" } else { "```" };
                in_fence = true;
                fence_start = idx;
                fence_lang = trimmed
                    .trim_start_matches(fence_marker)
                    .trim()
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_lowercase();
                continue;
            }

            if let Some((level, title)) = parse_heading(line) {
                while heading_stack
                    .last()
                    .is_some_and(|(prev, _)| *prev >= level)
                {
                    heading_stack.pop();
                }
                let parent = heading_stack.last().map(|(_, title)| title.clone());

                let key = NodeKey::type_node(&file_path, &document, &title);
                result
                    .nodes
                    .push(AstNode::new(key.clone()).with_lines(idx as u32 + 1, idx as u32 + 1));

                let parent_key = match parent {
                    Some(parent_title) => NodeKey::type_node(&file_path, &document, parent_title),
                    None => package_key.clone(),
                };
                result.relationships.push(PendingRelationship {
                    from_key: key,
                    to_key: Some(parent_key),
                    line: idx as u32 + 1,
                    kind: RelationshipKind::References,
                    text: title.clone(),
                });

                heading_stack.push((level, title));
            }
        }

        // An unterminated fence still counts as a snippet.
        if in_fence {
            push_code_node(
                &mut result,
                &file_path,
                &document,
                &heading_stack,
                &fence_lang,
                fence_start,
                lines.len(),
                &fence_body,
            );
        }

        Ok(result)
    }
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let title = trimmed[level..].trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title.trim_end_matches('#').trim().to_string()))
}

#[allow(clippy::too_many_arguments)]
fn push_code_node(
    result: &mut AstResult,
    file_path: &str,
    document: &str,
    heading_stack: &[(usize, String)],
    lang: &str,
    fence_start: usize,
    fence_end: usize,
    body: &str,
) {
    let lang_tag = if lang.is_empty() { "text" } else { lang };
    let method_name = format!("code_{}_{}", lang_tag, fence_start + 1);
    let parent_type = heading_stack
        .last()
        .map(|(_, title)| title.clone())
        .unwrap_or_default();

    let key = NodeKey::method(file_path, document, parent_type, &method_name);
    let mut node = AstNode::new(key).with_lines(fence_start as u32 + 1, fence_end as u32 + 1);
    node.cyclomatic_complexity = Some(1 + decision_points(body, SNIPPET_KEYWORDS));
    result.nodes.push(node);
}
