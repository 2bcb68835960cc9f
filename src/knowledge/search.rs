//! Keyword search with context windows
//!
//! No embeddings: a query is reduced to keywords, every line containing a
//! keyword (case-insensitive) is a match, and nearby matches are merged into
//! sections padded with `context_lines` lines on each side.

use std::ops::Range;
use std::path::Path;

use super::file_label;
use crate::types::AppResult;

/// Separator placed between sections of one document
pub const SECTION_SEPARATOR: &str = "\n---\n";

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Reduce a free-text query to lowercase search keywords.
///
/// A token survives if it is purely numeric, longer than two characters, or a
/// three-letter month abbreviation. When nothing survives, the whole query
/// (lowercased) becomes the only keyword.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let keywords: Vec<String> = query
        .split_whitespace()
        .map(|token| token.to_lowercase().trim_end_matches(',').to_string())
        .filter(|kw| {
            let numeric = !kw.is_empty() && kw.chars().all(char::is_numeric);
            numeric || kw.chars().count() > 2 || MONTH_ABBREVIATIONS.contains(&kw.as_str())
        })
        .collect();

    if keywords.is_empty() {
        vec![query.to_lowercase()]
    } else {
        keywords
    }
}

/// Indices of lines containing at least one keyword, ascending
fn matching_lines(lines: &[String], keywords: &[String]) -> Vec<usize> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let lower = line.to_lowercase();
            keywords
                .iter()
                .any(|kw| !kw.trim().is_empty() && lower.contains(kw.as_str()))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Line ranges of the merged sections.
///
/// Consecutive matches stay in one section while the gap between them is at
/// most `2 * context_lines`; each section is padded by `context_lines` on both
/// sides and clamped to the file.
pub fn find_sections(lines: &[String], keywords: &[String], context_lines: usize) -> Vec<Range<usize>> {
    let pad = |first: usize, last: usize| {
        first.saturating_sub(context_lines)..(last + context_lines + 1).min(lines.len())
    };

    let mut sections = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for line in matching_lines(lines, keywords) {
        current = match current {
            Some((first, last)) if line - last <= context_lines * 2 => Some((first, line)),
            Some((first, last)) => {
                sections.push(pad(first, last));
                Some((line, line))
            }
            None => Some((line, line)),
        };
    }
    if let Some((first, last)) = current {
        sections.push(pad(first, last));
    }

    sections
}

/// Render the matching sections of `lines`, or `None` when nothing matched
pub fn search_lines(lines: &[String], query: &str, context_lines: usize) -> Option<String> {
    let keywords = extract_keywords(query);
    let sections = find_sections(lines, &keywords, context_lines);
    if sections.is_empty() {
        return None;
    }

    Some(
        sections
            .into_iter()
            .map(|range| lines[range].join("\n"))
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR),
    )
}

pub async fn read_lines(path: &Path) -> AppResult<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Search one document; `Ok(None)` when the query matched nothing
pub async fn search_document(path: &Path, query: &str, context_lines: usize) -> AppResult<Option<String>> {
    let lines = read_lines(path).await?;
    Ok(search_lines(&lines, query, context_lines))
}

/// Search one document and always return text for the model.
pub async fn search_file_content(path: &Path, query: &str, context_lines: usize) -> String {
    match search_document(path, query, context_lines).await {
        Ok(Some(found)) => found,
        Ok(None) => format!(
            "No relevant information found in {} for query: {}",
            file_label(path),
            query
        ),
        Err(e) => format!("Error searching file: {}", e),
    }
}
