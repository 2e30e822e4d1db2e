//! Literal anchor lookup.

use patchwork_core::{Anchor, AnchorKind};

/// Byte offsets of every non-overlapping occurrence of `needle`.
pub fn find_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    haystack.match_indices(needle).map(|(offset, _)| offset).collect()
}

/// 1-based line number containing `offset`.
pub fn line_of_offset(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())].matches('\n').count() + 1
}

/// Byte offset at which the line containing `offset` starts.
pub fn line_start(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())]
        .rfind('\n')
        .map_or(0, |newline| newline + 1)
}

/// Byte offset just past the line containing the byte before `end`.
///
/// Points after that line's `\n`, or at the end of content for a last line
/// without one.
pub fn line_end(content: &str, end: usize) -> usize {
    let end = end.min(content.len());
    if end == 0 || content[..end].ends_with('\n') {
        return end;
    }
    content[end..]
        .find('\n')
        .map_or(content.len(), |newline| end + newline + 1)
}

/// Guesses the syntactic category of anchor text.
pub fn classify(text: &str) -> AnchorKind {
    let trimmed = text.trim_start();
    let words: Vec<&str> = trimmed.split_whitespace().take(4).collect();
    let has_word = |word: &str| words.contains(&word);

    if trimmed.starts_with("import ") || trimmed.starts_with("use ") {
        AnchorKind::Import
    } else if trimmed.starts_with("case ") || trimmed.starts_with("default:") {
        AnchorKind::SwitchCase
    } else if trimmed.contains("#region") || trimmed.contains("// region") {
        AnchorKind::Region
    } else if has_word("class") || has_word("struct") || has_word("interface") {
        AnchorKind::Class
    } else if has_word("function") || has_word("fn") || has_word("def") {
        AnchorKind::Function
    } else if trimmed.contains('(') && trimmed.trim_end().ends_with('{') {
        AnchorKind::Method
    } else {
        AnchorKind::Custom
    }
}

/// Resolves anchor text to every matching location, in file order.
pub fn locate_anchors(content: &str, text: &str, kind: AnchorKind) -> Vec<Anchor> {
    find_occurrences(content, text)
        .into_iter()
        .map(|offset| Anchor {
            text: text.to_owned(),
            kind,
            line: line_of_offset(content, offset),
        })
        .collect()
}
