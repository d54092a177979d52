//! Shared utility functions used across the codebase.

/// Parse a boolean flag value.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` and `0`, `false`, `no`, `n`,
/// `off` (case-insensitive); anything else is `None`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when
/// anything was cut. Never splits a UTF-8 character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Split a markdown document into sections at level-2 headings (`## `).
///
/// Text before the first heading forms its own section if non-blank.
pub fn markdown_sections(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = text
        .match_indices("\n## ")
        .map(|(i, _)| i + 1)
        .collect();
    if !text.trim().is_empty() {
        starts.insert(0, 0);
    }

    let mut sections = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let section = text[start..end].trim_end();
        if !section.trim().is_empty() {
            sections.push(section);
        }
    }
    sections
}
