//! Content preprocessing for embedding generation.
//!
//! Prepares a record's title and summary for embedding:
//! 1. Trim whitespace
//! 2. Skip if both empty
//! 3. Concatenate with separator
//! 4. Truncate to max length with ellipsis

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Preprocess title and summary for embedding generation.
///
/// Returns `None` if both are empty after trimming.
pub fn preprocess_content(title: &str, summary: &str) -> Option<String> {
    let title = title.trim();
    let summary = summary.trim();

    if title.is_empty() && summary.is_empty() {
        return None;
    }

    let content = if title.is_empty() {
        summary.to_string()
    } else if summary.is_empty() {
        title.to_string()
    } else {
        format!("{} - {}", title, summary)
    };

    Some(truncate_content(&content))
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
