//! Text preparation for embedding generation.
//!
//! Block content is trimmed, skipped if empty, and truncated to a bounded
//! number of characters. A hash of the trimmed text decides whether a stored
//! embedding is still current.

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Returns `None` for blank content, which is never sent to a provider.
pub fn embedding_input(content: &str) -> Option<String> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    Some(truncate_content(content))
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

/// Hash of the trimmed content, stored next to the embedding.
pub fn content_hash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.trim().hash(&mut hasher);
    hasher.finish()
}
