//! Keyword fallback for queries with no semantic match.
//!
//! Japanese particles and punctuation are treated as separators, so
//! `りんごのレシピは？` yields `["りんご", "レシピ"]`.

use once_cell::sync::Lazy;
use regex::Regex;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[はがのにをでやへと。、？！]").expect("valid separator pattern")
});

pub fn split_keywords(message: &str) -> Vec<String> {
    SEPARATORS
        .replace_all(message, " ")
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// True if `content` contains any keyword as a substring.
pub fn contains_any(content: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| content.contains(keyword.as_str()))
}
