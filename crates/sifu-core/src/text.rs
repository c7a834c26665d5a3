//! Text normalization and token-overlap helpers.
//!
//! Shared by knowledge ranking, intent matching and the learning engine so
//! that all three agree on what "the same words" means.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

// Words, optionally joined by inner apostrophes ("what's", "don't").
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}\p{N}]+)*").expect("Invalid token regex"));

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "tell", "that", "the", "this", "to",
    "was", "what", "what's", "when", "where", "which", "who", "why", "with", "you", "your",
];

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

/// Normalize and drop punctuation, keeping only word tokens joined by single
/// spaces.
pub fn normalize_loose(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Lowercased word tokens in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Distinct tokens of `text`.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Distinct tokens with stop-words removed.
///
/// Text made only of stop-words keeps all of its tokens, so "who are you"
/// still has something to match on.
pub fn content_tokens(text: &str) -> HashSet<String> {
    let all = token_set(text);
    let filtered: HashSet<String> = all
        .iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .cloned()
        .collect();
    if filtered.is_empty() {
        all
    } else {
        filtered
    }
}

/// Jaccard similarity of two token sets; 0.0 when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Fraction of `query` tokens present in `target`; 0.0 for an empty query.
pub fn coverage(query: &HashSet<String>, target: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    query.intersection(target).count() as f32 / query.len() as f32
}

/// Whether `needle` occurs in `haystack` on word boundaries.
///
/// Both arguments are expected in [`normalize_loose`] form.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || haystack.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Hello \t  THERE\n"), "hello there");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_loose_strips_punctuation() {
        assert_eq!(normalize_loose("Hello, World!"), "hello world");
        assert_eq!(
            normalize_loose("What's the weather like today?"),
            "what's the weather like today"
        );
        assert_eq!(normalize_loose("?!"), "");
    }

    #[test]
    fn test_tokenize_keeps_inner_apostrophes() {
        assert_eq!(tokenize("Don't stop"), vec!["don't", "stop"]);
        assert_eq!(tokenize("'quoted'"), vec!["quoted"]);
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Élève über"), vec!["élève", "über"]);
    }

    #[test]
    fn test_content_tokens_drops_stop_words() {
        assert_eq!(content_tokens("What is Sifu?"), set(&["sifu"]));
    }

    #[test]
    fn test_content_tokens_all_stop_words_kept() {
        assert_eq!(content_tokens("who are you"), set(&["who", "are", "you"]));
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["a", "b"])), 1.0);
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["b", "c"])), 1.0 / 3.0);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }

    #[test]
    fn test_coverage() {
        assert_eq!(coverage(&set(&["a", "b"]), &set(&["a", "c", "d"])), 0.5);
        assert_eq!(coverage(&set(&[]), &set(&["a"])), 0.0);
    }

    #[test]
    fn test_contains_phrase_word_boundaries() {
        assert!(contains_phrase("hello there", "hello"));
        assert!(contains_phrase("say hello there", "hello there"));
        assert!(!contains_phrase("this is it", "hi"));
        assert!(!contains_phrase("hello", ""));
    }
}
