//! Pluggable similarity scoring.
//!
//! A semantic model (sentence embeddings, a cross-encoder, ...) can be
//! installed behind [`SemanticScorer`]. The lexical default keeps every
//! component fully functional without one.

use crate::text;

/// Scores how similar an utterance is to a reference sentence.
///
/// Implementations must return a value in `[0, 1]` and must be cheap enough
/// to call once per example or knowledge entry on every query.
pub trait SemanticScorer: Send + Sync {
    fn score(&self, utterance: &str, example: &str) -> f32;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Token-overlap scorer: Jaccard similarity of the two token sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

impl SemanticScorer for LexicalScorer {
    fn score(&self, utterance: &str, example: &str) -> f32 {
        text::jaccard(&text::token_set(utterance), &text::token_set(example))
    }

    fn name(&self) -> &str {
        "lexical"
    }
}
