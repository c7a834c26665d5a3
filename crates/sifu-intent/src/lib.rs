//! Sifu Intent crate - resolves what the user is trying to do.
//!
//! Intents are matched in two tiers: literal trigger patterns first, then
//! example sentences scored by a pluggable [`SemanticScorer`]
//! (lexical by default).
//!
//! [`SemanticScorer`]: sifu_core::scorer::SemanticScorer

pub mod matcher;
pub mod types;

pub use matcher::IntentMatcher;
pub use types::{Intent, MatchResult, MatchSource, NO_MATCH};
