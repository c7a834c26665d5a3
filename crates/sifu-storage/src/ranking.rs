//! Relevance scoring for knowledge search.
//!
//! The lexical score mixes three signals over normalized text:
//!
//! | component | weight | meaning |
//! |-----------|--------|---------|
//! | exact     | 0.4    | 1.0 on equality, 0.7 when one text contains the other |
//! | overlap   | 0.5    | `0.75 * coverage + 0.25 * jaccard` of content words |
//! | tag       | 0.1    | fraction of query words that are tags of the entry |
//!
//! Entries learned from feedback record the query they answer under
//! [`ORIGINAL_QUERY_KEY`]. That query is scored with the exact and overlap
//! terms too, and the entry keeps the better of the two scores, so a
//! correction ranks for its question even when the answer shares no words
//! with it.
//!
//! An optional [`SemanticScorer`] is blended in with `semantic_weight`, and the
//! result is scaled by the entry's confidence.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use sifu_core::scorer::SemanticScorer;
use sifu_core::text;
use sifu_core::types::{KnowledgeEntry, ScoredEntry, ORIGINAL_QUERY_KEY};

const EXACT_WEIGHT: f32 = 0.4;
const OVERLAP_WEIGHT: f32 = 0.5;
const TAG_WEIGHT: f32 = 0.1;
const CONTAINMENT_SCORE: f32 = 0.7;

/// Scores entries against a query.
#[derive(Clone)]
pub struct Ranker {
    scorer: Option<Arc<dyn SemanticScorer>>,
    semantic_weight: f32,
}

impl Ranker {
    pub fn new(semantic_weight: f32) -> Self {
        Self {
            scorer: None,
            semantic_weight: semantic_weight.clamp(0.0, 1.0),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn scorer_name(&self) -> Option<&str> {
        self.scorer.as_deref().map(|s| s.name())
    }

    /// Score every entry, drop those at or below `floor`, and return the best
    /// `limit` hits.
    ///
    /// Ties go to the most recently updated entry, then to the lower id.
    pub fn rank<'a, I>(&self, query: &str, entries: I, floor: f32, limit: usize) -> Vec<ScoredEntry>
    where
        I: IntoIterator<Item = &'a KnowledgeEntry>,
    {
        let prepared = PreparedQuery::new(query);
        if prepared.loose.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<ScoredEntry> = entries
            .into_iter()
            .filter_map(|entry| {
                let score = self.score_prepared(&prepared, entry);
                (score > floor).then(|| ScoredEntry {
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(compare_hits);
        hits.truncate(limit);
        hits
    }

    /// Relevance of a single entry for `query`, in `[0, 1]`.
    pub fn score(&self, query: &str, entry: &KnowledgeEntry) -> f32 {
        self.score_prepared(&PreparedQuery::new(query), entry)
    }

    fn score_prepared(&self, query: &PreparedQuery, entry: &KnowledgeEntry) -> f32 {
        let lexical = lexical_score(query, entry);
        let blended = match &self.scorer {
            Some(scorer) => {
                let semantic = scorer.score(&query.raw, &entry.content);
                let semantic = if semantic.is_nan() {
                    0.0
                } else {
                    semantic.clamp(0.0, 1.0)
                };
                (1.0 - self.semantic_weight) * lexical + self.semantic_weight * semantic
            }
            None => lexical,
        };
        blended * entry.confidence
    }
}

impl std::fmt::Debug for Ranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ranker")
            .field("scorer", &self.scorer_name())
            .field("semantic_weight", &self.semantic_weight)
            .finish()
    }
}

struct PreparedQuery {
    raw: String,
    loose: String,
    tokens: HashSet<String>,
}

impl PreparedQuery {
    fn new(query: &str) -> Self {
        Self {
            raw: query.to_string(),
            loose: text::normalize_loose(query),
            tokens: text::content_tokens(query),
        }
    }
}

fn lexical_score(query: &PreparedQuery, entry: &KnowledgeEntry) -> f32 {
    let content = text_score(query, &entry.content) + TAG_WEIGHT * tag_score(query, entry);
    let provenance = entry
        .metadata
        .get(ORIGINAL_QUERY_KEY)
        .and_then(|v| v.as_str())
        .map_or(0.0, |original| text_score(query, original));
    content.max(provenance)
}

/// Exact and overlap terms of `query` against `target`.
fn text_score(query: &PreparedQuery, target: &str) -> f32 {
    let target_loose = text::normalize_loose(target);

    let exact = if target_loose == query.loose {
        1.0
    } else if text::contains_phrase(&target_loose, &query.loose)
        || text::contains_phrase(&query.loose, &target_loose)
    {
        CONTAINMENT_SCORE
    } else {
        0.0
    };

    let target_tokens = text::content_tokens(target);
    let overlap = 0.75 * text::coverage(&query.tokens, &target_tokens)
        + 0.25 * text::jaccard(&query.tokens, &target_tokens);

    EXACT_WEIGHT * exact + OVERLAP_WEIGHT * overlap
}

fn tag_score(query: &PreparedQuery, entry: &KnowledgeEntry) -> f32 {
    if query.tokens.is_empty() || entry.tags.is_empty() {
        return 0.0;
    }
    let tags: HashSet<String> = entry.tags.iter().map(|t| t.to_lowercase()).collect();
    query.tokens.iter().filter(|t| tags.contains(*t)).count() as f32 / query.tokens.len() as f32
}

fn compare_hits(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.entry.updated_at.cmp(&a.entry.updated_at))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

/// Similarity of two texts for duplicate detection: 1.0 when their
/// normalized forms are equal, otherwise the Jaccard similarity of their
/// tokens.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let a_loose = text::normalize_loose(a);
    let b_loose = text::normalize_loose(b);
    if a_loose.is_empty() || b_loose.is_empty() {
        return 0.0;
    }
    if a_loose == b_loose {
        return 1.0;
    }
    text::jaccard(&text::token_set(a), &text::token_set(b))
}
