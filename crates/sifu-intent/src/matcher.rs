//! Two-tier intent matching.
//!
//! 1. Patterns: an utterance equal to a pattern scores 1.0; a pattern found
//!    inside the utterance on word boundaries scores
//!    `0.7 + 0.2 * pattern_len / utterance_len`.
//! 2. Examples: only consulted when no pattern hit clears its intent's
//!    threshold. Each example is scored by the [`SemanticScorer`] and an
//!    intent keeps the better of its pattern and example scores.
//!
//! The gate between the tiers is global. Once any intent's pattern clears
//! that intent's threshold, no intent's examples are scored, so an exact
//! example of one intent loses to a weaker pattern hit of another.
//!
//! The best intent overall wins if it clears its own threshold; otherwise the
//! result is [`NO_MATCH`] carrying that best score. Equal scores go to the
//! intent registered first.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tracing::{debug, info};

use sifu_core::config::IntentConfig;
use sifu_core::error::Result;
use sifu_core::scorer::{LexicalScorer, SemanticScorer};
use sifu_core::text;

use crate::types::{Intent, MatchResult, MatchSource, NO_MATCH};

const CONTAINMENT_BASE: f32 = 0.7;
const CONTAINMENT_SPAN: f32 = 0.2;

/// On-disk format of an intents file.
#[derive(Debug, Deserialize)]
struct IntentFile {
    #[serde(default)]
    intents: Vec<Intent>,
}

/// A pattern in both normalized forms.
#[derive(Debug, Clone)]
struct CompiledPattern {
    raw: String,
    normalized: String,
    loose: String,
}

impl CompiledPattern {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            normalized: text::normalize(raw),
            loose: text::normalize_loose(raw),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledIntent {
    intent: Intent,
    patterns: Vec<CompiledPattern>,
}

impl CompiledIntent {
    fn new(intent: Intent) -> Self {
        let patterns = intent
            .patterns
            .iter()
            .map(|p| CompiledPattern::new(p))
            .filter(|p| !p.loose.is_empty() || !p.normalized.is_empty())
            .collect();
        Self { intent, patterns }
    }
}

struct Utterance<'a> {
    raw: &'a str,
    normalized: String,
    loose: String,
    loose_len: usize,
}

/// A scored candidate for one intent.
struct Candidate {
    confidence: f32,
    matched_pattern: Option<String>,
    matched_example: Option<String>,
    source: MatchSource,
}

/// Registry of intents plus the matching algorithm.
///
/// Registered intents form an immutable snapshot that writers replace whole,
/// so a concurrent `match_utterance` sees either the old or the new set.
pub struct IntentMatcher {
    intents: RwLock<Arc<Vec<CompiledIntent>>>,
    scorer: Arc<dyn SemanticScorer>,
    default_threshold: f32,
}

impl Default for IntentMatcher {
    fn default() -> Self {
        Self::new(IntentConfig::default().default_confidence_threshold)
    }
}

impl IntentMatcher {
    /// Create an empty matcher using the lexical scorer for examples.
    pub fn new(default_threshold: f32) -> Self {
        Self {
            intents: RwLock::new(Arc::new(Vec::new())),
            scorer: Arc::new(LexicalScorer),
            default_threshold: default_threshold.clamp(0.0, 1.0),
        }
    }

    /// Build a matcher and load the configured intents file, if any.
    pub fn from_config(config: &IntentConfig) -> Result<Self> {
        let matcher = Self::new(config.default_confidence_threshold);
        if let Some(path) = &config.intents_path {
            matcher.load_file(path)?;
        }
        Ok(matcher)
    }

    /// Replace the example scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        info!(scorer = scorer.name(), "Intent example scorer installed");
        self.scorer = scorer;
        self
    }

    /// Threshold for intents that do not set their own.
    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    /// Register `intent`, replacing one with the same name in place.
    pub fn add_intent(&self, intent: Intent) -> Result<()> {
        intent.validate()?;
        let name = intent.name.clone();
        self.replace_with(|intents| upsert(intents, intent));
        debug!(intent = %name, "Intent registered");
        Ok(())
    }

    /// Unregister an intent. Returns whether it existed.
    pub fn remove_intent(&self, name: &str) -> bool {
        let mut removed = false;
        self.replace_with(|intents| {
            let before = intents.len();
            intents.retain(|c| c.intent.name != name);
            removed = intents.len() != before;
        });
        if removed {
            debug!(intent = %name, "Intent removed");
        }
        removed
    }

    /// A copy of the registered intent called `name`.
    pub fn get_intent(&self, name: &str) -> Option<Intent> {
        self.snapshot()
            .iter()
            .find(|c| c.intent.name == name)
            .map(|c| c.intent.clone())
    }

    /// Registered intent names in registration order.
    pub fn list_intents(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|c| c.intent.name.clone())
            .collect()
    }

    /// Number of registered intents.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The threshold that applies to `intent`.
    pub fn threshold_for(&self, intent: &Intent) -> f32 {
        intent
            .confidence_threshold
            .unwrap_or(self.default_threshold)
    }

    /// Load a JSON file of the form `{"intents": [...]}`.
    ///
    /// All intents are validated before any is registered, and they are
    /// applied in one swap. Returns the number of intents loaded.
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let file: IntentFile = serde_json::from_str(&content)?;
        for intent in &file.intents {
            intent.validate()?;
        }

        let count = file.intents.len();
        self.replace_with(|intents| {
            for intent in file.intents {
                upsert(intents, intent);
            }
        });
        info!(path = %path.display(), intents = count, "Intents loaded");
        Ok(count)
    }

    /// Resolve the intent of `utterance`.
    pub fn match_utterance(&self, utterance: &str) -> MatchResult {
        let intents = self.snapshot();
        if intents.is_empty() {
            return MatchResult::none(0.0);
        }

        let loose = text::normalize_loose(utterance);
        let utterance = Utterance {
            raw: utterance,
            normalized: text::normalize(utterance),
            loose_len: loose.chars().count(),
            loose,
        };
        if utterance.normalized.is_empty() {
            return MatchResult::none(0.0);
        }

        let pattern_hits: Vec<Option<Candidate>> = intents
            .iter()
            .map(|c| best_pattern(c, &utterance))
            .collect();
        let pattern_cleared = intents
            .iter()
            .zip(&pattern_hits)
            .any(|(c, hit)| {
                hit.as_ref()
                    .is_some_and(|h| h.confidence >= self.threshold_for(&c.intent))
            });

        let mut best: Option<(&CompiledIntent, Candidate)> = None;
        for (compiled, hit) in intents.iter().zip(pattern_hits) {
            let mut candidate = hit;
            if !pattern_cleared {
                if let Some(example) = self.best_example(compiled, &utterance) {
                    let better = candidate
                        .as_ref()
                        .map_or(true, |c| example.confidence > c.confidence);
                    if better {
                        candidate = Some(example);
                    }
                }
            }

            if let Some(candidate) = candidate {
                let improves = best
                    .as_ref()
                    .map_or(true, |(_, b)| candidate.confidence > b.confidence);
                if improves {
                    best = Some((compiled, candidate));
                }
            }
        }

        let Some((compiled, candidate)) = best else {
            debug!(utterance = utterance.raw, "No intent candidates");
            return MatchResult::none(0.0);
        };

        let threshold = self.threshold_for(&compiled.intent);
        if candidate.confidence < threshold {
            debug!(
                utterance = utterance.raw,
                best = %compiled.intent.name,
                confidence = candidate.confidence,
                threshold,
                "Best intent below threshold"
            );
            return MatchResult::none(candidate.confidence);
        }

        debug!(
            utterance = utterance.raw,
            intent = %compiled.intent.name,
            confidence = candidate.confidence,
            source = ?candidate.source,
            "Intent matched"
        );
        MatchResult {
            intent: compiled.intent.name.clone(),
            confidence: candidate.confidence,
            matched_pattern: candidate.matched_pattern,
            matched_example: candidate.matched_example,
            source: candidate.source,
        }
    }

    fn best_example(&self, compiled: &CompiledIntent, utterance: &Utterance<'_>) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for example in &compiled.intent.examples {
            let score = self.scorer.score(utterance.raw, example);
            let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
            if score <= 0.0 {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.confidence) {
                best = Some(Candidate {
                    confidence: score,
                    matched_pattern: None,
                    matched_example: Some(example.clone()),
                    source: MatchSource::Example,
                });
            }
        }
        best
    }

    fn snapshot(&self) -> Arc<Vec<CompiledIntent>> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent snapshot.
        let guard = self.intents.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    fn replace_with(&self, f: impl FnOnce(&mut Vec<CompiledIntent>)) {
        let mut guard = self.intents.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<CompiledIntent> = guard.as_ref().clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl std::fmt::Debug for IntentMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentMatcher")
            .field("intents", &self.list_intents())
            .field("scorer", &self.scorer.name())
            .field("default_threshold", &self.default_threshold)
            .finish()
    }
}

fn upsert(intents: &mut Vec<CompiledIntent>, intent: Intent) {
    let compiled = CompiledIntent::new(intent);
    match intents
        .iter_mut()
        .find(|c| c.intent.name == compiled.intent.name)
    {
        Some(existing) => *existing = compiled,
        None => intents.push(compiled),
    }
}

fn best_pattern(compiled: &CompiledIntent, utterance: &Utterance<'_>) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for pattern in &compiled.patterns {
        let (confidence, source) = if pattern.normalized == utterance.normalized
            || (!pattern.loose.is_empty() && pattern.loose == utterance.loose)
        {
            (1.0, MatchSource::Exact)
        } else if text::contains_phrase(&utterance.loose, &pattern.loose) {
            let ratio = pattern.loose.chars().count() as f32 / utterance.loose_len.max(1) as f32;
            (CONTAINMENT_BASE + CONTAINMENT_SPAN * ratio, MatchSource::Pattern)
        } else {
            continue;
        };

        if best.as_ref().map_or(true, |b| confidence > b.confidence) {
            best = Some(Candidate {
                confidence,
                matched_pattern: Some(pattern.raw.clone()),
                matched_example: None,
                source,
            });
        }
    }
    best
}
