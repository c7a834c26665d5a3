//! Feedback application.
//!
//! | rating   | effect |
//! |----------|--------|
//! | negative | lower the confidence of the entry that produced the answer; store `better_response` as a correction |
//! | positive | raise a matching entry's confidence, or learn the endorsed text as a new entry |
//! | neutral  | recorded only |

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sifu_core::config::LearningConfig;
use sifu_core::error::{Result, SifuError};
use sifu_core::types::{
    Feedback, KnowledgeEntry, NewKnowledge, QueryResponse, Rating, ResponseSource,
    ORIGINAL_QUERY_KEY,
};
use sifu_storage::{Applied, KnowledgeStore};

use crate::history::{InteractionLog, InteractionRecord, LearningStats};

pub const TAG_LEARNED: &str = "learned";
pub const TAG_CORRECTION: &str = "correction";
pub const TAG_REINFORCED: &str = "reinforced";

/// A knowledge change made in response to feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LearningAction {
    /// An existing entry lost confidence.
    Penalized { id: Uuid, confidence: f32 },
    /// An existing entry gained confidence.
    Reinforced { id: Uuid, confidence: f32 },
    /// A correction from negative feedback was stored.
    Corrected { entry: KnowledgeEntry },
    /// Endorsed text from positive feedback was stored.
    Learned { entry: KnowledgeEntry },
}

/// Actions applied so far for one interaction, and the first save failure.
///
/// A failed save leaves the change in memory, so later steps still run.
#[derive(Default)]
struct Outcome {
    actions: Vec<LearningAction>,
    persist_error: Option<SifuError>,
}

impl Outcome {
    fn settle<T>(&mut self, applied: Applied<T>) -> T {
        if let Some(e) = applied.persist_error {
            warn!(error = %e, "Feedback applied in memory but not persisted");
            self.persist_error.get_or_insert(e);
        }
        applied.value
    }
}

/// Applies feedback to a [`KnowledgeStore`] and keeps interaction analytics.
pub struct LearningEngine {
    store: Arc<KnowledgeStore>,
    config: LearningConfig,
    log: Mutex<InteractionLog>,
}

impl LearningEngine {
    /// Create an engine that writes to `store`.
    pub fn new(store: Arc<KnowledgeStore>, config: LearningConfig) -> Self {
        let log = InteractionLog::new(config.history_capacity);
        Self {
            store,
            config,
            log: Mutex::new(log),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Apply `feedback` on `response` to the query it answered.
    ///
    /// Returns the knowledge changes made, in order. A blank
    /// `better_response` is treated as absent.
    ///
    /// If the store fails to persist a change, the remaining changes are
    /// still applied and the interaction is still recorded; the first
    /// storage error is then returned.
    pub async fn record_interaction(
        &self,
        query: &str,
        response: &QueryResponse,
        feedback: &Feedback,
    ) -> Result<Vec<LearningAction>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SifuError::Validation(
                "feedback query must not be empty".to_string(),
            ));
        }

        let better = match feedback.better_response.as_deref().map(str::trim) {
            Some("") => {
                debug!(query, "Ignoring blank better_response");
                None
            }
            other => other,
        };

        let mut outcome = Outcome::default();
        let applied = match feedback.rating {
            Rating::Negative => {
                self.apply_negative(query, response, better, &mut outcome)
                    .await
            }
            Rating::Positive => {
                self.apply_positive(query, response, better, &mut outcome)
                    .await
            }
            Rating::Neutral => Ok(()),
        };
        let Outcome {
            actions,
            persist_error,
        } = outcome;

        info!(
            query,
            rating = feedback.rating.value(),
            actions = actions.len(),
            persisted = persist_error.is_none(),
            "Feedback recorded"
        );

        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(InteractionRecord {
                query: query.to_string(),
                response: response.clone(),
                feedback: feedback.clone(),
                actions: actions.clone(),
                recorded_at: Utc::now(),
            });

        applied?;
        match persist_error {
            Some(e) => Err(e),
            None => Ok(actions),
        }
    }

    /// Up to `n` recorded interactions, newest first.
    pub fn history(&self, n: usize) -> Vec<InteractionRecord> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(n)
    }

    /// Totals over every recorded interaction.
    pub fn stats(&self) -> LearningStats {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    async fn apply_negative(
        &self,
        query: &str,
        response: &QueryResponse,
        better: Option<&str>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        if let Some(target) = self.answering_entry(response)? {
            let applied = self
                .store
                .adjust_confidence_applied(target.id, -self.config.penalty_step)
                .await?;
            let entry = outcome.settle(applied);
            debug!(id = %entry.id, confidence = entry.confidence, "Penalized answer");
            outcome.actions.push(LearningAction::Penalized {
                id: entry.id,
                confidence: entry.confidence,
            });
        }

        if let Some(better) = better {
            let applied = self
                .store
                .add_applied(
                    NewKnowledge::new(better)
                        .with_confidence(self.config.correction_confidence)
                        .with_tags([TAG_LEARNED, TAG_CORRECTION])
                        .with_metadata("source", "feedback")
                        .with_metadata(ORIGINAL_QUERY_KEY, query)
                        .with_metadata("original_response", response.text.as_str())
                        .with_metadata("rating", Rating::Negative.value()),
                )
                .await?;
            let entry = outcome.settle(applied);
            debug!(id = %entry.id, "Stored correction");
            outcome.actions.push(LearningAction::Corrected { entry });
        }

        Ok(())
    }

    async fn apply_positive(
        &self,
        query: &str,
        response: &QueryResponse,
        better: Option<&str>,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let target = match better {
            Some(text) => self
                .store
                .find_similar(text, self.config.similarity_threshold)?,
            None => self.answering_entry(response)?,
        };

        if let Some(target) = target {
            let applied = self
                .store
                .adjust_confidence_applied(target.id, self.config.reinforcement_step)
                .await?;
            let entry = outcome.settle(applied);
            debug!(id = %entry.id, confidence = entry.confidence, "Reinforced entry");
            outcome.actions.push(LearningAction::Reinforced {
                id: entry.id,
                confidence: entry.confidence,
            });
            return Ok(());
        }

        let endorsed = match better {
            Some(text) => text,
            None => {
                if response.source() == Some(ResponseSource::Fallback) {
                    debug!(query, "Not learning a fallback response");
                    return Ok(());
                }
                let text = response.text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                text
            }
        };

        let applied = self
            .store
            .add_applied(
                NewKnowledge::new(endorsed)
                    .with_confidence(self.config.reinforced_confidence)
                    .with_tags([TAG_LEARNED, TAG_REINFORCED])
                    .with_metadata("source", "feedback")
                    .with_metadata(ORIGINAL_QUERY_KEY, query)
                    .with_metadata("rating", Rating::Positive.value()),
            )
            .await?;
        let entry = outcome.settle(applied);
        debug!(id = %entry.id, "Learned endorsed response");
        outcome.actions.push(LearningAction::Learned { entry });
        Ok(())
    }

    /// The entry that produced `response`: its recorded `knowledge_id` when
    /// that entry still exists, else the entry whose content is closest to
    /// the response text.
    fn answering_entry(&self, response: &QueryResponse) -> Result<Option<KnowledgeEntry>> {
        let recorded = response
            .metadata
            .get("knowledge_id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok());
        if let Some(id) = recorded {
            match self.store.get(id)? {
                Some(entry) => return Ok(Some(entry)),
                None => warn!(id = %id, "Response refers to a missing knowledge entry"),
            }
        }

        if response.text.trim().is_empty() {
            return Ok(None);
        }
        self.store
            .find_similar(&response.text, self.config.similarity_threshold)
    }
}

impl std::fmt::Debug for LearningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningEngine")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
