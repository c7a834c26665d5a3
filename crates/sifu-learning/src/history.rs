//! Bounded interaction history and running feedback statistics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sifu_core::types::{Feedback, QueryResponse, Rating};

use crate::engine::LearningAction;

/// One applied piece of feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub query: String,
    pub response: QueryResponse,
    pub feedback: Feedback,
    pub actions: Vec<LearningAction>,
    pub recorded_at: DateTime<Utc>,
}

/// Totals over every interaction recorded since startup.
///
/// Unlike the history these are never evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningStats {
    pub total: u64,
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
    /// Corrections stored from negative feedback.
    pub corrections: u64,
    /// Existing entries whose confidence was raised.
    pub reinforcements: u64,
    /// New entries learned from positive feedback.
    pub insertions: u64,
    /// Existing entries whose confidence was lowered.
    pub penalties: u64,
}

impl LearningStats {
    fn count(&mut self, record: &InteractionRecord) {
        self.total += 1;
        match record.feedback.rating {
            Rating::Positive => self.positive += 1,
            Rating::Neutral => self.neutral += 1,
            Rating::Negative => self.negative += 1,
        }
        for action in &record.actions {
            match action {
                LearningAction::Corrected { .. } => self.corrections += 1,
                LearningAction::Reinforced { .. } => self.reinforcements += 1,
                LearningAction::Learned { .. } => self.insertions += 1,
                LearningAction::Penalized { .. } => self.penalties += 1,
            }
        }
    }
}

/// Ring buffer of the most recent interactions.
#[derive(Debug)]
pub(crate) struct InteractionLog {
    records: VecDeque<InteractionRecord>,
    capacity: usize,
    stats: LearningStats,
}

impl InteractionLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            stats: LearningStats::default(),
        }
    }

    pub(crate) fn push(&mut self, record: InteractionRecord) {
        self.stats.count(&record);
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Up to `n` records, newest first.
    pub(crate) fn recent(&self, n: usize) -> Vec<InteractionRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    pub(crate) fn stats(&self) -> LearningStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str, rating: Rating) -> InteractionRecord {
        InteractionRecord {
            query: query.to_string(),
            response: QueryResponse::new("answer"),
            feedback: Feedback::new(rating),
            actions: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = InteractionLog::new(2);
        log.push(record("one", Rating::Positive));
        log.push(record("two", Rating::Neutral));
        log.push(record("three", Rating::Negative));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "three");
        assert_eq!(recent[1].query, "two");
    }

    #[test]
    fn test_stats_survive_eviction() {
        let mut log = InteractionLog::new(1);
        log.push(record("one", Rating::Positive));
        log.push(record("two", Rating::Positive));
        log.push(record("three", Rating::Negative));

        let stats = log.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.positive, 2);
        assert_eq!(stats.negative, 1);
        assert_eq!(stats.neutral, 0);
    }

    #[test]
    fn test_zero_capacity_keeps_only_stats() {
        let mut log = InteractionLog::new(0);
        log.push(record("one", Rating::Neutral));
        assert!(log.recent(5).is_empty());
        assert_eq!(log.stats().neutral, 1);
    }
}
