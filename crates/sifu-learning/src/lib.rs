//! Sifu Learning crate - turns user feedback into knowledge changes.
//!
//! Negative ratings lower trust in the answer that was given and store the
//! user's correction. Positive ratings reinforce a matching entry or learn
//! the endorsed text as a new one. Every change goes through the public
//! [`KnowledgeStore`](sifu_storage::KnowledgeStore) contract.

pub mod engine;
pub mod history;

pub use engine::{LearningAction, LearningEngine};
pub use history::{InteractionRecord, LearningStats};
