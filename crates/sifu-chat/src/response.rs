//! Response template selection and entity extraction hooks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sifu_core::config::TemplatePolicy;
use sifu_core::types::Metadata;
use sifu_intent::MatchResult;

// =============================================================================
// TemplateSelector
// =============================================================================

/// Picks one of an intent's response templates.
pub trait TemplateSelector: Send + Sync {
    /// Return the template to use for `intent`, or `None` if `templates` is
    /// empty.
    fn select<'a>(&self, intent: &str, templates: &'a [String]) -> Option<&'a str>;
}

/// Always the first template.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstTemplate;

impl TemplateSelector for FirstTemplate {
    fn select<'a>(&self, _intent: &str, templates: &'a [String]) -> Option<&'a str> {
        templates.first().map(String::as_str)
    }
}

/// Cycles through each intent's templates in order.
///
/// Each intent keeps its own position.
#[derive(Debug, Default)]
pub struct RoundRobinTemplates {
    positions: Mutex<HashMap<String, usize>>,
}

impl RoundRobinTemplates {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateSelector for RoundRobinTemplates {
    fn select<'a>(&self, intent: &str, templates: &'a [String]) -> Option<&'a str> {
        if templates.is_empty() {
            return None;
        }
        let mut positions = self
            .positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let position = positions.entry(intent.to_string()).or_insert(0);
        let index = *position % templates.len();
        *position = position.wrapping_add(1);
        Some(templates[index].as_str())
    }
}

/// The selector configured by `policy`.
pub fn selector_for(policy: TemplatePolicy) -> Arc<dyn TemplateSelector> {
    match policy {
        TemplatePolicy::First => Arc::new(FirstTemplate),
        TemplatePolicy::RoundRobin => Arc::new(RoundRobinTemplates::new()),
    }
}

// =============================================================================
// EntityExtractor
// =============================================================================

/// Pulls named entities out of an utterance so they can be stored in the
/// conversation context.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, utterance: &str, intent: &MatchResult) -> Metadata;
}

/// Extracts nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntities;

impl EntityExtractor for NoEntities {
    fn extract(&self, _utterance: &str, _intent: &MatchResult) -> Metadata {
        Metadata::new()
    }
}
