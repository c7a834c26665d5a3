//! The Sifu orchestrator: wires intent matching, knowledge retrieval,
//! conversation context and learning into one query pipeline.
//!
//! Answer selection, in order:
//! 1. the best knowledge hit, if its relevance reaches `knowledge_threshold`;
//! 2. a response template of the matched intent;
//! 3. the configured fallback text.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sifu_core::config::{OrchestratorConfig, SifuConfig};
use sifu_core::error::{Result, SifuError};
use sifu_core::telemetry;
use sifu_core::types::{Feedback, QueryResponse, ResponseSource, ScoredEntry};
use sifu_intent::{IntentMatcher, MatchResult};
use sifu_learning::{LearningAction, LearningEngine};
use sifu_storage::KnowledgeStore;

use crate::context::{ContextRef, ContextStore, ContextSweeper};
use crate::response::{selector_for, EntityExtractor, NoEntities, TemplateSelector};

/// Snapshot of the orchestrator's state for health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `"healthy"` or `"degraded"`.
    pub status: String,
    pub store_reachable: bool,
    pub knowledge_entries: usize,
    pub active_contexts: usize,
    pub intents: usize,
}

impl HealthReport {
    /// Whether every component reported healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Conversational reasoning core.
pub struct Sifu {
    knowledge: Arc<KnowledgeStore>,
    contexts: Arc<ContextStore>,
    intents: Arc<IntentMatcher>,
    learning: Arc<LearningEngine>,
    templates: Arc<dyn TemplateSelector>,
    entities: Arc<dyn EntityExtractor>,
    config: OrchestratorConfig,
    sweeper: Mutex<Option<ContextSweeper>>,
}

impl Sifu {
    /// Assemble an orchestrator around existing knowledge and intents.
    ///
    /// Contexts, learning and template selection are built from `config`.
    pub fn new(knowledge: Arc<KnowledgeStore>, intents: Arc<IntentMatcher>, config: &SifuConfig) -> Self {
        let contexts = Arc::new(ContextStore::from_config(&config.context));
        let learning = Arc::new(LearningEngine::new(
            Arc::clone(&knowledge),
            config.learning.clone(),
        ));
        Self {
            knowledge,
            contexts,
            intents,
            learning,
            templates: selector_for(config.orchestrator.template_policy),
            entities: Arc::new(NoEntities),
            config: config.orchestrator.clone(),
            sweeper: Mutex::new(None),
        }
    }

    /// An orchestrator with an empty in-memory store, no intents and default
    /// settings.
    pub fn in_memory() -> Self {
        let config = SifuConfig::default();
        Self::new(
            Arc::new(KnowledgeStore::in_memory(config.knowledge.clone())),
            Arc::new(IntentMatcher::new(config.intent.default_confidence_threshold)),
            &config,
        )
    }

    /// Build everything from configuration: the knowledge backend, the
    /// intents file and, when an interval is configured, the context sweeper.
    ///
    /// Relative file paths are resolved against `general.data_dir`. Logging
    /// is initialized at `general.log_level` unless a subscriber is already
    /// installed. Must be called within a Tokio runtime.
    pub async fn from_config(config: &SifuConfig) -> Result<Self> {
        config.validate()?;
        telemetry::init_tracing(&config.general.log_level);
        let config = &config.resolved();

        let knowledge = Arc::new(KnowledgeStore::from_config(&config.knowledge).await?);
        let intents = Arc::new(IntentMatcher::from_config(&config.intent)?);
        let sifu = Self::new(knowledge, intents, config);

        if let Some(interval) = config.context.sweep_interval() {
            let sweeper = ContextSweeper::spawn(Arc::clone(&sifu.contexts), interval);
            *sifu.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(sweeper);
        }

        info!(
            backend = sifu.knowledge.backend_name(),
            knowledge_entries = sifu.knowledge.len(),
            intents = sifu.intents.len(),
            "Sifu initialized"
        );
        Ok(sifu)
    }

    /// Replace the context store, e.g. to share one between orchestrators.
    pub fn with_context_store(mut self, contexts: Arc<ContextStore>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Override the configured template policy.
    pub fn with_template_selector(mut self, selector: Arc<dyn TemplateSelector>) -> Self {
        self.templates = selector;
        self
    }

    /// Install the hook that fills context entities after each query.
    pub fn with_entity_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.entities = extractor;
        self
    }

    /// The knowledge store answering queries.
    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    /// Live conversation contexts.
    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// The intent registry.
    pub fn intents(&self) -> &Arc<IntentMatcher> {
        &self.intents
    }

    /// The engine applying feedback.
    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer `text` within the conversation `context_id`.
    ///
    /// A new conversation with a generated id is started when `context_id`
    /// is `None`; the id used is reported in the response metadata.
    pub async fn process_query(&self, text: &str, context_id: Option<&str>) -> Result<QueryResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SifuError::Validation("query must not be empty".to_string()));
        }
        let length = text.chars().count();
        if length > self.config.max_query_length {
            return Err(SifuError::Validation(format!(
                "query is {} characters, the maximum is {}",
                length, self.config.max_query_length
            )));
        }

        let context_id = match context_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let context = self.contexts.get_or_create(&context_id, None)?;

        let intent = self.intents.match_utterance(text);
        let knowledge = best_or_degrade(self.knowledge.search_scored(text, Some(1)))?;

        let mut response = self.compose(&intent, knowledge.as_ref());
        response = response
            .with_metadata("context_id", context_id.as_str())
            .with_metadata("intent", intent.intent.as_str())
            .with_metadata("intent_confidence", f64::from(intent.confidence));
        if let Some(pattern) = &intent.matched_pattern {
            response = response.with_metadata("matched_pattern", pattern.as_str());
        }

        self.update_context(&context, text, &intent);

        debug!(
            context_id = %context_id,
            intent = %intent.intent,
            source = ?response.source(),
            "Query processed"
        );
        Ok(response)
    }

    /// Apply user feedback on a response through the learning engine.
    pub async fn record_feedback(
        &self,
        query: &str,
        response: &QueryResponse,
        feedback: &Feedback,
    ) -> Result<Vec<LearningAction>> {
        self.learning
            .record_interaction(query, response, feedback)
            .await
    }

    /// Report store reachability and component sizes.
    ///
    /// The status is `"degraded"` when the backend is unreachable or the
    /// last save failed.
    pub async fn health(&self) -> HealthReport {
        let store_reachable = self.knowledge.health().await;
        HealthReport {
            status: if store_reachable { "healthy" } else { "degraded" }.to_string(),
            store_reachable,
            knowledge_entries: self.knowledge.len(),
            active_contexts: self.contexts.active_count(),
            intents: self.intents.len(),
        }
    }

    /// Stop the context sweeper, if running, and flush the knowledge store.
    pub async fn shutdown(&self) -> Result<()> {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        self.knowledge.flush().await
    }

    fn compose(&self, intent: &MatchResult, knowledge: Option<&ScoredEntry>) -> QueryResponse {
        if let Some(hit) = knowledge.filter(|hit| hit.score >= self.config.knowledge_threshold) {
            return QueryResponse::new(hit.entry.content.clone())
                .with_metadata("source", ResponseSource::Knowledge.as_str())
                .with_metadata("knowledge_id", hit.entry.id.to_string())
                .with_metadata("relevance", f64::from(hit.score));
        }

        if intent.is_match() {
            let template = self.intents.get_intent(&intent.intent).and_then(|def| {
                self.templates
                    .select(&def.name, &def.response_templates)
                    .map(str::to_string)
            });
            if let Some(template) = template {
                return QueryResponse::new(template)
                    .with_metadata("source", ResponseSource::Template.as_str());
            }
        }

        QueryResponse::new(self.config.fallback_response.clone())
            .with_metadata("source", ResponseSource::Fallback.as_str())
    }

    fn update_context(&self, context: &ContextRef, text: &str, intent: &MatchResult) {
        let extracted = self.entities.extract(text, intent);
        context.update(|entities, metadata| {
            let turns = metadata
                .get("turn_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            metadata.insert("last_query".to_string(), Value::from(text));
            metadata.insert("last_intent".to_string(), Value::from(intent.intent.as_str()));
            metadata.insert("turn_count".to_string(), Value::from(turns + 1));
            entities.extend(extracted);
        });
    }
}

impl std::fmt::Debug for Sifu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sifu")
            .field("knowledge", &self.knowledge)
            .field("intents", &self.intents)
            .field("config", &self.config)
            .finish()
    }
}

/// Top hit of a knowledge search. Recoverable store failures answer
/// without knowledge; anything else is the caller's error.
fn best_or_degrade(search: Result<Vec<ScoredEntry>>) -> Result<Option<ScoredEntry>> {
    match search {
        Ok(hits) => Ok(hits.into_iter().next()),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "Knowledge search failed, answering without knowledge");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sifu_core::types::{Metadata, NewKnowledge};
    use sifu_intent::Intent;

    fn greeting() -> Intent {
        Intent::new("greeting")
            .with_patterns(["hello", "hi", "hey"])
            .with_examples(["hello there", "hi sifu", "hey there"])
            .with_threshold(0.7)
            .with_templates(["Hello!", "Hi there!", "Hey! How can I help?"])
    }

    async fn sifu() -> Sifu {
        let sifu = Sifu::in_memory();
        sifu.intents().add_intent(greeting()).unwrap();
        sifu.knowledge()
            .add(NewKnowledge::new("Sifu is an AI assistant").with_tags(["ai", "assistant"]))
            .await
            .unwrap();
        sifu
    }

    struct CityExtractor;

    impl EntityExtractor for CityExtractor {
        fn extract(&self, utterance: &str, _intent: &MatchResult) -> Metadata {
            let mut entities = Metadata::new();
            if utterance.contains("Paris") {
                entities.insert("city".to_string(), Value::from("Paris"));
            }
            entities
        }
    }

    #[tokio::test]
    async fn test_greeting_uses_template() {
        let sifu = sifu().await;
        let response = sifu.process_query("Hello!", None).await.unwrap();
        assert_eq!(response.text, "Hello!");
        assert_eq!(response.source(), Some(ResponseSource::Template));
        assert_eq!(response.metadata["intent"], "greeting");
        assert_eq!(response.metadata["matched_pattern"], "hello");
        assert!(response.metadata["context_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_knowledge_wins_when_relevant() {
        let sifu = sifu().await;
        let response = sifu.process_query("What is Sifu?", None).await.unwrap();
        assert!(response.text.contains("Sifu is an AI assistant"));
        assert_eq!(response.source(), Some(ResponseSource::Knowledge));
        assert!(response.metadata["relevance"].as_f64().unwrap() >= 0.35);
        assert!(response.metadata.contains_key("knowledge_id"));
    }

    #[tokio::test]
    async fn test_fallback() {
        let sifu = sifu().await;
        let response = sifu
            .process_query("What's the capital of France?", None)
            .await
            .unwrap();
        assert_eq!(response.text, sifu.config().fallback_response);
        assert_eq!(response.source(), Some(ResponseSource::Fallback));
        assert_eq!(response.metadata["intent"], "none");
    }

    #[tokio::test]
    async fn test_validation() {
        let sifu = sifu().await;
        assert!(matches!(
            sifu.process_query("   ", None).await,
            Err(SifuError::Validation(_))
        ));
        let long = "a".repeat(2001);
        assert!(matches!(
            sifu.process_query(&long, None).await,
            Err(SifuError::Validation(_))
        ));
        assert!(sifu.process_query(&"a".repeat(2000), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_context_tracks_turns() {
        let sifu = sifu().await;
        sifu.process_query("Hello!", Some("conv-1")).await.unwrap();
        sifu.process_query("What is Sifu?", Some("conv-1"))
            .await
            .unwrap();

        let context = sifu.contexts().get("conv-1").unwrap();
        assert_eq!(context.get_metadata("turn_count"), Some(Value::from(2u64)));
        assert_eq!(
            context.get_metadata("last_query"),
            Some(Value::from("What is Sifu?"))
        );
        assert_eq!(context.get_metadata("last_intent"), Some(Value::from("none")));
    }

    #[tokio::test]
    async fn test_generated_context_ids_are_distinct() {
        let sifu = sifu().await;
        let a = sifu.process_query("Hello!", None).await.unwrap();
        let b = sifu.process_query("Hello!", None).await.unwrap();
        assert_ne!(a.metadata["context_id"], b.metadata["context_id"]);
        assert_eq!(sifu.contexts().active_count(), 2);
    }

    #[tokio::test]
    async fn test_entity_extractor_fills_context() {
        let sifu = sifu().await.with_entity_extractor(Arc::new(CityExtractor));
        sifu.process_query("Tell me about Paris", Some("c"))
            .await
            .unwrap();
        let context = sifu.contexts().get("c").unwrap();
        assert_eq!(context.get_entity("city"), Some(Value::from("Paris")));
    }

    #[tokio::test]
    async fn test_health() {
        let sifu = sifu().await;
        sifu.process_query("Hello!", Some("c")).await.unwrap();
        let report = sifu.health().await;
        assert!(report.is_healthy());
        assert_eq!(report.knowledge_entries, 1);
        assert_eq!(report.active_contexts, 1);
        assert_eq!(report.intents, 1);
    }

    #[test]
    fn test_search_degrades_only_on_recoverable_errors() {
        let degraded = best_or_degrade(Err(SifuError::Storage("lock poisoned".into())));
        assert!(matches!(degraded, Ok(None)));

        let invalid = best_or_degrade(Err(SifuError::Validation("bad query".into())));
        assert!(matches!(invalid, Err(SifuError::Validation(_))));

        assert!(matches!(best_or_degrade(Ok(Vec::new())), Ok(None)));
    }
}
