//! Conversational front of the Sifu reasoning core.
//!
//! Holds short-lived per-conversation context and the [`Sifu`] orchestrator
//! that turns an utterance into a response by combining intent matching,
//! knowledge retrieval and response templates.

pub mod context;
pub mod orchestrator;
pub mod response;

pub use context::{Context, ContextRef, ContextStore, ContextSweeper};
pub use orchestrator::{HealthReport, Sifu};
pub use response::{
    selector_for, EntityExtractor, FirstTemplate, NoEntities, RoundRobinTemplates,
    TemplateSelector,
};
