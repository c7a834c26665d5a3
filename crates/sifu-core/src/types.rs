use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SifuError};

/// String-keyed map of JSON values attached to entries, contexts and
/// responses.
pub type Metadata = BTreeMap<String, Value>;

/// Language assigned to knowledge when the caller does not specify one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Metadata key holding the query a learned entry answers.
pub const ORIGINAL_QUERY_KEY: &str = "original_query";

/// Clamp a confidence into `[0, 1]`. NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Reject metadata holding arrays or objects.
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    for (key, value) in metadata {
        if key.trim().is_empty() {
            return Err(SifuError::Validation(
                "metadata keys must not be empty".to_string(),
            ));
        }
        if value.is_array() || value.is_object() {
            return Err(SifuError::Validation(format!(
                "metadata value for '{}' must be a scalar",
                key
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Knowledge
// =============================================================================

/// A stored fact or answer.
///
/// Invariants: `id` never changes after creation and `confidence` is always
/// within `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub language: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted interchange shape of a knowledge entry.
///
/// Only `content` is required so that hand-written files (content, metadata,
/// tags, language) can be imported; missing fields are filled in by
/// [`KnowledgeRecord::into_entry`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl KnowledgeRecord {
    /// Convert into an entry, generating whatever the record left out.
    pub fn into_entry(self) -> KnowledgeEntry {
        let now = Utc::now();
        let created_at = self.created_at.unwrap_or(now);
        KnowledgeEntry {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            content: self.content,
            metadata: self.metadata,
            tags: self.tags,
            language: self
                .language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            confidence: clamp_confidence(self.confidence.unwrap_or(1.0)),
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        }
    }
}

impl From<KnowledgeEntry> for KnowledgeRecord {
    fn from(entry: KnowledgeEntry) -> Self {
        Self {
            id: Some(entry.id),
            content: entry.content,
            metadata: entry.metadata,
            tags: entry.tags,
            language: Some(entry.language),
            confidence: Some(entry.confidence),
            created_at: Some(entry.created_at),
            updated_at: Some(entry.updated_at),
        }
    }
}

/// Input for adding a knowledge entry.
#[derive(Clone, Debug, Default)]
pub struct NewKnowledge {
    pub content: String,
    pub metadata: Metadata,
    pub tags: BTreeSet<String>,
    pub language: Option<String>,
    pub confidence: Option<f32>,
}

impl NewKnowledge {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Partial update of a knowledge entry. `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct KnowledgeUpdate {
    pub content: Option<String>,
    pub metadata: Option<Metadata>,
    pub tags: Option<BTreeSet<String>>,
    pub language: Option<String>,
    pub confidence: Option<f32>,
}

impl KnowledgeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.metadata.is_none()
            && self.tags.is_none()
            && self.language.is_none()
            && self.confidence.is_none()
    }
}

/// A search hit with its relevance score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

// =============================================================================
// Feedback
// =============================================================================

/// A user's verdict on a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Rating {
    Negative,
    Neutral,
    Positive,
}

impl Rating {
    pub fn value(self) -> i64 {
        match self {
            Rating::Negative => -1,
            Rating::Neutral => 0,
            Rating::Positive => 1,
        }
    }
}

impl TryFrom<i64> for Rating {
    type Error = SifuError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(Rating::Negative),
            0 => Ok(Rating::Neutral),
            1 => Ok(Rating::Positive),
            other => Err(SifuError::Validation(format!(
                "rating must be -1, 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        rating.value()
    }
}

/// Feedback on a single response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Rating,
    /// The answer the user would have preferred.
    #[serde(default)]
    pub better_response: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Feedback {
    pub fn new(rating: Rating) -> Self {
        Self {
            rating,
            better_response: None,
            comment: None,
        }
    }

    pub fn positive() -> Self {
        Self::new(Rating::Positive)
    }

    pub fn neutral() -> Self {
        Self::new(Rating::Neutral)
    }

    pub fn negative() -> Self {
        Self::new(Rating::Negative)
    }

    pub fn with_better_response(mut self, text: impl Into<String>) -> Self {
        self.better_response = Some(text.into());
        self
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Where the text of a response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Knowledge,
    Template,
    Fallback,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Knowledge => "knowledge",
            ResponseSource::Template => "template",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// The answer to a query: display text plus structured metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl QueryResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` recorded in metadata, if it is a known one.
    pub fn source(&self) -> Option<ResponseSource> {
        match self.metadata.get("source").and_then(Value::as_str)? {
            "knowledge" => Some(ResponseSource::Knowledge),
            "template" => Some(ResponseSource::Template),
            "fallback" => Some(ResponseSource::Fallback),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.5), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(0.4), 0.4);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
    }

    #[test]
    fn test_validate_metadata_scalars_only() {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), Value::from("weather"));
        metadata.insert("count".into(), Value::from(3));
        metadata.insert("flag".into(), Value::Bool(true));
        metadata.insert("none".into(), Value::Null);
        assert!(validate_metadata(&metadata).is_ok());

        metadata.insert("list".into(), serde_json::json!([1, 2]));
        assert!(matches!(
            validate_metadata(&metadata),
            Err(SifuError::Validation(_))
        ));
    }

    #[test]
    fn test_record_from_minimal_json() {
        let json = r#"{"content": "Sifu is an AI assistant", "tags": ["ai"], "language": "en"}"#;
        let record: KnowledgeRecord = serde_json::from_str(json).unwrap();
        let entry = record.into_entry();
        assert_eq!(entry.content, "Sifu is an AI assistant");
        assert_eq!(entry.confidence, 1.0);
        assert_eq!(entry.language, "en");
        assert!(entry.tags.contains("ai"));
        assert_eq!(entry.created_at, entry.updated_at);
    }

    #[test]
    fn test_record_clamps_confidence() {
        let json = r#"{"content": "x", "confidence": 7.0}"#;
        let record: KnowledgeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.into_entry().confidence, 1.0);
    }

    #[test]
    fn test_record_keeps_existing_id() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"id": "{}", "content": "x"}}"#, id);
        let record: KnowledgeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.into_entry().id, id);
    }

    #[test]
    fn test_rating_try_from() {
        assert_eq!(Rating::try_from(-1).unwrap(), Rating::Negative);
        assert_eq!(Rating::try_from(0).unwrap(), Rating::Neutral);
        assert_eq!(Rating::try_from(1).unwrap(), Rating::Positive);
        assert!(matches!(
            Rating::try_from(5),
            Err(SifuError::Validation(_))
        ));
    }

    #[test]
    fn test_feedback_deserialize() {
        let feedback: Feedback =
            serde_json::from_str(r#"{"rating": -1, "better_response": "Paris"}"#).unwrap();
        assert_eq!(feedback.rating, Rating::Negative);
        assert_eq!(feedback.better_response.as_deref(), Some("Paris"));

        assert!(serde_json::from_str::<Feedback>(r#"{"rating": 3}"#).is_err());
    }

    #[test]
    fn test_query_response_source() {
        let response = QueryResponse::new("hi").with_metadata("source", "template");
        assert_eq!(response.source(), Some(ResponseSource::Template));
        assert_eq!(QueryResponse::new("hi").source(), None);
    }

    #[test]
    fn test_knowledge_update_is_empty() {
        assert!(KnowledgeUpdate::new().is_empty());
        assert!(!KnowledgeUpdate::new().confidence(0.5).is_empty());
    }
}
