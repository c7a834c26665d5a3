use serde::{Deserialize, Serialize};

use sifu_core::error::{Result, SifuError};

/// Intent name reported when nothing matched confidently.
pub const NO_MATCH: &str = "none";

/// A named user goal, recognized by literal patterns or example sentences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Minimum confidence for this intent; the matcher's default when unset.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub response_templates: Vec<String>,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
            examples: Vec::new(),
            description: String::new(),
            confidence_threshold: None,
            response_templates: Vec::new(),
        }
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples.extend(examples.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_templates<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_templates
            .extend(templates.into_iter().map(Into::into));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(SifuError::Validation(
                "intent name must not be empty".to_string(),
            ));
        }
        if name == NO_MATCH {
            return Err(SifuError::Validation(format!(
                "'{}' is reserved for unmatched utterances",
                NO_MATCH
            )));
        }
        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(SifuError::Validation(format!(
                    "intent '{}' threshold must be within [0, 1], got {}",
                    self.name, threshold
                )));
            }
        }
        Ok(())
    }
}

/// How a match was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// The utterance equals one of the intent's patterns.
    Exact,
    /// A pattern occurs inside the utterance.
    Pattern,
    /// An example sentence scored highest.
    Example,
    None,
}

/// Outcome of matching one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Matched intent name, or [`NO_MATCH`].
    pub intent: String,
    pub confidence: f32,
    pub matched_pattern: Option<String>,
    pub matched_example: Option<String>,
    pub source: MatchSource,
}

impl MatchResult {
    /// The "no match" result carrying the best score seen.
    pub fn none(confidence: f32) -> Self {
        Self {
            intent: NO_MATCH.to_string(),
            confidence,
            matched_pattern: None,
            matched_example: None,
            source: MatchSource::None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.source != MatchSource::None
    }
}
