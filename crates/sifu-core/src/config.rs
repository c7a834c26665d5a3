use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::{Result, SifuError};

/// Upper bound for context TTL and sweep interval, in seconds (ten years).
pub const MAX_CONTEXT_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Top-level configuration for the Sifu core.
///
/// Loaded from a TOML file. Each section configures one component; any
/// missing section or field falls back to its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SifuConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl SifuConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SifuConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// A copy with relative `knowledge.path` and `intent.intents_path`
    /// resolved against `general.data_dir`.
    pub fn resolved(&self) -> Self {
        let data_dir = self.general.data_dir_path();
        let mut config = self.clone();
        config.knowledge.path = config.knowledge.path.map(|p| data_dir.join(p));
        config.intent.intents_path = config.intent.intents_path.map(|p| data_dir.join(p));
        config
    }

    /// Check that every threshold and weight is within range.
    pub fn validate(&self) -> Result<()> {
        check_unit("knowledge.relevance_floor", self.knowledge.relevance_floor)?;
        check_unit("knowledge.semantic_weight", self.knowledge.semantic_weight)?;
        check_unit(
            "intent.default_confidence_threshold",
            self.intent.default_confidence_threshold,
        )?;
        check_unit(
            "learning.correction_confidence",
            self.learning.correction_confidence,
        )?;
        check_unit(
            "learning.reinforced_confidence",
            self.learning.reinforced_confidence,
        )?;
        check_unit("learning.reinforcement_step", self.learning.reinforcement_step)?;
        check_unit("learning.penalty_step", self.learning.penalty_step)?;
        check_unit(
            "learning.similarity_threshold",
            self.learning.similarity_threshold,
        )?;
        check_unit(
            "orchestrator.knowledge_threshold",
            self.orchestrator.knowledge_threshold,
        )?;

        if self.knowledge.default_limit == 0 {
            return Err(SifuError::Config(
                "knowledge.default_limit must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_CONTEXT_SECS).contains(&self.context.default_ttl_secs) {
            return Err(SifuError::Config(format!(
                "context.default_ttl_secs must be within [1, {}], got {}",
                MAX_CONTEXT_SECS, self.context.default_ttl_secs
            )));
        }
        if self.context.sweep_interval_secs > MAX_CONTEXT_SECS {
            return Err(SifuError::Config(format!(
                "context.sweep_interval_secs must be at most {}",
                MAX_CONTEXT_SECS
            )));
        }
        if EnvFilter::try_new(&self.general.log_level).is_err() {
            return Err(SifuError::Config(format!(
                "general.log_level '{}' is not a valid filter",
                self.general.log_level
            )));
        }
        if self.orchestrator.max_query_length == 0 {
            return Err(SifuError::Config(
                "orchestrator.max_query_length must be at least 1".to_string(),
            ));
        }
        if self.knowledge.backend != StorageBackend::Memory && self.knowledge.path.is_none() {
            return Err(SifuError::Config(format!(
                "knowledge.path is required for the {:?} backend",
                self.knowledge.backend
            )));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SifuError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Directory for persisted knowledge and intent files.
    pub data_dir: String,
}

impl GeneralConfig {
    /// `data_dir` with a leading `~` expanded to the home directory.
    pub fn data_dir_path(&self) -> PathBuf {
        let dir = self.data_dir.as_str();
        match dir.strip_prefix("~/").or_else(|| dir.strip_prefix("~\\")) {
            Some(rest) => home_dir().join(rest),
            None if dir == "~" => home_dir(),
            None => PathBuf::from(dir),
        }
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    PathBuf::from(home.unwrap_or_else(|_| ".".to_string()))
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: "~/.sifu/data".to_string(),
        }
    }
}

/// Which persistence backend the knowledge store uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// No persistence; entries live only in memory.
    #[default]
    Memory,
    /// A JSON array of knowledge records.
    Json,
    /// A SQLite database.
    Sqlite,
}

/// Knowledge store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub backend: StorageBackend,
    /// File backing the store; required unless `backend` is `memory`.
    pub path: Option<PathBuf>,
    /// Entries scoring at or below this relevance are never returned.
    pub relevance_floor: f32,
    /// Result count when a search does not specify a limit.
    pub default_limit: usize,
    /// Weight of the semantic scorer term, when a scorer is installed.
    pub semantic_weight: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            relevance_floor: 0.1,
            default_limit: 10,
            semantic_weight: 0.3,
        }
    }
}

/// Conversation context configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Lifetime of a context from creation, in seconds.
    pub default_ttl_secs: u64,
    /// Seconds between background purges. Zero disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl ContextConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

/// Intent matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Threshold applied to intents that do not declare their own.
    pub default_confidence_threshold: f32,
    /// Optional JSON file of intents loaded at startup.
    pub intents_path: Option<PathBuf>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            default_confidence_threshold: 0.5,
            intents_path: None,
        }
    }
}

/// Learning engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Confidence given to a corrected answer.
    pub correction_confidence: f32,
    /// Confidence given to a newly stored, positively rated answer.
    pub reinforced_confidence: f32,
    /// Confidence added to an entry on positive feedback.
    pub reinforcement_step: f32,
    /// Confidence removed from an entry on negative feedback.
    pub penalty_step: f32,
    /// Token similarity at which a response counts as an existing entry.
    pub similarity_threshold: f32,
    /// Number of interactions kept for analytics.
    pub history_capacity: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            correction_confidence: 0.9,
            reinforced_confidence: 0.8,
            reinforcement_step: 0.1,
            penalty_step: 0.1,
            similarity_threshold: 0.9,
            history_capacity: 1000,
        }
    }
}

/// How response templates are picked for a matched intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePolicy {
    #[default]
    First,
    RoundRobin,
}

/// Query orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Relevance at which retrieved knowledge overrides a template.
    pub knowledge_threshold: f32,
    /// Maximum query length in characters.
    pub max_query_length: usize,
    /// Text returned when neither intent nor knowledge is confident.
    pub fallback_response: String,
    pub template_policy: TemplatePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            knowledge_threshold: 0.35,
            max_query_length: 2000,
            fallback_response:
                "I'm not sure how to answer that yet. Could you rephrase it, or teach me the answer?"
                    .to_string(),
            template_policy: TemplatePolicy::First,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SifuConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.knowledge.backend, StorageBackend::Memory);
        assert_eq!(config.knowledge.default_limit, 10);
        assert_eq!(config.context.default_ttl_secs, 3600);
        assert_eq!(config.intent.default_confidence_threshold, 0.5);
        assert_eq!(config.learning.correction_confidence, 0.9);
        assert_eq!(config.orchestrator.template_policy, TemplatePolicy::First);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[knowledge]
backend = "json"
path = "/tmp/sifu/knowledge.json"
relevance_floor = 0.2
default_limit = 5

[context]
default_ttl_secs = 60
sweep_interval_secs = 0

[orchestrator]
template_policy = "round_robin"
"#;
        let file = create_temp_config(content);
        let config = SifuConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.knowledge.backend, StorageBackend::Json);
        assert_eq!(config.knowledge.relevance_floor, 0.2);
        assert_eq!(config.knowledge.default_limit, 5);
        assert_eq!(config.context.default_ttl(), Duration::from_secs(60));
        assert!(config.context.sweep_interval().is_none());
        assert_eq!(
            config.orchestrator.template_policy,
            TemplatePolicy::RoundRobin
        );
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[learning]
penalty_step = 0.25
"#;
        let file = create_temp_config(content);
        let config = SifuConfig::load(file.path()).unwrap();
        assert_eq!(config.learning.penalty_step, 0.25);
        assert_eq!(config.learning.reinforcement_step, 0.1);
        assert_eq!(config.context.default_ttl_secs, 3600);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SifuConfig::load_or_default(Path::new("/nonexistent/sifu.toml"));
        assert_eq!(config.knowledge.default_limit, 10);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[knowledge\nbackend = ");
        let err = SifuConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, SifuError::Config(_)));
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sifu.toml");

        let mut config = SifuConfig::default();
        config.orchestrator.knowledge_threshold = 0.5;
        config.save(&path).unwrap();

        let reloaded = SifuConfig::load(&path).unwrap();
        assert_eq!(reloaded.orchestrator.knowledge_threshold, 0.5);
        assert_eq!(
            reloaded.orchestrator.fallback_response,
            config.orchestrator.fallback_response
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = SifuConfig::default();
        config.knowledge.relevance_floor = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("knowledge.relevance_floor"));
    }

    #[test]
    fn test_validate_requires_path_for_file_backends() {
        let mut config = SifuConfig::default();
        config.knowledge.backend = StorageBackend::Sqlite;
        assert!(config.validate().is_err());

        config.knowledge.path = Some(PathBuf::from("/tmp/sifu.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = SifuConfig::default();
        config.context.default_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_context_durations() {
        let mut config = SifuConfig::default();
        config.context.default_ttl_secs = MAX_CONTEXT_SECS;
        assert!(config.validate().is_ok());

        config.context.default_ttl_secs = 1_000_000_000_000_000;
        assert!(config.validate().is_err());

        config.context.default_ttl_secs = 60;
        config.context.sweep_interval_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = SifuConfig::default();
        config.general.log_level = "sifu=loud".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "sifu_chat=debug,info".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolved_joins_relative_paths_onto_data_dir() {
        let mut config = SifuConfig::default();
        config.general.data_dir = "/var/lib/sifu".to_string();
        config.knowledge.path = Some(PathBuf::from("knowledge.db"));
        config.intent.intents_path = Some(PathBuf::from("/etc/sifu/intents.json"));

        let resolved = config.resolved();
        assert_eq!(
            resolved.knowledge.path,
            Some(PathBuf::from("/var/lib/sifu/knowledge.db"))
        );
        // Absolute paths are kept as given.
        assert_eq!(
            resolved.intent.intents_path,
            Some(PathBuf::from("/etc/sifu/intents.json"))
        );
    }

    #[test]
    fn test_data_dir_expands_home() {
        let general = GeneralConfig {
            data_dir: "~/.sifu/data".to_string(),
            ..GeneralConfig::default()
        };
        let path = general.data_dir_path();
        assert!(path.ends_with(".sifu/data"));
        assert!(!path.starts_with("~"));
    }
}
