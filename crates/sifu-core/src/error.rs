use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the Sifu core.
///
/// Expiry of a context is never an error: an expired context is reported
/// as absent by the store that owns it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SifuError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Knowledge entry not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SifuError {
    /// Whether the caller may reasonably degrade instead of failing.
    ///
    /// Only storage failures are recoverable; validation and lookup errors
    /// describe the request itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SifuError::Storage(_) | SifuError::Io(_))
    }
}

impl From<toml::de::Error> for SifuError {
    fn from(err: toml::de::Error) -> Self {
        SifuError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SifuError {
    fn from(err: toml::ser::Error) -> Self {
        SifuError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SifuError {
    fn from(err: serde_json::Error) -> Self {
        SifuError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Sifu operations.
pub type Result<T> = std::result::Result<T, SifuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SifuError::Validation("content must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: content must not be empty"
        );

        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = SifuError::NotFound(id);
        assert_eq!(
            err.to_string(),
            "Knowledge entry not found: 550e8400-e29b-41d4-a716-446655440000"
        );

        let err = SifuError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SifuError = io_err.into();
        assert!(matches!(err, SifuError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SifuError = json_err.into();
        assert!(matches!(err, SifuError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: SifuError = toml_err.into();
        assert!(matches!(err, SifuError::Config(_)));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SifuError::Storage("timeout".into()).is_recoverable());
        assert!(!SifuError::Validation("empty".into()).is_recoverable());
        assert!(!SifuError::NotFound(Uuid::nil()).is_recoverable());
        assert!(!SifuError::Config("bad".into()).is_recoverable());
    }
}
