//! Shared kernel for the Sifu reasoning core.
//!
//! Holds the data model, error taxonomy, configuration, text normalization
//! and the pluggable scorer capability used by every other crate.

pub mod config;
pub mod error;
pub mod scorer;
pub mod telemetry;
pub mod text;
pub mod types;

pub use config::SifuConfig;
pub use error::{Result, SifuError};
pub use scorer::{LexicalScorer, SemanticScorer};
pub use types::*;
