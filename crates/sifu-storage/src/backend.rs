//! Persistence backends for the knowledge store.
//!
//! The store keeps every entry in memory and hands a full snapshot to its
//! backend after each mutation. Backends only need to load and replace the
//! complete set of entries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use sifu_core::error::{Result, SifuError};
use sifu_core::types::{KnowledgeEntry, KnowledgeRecord};

/// Durable storage for knowledge entries.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// Load every persisted entry.
    async fn load_all(&self) -> Result<Vec<KnowledgeEntry>>;

    /// Replace the persisted entries with `entries`.
    async fn save_all(&self, entries: &[KnowledgeEntry]) -> Result<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Stores entries as a pretty-printed JSON array of records.
///
/// Files written by hand with only `content`, `metadata`, `tags` and
/// `language` per record load fine; ids and timestamps are generated.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl KnowledgeBackend for JsonFileBackend {
    async fn load_all(&self) -> Result<Vec<KnowledgeEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Knowledge file not found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SifuError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<KnowledgeRecord> = serde_json::from_str(&content).map_err(|e| {
            SifuError::Storage(format!("Invalid knowledge file {}: {}", self.path.display(), e))
        })?;
        Ok(records.into_iter().map(KnowledgeRecord::into_entry).collect())
    }

    async fn save_all(&self, entries: &[KnowledgeEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SifuError::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SifuError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            SifuError::Storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), entries = entries.len(), "Knowledge file saved");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(SifuError::Storage(format!(
                "{} is not a file",
                self.path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Not saved yet: the closest existing ancestor must be a directory.
                let ancestor = self
                    .path
                    .ancestors()
                    .skip(1)
                    .find(|a| !a.as_os_str().is_empty() && a.exists());
                match ancestor {
                    Some(dir) if !dir.is_dir() => Err(SifuError::Storage(format!(
                        "{} is not a directory",
                        dir.display()
                    ))),
                    _ => Ok(()),
                }
            }
            Err(e) => Err(SifuError::Storage(format!(
                "Failed to stat {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "json"
    }
}
