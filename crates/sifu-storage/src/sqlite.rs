//! SQLite persistence for knowledge entries.
//!
//! Every save replaces the contents of `knowledge_entries` inside one
//! transaction. rusqlite is synchronous, so all calls run on the blocking
//! pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use sifu_core::error::{Result, SifuError};
use sifu_core::types::{clamp_confidence, KnowledgeEntry, Metadata};

use crate::backend::KnowledgeBackend;
use crate::db::Database;

/// Knowledge backend over a [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db: Arc<Database>,
}

impl SqliteBackend {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open (or create) a database file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(Database::new(path)?)))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| SifuError::Storage(format!("SQLite task failed: {}", e)))?
    }
}

#[async_trait]
impl KnowledgeBackend for SqliteBackend {
    async fn load_all(&self) -> Result<Vec<KnowledgeEntry>> {
        self.run_blocking(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, content, metadata, tags, language, confidence, created_at, updated_at
                     FROM knowledge_entries ORDER BY created_at ASC",
                )
                .map_err(|e| SifuError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(RawRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        metadata: row.get(2)?,
                        tags: row.get(3)?,
                        language: row.get(4)?,
                        confidence: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                })
                .map_err(|e| SifuError::Storage(e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| SifuError::Storage(e.to_string()))?;
                entries.push(raw.into_entry()?);
            }
            Ok(entries)
        })
        .await
    }

    async fn save_all(&self, entries: &[KnowledgeEntry]) -> Result<()> {
        let entries = entries.to_vec();
        let count = entries.len();
        self.run_blocking(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SifuError::Storage(format!("Failed to begin transaction: {}", e)))?;

            tx.execute("DELETE FROM knowledge_entries", [])
                .map_err(|e| SifuError::Storage(format!("Failed to clear entries: {}", e)))?;

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO knowledge_entries
                            (id, content, metadata, tags, language, confidence, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )
                    .map_err(|e| SifuError::Storage(e.to_string()))?;

                for entry in &entries {
                    stmt.execute(rusqlite::params![
                        entry.id.to_string(),
                        entry.content,
                        serde_json::to_string(&entry.metadata)?,
                        serde_json::to_string(&entry.tags)?,
                        entry.language,
                        f64::from(entry.confidence),
                        entry.created_at.to_rfc3339(),
                        entry.updated_at.to_rfc3339(),
                    ])
                    .map_err(|e| SifuError::Storage(format!("Failed to save entry: {}", e)))?;
                }
            }

            tx.commit()
                .map_err(|e| SifuError::Storage(format!("Failed to commit: {}", e)))?;
            Ok(())
        })
        .await?;

        debug!(entries = count, "Knowledge table saved");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.run_blocking(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| SifuError::Storage(format!("SQLite ping failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

struct RawRow {
    id: String,
    content: String,
    metadata: String,
    tags: String,
    language: String,
    confidence: f64,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn into_entry(self) -> Result<KnowledgeEntry> {
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| SifuError::Storage(format!("Invalid metadata for {}: {}", self.id, e)))?;
        let tags = serde_json::from_str(&self.tags)
            .map_err(|e| SifuError::Storage(format!("Invalid tags for {}: {}", self.id, e)))?;

        Ok(KnowledgeEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| SifuError::Storage(format!("Invalid UUID: {}", e)))?,
            content: self.content,
            metadata,
            tags,
            language: self.language,
            confidence: clamp_confidence(self.confidence as f32),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SifuError::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sifu_core::types::KnowledgeRecord;

    fn entry(content: &str, confidence: f32) -> KnowledgeEntry {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), "test".into());
        KnowledgeRecord {
            id: None,
            content: content.to_string(),
            metadata,
            tags: ["a".to_string(), "b".to_string()].into_iter().collect(),
            language: Some("en".into()),
            confidence: Some(confidence),
            created_at: None,
            updated_at: None,
        }
        .into_entry()
    }

    #[tokio::test]
    async fn test_save_and_load_in_memory() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.load_all().await.unwrap().is_empty());

        let entries = vec![entry("first", 0.5), entry("second", 1.0)];
        backend.save_all(&entries).await.unwrap();

        let mut loaded = backend.load_all().await.unwrap();
        loaded.sort_by(|a, b| a.content.cmp(&b.content));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, entries[0].id);
        assert_eq!(loaded[0].metadata["category"], "test");
        assert!(loaded[0].tags.contains("b"));
        assert_eq!(loaded[0].confidence, 0.5);
        assert_eq!(loaded[0].created_at, entries[0].created_at);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_contents() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .save_all(&[entry("old", 1.0), entry("older", 1.0)])
            .await
            .unwrap();
        backend.save_all(&[entry("new", 1.0)]).await.unwrap();

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "new");
    }

    #[tokio::test]
    async fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.db");
        let saved = entry("persisted", 0.8);

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.save_all(&[saved.clone()]).await.unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, saved.id);
        assert_eq!(loaded[0].content, "persisted");
    }

    #[tokio::test]
    async fn test_ping() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.ping().await.is_ok());
        assert_eq!(backend.name(), "sqlite");
    }
}
