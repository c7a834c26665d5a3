//! The knowledge store.
//!
//! Entries live in a map behind a store-wide `RwLock`; every read and search
//! is served from memory. A mutation is applied under one write-lock
//! acquisition, which also bumps the revision and captures a snapshot. The
//! lock is released before the snapshot is handed to the backend, and a
//! snapshot older than the last persisted revision is never written.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sifu_core::config::{KnowledgeConfig, StorageBackend};
use sifu_core::error::{Result, SifuError};
use sifu_core::scorer::SemanticScorer;
use sifu_core::types::{
    clamp_confidence, validate_metadata, KnowledgeEntry, KnowledgeUpdate, NewKnowledge,
    ScoredEntry, DEFAULT_LANGUAGE,
};

use crate::backend::{JsonFileBackend, KnowledgeBackend};
use crate::ranking::{text_similarity, Ranker};
use crate::sqlite::SqliteBackend;

#[derive(Default)]
struct StoreState {
    entries: HashMap<Uuid, KnowledgeEntry>,
    revision: u64,
}

struct Snapshot {
    revision: u64,
    entries: Vec<KnowledgeEntry>,
}

/// A mutation that took effect in memory, with the outcome of writing it to
/// the backend.
#[derive(Debug)]
pub struct Applied<T> {
    pub value: T,
    /// Set when the backend rejected the snapshot. The in-memory change stays.
    pub persist_error: Option<SifuError>,
}

impl<T> Applied<T> {
    fn new(value: T, persisted: Result<()>) -> Self {
        Self {
            value,
            persist_error: persisted.err(),
        }
    }

    /// The value, or the persistence error if there was one.
    pub fn into_result(self) -> Result<T> {
        match self.persist_error {
            Some(e) => Err(e),
            None => Ok(self.value),
        }
    }
}

/// In-memory knowledge base with optional write-through persistence.
pub struct KnowledgeStore {
    state: RwLock<StoreState>,
    backend: Option<Arc<dyn KnowledgeBackend>>,
    /// Revision of the last snapshot the backend accepted.
    persisted_revision: tokio::sync::Mutex<u64>,
    last_save_ok: AtomicBool,
    ranker: Ranker,
    config: KnowledgeConfig,
}

impl KnowledgeStore {
    /// A store without persistence.
    pub fn in_memory(config: KnowledgeConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            backend: None,
            persisted_revision: tokio::sync::Mutex::new(0),
            last_save_ok: AtomicBool::new(true),
            ranker: Ranker::new(config.semantic_weight),
            config,
        }
    }

    /// Load every entry from `backend` and persist later mutations to it.
    pub async fn open(backend: Arc<dyn KnowledgeBackend>, config: KnowledgeConfig) -> Result<Self> {
        let loaded = backend.load_all().await?;
        let total = loaded.len();

        let mut entries = HashMap::with_capacity(total);
        for entry in loaded {
            if entry.content.trim().is_empty() {
                warn!(id = %entry.id, "Skipping knowledge entry with empty content");
                continue;
            }
            if let Err(e) = validate_metadata(&entry.metadata) {
                warn!(id = %entry.id, error = %e, "Skipping knowledge entry with invalid metadata");
                continue;
            }
            if entries.insert(entry.id, entry).is_some() {
                warn!("Duplicate knowledge id in backend, keeping the last one");
            }
        }

        info!(
            backend = backend.name(),
            entries = entries.len(),
            skipped = total - entries.len(),
            "Knowledge store opened"
        );

        let mut store = Self::in_memory(config);
        store.state = RwLock::new(StoreState {
            entries,
            revision: 0,
        });
        store.backend = Some(backend);
        Ok(store)
    }

    /// Build the store described by `config`, including its backend.
    pub async fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        let path = || {
            config.path.clone().ok_or_else(|| {
                SifuError::Config("knowledge.path is required for file backends".to_string())
            })
        };

        match config.backend {
            StorageBackend::Memory => Ok(Self::in_memory(config.clone())),
            StorageBackend::Json => {
                let backend = JsonFileBackend::new(path()?);
                Self::open(Arc::new(backend), config.clone()).await
            }
            StorageBackend::Sqlite => {
                let backend = SqliteBackend::open(&path()?)?;
                Self::open(Arc::new(backend), config.clone()).await
            }
        }
    }

    /// Blend a semantic scorer into search ranking.
    pub fn with_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        info!(scorer = scorer.name(), "Semantic scorer installed for knowledge search");
        self.ranker = self.ranker.with_scorer(scorer);
        self
    }

    /// Settings the store was built with.
    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Name of the persistence backend, or `"memory"` when there is none.
    pub fn backend_name(&self) -> &str {
        self.backend.as_deref().map(|b| b.name()).unwrap_or("memory")
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a new entry. Content must not be blank and metadata must be scalar.
    pub async fn add(&self, new: NewKnowledge) -> Result<KnowledgeEntry> {
        self.add_applied(new).await?.into_result()
    }

    /// Like [`add`](Self::add), but a failed save still hands back the
    /// entry that was added in memory.
    pub async fn add_applied(&self, new: NewKnowledge) -> Result<Applied<KnowledgeEntry>> {
        let content = validate_content(&new.content)?;
        validate_metadata(&new.metadata)?;

        let now = Utc::now();
        let entry = KnowledgeEntry {
            id: Uuid::new_v4(),
            content,
            metadata: new.metadata,
            tags: new.tags,
            language: new
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            confidence: clamp_confidence(new.confidence.unwrap_or(1.0)),
            created_at: now,
            updated_at: now,
        };

        let (entry, snapshot) = self.mutate(|entries| {
            entries.insert(entry.id, entry.clone());
            Ok(entry)
        })?;
        debug!(id = %entry.id, "Knowledge entry added");

        let persisted = self.persist(snapshot, false).await;
        Ok(Applied::new(entry, persisted))
    }

    /// Apply a partial update; fields left as `None` keep their values.
    pub async fn update(&self, id: Uuid, update: KnowledgeUpdate) -> Result<KnowledgeEntry> {
        let content = update.content.as_deref().map(validate_content).transpose()?;
        if let Some(metadata) = &update.metadata {
            validate_metadata(metadata)?;
        }

        let (entry, snapshot) = self.mutate(|entries| {
            let entry = entries.get_mut(&id).ok_or(SifuError::NotFound(id))?;
            if let Some(content) = content {
                entry.content = content;
            }
            if let Some(metadata) = update.metadata {
                entry.metadata = metadata;
            }
            if let Some(tags) = update.tags {
                entry.tags = tags;
            }
            if let Some(language) = update.language.filter(|l| !l.trim().is_empty()) {
                entry.language = language;
            }
            if let Some(confidence) = update.confidence {
                entry.confidence = clamp_confidence(confidence);
            }
            entry.updated_at = Utc::now();
            Ok(entry.clone())
        })?;
        debug!(id = %id, "Knowledge entry updated");

        self.persist(snapshot, false).await?;
        Ok(entry)
    }

    /// Add `delta` to an entry's confidence as one atomic step, clamping the
    /// result into `[0, 1]`.
    pub async fn adjust_confidence(&self, id: Uuid, delta: f32) -> Result<KnowledgeEntry> {
        self.adjust_confidence_applied(id, delta)
            .await?
            .into_result()
    }

    /// [`adjust_confidence`](Self::adjust_confidence) that reports a failed
    /// save alongside the adjusted entry.
    pub async fn adjust_confidence_applied(&self, id: Uuid, delta: f32) -> Result<Applied<KnowledgeEntry>> {
        let (entry, snapshot) = self.mutate(|entries| {
            let entry = entries.get_mut(&id).ok_or(SifuError::NotFound(id))?;
            entry.confidence = clamp_confidence(entry.confidence + delta);
            entry.updated_at = Utc::now();
            Ok(entry.clone())
        })?;
        debug!(id = %id, delta, confidence = entry.confidence, "Knowledge confidence adjusted");

        let persisted = self.persist(snapshot, false).await;
        Ok(Applied::new(entry, persisted))
    }

    /// Remove an entry, returning it.
    pub async fn delete(&self, id: Uuid) -> Result<KnowledgeEntry> {
        let (entry, snapshot) =
            self.mutate(|entries| entries.remove(&id).ok_or(SifuError::NotFound(id)))?;
        debug!(id = %id, "Knowledge entry deleted");

        self.persist(snapshot, false).await?;
        Ok(entry)
    }

    /// Write the current state to the backend even if nothing changed.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = {
            let state = self.read_state()?;
            self.snapshot(&state)
        };
        self.persist(snapshot, true).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up an entry by id. A missing entry is `Ok(None)`, not an error.
    pub fn get(&self, id: Uuid) -> Result<Option<KnowledgeEntry>> {
        Ok(self.read_state()?.entries.get(&id).cloned())
    }

    /// Best-first entries for `query`. `limit` defaults to the configured one.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<KnowledgeEntry>> {
        Ok(self
            .search_scored(query, limit)?
            .into_iter()
            .map(|hit| hit.entry)
            .collect())
    }

    /// Like [`search`](Self::search) but keeps each hit's relevance.
    pub fn search_scored(&self, query: &str, limit: Option<usize>) -> Result<Vec<ScoredEntry>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(self.config.default_limit);

        let state = self.read_state()?;
        let hits = self.ranker.rank(
            query,
            state.entries.values(),
            self.config.relevance_floor,
            limit,
        );
        debug!(query, hits = hits.len(), "Knowledge search");
        Ok(hits)
    }

    /// The entry most similar to `text`, if any reaches `min_similarity`.
    ///
    /// Normalized equality always counts as a match.
    pub fn find_similar(&self, text: &str, min_similarity: f32) -> Result<Option<KnowledgeEntry>> {
        let state = self.read_state()?;
        let best = state
            .entries
            .values()
            .map(|entry| (text_similarity(text, &entry.content), entry))
            .filter(|(similarity, _)| *similarity > 0.0 && *similarity >= min_similarity)
            .max_by(|(sa, a), (sb, b)| {
                sa.partial_cmp(sb)
                    .unwrap_or(CmpOrdering::Equal)
                    .then_with(|| a.updated_at.cmp(&b.updated_at))
                    .then_with(|| b.id.cmp(&a.id))
            });
        Ok(best.map(|(_, entry)| entry.clone()))
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Result<Vec<KnowledgeEntry>> {
        let state = self.read_state()?;
        Ok(sorted_entries(&state))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the backend answers and the last save succeeded.
    pub async fn health(&self) -> bool {
        if self.state.is_poisoned() {
            return false;
        }
        let Some(backend) = &self.backend else {
            return true;
        };
        if let Err(e) = backend.ping().await {
            warn!(backend = backend.name(), error = %e, "Knowledge backend unreachable");
            return false;
        }
        self.last_save_ok.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| SifuError::Storage(format!("Knowledge store lock poisoned: {}", e)))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| SifuError::Storage(format!("Knowledge store lock poisoned: {}", e)))
    }

    /// Apply `f` under the write lock. On success the revision is bumped and a
    /// snapshot taken for the backend; on error nothing changes.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Uuid, KnowledgeEntry>) -> Result<T>,
    ) -> Result<(T, Option<Snapshot>)> {
        let mut state = self.write_state()?;
        let value = f(&mut state.entries)?;
        state.revision += 1;
        let snapshot = self.snapshot(&state);
        Ok((value, snapshot))
    }

    fn snapshot(&self, state: &StoreState) -> Option<Snapshot> {
        self.backend.as_ref().map(|_| Snapshot {
            revision: state.revision,
            entries: sorted_entries(state),
        })
    }

    async fn persist(&self, snapshot: Option<Snapshot>, force: bool) -> Result<()> {
        let (Some(backend), Some(snapshot)) = (&self.backend, snapshot) else {
            return Ok(());
        };

        let mut persisted = self.persisted_revision.lock().await;
        let stale = if force {
            *persisted > snapshot.revision
        } else {
            *persisted >= snapshot.revision
        };
        if stale {
            debug!(
                revision = snapshot.revision,
                persisted = *persisted,
                "Skipping stale knowledge snapshot"
            );
            return Ok(());
        }

        match backend.save_all(&snapshot.entries).await {
            Ok(()) => {
                *persisted = snapshot.revision;
                self.last_save_ok.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.last_save_ok.store(false, Ordering::SeqCst);
                warn!(
                    backend = backend.name(),
                    revision = snapshot.revision,
                    error = %e,
                    "Failed to persist knowledge snapshot"
                );
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("backend", &self.backend_name())
            .field("entries", &self.len())
            .field("ranker", &self.ranker)
            .finish()
    }
}

fn validate_content(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SifuError::Validation(
            "knowledge content must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn sorted_entries(state: &StoreState) -> Vec<KnowledgeEntry> {
    let mut entries: Vec<KnowledgeEntry> = state.entries.values().cloned().collect();
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    entries
}
