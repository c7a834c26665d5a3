//! Conversation context management.
//!
//! A context is short-lived state for one conversation: extracted entities
//! plus free-form metadata. It expires `ttl` after creation; only
//! [`ContextStore::renew`] moves the expiry. Expired contexts are invisible
//! to every lookup whether or not a sweep has removed them yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use sifu_core::config::ContextConfig;
use sifu_core::error::{Result, SifuError};
use sifu_core::types::Metadata;

// =============================================================================
// Context
// =============================================================================

/// Point-in-time copy of a conversation's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub entities: Metadata,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Context {
    fn new(id: String, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            entities: Metadata::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Shared handle to a live context.
///
/// Every caller that resolves the same id gets a handle to the same state.
/// Mutations refresh `updated_at` but never the expiry. A handle kept past
/// expiry still works, but the store no longer returns that context.
#[derive(Debug, Clone)]
pub struct ContextRef {
    id: Arc<str>,
    inner: Arc<Mutex<Context>>,
}

impl ContextRef {
    fn new(context: Context) -> Self {
        Self {
            id: Arc::from(context.id.as_str()),
            inner: Arc::new(Mutex::new(context)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_entity(&self, name: impl Into<String>, value: impl Into<Value>) {
        let mut context = self.lock();
        context.entities.insert(name.into(), value.into());
        context.updated_at = Utc::now();
    }

    pub fn remove_entity(&self, name: &str) -> Option<Value> {
        let mut context = self.lock();
        let removed = context.entities.remove(name);
        if removed.is_some() {
            context.updated_at = Utc::now();
        }
        removed
    }

    /// Current value of an entity, if set.
    pub fn get_entity(&self, name: &str) -> Option<Value> {
        self.lock().entities.get(name).cloned()
    }

    pub fn add_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut context = self.lock();
        context.metadata.insert(key.into(), value.into());
        context.updated_at = Utc::now();
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.lock().metadata.get(key).cloned()
    }

    /// Apply several changes under one lock acquisition.
    pub fn update<T>(&self, f: impl FnOnce(&mut Metadata, &mut Metadata) -> T) -> T {
        let mut context = self.lock();
        let context = &mut *context;
        let result = f(&mut context.entities, &mut context.metadata);
        context.updated_at = Utc::now();
        result
    }

    /// Copy out the current state.
    pub fn snapshot(&self) -> Context {
        self.lock().clone()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.lock().expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.lock().is_expired()
    }

    /// Whether both handles point at the same context.
    pub fn same_as(&self, other: &ContextRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, Context> {
        // Every mutation is a single insert or assignment, so a poisoned
        // context is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// ContextStore
// =============================================================================

/// Registry of live contexts keyed by conversation id.
#[derive(Debug)]
pub struct ContextStore {
    contexts: Mutex<HashMap<String, ContextRef>>,
    default_ttl: Duration,
}

impl ContextStore {
    /// Create an empty store whose contexts live for `default_ttl`.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.default_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The live context for `id`, creating it (or replacing an expired one)
    /// with the given TTL, or the store default.
    ///
    /// Concurrent callers for the same new id all receive the same context.
    pub fn get_or_create(&self, id: &str, ttl: Option<Duration>) -> Result<ContextRef> {
        let id = validate_id(id)?;
        let ttl = to_chrono(ttl.unwrap_or(self.default_ttl))?;
        let now = Utc::now();
        let expires_at = expiry_after(now, ttl)?;

        let mut contexts = self.lock()?;
        if let Some(existing) = contexts.get(id) {
            if !existing.is_expired() {
                return Ok(existing.clone());
            }
            debug!(context_id = %id, "Replacing expired context");
        }

        let context = ContextRef::new(Context::new(id.to_string(), now, expires_at));
        contexts.insert(id.to_string(), context.clone());
        debug!(context_id = %id, ttl_secs = ttl.num_seconds(), "Context created");
        Ok(context)
    }

    /// The live context for `id`; `None` when missing or expired.
    pub fn get(&self, id: &str) -> Option<ContextRef> {
        let mut contexts = self.lock().ok()?;
        let context = contexts.get(id)?;
        if context.is_expired() {
            contexts.remove(id);
            return None;
        }
        Some(context.clone())
    }

    /// Push the expiry of a live context to `now + ttl`.
    pub fn renew(&self, id: &str, ttl: Option<Duration>) -> Result<Option<ContextRef>> {
        let ttl = to_chrono(ttl.unwrap_or(self.default_ttl))?;
        let expires_at = expiry_after(Utc::now(), ttl)?;
        let Some(context) = self.get(id) else {
            return Ok(None);
        };
        context.lock().expires_at = expires_at;
        debug!(context_id = %id, "Context renewed");
        Ok(Some(context))
    }

    /// Drop a context. Returns whether a live one was removed.
    pub fn remove(&self, id: &str) -> bool {
        let Ok(mut contexts) = self.lock() else {
            return false;
        };
        contexts
            .remove(id)
            .is_some_and(|context| !context.is_expired())
    }

    /// Remove every expired context, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut contexts) = self.lock() else {
            return 0;
        };
        let now = Utc::now();
        let before = contexts.len();
        contexts.retain(|_, context| !context.lock().is_expired_at(now));
        before - contexts.len()
    }

    /// Number of unexpired contexts.
    pub fn active_count(&self) -> usize {
        let Ok(contexts) = self.lock() else {
            return 0;
        };
        let now = Utc::now();
        contexts
            .values()
            .filter(|context| !context.lock().is_expired_at(now))
            .count()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ContextRef>>> {
        self.contexts
            .lock()
            .map_err(|e| SifuError::Storage(format!("context store lock poisoned: {}", e)))
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

fn validate_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(SifuError::Validation(
            "context id must not be empty".to_string(),
        ));
    }
    Ok(id)
}

fn to_chrono(ttl: Duration) -> Result<chrono::Duration> {
    if ttl.is_zero() {
        return Err(SifuError::Validation(
            "context ttl must be positive".to_string(),
        ));
    }
    chrono::Duration::from_std(ttl)
        .map_err(|e| SifuError::Validation(format!("context ttl out of range: {}", e)))
}

fn expiry_after(now: DateTime<Utc>, ttl: chrono::Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(ttl).ok_or_else(|| {
        SifuError::Validation(format!(
            "context ttl of {}s is past the representable date range",
            ttl.num_seconds()
        ))
    })
}

// =============================================================================
// ContextSweeper
// =============================================================================

/// Background task that periodically purges expired contexts.
///
/// Lookups already hide expired contexts; the sweep only reclaims memory.
pub struct ContextSweeper {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ContextSweeper {
    /// Start sweeping `store` every `interval`. Must be called within a Tokio
    /// runtime.
    pub fn spawn(store: Arc<ContextStore>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Context sweeper started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Expired contexts purged");
                        }
                    }
                    _ = signal.notified() => {
                        info!("Context sweeper stopped");
                        return;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Signal the sweeper to stop and wait for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

impl std::fmt::Debug for ContextSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSweeper")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
