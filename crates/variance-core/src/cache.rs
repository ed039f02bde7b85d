//! Rendered-artifact cache with per-set invalidation epochs.
//!
//! Every alignment-mutating operation bumps the set's epoch before touching
//! the store. A render captures the epoch when it starts and its result is
//! only stored if the epoch is unchanged, so an artifact computed from data
//! that was invalidated mid-render is never cached.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::StoreError;
use crate::model::SetId;
use crate::store::CacheStore;

/// Kind of rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Heatmap,
    SideBySide,
    CriticalApparatus,
    Histogram,
    Edition,
}

impl ArtifactKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heatmap => "heatmap",
            Self::SideBySide => "side_by_side",
            Self::CriticalApparatus => "critical_apparatus",
            Self::Histogram => "histogram",
            Self::Edition => "edition",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(set, witness key, kind)`. The witness key names the witness or witness
/// combination the artifact was rendered for, e.g. `base=3;include=1,2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub set: SetId,
    pub witnesses: String,
    pub kind: ArtifactKind,
}

impl CacheKey {
    #[must_use]
    pub fn new(set: SetId, witnesses: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            set,
            witnesses: witnesses.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Typed, epoch-checked view over a [`CacheStore`].
pub struct ArtifactCache<S: CacheStore + ?Sized> {
    store: Arc<S>,
    epochs: Mutex<HashMap<SetId, u64>>,
}

impl<S: CacheStore + ?Sized> ArtifactCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            epochs: Mutex::new(HashMap::new()),
        }
    }

    /// Current invalidation epoch of `set`.
    pub fn epoch(&self, set: SetId) -> Result<u64, StoreError> {
        let epochs = self.epochs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(epochs.get(&set).copied().unwrap_or(0))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, StoreError> {
        match self.store.cache_get(key)? {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.payload)?)),
            None => Ok(None),
        }
    }

    /// Store `value` unless `set` was invalidated after `epoch` was read.
    /// Returns whether the value was stored.
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T, epoch: u64) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(value)?;
        let epochs = self.epochs.lock().map_err(|_| StoreError::Poisoned)?;
        let current = epochs.get(&key.set).copied().unwrap_or(0);
        if current != epoch {
            debug!(set_id = %key.set, kind = %key.kind, "Discarding stale artifact");
            return Ok(false);
        }
        self.store.cache_put(key, &payload)?;
        Ok(true)
    }

    /// Drop every cached artifact of `set` and advance its epoch.
    pub fn invalidate(&self, set: SetId) -> Result<usize, StoreError> {
        let mut epochs = self.epochs.lock().map_err(|_| StoreError::Poisoned)?;
        *epochs.entry(set).or_insert(0) += 1;
        let removed = self.store.cache_invalidate(set)?;
        debug!(set_id = %set, removed, "Invalidated cached artifacts");
        Ok(removed)
    }

    /// Drop entries older than `lifespan`.
    pub fn purge_expired(&self, lifespan: Duration) -> Result<usize, StoreError> {
        self.store.cache_purge_before(Utc::now() - lifespan)
    }
}
