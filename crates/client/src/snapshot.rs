//! TTL-bounded cache of per-root workspace snapshots.
//!
//! A snapshot is absent when it is older than the TTL, carries a different
//! format version, or cannot be decoded. Absent entries found on read are
//! deleted as a side effect.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sessionhub_core::ContextId;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{KeyValueStore, StoreError};
use crate::workspace::WorkspaceState;

/// Bumped whenever [`WorkspaceState`]'s persisted shape changes.
pub const SNAPSHOT_VERSION: u32 = 1;

pub const DEFAULT_TTL_SECS: u64 = 300;

const KEY_PREFIX: &str = "workspace-snapshot:";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub context_id: ContextId,
    pub captured_at: DateTime<Utc>,
    pub version: u32,
    pub state: WorkspaceState,
}

impl WorkspaceSnapshot {
    pub fn capture(context_id: ContextId, state: WorkspaceState) -> Self {
        Self {
            context_id,
            captured_at: Utc::now(),
            version: SNAPSHOT_VERSION,
            state,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

fn key_for(root_id: &str) -> String {
    format!("{KEY_PREFIX}{root_id}")
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL_SECS)
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self { store, ttl }
    }

    pub fn save(&self, root_id: &str, snapshot: &WorkspaceSnapshot) -> Result<(), SnapshotError> {
        let json = serde_json::to_string(snapshot)?;
        self.store.set(&key_for(root_id), &json)?;
        debug!("Saved workspace snapshot for root {}", root_id);
        Ok(())
    }

    pub fn load(&self, root_id: &str) -> Option<WorkspaceSnapshot> {
        self.load_at(root_id, Utc::now())
    }

    /// [`SnapshotStore::load`] against an explicit clock.
    pub fn load_at(&self, root_id: &str, now: DateTime<Utc>) -> Option<WorkspaceSnapshot> {
        let key = key_for(root_id);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Snapshot read for root {} failed: {}", root_id, e);
                return None;
            }
        };
        match self.check(&raw, now) {
            Ok(snapshot) => Some(snapshot),
            Err(reason) => {
                debug!("Discarding snapshot for root {}: {}", root_id, reason);
                self.discard(&key);
                None
            }
        }
    }

    pub fn remove(&self, root_id: &str) -> Result<(), SnapshotError> {
        self.store.remove(&key_for(root_id))?;
        Ok(())
    }

    /// Delete every expired or unreadable snapshot. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, SnapshotError> {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize, SnapshotError> {
        let mut removed = 0;
        for key in self.store.keys()? {
            if !key.starts_with(KEY_PREFIX) {
                continue;
            }
            let Some(raw) = self.store.get(&key)? else {
                continue;
            };
            if self.check(&raw, now).is_err() {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Purged {} stale workspace snapshot(s)", removed);
        }
        Ok(removed)
    }

    fn check(&self, raw: &str, now: DateTime<Utc>) -> Result<WorkspaceSnapshot, String> {
        let snapshot: WorkspaceSnapshot =
            serde_json::from_str(raw).map_err(|e| format!("undecodable: {e}"))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(format!(
                "version {} != {}",
                snapshot.version, SNAPSHOT_VERSION
            ));
        }
        if now - snapshot.captured_at > self.ttl {
            return Err(format!("captured at {}", snapshot.captured_at));
        }
        Ok(snapshot)
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("Failed to delete stale snapshot {}: {}", key, e);
        }
    }
}
