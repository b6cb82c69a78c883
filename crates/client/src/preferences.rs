use std::sync::Arc;
use tracing::warn;

use crate::store::{KeyValueStore, StoreError};

const COMBINED_SESSIONS_KEY: &str = "ui:combined-sessions";

/// Persisted UI preferences.
#[derive(Clone)]
pub struct PreferenceStore {
    store: Arc<dyn KeyValueStore>,
    combined_default: bool,
}

impl PreferenceStore {
    /// `combined_default` applies until a preference has been written.
    pub fn new(store: Arc<dyn KeyValueStore>, combined_default: bool) -> Self {
        Self {
            store,
            combined_default,
        }
    }

    pub fn combined_sessions(&self) -> bool {
        match self.store.get(COMBINED_SESSIONS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or(self.combined_default),
            Ok(None) => self.combined_default,
            Err(e) => {
                warn!("Failed to read combined-sessions preference: {}", e);
                self.combined_default
            }
        }
    }

    pub fn set_combined_sessions(&self, enabled: bool) -> Result<(), StoreError> {
        self.store
            .set(COMBINED_SESSIONS_KEY, if enabled { "true" } else { "false" })
    }
}
