use sessionhub_core::{BackendApi, RemoteConnector, ServiceError};
use sessionhub_runtime_config::{CredentialOverrides, RuntimeConfig, expand_path};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::combined::CombinedSessions;
use crate::orchestrator::{ContextSwitcher, CredentialSource, SwitchError, SwitchOutcome};
use crate::preferences::PreferenceStore;
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::state::ClientStore;
use crate::store::{FileStore, KeyValueStore, MemoryStore, StoreError};

/// Composition root of the client side: one shared state, the switcher and
/// the combined-sessions slice, all talking to the same backend.
pub struct SessionHubClient {
    backend: Arc<dyn BackendApi>,
    store: ClientStore,
    snapshots: SnapshotStore,
    combined: Arc<CombinedSessions>,
    switcher: ContextSwitcher,
}

impl SessionHubClient {
    pub fn new(
        config: &RuntimeConfig,
        backend: Arc<dyn BackendApi>,
        remote: Arc<dyn RemoteConnector>,
        credentials: Arc<dyn CredentialSource>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let store = ClientStore::default();
        let snapshots = SnapshotStore::with_ttl(kv.clone(), config.snapshots.ttl_secs);
        let prefs = PreferenceStore::new(kv, config.ui.combined_sessions);
        let combined = Arc::new(CombinedSessions::new(
            backend.clone(),
            store.clone(),
            prefs,
            config.pagination.page_size,
        ));
        let switcher = ContextSwitcher::new(
            backend.clone(),
            remote,
            credentials,
            snapshots.clone(),
            store.clone(),
            combined.clone(),
        );
        Self {
            backend,
            store,
            snapshots,
            combined,
            switcher,
        }
    }

    /// Build with the persistence `[snapshots]` asks for: a directory-backed
    /// store when `dir` is set, in-memory otherwise.
    pub fn from_config(
        config: &RuntimeConfig,
        backend: Arc<dyn BackendApi>,
        remote: Arc<dyn RemoteConnector>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, StoreError> {
        let kv: Arc<dyn KeyValueStore> = match config.snapshots.dir.as_deref() {
            Some(dir) => {
                let store = FileStore::open(expand_path(dir))?;
                debug!("Persisting workspace snapshots under {}", store.dir().display());
                Arc::new(store)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, backend, remote, credentials, kv))
    }

    pub fn store(&self) -> &ClientStore {
        &self.store
    }

    pub fn combined(&self) -> &CombinedSessions {
        &self.combined
    }

    pub fn switcher(&self) -> &ContextSwitcher {
        &self.switcher
    }

    /// Sweep stale snapshots, load contexts and listings, and restore
    /// combined mode when it was left on.
    pub async fn bootstrap(&self) -> Result<(), ServiceError> {
        match self.snapshots.purge_expired() {
            Ok(0) => {}
            Ok(n) => info!("Purged {} expired workspace snapshot(s)", n),
            Err(e) => warn!("Snapshot purge failed: {}", e),
        }

        let contexts = self.backend.list_contexts().await?;
        let active = self.backend.get_active_context().await?;
        let projects = self.backend.list_projects().await?;
        let unread = self.backend.notification_count().await.unwrap_or_else(|e| {
            warn!("Failed to read notification count: {}", e);
            0
        });
        debug!("Bootstrapped with {} context(s), active {}", contexts.len(), active);
        self.store.update(|s| {
            s.contexts = contexts;
            s.active_context_id = active;
            s.workspace.reconcile(projects, None);
            s.workspace.notifications.unread = unread;
        });

        if let Err(e) = self.combined.resume_from_preference().await {
            warn!("Could not restore combined sessions: {}", e);
        }
        Ok(())
    }

    pub async fn switch_to(
        &self,
        context_id: &str,
        overrides: Option<&CredentialOverrides>,
    ) -> Result<SwitchOutcome, SwitchError> {
        self.switcher.switch_to(context_id, overrides).await
    }

    /// Select a project in the single-context view and load its sessions.
    pub async fn select_project(&self, project_id: &str) -> Result<(), ServiceError> {
        let context = self.store.update(|s| {
            s.workspace.selected_project_id = Some(project_id.to_string());
            s.workspace.selected_session_id = None;
            s.active_context_id.clone()
        });
        let sessions = self.backend.list_sessions(project_id).await?;
        self.store.update(|s| {
            if s.active_context_id == context
                && s.workspace.selected_project_id.as_deref() == Some(project_id)
            {
                s.workspace.sessions = sessions;
            }
        });
        Ok(())
    }

    /// React to a backend change notification: refresh the combined list in
    /// place, or the selected project's sessions.
    pub async fn on_sessions_changed(&self) {
        if self.combined.is_enabled() {
            if let Err(e) = self.combined.refresh_in_place().await {
                warn!("Combined refresh after change failed: {}", e);
            }
        } else if let Some(project) = self.store.read(|s| s.workspace.selected_project_id.clone())
        {
            if let Err(e) = self.select_project(&project).await {
                warn!("Session reload after change failed: {}", e);
            }
        }
        match self.backend.notification_count().await {
            Ok(count) => self.store.update(|s| s.workspace.notifications.unread = count),
            Err(e) => warn!("Failed to read notification count: {}", e),
        }
    }

    /// The user has seen the active context's new sessions.
    pub async fn mark_notifications_read(&self) -> Result<(), ServiceError> {
        let context = self.store.read(|s| s.active_context_id.clone());
        self.backend.mark_notifications_read().await?;
        self.store.update(|s| {
            if s.active_context_id == context {
                s.workspace.notifications.unread = 0;
            }
        });
        Ok(())
    }

    /// A root was removed from configuration.
    pub fn forget_root(&self, root_id: &str) -> Result<(), SnapshotError> {
        self.switcher.forget_root(root_id)
    }
}
