//! Context switching.
//!
//! One switch runs at a time; a request made while another is in flight is
//! dropped. `switch_context` on the backend is the commit point: failures
//! before it roll back completely, failures after it either land on the
//! local context (remote target) or restore the previous workspace (local
//! target). Every write after an await re-checks `switch_generation` so a
//! superseded switch never overwrites newer state.

use sessionhub_core::{
    BackendApi, ConnectionState, ConnectionStatus, ContextId, ProjectSummary,
    RemoteConnectConfig, RemoteConnector, ServiceError, SessionSummary, ValidationError,
};
use sessionhub_runtime_config::{ConfigError, CredentialOverrides, RuntimeConfig};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::combined::CombinedSessions;
use crate::snapshot::{SnapshotError, SnapshotStore, WorkspaceSnapshot};
use crate::state::{ClientState, ClientStore};
use crate::workspace::WorkspaceState;

/// Resolves a remote root to connection credentials.
pub trait CredentialSource: Send + Sync {
    fn resolve(
        &self,
        root_id: &str,
        overrides: Option<&CredentialOverrides>,
    ) -> Result<RemoteConnectConfig, ConfigError>;
}

impl CredentialSource for RuntimeConfig {
    fn resolve(
        &self,
        root_id: &str,
        overrides: Option<&CredentialOverrides>,
    ) -> Result<RemoteConnectConfig, ConfigError> {
        self.resolve_credentials(root_id, overrides)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched,
    AlreadyActive,
    /// Another switch was in flight.
    Dropped,
    /// The remote target failed after the commit point; the local context is
    /// active and `error` is shown to the user.
    CompletedToLocal { error: String },
    /// The target root was forgotten while the switch was in flight.
    Superseded,
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not connect to {root_id}: {message}")]
    Connect { root_id: String, message: String },
    #[error("context switch failed: {0}")]
    Commit(ServiceError),
}

/// What a switch captured when it started.
struct SwitchPlan {
    generation: u64,
    source: ContextId,
    source_root: String,
    source_workspace: WorkspaceState,
    prior_connection: ConnectionStatus,
    target: ContextId,
    target_root: String,
}

impl SwitchPlan {
    fn source_is_remote(&self) -> bool {
        self.source.remote_root_id().is_some()
    }

    fn target_is_remote(&self) -> bool {
        self.target.remote_root_id().is_some()
    }
}

enum Begin {
    Dropped,
    AlreadyActive,
    Started(SwitchPlan),
}

pub struct ContextSwitcher {
    backend: Arc<dyn BackendApi>,
    remote: Arc<dyn RemoteConnector>,
    credentials: Arc<dyn CredentialSource>,
    snapshots: SnapshotStore,
    store: ClientStore,
    combined: Arc<CombinedSessions>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ContextSwitcher {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        remote: Arc<dyn RemoteConnector>,
        credentials: Arc<dyn CredentialSource>,
        snapshots: SnapshotStore,
        store: ClientStore,
        combined: Arc<CombinedSessions>,
    ) -> Self {
        Self {
            backend,
            remote,
            credentials,
            snapshots,
            store,
            combined,
            background: Mutex::new(Vec::new()),
        }
    }

    pub async fn switch_to(
        &self,
        target: &str,
        overrides: Option<&CredentialOverrides>,
    ) -> Result<SwitchOutcome, SwitchError> {
        let target = ContextId::parse(target)?;
        let plan = match self.begin(target) {
            Begin::Dropped => {
                debug!("Switch already in flight, dropping request");
                return Ok(SwitchOutcome::Dropped);
            }
            Begin::AlreadyActive => return Ok(SwitchOutcome::AlreadyActive),
            Begin::Started(plan) => plan,
        };
        info!("Switching context {} -> {}", plan.source, plan.target);

        let snapshot = WorkspaceSnapshot::capture(plan.source.clone(), plan.source_workspace.clone());
        if let Err(e) = self.snapshots.save(&plan.source_root, &snapshot) {
            warn!("Failed to save snapshot for root {}: {}", plan.source_root, e);
        }

        let mut connected = false;
        if plan.target_is_remote() {
            match self.connect(&plan, overrides).await {
                Ok(true) => {}
                Ok(false) => return Ok(self.abandon(&plan, connected).await),
                Err(message) => return self.fail_connect(&plan, message).await,
            }
            connected = true;
            let status = self.remote.status().await;
            if self.commit(&plan, |s| s.connection = status).is_none() {
                return Ok(self.abandon(&plan, connected).await);
            }
        } else if plan.source_is_remote() {
            let status = self.remote.disconnect().await;
            if self.commit(&plan, |s| s.connection = status).is_none() {
                return Ok(self.abandon(&plan, connected).await);
            }
        }

        if let Err(e) = self.backend.switch_context(plan.target.as_str()).await {
            return self.fail_after_commit(&plan, e).await;
        }

        let workspace = self.cached_workspace(&plan.target_root);
        let selected = workspace.selected_project_id.clone();
        let committed = self.commit(&plan, |s| {
            s.active_context_id = plan.target.clone();
            s.workspace = workspace;
            s.multi_select.clear();
            s.connection_error = None;
        });
        if committed.is_none() {
            return Ok(self.abandon(&plan, connected).await);
        }
        self.spawn_ancillary_refresh(plan.generation);

        match load_fresh(self.backend.as_ref(), selected).await {
            Ok((projects, sessions)) => {
                let report = self.commit(&plan, |s| s.workspace.reconcile(projects, sessions));
                match report {
                    Some(report) if report.kept_stale => {
                        info!("Fresh listing for {} was empty, keeping snapshot data", plan.target);
                    }
                    Some(_) => {}
                    None => return Ok(self.abandon(&plan, connected).await),
                }
            }
            Err(e) => return self.fail_after_commit(&plan, e).await,
        }

        self.release();
        info!("Switched to context {}", plan.target);
        Ok(SwitchOutcome::Switched)
    }

    fn begin(&self, target: ContextId) -> Begin {
        self.store.update(|s| {
            if s.switching {
                return Begin::Dropped;
            }
            if s.active_context_id == target {
                return Begin::AlreadyActive;
            }
            s.switching = true;
            s.switch_generation += 1;
            let target_root = s.root_id_of(&target);
            s.switch_target_root = Some(target_root.clone());
            Begin::Started(SwitchPlan {
                generation: s.switch_generation,
                source: s.active_context_id.clone(),
                source_root: s.root_id_of(&s.active_context_id),
                source_workspace: s.workspace.clone(),
                prior_connection: s.connection.clone(),
                target,
                target_root,
            })
        })
    }

    /// Apply `f` unless the switch has been superseded.
    fn commit<R>(&self, plan: &SwitchPlan, f: impl FnOnce(&mut ClientState) -> R) -> Option<R> {
        self.store
            .update(|s| (s.switch_generation == plan.generation).then(|| f(s)))
    }

    fn release(&self) {
        self.store.update(|s| {
            s.switching = false;
            s.switch_target_root = None;
        });
    }

    fn cached_workspace(&self, root_id: &str) -> WorkspaceState {
        match self.snapshots.load(root_id) {
            Some(snapshot) => {
                debug!("Applying cached workspace for root {}", root_id);
                snapshot.state
            }
            None => WorkspaceState::default(),
        }
    }

    /// `Ok(false)` when the switch was superseded before dialing.
    async fn connect(
        &self,
        plan: &SwitchPlan,
        overrides: Option<&CredentialOverrides>,
    ) -> Result<bool, String> {
        let config = self
            .credentials
            .resolve(&plan.target_root, overrides)
            .map_err(|e| e.to_string())?;
        let dialing = self.commit(plan, |s| {
            s.connection = ConnectionStatus {
                state: ConnectionState::Connecting,
                host: Some(config.host.clone()),
                error: None,
            };
        });
        if dialing.is_none() {
            return Ok(false);
        }
        self.remote
            .connect(&config)
            .await
            .map(|()| true)
            .map_err(|e| e.message().to_string())
    }

    /// Pre-commit failure: nothing on the backend has switched.
    async fn fail_connect(
        &self,
        plan: &SwitchPlan,
        message: String,
    ) -> Result<SwitchOutcome, SwitchError> {
        warn!("Connecting to {} failed: {}", plan.target_root, message);
        // A remote source survives a failed hand-off, only drop a partial connection.
        if !plan.source_is_remote() {
            self.remote.disconnect().await;
        }
        let restored = self.commit(plan, |s| {
            s.connection = plan.prior_connection.clone();
            s.connection_error = Some(message.clone());
        });
        self.release();
        if restored.is_none() {
            return Ok(SwitchOutcome::Superseded);
        }
        Err(SwitchError::Connect {
            root_id: plan.target_root.clone(),
            message,
        })
    }

    async fn fail_after_commit(
        &self,
        plan: &SwitchPlan,
        error: ServiceError,
    ) -> Result<SwitchOutcome, SwitchError> {
        if plan.target_is_remote() {
            return Ok(self.fall_back_to_local(plan, error).await);
        }
        warn!("Switch to {} failed: {}", plan.target, error);
        let restored = self.commit(plan, |s| {
            s.workspace = plan.source_workspace.clone();
            s.connection_error = Some(error.message().to_string());
        });
        self.release();
        if restored.is_none() {
            return Ok(SwitchOutcome::Superseded);
        }
        Err(SwitchError::Commit(error))
    }

    async fn fall_back_to_local(&self, plan: &SwitchPlan, error: ServiceError) -> SwitchOutcome {
        let message = error.message().to_string();
        warn!(
            "Remote context {} failed after switching, falling back to local: {}",
            plan.target, message
        );
        let status = self.remote.disconnect().await;
        let local = self.store.read(|s| {
            s.contexts
                .iter()
                .find(|c| !c.is_remote())
                .map(|c| c.id.clone())
                .unwrap_or_else(ContextId::local)
        });
        if let Err(e) = self.backend.switch_context(local.as_str()).await {
            warn!("Switching back to {} failed: {}", local, e);
        }

        let local_root = self.store.read(|s| s.root_id_of(&local));
        let workspace = self.cached_workspace(&local_root);
        let applied = self.commit(plan, |s| {
            s.active_context_id = local.clone();
            s.workspace = workspace;
            s.connection = status;
            s.connection_error = Some(message.clone());
        });
        self.release();
        if applied.is_none() {
            return SwitchOutcome::Superseded;
        }
        self.spawn_ancillary_refresh(plan.generation);
        self.spawn_reconcile(plan.generation, local);
        SwitchOutcome::CompletedToLocal { error: message }
    }

    /// The switch lost its target root mid-flight. Leave a consistent state
    /// matching whatever the backend now considers active.
    async fn abandon(&self, plan: &SwitchPlan, connected: bool) -> SwitchOutcome {
        info!("Switch to {} superseded", plan.target);
        if connected {
            let status = self.remote.disconnect().await;
            self.store.update(|s| s.connection = status);
        }
        match self.backend.get_active_context().await {
            Ok(active) => {
                let shown = self.store.read(|s| s.active_context_id.clone());
                if active != shown {
                    let root = self.store.read(|s| s.root_id_of(&active));
                    let workspace = self.cached_workspace(&root);
                    self.store.update(|s| {
                        s.active_context_id = active;
                        s.workspace = workspace;
                    });
                }
            }
            Err(e) => warn!("Failed to read active context: {}", e),
        }
        self.release();
        SwitchOutcome::Superseded
    }

    /// Context list, unread count and, in combined mode, the combined list.
    fn spawn_ancillary_refresh(&self, generation: u64) {
        let backend = self.backend.clone();
        let store = self.store.clone();
        let combined = self.combined.clone();
        let handle = tokio::spawn(async move {
            let contexts = backend.list_contexts().await;
            let unread = backend.notification_count().await;
            store.update(|s| {
                if s.switch_generation != generation {
                    return;
                }
                match contexts {
                    Ok(contexts) => s.contexts = contexts,
                    Err(e) => warn!("Failed to refresh context list: {}", e),
                }
                match unread {
                    Ok(count) => s.workspace.notifications.unread = count,
                    Err(e) => warn!("Failed to refresh notification count: {}", e),
                }
            });
            if combined.is_enabled() {
                if let Err(e) = combined.refresh_in_place().await {
                    warn!("Failed to refresh combined sessions: {}", e);
                }
            }
        });
        self.track(handle);
    }

    fn spawn_reconcile(&self, generation: u64, context: ContextId) {
        let backend = self.backend.clone();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let selected = store.read(|s| s.workspace.selected_project_id.clone());
            match load_fresh(backend.as_ref(), selected).await {
                Ok((projects, sessions)) => store.update(|s| {
                    if s.switch_generation == generation && s.active_context_id == context {
                        s.workspace.reconcile(projects, sessions);
                    }
                }),
                Err(e) => warn!("Failed to load listings for {}: {}", context, e),
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.background.lock().expect("background task lock poisoned");
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Wait for every background refresh spawned so far.
    pub async fn settle(&self) {
        let handles = std::mem::take(
            &mut *self.background.lock().expect("background task lock poisoned"),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background refresh task failed: {}", e);
            }
        }
    }

    /// Drop the cached workspace of a removed root. A switch still heading
    /// for that root is superseded.
    pub fn forget_root(&self, root_id: &str) -> Result<(), SnapshotError> {
        self.snapshots.remove(root_id)?;
        self.store.update(|s| {
            if s.switching && s.switch_target_root.as_deref() == Some(root_id) {
                s.switch_generation += 1;
                info!("Superseding in-flight switch to removed root {}", root_id);
            }
        });
        Ok(())
    }
}

async fn load_fresh(
    backend: &dyn BackendApi,
    selected_project: Option<String>,
) -> Result<(Vec<ProjectSummary>, Option<Vec<SessionSummary>>), ServiceError> {
    let projects = backend.list_projects().await?;
    let sessions = match selected_project {
        Some(project) if projects.iter().any(|p| p.id == project) => {
            Some(backend.list_sessions(&project).await?)
        }
        _ => None,
    };
    Ok((projects, sessions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::PreferenceStore;
    use crate::store::{KeyValueStore, MemoryStore};
    use sessionhub_core::testing::{FakeBackend, context_info, project, session};

    struct Creds;

    impl CredentialSource for Creds {
        fn resolve(
            &self,
            root_id: &str,
            _overrides: Option<&CredentialOverrides>,
        ) -> Result<RemoteConnectConfig, ConfigError> {
            if root_id == "ghost" {
                return Err(ConfigError::UnknownRoot(root_id.to_string()));
            }
            Ok(RemoteConnectConfig {
                root_id: root_id.to_string(),
                host: format!("{root_id}.lan"),
                port: 22,
                user: "dev".to_string(),
                identity_file: None,
                password: None,
                remote_path: "~/.claude/projects".to_string(),
            })
        }
    }

    struct Harness {
        fake: Arc<FakeBackend>,
        store: ClientStore,
        snapshots: SnapshotStore,
        switcher: ContextSwitcher,
    }

    /// Resolves like `Creds` but removes the target root while doing so.
    struct RemovedWhileResolving(ClientStore);

    impl CredentialSource for RemovedWhileResolving {
        fn resolve(
            &self,
            root_id: &str,
            overrides: Option<&CredentialOverrides>,
        ) -> Result<RemoteConnectConfig, ConfigError> {
            self.0.update(|s| s.switch_generation += 1);
            Creds.resolve(root_id, overrides)
        }
    }

    fn harness() -> Harness {
        harness_with(|_| Arc::new(Creds))
    }

    fn harness_with(
        credentials: impl FnOnce(&ClientStore) -> Arc<dyn CredentialSource>,
    ) -> Harness {
        let contexts = vec![context_info("local", "laptop")];
        let fake = Arc::new(FakeBackend::with_contexts(contexts.clone()));
        let store = ClientStore::new(ClientState {
            contexts,
            ..ClientState::default()
        });
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let snapshots = SnapshotStore::new(kv.clone());
        let combined = Arc::new(CombinedSessions::new(
            fake.clone(),
            store.clone(),
            PreferenceStore::new(kv, false),
            50,
        ));
        let switcher = ContextSwitcher::new(
            fake.clone(),
            fake.clone(),
            credentials(&store),
            snapshots.clone(),
            store.clone(),
            combined,
        );
        Harness {
            fake,
            store,
            snapshots,
            switcher,
        }
    }

    #[tokio::test]
    async fn switching_to_the_active_context_does_nothing() {
        let h = harness();
        let outcome = h.switcher.switch_to("local", None).await.unwrap();
        assert_eq!(outcome, SwitchOutcome::AlreadyActive);
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_target_is_rejected_before_any_state_change() {
        let h = harness();
        let before = h.store.snapshot();
        assert!(matches!(
            h.switcher.switch_to("bad id", None).await,
            Err(SwitchError::Validation(_))
        ));
        assert_eq!(h.store.snapshot(), before);
    }

    #[tokio::test]
    async fn remote_switch_snapshots_source_and_loads_fresh_data() {
        let h = harness();
        h.fake.set_projects("remote:gpu", vec![project("train")]);
        h.store.update(|s| s.workspace.projects = vec![project("app")]);

        let outcome = h.switcher.switch_to("remote:gpu", None).await.unwrap();
        h.switcher.settle().await;

        assert_eq!(outcome, SwitchOutcome::Switched);
        let state = h.store.snapshot();
        assert_eq!(state.active_context_id, ContextId::remote("gpu"));
        assert!(!state.switching);
        assert_eq!(state.connection.state, ConnectionState::Connected);
        assert_eq!(state.workspace.projects, vec![project("train")]);
        assert_eq!(state.contexts.len(), 2);
        assert_eq!(
            h.snapshots.load("laptop").unwrap().state.projects,
            vec![project("app")]
        );
    }

    #[tokio::test]
    async fn unresolvable_credentials_fail_before_connecting() {
        let h = harness();
        let err = h.switcher.switch_to("remote:ghost", None).await.unwrap_err();
        assert!(matches!(err, SwitchError::Connect { ref root_id, .. } if root_id == "ghost"));
        assert!(!h.fake.called("connect"));
        assert!(!h.fake.called("switch_context"));
        assert!(!h.store.read(|s| s.switching));
    }

    #[tokio::test]
    async fn remote_to_remote_hands_off_without_disconnecting() {
        let h = harness();
        h.fake.set_projects("remote:lab", vec![project("eval")]);
        h.switcher.switch_to("remote:gpu", None).await.unwrap();
        h.switcher.settle().await;
        h.store.update(|s| s.workspace.projects = vec![project("train")]);

        let outcome = h.switcher.switch_to("remote:lab", None).await.unwrap();
        h.switcher.settle().await;

        assert_eq!(outcome, SwitchOutcome::Switched);
        assert!(!h.fake.called("disconnect"));
        assert!(h.fake.called("connect:lab"));
        let state = h.store.snapshot();
        assert_eq!(state.active_context_id, ContextId::remote("lab"));
        assert_eq!(state.connection.state, ConnectionState::Connected);
        assert_eq!(state.connection.host.as_deref(), Some("lab.lan"));
        assert_eq!(state.workspace.projects, vec![project("eval")]);
        assert_eq!(h.fake.active(), Some(ContextId::remote("lab")));
        let ids: Vec<_> = state.contexts.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![ContextId::local(), ContextId::remote("lab")]);
        assert_eq!(
            h.snapshots.load("gpu").unwrap().state.projects,
            vec![project("train")]
        );
    }

    #[tokio::test]
    async fn failed_hand_off_keeps_the_remote_source_connected() {
        let h = harness();
        h.switcher.switch_to("remote:gpu", None).await.unwrap();
        h.switcher.settle().await;
        h.fake
            .push_connect(Err(ServiceError::Unavailable("host unreachable".into())));

        let err = h.switcher.switch_to("remote:lab", None).await.unwrap_err();

        assert!(matches!(
            err,
            SwitchError::Connect { ref root_id, ref message }
                if root_id == "lab" && message == "host unreachable"
        ));
        assert!(!h.fake.called("disconnect"));
        assert!(!h.fake.called("switch_context:remote:lab"));
        let state = h.store.snapshot();
        assert_eq!(state.active_context_id, ContextId::remote("gpu"));
        assert_eq!(state.connection.state, ConnectionState::Connected);
        assert_eq!(state.connection.host.as_deref(), Some("gpu.lan"));
        assert_eq!(state.connection_error.as_deref(), Some("host unreachable"));
        assert!(!state.switching);
        assert_eq!(h.fake.active(), Some(ContextId::remote("gpu")));
    }

    #[tokio::test]
    async fn switch_superseded_before_dialing_never_connects() {
        let h = harness_with(|store| Arc::new(RemovedWhileResolving(store.clone())));

        let outcome = h.switcher.switch_to("remote:gpu", None).await.unwrap();

        assert_eq!(outcome, SwitchOutcome::Superseded);
        assert!(!h.fake.called("connect"));
        assert!(!h.fake.called("switch_context"));
        let state = h.store.snapshot();
        assert_eq!(state.active_context_id, ContextId::local());
        assert_eq!(state.connection.state, ConnectionState::Disconnected);
        assert!(!state.switching);
    }

    #[tokio::test]
    async fn request_during_switch_is_dropped() {
        let h = harness();
        let gate = h.fake.push_connect_gated(Ok(()));
        let (first, second) = tokio::join!(h.switcher.switch_to("remote:gpu", None), async {
            let outcome = h.switcher.switch_to("remote:other", None).await;
            let _ = gate.send(());
            outcome
        });
        assert_eq!(first.unwrap(), SwitchOutcome::Switched);
        assert_eq!(second.unwrap(), SwitchOutcome::Dropped);
        assert!(!h.fake.called("connect:other"));
    }

    #[tokio::test]
    async fn listing_failure_after_remote_commit_lands_on_local() {
        let h = harness();
        h.fake
            .fail_projects(Some(ServiceError::Unavailable("permission denied".into())));

        let outcome = h.switcher.switch_to("remote:gpu", None).await.unwrap();
        h.switcher.settle().await;

        assert_eq!(
            outcome,
            SwitchOutcome::CompletedToLocal {
                error: "permission denied".to_string()
            }
        );
        let state = h.store.snapshot();
        assert_eq!(state.active_context_id, ContextId::local());
        assert_eq!(state.connection_error.as_deref(), Some("permission denied"));
        assert!(!state.switching);
        assert_eq!(h.fake.active(), Some(ContextId::local()));
        assert!(h.fake.called("disconnect"));
    }

    #[tokio::test]
    async fn local_commit_failure_restores_source_workspace() {
        let h = harness();
        h.switcher.switch_to("remote:gpu", None).await.unwrap();
        h.switcher.settle().await;
        h.store.update(|s| s.workspace.projects = vec![project("train")]);
        h.fake
            .fail_switch(Some(ServiceError::Internal("registry busy".into())));

        let err = h.switcher.switch_to("local", None).await.unwrap_err();
        assert!(matches!(err, SwitchError::Commit(_)));
        let state = h.store.snapshot();
        assert_eq!(state.workspace.projects, vec![project("train")]);
        assert_eq!(state.connection_error.as_deref(), Some("registry busy"));
        assert!(!state.switching);
    }

    #[tokio::test]
    async fn returning_to_local_applies_its_snapshot_and_reconciles() {
        let h = harness();
        h.fake.set_projects("local", vec![project("app")]);
        h.fake
            .set_sessions("local", "app", vec![session("local", "app", "s1", 1)]);
        h.store.update(|s| {
            s.workspace.projects = vec![project("app"), project("gone")];
            s.workspace.selected_project_id = Some("app".into());
            s.workspace.open_tab("gone", None);
        });

        h.switcher.switch_to("remote:gpu", None).await.unwrap();
        h.switcher.switch_to("local", None).await.unwrap();
        h.switcher.settle().await;

        let state = h.store.snapshot();
        assert_eq!(state.active_context_id, ContextId::local());
        assert_eq!(state.workspace.projects, vec![project("app")]);
        assert_eq!(state.workspace.selected_project_id.as_deref(), Some("app"));
        assert_eq!(state.workspace.sessions.len(), 1);
        assert!(state.workspace.tabs.is_empty());
        assert!(h.fake.called("disconnect"));
    }

    #[tokio::test]
    async fn forgetting_the_target_root_supersedes_the_switch() {
        let h = harness();
        let gate = h.fake.push_connect_gated(Ok(()));
        h.snapshots
            .save(
                "gpu",
                &WorkspaceSnapshot::capture(ContextId::remote("gpu"), WorkspaceState::default()),
            )
            .unwrap();

        let (outcome, ()) = tokio::join!(h.switcher.switch_to("remote:gpu", None), async {
            h.switcher.forget_root("gpu").unwrap();
            let _ = gate.send(());
        });

        assert_eq!(outcome.unwrap(), SwitchOutcome::Superseded);
        let state = h.store.snapshot();
        assert!(!state.switching);
        assert_eq!(state.active_context_id, ContextId::local());
        assert!(h.snapshots.load("gpu").is_none());
        assert!(!h.fake.called("switch_context"));
    }
}
