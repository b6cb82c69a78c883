//! The backend process's request handlers.
//!
//! `BackendService` is built once by the composition root and shared as an
//! `Arc`. The registry sits behind a `std::sync::Mutex` that is never held
//! across an `.await`: handlers copy what they need out of it, release it,
//! then talk to scanners.

use async_trait::async_trait;
use sessionhub_core::validate::validate_limit;
use sessionhub_core::{
    BackendApi, CombinedSessionsResponse, CompositeCursor, ConnectionState, ConnectionStatus,
    ContextId, ContextInfo, ContextKind, ProjectSummary, RemoteConnectConfig, RemoteConnector,
    ServiceError, SessionScanner, SessionSummary, SwitchResponse, ValidationError,
};
use sessionhub_runtime_config::{LocalRoot, PaginationSettings, RuntimeConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::RecencyCache;
use crate::context::SessionContext;
use crate::fetcher::{CombinedFetcher, FetchTarget};
use crate::registry::{ContextRegistry, RegistryError};
use crate::scanner::LocalScanner;
use crate::watcher::{ChangeKind, ContextChange, FsWatcher, NoopWatcher};

/// Secure-shell layer that turns resolved credentials into a scanner over the
/// remote machine's session directory.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn open(
        &self,
        config: &RemoteConnectConfig,
    ) -> Result<Arc<dyn SessionScanner>, ServiceError>;

    /// Tear down the link for a root. Must not block.
    fn close(&self, root_id: &str);
}

impl From<RegistryError> for ServiceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownContext(_) => Self::NotFound(e.to_string()),
            RegistryError::AlreadyRegistered(_)
            | RegistryError::LastContext(_)
            | RegistryError::Permanent(_) => Self::Conflict(e.to_string()),
            RegistryError::IdentityMismatch { .. } => Self::Internal(e.to_string()),
        }
    }
}

pub struct BackendService {
    registry: Mutex<ContextRegistry>,
    fetcher: CombinedFetcher,
    pagination: PaginationSettings,
    transport: Option<Arc<dyn RemoteTransport>>,
    connection: Mutex<Connection>,
    remote_names: BTreeMap<String, String>,
    changes_tx: mpsc::UnboundedSender<ContextChange>,
    events: broadcast::Sender<ContextChange>,
    unread: Mutex<BTreeMap<ContextId, u64>>,
}

#[derive(Default)]
struct Connection {
    status: ConnectionStatus,
    root_id: Option<String>,
}

impl BackendService {
    /// Build the service with the configured local root as its permanent
    /// context. The returned receiver carries watcher events and must be fed
    /// to [`BackendService::pump_changes`].
    pub fn from_config(
        config: &RuntimeConfig,
        transport: Option<Arc<dyn RemoteTransport>>,
    ) -> (Self, mpsc::UnboundedReceiver<ContextChange>) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let local = local_context(
            &config.local_root(),
            config.pagination.recency_cache_size,
            changes_tx.clone(),
        );
        let remote_names = config
            .remote_roots()
            .map(|root| (root.id().to_string(), root.name().to_string()))
            .collect();
        let service = Self::assemble(
            ContextRegistry::new(local),
            config.pagination.clone(),
            transport,
            remote_names,
            changes_tx,
        );
        (service, changes_rx)
    }

    /// Build around an already-populated registry.
    pub fn with_registry(
        registry: ContextRegistry,
        pagination: PaginationSettings,
        transport: Option<Arc<dyn RemoteTransport>>,
    ) -> (Self, mpsc::UnboundedReceiver<ContextChange>) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let service = Self::assemble(registry, pagination, transport, BTreeMap::new(), changes_tx);
        (service, changes_rx)
    }

    fn assemble(
        registry: ContextRegistry,
        pagination: PaginationSettings,
        transport: Option<Arc<dyn RemoteTransport>>,
        remote_names: BTreeMap<String, String>,
        changes_tx: mpsc::UnboundedSender<ContextChange>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry: Mutex::new(registry),
            fetcher: CombinedFetcher::new(pagination.overfetch),
            pagination,
            transport,
            connection: Mutex::new(Connection::default()),
            remote_names,
            changes_tx,
            events,
            unread: Mutex::new(BTreeMap::new()),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, ContextRegistry> {
        self.registry.lock().expect("context registry lock poisoned")
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().expect("connection lock poisoned")
    }

    fn targets(&self) -> Vec<FetchTarget> {
        self.registry().iter().map(FetchTarget::from_context).collect()
    }

    fn active_scanner(&self) -> Arc<dyn SessionScanner> {
        self.registry().active().scanner()
    }

    /// Fill the recency cache of every context whose watcher keeps it fresh.
    /// Failures are logged per context.
    pub async fn warm_caches(&self) {
        let targets = self.targets();
        for target in targets {
            let Some(cache) = target.cache else { continue };
            match cache.warm(target.scanner.as_ref()).await {
                Ok(count) => debug!("[{}] warmed recency cache ({count})", target.info.id),
                Err(e) => warn!("[{}] failed to warm recency cache: {}", target.info.id, e),
            }
        }
    }

    /// Swap the permanent local context for one over `root`, keeping its id.
    pub fn reconfigure_local(&self, root: &LocalRoot) -> Result<(), ServiceError> {
        let context = local_context(
            root,
            self.pagination.recency_cache_size,
            self.changes_tx.clone(),
        );
        self.registry().replace(&ContextId::local(), context)?;
        info!("Local context now reads {}", root.path.display());
        Ok(())
    }

    /// Debounced watcher events, after the affected cache has been re-warmed.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ContextChange> {
        self.events.subscribe()
    }

    /// Drain watcher events until shutdown. Bursts are collapsed per context:
    /// once a context has been quiet for `debounce`, its cache is re-warmed
    /// and subscribers are told.
    pub async fn pump_changes(
        &self,
        mut rx: mpsc::UnboundedReceiver<ContextChange>,
        debounce: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut pending: HashMap<ContextId, (Instant, ContextChange)> = HashMap::new();
        let mut tick = tokio::time::interval(debounce.max(Duration::from_millis(50)));

        loop {
            tokio::select! {
                Some(change) = rx.recv() => {
                    if change.kind == ChangeKind::Created {
                        *self.unread_counts().entry(change.context_id.clone()).or_insert(0) += 1;
                    }
                    pending.insert(change.context_id.clone(), (Instant::now(), change));
                }

                _ = tick.tick() => {
                    let now = Instant::now();
                    let ready: Vec<ContextId> = pending
                        .iter()
                        .filter(|(_, (seen, _))| now.duration_since(*seen) >= debounce)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in ready {
                        if let Some((_, change)) = pending.remove(&id) {
                            self.apply_change(change).await;
                        }
                    }
                }

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Change pump shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn apply_change(&self, change: ContextChange) {
        let target = self
            .registry()
            .get(&change.context_id)
            .map(FetchTarget::from_context);
        let Some(target) = target else {
            debug!("Dropping change for departed context {}", change.context_id);
            return;
        };
        if let Some(cache) = &target.cache {
            if let Err(e) = cache.warm(target.scanner.as_ref()).await {
                warn!("[{}] cache re-warm failed: {}", change.context_id, e);
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(change);
    }

    fn unread_counts(&self) -> std::sync::MutexGuard<'_, BTreeMap<ContextId, u64>> {
        self.unread.lock().expect("unread counts lock poisoned")
    }

    fn remote_context(
        &self,
        config: &RemoteConnectConfig,
        id: ContextId,
        scanner: Arc<dyn SessionScanner>,
    ) -> SessionContext {
        let root_name = self
            .remote_names
            .get(&config.root_id)
            .cloned()
            .unwrap_or_else(|| config.host.clone());
        let info = ContextInfo {
            id,
            kind: ContextKind::Remote,
            root_id: config.root_id.clone(),
            root_name,
            connected: true,
        };
        let mut context = SessionContext::new(info, scanner, Box::new(NoopWatcher::default()));
        if let Some(transport) = &self.transport {
            let transport = Arc::clone(transport);
            context = context.with_dispose_hook(Box::new(move |info| {
                transport.close(&info.root_id);
            }));
        }
        context
    }
}

fn local_context(
    root: &LocalRoot,
    cache_size: usize,
    changes_tx: mpsc::UnboundedSender<ContextChange>,
) -> SessionContext {
    let id = ContextId::local();
    let info = ContextInfo {
        id: id.clone(),
        kind: ContextKind::Local,
        root_id: root.id.clone(),
        root_name: root.name.clone(),
        connected: true,
    };
    let scanner = Arc::new(LocalScanner::new(
        id.clone(),
        root.name.clone(),
        root.path.clone(),
    ));
    let watcher = FsWatcher::new(id, root.path.clone(), changes_tx);
    SessionContext::new(info, scanner, Box::new(watcher))
        .with_cache(Arc::new(RecencyCache::new(cache_size)))
}

#[async_trait]
impl BackendApi for BackendService {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, ServiceError> {
        Ok(self.registry().list())
    }

    async fn get_active_context(&self) -> Result<ContextId, ServiceError> {
        Ok(self.registry().active_id().clone())
    }

    async fn switch_context(&self, context_id: &str) -> Result<SwitchResponse, ServiceError> {
        let id = ContextId::parse(context_id)?;
        let result = self.registry().switch(&id)?;
        Ok(SwitchResponse {
            context_id: result.current,
            previous_context_id: result.previous,
        })
    }

    async fn set_combined_watchers(&self, enabled: bool) -> Result<(), ServiceError> {
        self.registry().set_combined_watchers(enabled);
        // Watchers that just started begin with an empty cache.
        self.warm_caches().await;
        Ok(())
    }

    async fn get_combined_sessions_paginated(
        &self,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<CombinedSessionsResponse, ServiceError> {
        let limit = validate_limit(limit, self.pagination.max_limit)?;
        let cursor = CompositeCursor::decode_opt(cursor)?;
        let targets = self.targets();

        let page = self.fetcher.fetch(&targets, &cursor, limit).await;
        if !page.errored.is_empty() {
            warn!(
                "Combined page served without {} context(s): {:?}",
                page.errored.len(),
                page.errored
            );
        }
        Ok(page.into())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ServiceError> {
        let scanner = self.active_scanner();
        Ok(scanner.list_projects().await?)
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>, ServiceError> {
        if project_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "projectId".to_string(),
            }
            .into());
        }
        let scanner = self.active_scanner();
        Ok(scanner.list_sessions(project_id).await?)
    }

    async fn notification_count(&self) -> Result<u64, ServiceError> {
        let active = self.registry().active_id().clone();
        Ok(self.unread_counts().get(&active).copied().unwrap_or(0))
    }

    async fn mark_notifications_read(&self) -> Result<(), ServiceError> {
        let active = self.registry().active_id().clone();
        self.unread_counts().remove(&active);
        Ok(())
    }
}

#[async_trait]
impl RemoteConnector for BackendService {
    async fn connect(&self, config: &RemoteConnectConfig) -> Result<(), ServiceError> {
        let Some(transport) = self.transport.clone() else {
            return Err(ServiceError::Unavailable(
                "no remote transport configured".to_string(),
            ));
        };
        let id = ContextId::parse(&format!("remote:{}", config.root_id))?;

        {
            let mut connection = self.connection();
            connection.status = ConnectionStatus {
                state: ConnectionState::Connecting,
                host: Some(config.host.clone()),
                error: None,
            };
        }
        info!("Connecting to {}@{}:{}", config.user, config.host, config.port);

        let scanner = match transport.open(config).await {
            Ok(scanner) => scanner,
            Err(e) => {
                warn!("Remote connect to {} failed: {}", config.host, e);
                let mut connection = self.connection();
                connection.status = ConnectionStatus {
                    state: ConnectionState::Error,
                    host: Some(config.host.clone()),
                    error: Some(e.message().to_string()),
                };
                return Err(e);
            }
        };

        // Remote roots have no change feed here, so they are always scanned.
        let context = self.remote_context(config, id.clone(), scanner);

        let previous_root = self.connection().root_id.clone();
        {
            let mut registry = self.registry();
            if registry.contains(&id) {
                registry.replace(&id, context)?;
            } else {
                registry.register(context)?;
            }
            // Remote-to-remote hand-off: only one link is live at a time.
            if let Some(previous) = previous_root.filter(|root| root != &config.root_id) {
                let previous_id = ContextId::remote(&previous);
                if let Err(e) = registry.destroy(&previous_id) {
                    warn!("Failed to drop previous remote {}: {}", previous_id, e);
                }
                registry.ensure_active_watcher();
            }
        }

        let mut connection = self.connection();
        connection.status = ConnectionStatus::connected(config.host.clone());
        connection.root_id = Some(config.root_id.clone());
        info!("Connected {}", id);
        Ok(())
    }

    async fn disconnect(&self) -> ConnectionStatus {
        let root_id = self.connection().root_id.take();
        if let Some(root_id) = root_id {
            let id = ContextId::remote(&root_id);
            let mut registry = self.registry();
            match registry.destroy(&id) {
                Ok(_) => info!("Disconnected {}", id),
                Err(e) => warn!("Disconnect of {} left registry untouched: {}", id, e),
            }
            registry.ensure_active_watcher();
        }
        let mut connection = self.connection();
        connection.status = ConnectionStatus::disconnected();
        connection.status.clone()
    }

    async fn status(&self) -> ConnectionStatus {
        self.connection().status.clone()
    }
}
