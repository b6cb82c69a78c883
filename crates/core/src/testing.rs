//! Fixture builders and in-memory fakes shared by every crate's tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::oneshot;

use crate::api::{
    BackendApi, ConnectionState, ConnectionStatus, RemoteConnectConfig, RemoteConnector,
    ServiceError, SwitchResponse,
};
use crate::context::{ContextId, ContextInfo, ContextKind};
use crate::scanner::{ScanError, SessionScanner, paginate_recent};
use crate::session::{
    CombinedSessionsResponse, DetailLevel, ProjectSummary, SessionPage, SessionSummary,
};

/// Millisecond timestamp helper.
pub fn at_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Session summary tagged with the given context (local kind unless the id is `remote:*`).
pub fn session(context: &str, project: &str, id: &str, modified_ms: i64) -> SessionSummary {
    let context_id = ContextId::parse(context).expect("test context id");
    let root_type = if context_id.remote_root_id().is_some() {
        ContextKind::Remote
    } else {
        ContextKind::Local
    };
    SessionSummary {
        id: id.to_string(),
        project_id: project.to_string(),
        context_id,
        root_name: context.to_string(),
        root_type,
        created_at: at_ms(modified_ms),
        modified_at: at_ms(modified_ms),
        title: None,
        message_count: 0,
        size_bytes: 0,
    }
}

pub fn project(id: &str) -> ProjectSummary {
    ProjectSummary {
        id: id.to_string(),
        name: id.to_string(),
        session_count: 0,
        last_modified: None,
    }
}

/// In-memory scanner over a fixed listing. Counts calls and can be told to fail.
#[derive(Default)]
pub struct StaticScanner {
    sessions: Mutex<Vec<SessionSummary>>,
    projects: Mutex<Vec<ProjectSummary>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    hinted_calls: AtomicUsize,
    last_limit: AtomicUsize,
}

impl StaticScanner {
    pub fn new(sessions: Vec<SessionSummary>) -> Self {
        let scanner = Self::default();
        scanner.set_sessions(sessions);
        scanner
    }

    pub fn with_projects(self, projects: Vec<ProjectSummary>) -> Self {
        *self.projects.lock().expect("poisoned") = projects;
        self
    }

    pub fn set_sessions(&self, sessions: Vec<SessionSummary>) {
        *self.sessions.lock().expect("poisoned") = sessions;
    }

    pub fn set_projects(&self, projects: Vec<ProjectSummary>) {
        *self.projects.lock().expect("poisoned") = projects;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hinted_calls(&self) -> usize {
        self.hinted_calls.load(Ordering::SeqCst)
    }

    pub fn last_limit(&self) -> usize {
        self.last_limit.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ScanError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ScanError::Unavailable("scanner offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionScanner for StaticScanner {
    async fn list_recent_sessions_global(
        &self,
        cursor: Option<&str>,
        limit: usize,
        _detail: DetailLevel,
        cached_hint: Option<&[SessionSummary]>,
    ) -> Result<SessionPage, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        self.check()?;
        let all = self.sessions.lock().expect("poisoned").clone();
        match cached_hint {
            Some(hint) => {
                self.hinted_calls.fetch_add(1, Ordering::SeqCst);
                let mut page = paginate_recent(hint.to_vec(), cursor, limit)?;
                page.total_count = all.len() as u64;
                Ok(page)
            }
            None => paginate_recent(all, cursor, limit),
        }
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ScanError> {
        self.check()?;
        Ok(self.projects.lock().expect("poisoned").clone())
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>, ScanError> {
        self.check()?;
        Ok(self
            .sessions
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }
}

/// Combined-feed page fixture.
pub fn combined_page(
    sessions: Vec<SessionSummary>,
    next_cursor: Option<&str>,
    has_more: bool,
) -> CombinedSessionsResponse {
    CombinedSessionsResponse {
        total_count: sessions.len() as u64,
        sessions,
        next_cursor: next_cursor.map(str::to_string),
        has_more,
    }
}

pub fn context_info(id: &str, root_id: &str) -> ContextInfo {
    let id = ContextId::parse(id).expect("test context id");
    let kind = if id.is_local() {
        ContextKind::Local
    } else {
        ContextKind::Remote
    };
    ContextInfo {
        root_name: root_id.to_string(),
        root_id: root_id.to_string(),
        id,
        kind,
        connected: true,
    }
}

struct Scripted<T> {
    response: T,
    gate: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
struct FakeState {
    contexts: Vec<ContextInfo>,
    active: Option<ContextId>,
    projects: BTreeMap<ContextId, Vec<ProjectSummary>>,
    sessions: BTreeMap<(ContextId, String), Vec<SessionSummary>>,
    combined: VecDeque<Scripted<Result<CombinedSessionsResponse, ServiceError>>>,
    combined_requests: Vec<(Option<String>, i64)>,
    connect_script: VecDeque<Scripted<Result<(), ServiceError>>>,
    switch_error: Option<ServiceError>,
    projects_error: Option<ServiceError>,
    watchers_error: Option<ServiceError>,
    combined_watchers: bool,
    notifications: u64,
    connection: ConnectionStatus,
    connected_root: Option<String>,
    calls: Vec<String>,
}

/// Scripted in-memory backend and remote connector. Records every call by
/// name so tests can assert what crossed the boundary.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    /// Backend with the given contexts; the first one is active.
    pub fn with_contexts(contexts: Vec<ContextInfo>) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            state.active = contexts.first().map(|c| c.id.clone());
            state.contexts = contexts;
        }
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("poisoned")
    }

    fn record(&self, call: impl Into<String>) {
        self.lock().calls.push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn called(&self, name: &str) -> bool {
        self.lock()
            .calls
            .iter()
            .any(|call| call == name || call.starts_with(&format!("{name}:")))
    }

    pub fn set_projects(&self, context: &str, projects: Vec<ProjectSummary>) {
        let id = ContextId::parse(context).expect("test context id");
        self.lock().projects.insert(id, projects);
    }

    pub fn set_sessions(&self, context: &str, project: &str, sessions: Vec<SessionSummary>) {
        let id = ContextId::parse(context).expect("test context id");
        self.lock()
            .sessions
            .insert((id, project.to_string()), sessions);
    }

    pub fn push_combined(&self, response: Result<CombinedSessionsResponse, ServiceError>) {
        self.lock().combined.push_back(Scripted {
            response,
            gate: None,
        });
    }

    /// Queue a response that is only delivered once the returned sender fires
    /// (or is dropped).
    pub fn push_combined_gated(
        &self,
        response: Result<CombinedSessionsResponse, ServiceError>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().combined.push_back(Scripted {
            response,
            gate: Some(rx),
        });
        tx
    }

    pub fn combined_requests(&self) -> Vec<(Option<String>, i64)> {
        self.lock().combined_requests.clone()
    }

    pub fn push_connect(&self, result: Result<(), ServiceError>) {
        self.lock().connect_script.push_back(Scripted {
            response: result,
            gate: None,
        });
    }

    pub fn push_connect_gated(&self, result: Result<(), ServiceError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().connect_script.push_back(Scripted {
            response: result,
            gate: Some(rx),
        });
        tx
    }

    pub fn fail_switch(&self, error: Option<ServiceError>) {
        self.lock().switch_error = error;
    }

    pub fn fail_projects(&self, error: Option<ServiceError>) {
        self.lock().projects_error = error;
    }

    pub fn fail_watchers(&self, error: Option<ServiceError>) {
        self.lock().watchers_error = error;
    }

    pub fn combined_watchers(&self) -> bool {
        self.lock().combined_watchers
    }

    pub fn set_notifications(&self, count: u64) {
        self.lock().notifications = count;
    }

    pub fn active(&self) -> Option<ContextId> {
        self.lock().active.clone()
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, ServiceError> {
        self.record("list_contexts");
        Ok(self.lock().contexts.clone())
    }

    async fn get_active_context(&self) -> Result<ContextId, ServiceError> {
        self.record("get_active_context");
        self.lock()
            .active
            .clone()
            .ok_or_else(|| ServiceError::Internal("no contexts".to_string()))
    }

    async fn switch_context(&self, context_id: &str) -> Result<SwitchResponse, ServiceError> {
        self.record(format!("switch_context:{context_id}"));
        let mut state = self.lock();
        if let Some(error) = state.switch_error.clone() {
            return Err(error);
        }
        let id = ContextId::parse(context_id)?;
        if !state.contexts.iter().any(|c| c.id == id) {
            return Err(ServiceError::NotFound(format!("unknown context: {id}")));
        }
        let previous = state.active.replace(id.clone()).unwrap_or_else(|| id.clone());
        Ok(SwitchResponse {
            context_id: id,
            previous_context_id: previous,
        })
    }

    async fn set_combined_watchers(&self, enabled: bool) -> Result<(), ServiceError> {
        self.record(format!("set_combined_watchers:{enabled}"));
        let mut state = self.lock();
        if let Some(error) = state.watchers_error.clone() {
            return Err(error);
        }
        state.combined_watchers = enabled;
        Ok(())
    }

    async fn get_combined_sessions_paginated(
        &self,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<CombinedSessionsResponse, ServiceError> {
        self.record("get_combined_sessions_paginated");
        let scripted = {
            let mut state = self.lock();
            state
                .combined_requests
                .push((cursor.map(str::to_string), limit));
            state.combined.pop_front()
        };
        let Some(scripted) = scripted else {
            return Ok(combined_page(Vec::new(), None, false));
        };
        if let Some(gate) = scripted.gate {
            let _ = gate.await;
        }
        scripted.response
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ServiceError> {
        self.record("list_projects");
        let state = self.lock();
        if let Some(error) = state.projects_error.clone() {
            return Err(error);
        }
        let Some(active) = state.active.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(state.projects.get(active).cloned().unwrap_or_default())
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>, ServiceError> {
        self.record(format!("list_sessions:{project_id}"));
        let state = self.lock();
        let Some(active) = state.active.clone() else {
            return Ok(Vec::new());
        };
        Ok(state
            .sessions
            .get(&(active, project_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn notification_count(&self) -> Result<u64, ServiceError> {
        self.record("notification_count");
        Ok(self.lock().notifications)
    }

    async fn mark_notifications_read(&self) -> Result<(), ServiceError> {
        self.record("mark_notifications_read");
        self.lock().notifications = 0;
        Ok(())
    }
}

#[async_trait]
impl RemoteConnector for FakeBackend {
    async fn connect(&self, config: &RemoteConnectConfig) -> Result<(), ServiceError> {
        self.record(format!("connect:{}", config.root_id));
        let scripted = {
            let mut state = self.lock();
            state.connection = ConnectionStatus {
                state: ConnectionState::Connecting,
                host: Some(config.host.clone()),
                error: None,
            };
            state.connect_script.pop_front()
        };
        let result = match scripted {
            Some(Scripted { response, gate }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                response
            }
            None => Ok(()),
        };

        let mut state = self.lock();
        match result {
            Ok(()) => {
                let id = ContextId::remote(&config.root_id);
                if let Some(previous) = state.connected_root.take() {
                    let previous = ContextId::remote(&previous);
                    if previous != id {
                        state.contexts.retain(|c| c.id != previous);
                    }
                }
                if !state.contexts.iter().any(|c| c.id == id) {
                    let mut info = context_info(id.as_str(), &config.root_id);
                    info.root_name = config.host.clone();
                    state.contexts.push(info);
                }
                state.connected_root = Some(config.root_id.clone());
                state.connection = ConnectionStatus::connected(config.host.clone());
                Ok(())
            }
            Err(e) => {
                state.connection = ConnectionStatus {
                    state: ConnectionState::Error,
                    host: Some(config.host.clone()),
                    error: Some(e.message().to_string()),
                };
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> ConnectionStatus {
        self.record("disconnect");
        let mut state = self.lock();
        if let Some(root) = state.connected_root.take() {
            let id = ContextId::remote(&root);
            state.contexts.retain(|c| c.id != id);
            if state.active.as_ref() == Some(&id) {
                state.active = state.contexts.first().map(|c| c.id.clone());
            }
        }
        state.connection = ConnectionStatus::disconnected();
        state.connection.clone()
    }

    async fn status(&self) -> ConnectionStatus {
        self.lock().connection.clone()
    }
}
