//! Combined-sessions mode: one recency-ordered list merged across every
//! context, paged with an opaque composite cursor.
//!
//! Every fetch captures `epoch` before its request and drops its result when,
//! on completion, the epoch has moved or the mode is no longer enabled. The
//! newest epoch wins regardless of which response arrives first.

use sessionhub_core::{
    BackendApi, CombinedSessionsResponse, ServiceError, SessionKey, SessionSummary,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::preferences::PreferenceStore;
use crate::state::ClientStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Idle,
    /// First page in flight, list replaced on arrival.
    Loading,
    /// Next page in flight, appended on arrival.
    LoadingMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombinedMode {
    #[default]
    Disabled,
    Toggling {
        enabling: bool,
    },
    Enabled(LoadPhase),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CombinedSessionsState {
    pub mode: CombinedMode,
    pub sessions: Vec<SessionSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total_count: u64,
    pub epoch: u64,
    pub error: Option<String>,
    /// Identifies the fetch that set the current load phase.
    phase_owner: u64,
}

impl CombinedSessionsState {
    /// True once enabling has started, until disabling starts.
    pub fn is_enabled(&self) -> bool {
        matches!(
            self.mode,
            CombinedMode::Enabled(_) | CombinedMode::Toggling { enabling: true }
        )
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.mode,
            CombinedMode::Enabled(LoadPhase::Loading | LoadPhase::LoadingMore)
        )
    }

    /// Enter `phase` on behalf of a new fetch. Only the returned token may
    /// return the mode to idle.
    fn claim_phase(&mut self, phase: LoadPhase) -> u64 {
        self.phase_owner += 1;
        self.mode = CombinedMode::Enabled(phase);
        self.phase_owner
    }

    fn release_phase(&mut self, owner: u64) {
        if self.phase_owner == owner && self.is_loading() {
            self.mode = CombinedMode::Enabled(LoadPhase::Idle);
        }
    }

    fn clear_list(&mut self) {
        self.sessions.clear();
        self.next_cursor = None;
        self.has_more = false;
        self.total_count = 0;
    }

    fn replace(&mut self, page: CombinedSessionsResponse) {
        self.sessions.clear();
        self.append(page);
    }

    /// Append a page, skipping sessions already held. Returns how many were added.
    fn append(&mut self, page: CombinedSessionsResponse) -> usize {
        let mut seen: HashSet<SessionKey> = self.sessions.iter().map(SessionSummary::key).collect();
        let before = self.sessions.len();
        for session in page.sessions {
            if seen.insert(session.key()) {
                self.sessions.push(session);
            }
        }
        self.next_cursor = page.next_cursor;
        self.has_more = page.has_more;
        self.total_count = page.total_count;
        self.sessions.len() - before
    }
}

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("combined mode is already toggling")]
    Busy,
    #[error("combined mode needs at least two contexts, {known} known")]
    NotEnoughContexts { known: usize },
    #[error("combined mode failed: {0}")]
    Backend(#[from] ServiceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { added: usize },
    /// Superseded by a newer fetch or by disabling; nothing was written.
    Stale,
    /// Preconditions not met; no request was made.
    Skipped,
}

pub struct CombinedSessions {
    backend: Arc<dyn BackendApi>,
    store: ClientStore,
    prefs: PreferenceStore,
    page_size: i64,
}

impl CombinedSessions {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        store: ClientStore,
        prefs: PreferenceStore,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            store,
            prefs,
            page_size: i64::try_from(page_size).unwrap_or(i64::MAX),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.read(|s| s.combined.is_enabled())
    }

    /// Flip combined mode. Returns the new enabled state.
    pub async fn toggle(&self) -> Result<bool, ToggleError> {
        let enabling = self.store.update(|s| {
            let enabling = match s.combined.mode {
                CombinedMode::Toggling { .. } => return Err(ToggleError::Busy),
                CombinedMode::Disabled => {
                    if s.contexts.len() < 2 {
                        return Err(ToggleError::NotEnoughContexts {
                            known: s.contexts.len(),
                        });
                    }
                    true
                }
                CombinedMode::Enabled(_) => false,
            };
            s.combined.mode = CombinedMode::Toggling { enabling };
            s.multi_select.clear();
            Ok(enabling)
        })?;

        if enabling {
            self.enable().await?;
        } else {
            self.disable().await;
        }
        Ok(enabling)
    }

    async fn enable(&self) -> Result<(), ToggleError> {
        let previous_pref = self.prefs.combined_sessions();
        if let Err(e) = self.prefs.set_combined_sessions(true) {
            warn!("Failed to persist combined-sessions preference: {}", e);
        }

        let result = match self.backend.set_combined_watchers(true).await {
            Ok(()) => self.fetch_page_one(false).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {
                self.store.update(|s| {
                    if s.combined.mode == (CombinedMode::Toggling { enabling: true }) {
                        s.combined.mode = CombinedMode::Enabled(LoadPhase::Idle);
                    }
                });
                info!("Combined sessions enabled");
                Ok(())
            }
            Err(e) => Err(self.roll_back_enable(previous_pref, e).await),
        }
    }

    async fn roll_back_enable(&self, previous_pref: bool, error: ServiceError) -> ToggleError {
        warn!("Enabling combined sessions failed, rolling back: {}", error);
        self.store.update(|s| {
            s.combined.epoch += 1;
            s.combined.clear_list();
            s.combined.error = Some(error.message().to_string());
        });
        if let Err(e) = self.backend.set_combined_watchers(false).await {
            warn!("Failed to restore single-context watchers: {}", e);
        }
        if let Err(e) = self.prefs.set_combined_sessions(previous_pref) {
            warn!("Failed to restore combined-sessions preference: {}", e);
        }
        self.reload_selected_project().await;
        self.store.update(|s| s.combined.mode = CombinedMode::Disabled);
        ToggleError::Backend(error)
    }

    async fn disable(&self) {
        self.store.update(|s| {
            s.combined.epoch += 1;
            s.combined.clear_list();
            s.combined.error = None;
        });
        if let Err(e) = self.prefs.set_combined_sessions(false) {
            warn!("Failed to persist combined-sessions preference: {}", e);
        }
        if let Err(e) = self.backend.set_combined_watchers(false).await {
            warn!("Failed to restore single-context watchers: {}", e);
        }
        self.reload_selected_project().await;
        self.store.update(|s| s.combined.mode = CombinedMode::Disabled);
        info!("Combined sessions disabled");
    }

    /// Reload the single-context session list of the selected project.
    async fn reload_selected_project(&self) {
        let Some((context, project)) = self.store.read(|s| {
            s.workspace
                .selected_project_id
                .clone()
                .map(|p| (s.active_context_id.clone(), p))
        }) else {
            return;
        };
        match self.backend.list_sessions(&project).await {
            Ok(sessions) => self.store.update(|s| {
                if s.active_context_id == context
                    && s.workspace.selected_project_id.as_deref() == Some(project.as_str())
                {
                    s.workspace.sessions = sessions;
                }
            }),
            Err(e) => warn!("Failed to reload sessions of project {}: {}", project, e),
        }
    }

    /// Replace the list with page one, showing a loading state.
    pub async fn fetch_first_page(&self) -> Result<FetchOutcome, ServiceError> {
        if !self.store.read(|s| matches!(s.combined.mode, CombinedMode::Enabled(_))) {
            return Ok(FetchOutcome::Skipped);
        }
        self.fetch_page_one(true).await
    }

    /// Re-fetch page one in the background. The current list stays visible
    /// until the new one replaces it.
    pub async fn refresh_in_place(&self) -> Result<FetchOutcome, ServiceError> {
        if !self.store.read(|s| matches!(s.combined.mode, CombinedMode::Enabled(_))) {
            return Ok(FetchOutcome::Skipped);
        }
        self.fetch_page_one(false).await
    }

    async fn fetch_page_one(&self, show_loading: bool) -> Result<FetchOutcome, ServiceError> {
        let (epoch, owner) = self.store.update(|s| {
            let c = &mut s.combined;
            c.epoch += 1;
            let owner = (show_loading && matches!(c.mode, CombinedMode::Enabled(_)))
                .then(|| c.claim_phase(LoadPhase::Loading));
            (c.epoch, owner)
        });
        let result = self
            .backend
            .get_combined_sessions_paginated(None, self.page_size)
            .await;

        self.store.update(|s| {
            let c = &mut s.combined;
            if let Some(owner) = owner {
                c.release_phase(owner);
            }
            if c.epoch != epoch || !c.is_enabled() {
                debug!("Dropping stale combined page (epoch {} now {})", epoch, c.epoch);
                return Ok(FetchOutcome::Stale);
            }
            match result {
                Ok(page) => {
                    if c.mode == CombinedMode::Enabled(LoadPhase::LoadingMore) {
                        // That append follows a cursor of the list being replaced.
                        c.epoch += 1;
                    }
                    c.replace(page);
                    c.error = None;
                    Ok(FetchOutcome::Applied {
                        added: c.sessions.len(),
                    })
                }
                Err(e) => {
                    c.error = Some(e.message().to_string());
                    Err(e)
                }
            }
        })
    }

    /// Append the next page. No-op unless enabled, idle, and a cursor with
    /// more data is held.
    pub async fn fetch_more(&self) -> Result<FetchOutcome, ServiceError> {
        let claimed = self.store.update(|s| {
            let c = &mut s.combined;
            if c.mode != CombinedMode::Enabled(LoadPhase::Idle) || !c.has_more {
                return None;
            }
            let cursor = c.next_cursor.clone()?;
            let owner = c.claim_phase(LoadPhase::LoadingMore);
            Some((c.epoch, owner, cursor))
        });
        let Some((epoch, owner, cursor)) = claimed else {
            return Ok(FetchOutcome::Skipped);
        };

        let result = self
            .backend
            .get_combined_sessions_paginated(Some(&cursor), self.page_size)
            .await;

        self.store.update(|s| {
            let c = &mut s.combined;
            c.release_phase(owner);
            if c.epoch != epoch || !c.is_enabled() {
                debug!("Dropping stale combined page (epoch {} now {})", epoch, c.epoch);
                return Ok(FetchOutcome::Stale);
            }
            match result {
                Ok(page) => {
                    let added = c.append(page);
                    if added == 0 && c.has_more {
                        debug!("Combined page made no progress, clearing has_more");
                        c.has_more = false;
                    }
                    c.error = None;
                    Ok(FetchOutcome::Applied { added })
                }
                Err(e) => {
                    c.error = Some(e.message().to_string());
                    Err(e)
                }
            }
        })
    }

    /// Re-enter combined mode at startup when the persisted preference asks for it.
    pub async fn resume_from_preference(&self) -> Result<(), ToggleError> {
        if !self.prefs.combined_sessions() {
            return Ok(());
        }
        let ready = self.store.read(|s| {
            s.combined.mode == CombinedMode::Disabled && s.contexts.len() >= 2
        });
        if !ready {
            debug!("Combined-sessions preference set but not enough contexts yet");
            return Ok(());
        }
        self.toggle().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientState;
    use crate::store::MemoryStore;
    use sessionhub_core::testing::{FakeBackend, combined_page, context_info, session};

    fn setup(contexts: usize) -> (Arc<FakeBackend>, ClientStore, CombinedSessions) {
        let infos: Vec<_> = [("local", "laptop"), ("remote:gpu", "gpu")]
            .into_iter()
            .take(contexts)
            .map(|(id, root)| context_info(id, root))
            .collect();
        let fake = Arc::new(FakeBackend::with_contexts(infos.clone()));
        let store = ClientStore::new(ClientState {
            contexts: infos,
            ..ClientState::default()
        });
        let prefs = PreferenceStore::new(Arc::new(MemoryStore::new()), false);
        let slice = CombinedSessions::new(fake.clone(), store.clone(), prefs, 50);
        (fake, store, slice)
    }

    fn enabled(store: &ClientStore) {
        store.update(|s| s.combined.mode = CombinedMode::Enabled(LoadPhase::Idle));
    }

    #[test]
    fn append_deduplicates_by_session_key() {
        let mut state = CombinedSessionsState::default();
        let s1 = session("local", "app", "s1", 3);
        state.replace(combined_page(vec![s1.clone()], Some("c1"), true));
        let added = state.append(combined_page(
            vec![s1, session("remote:gpu", "app", "s1", 2)],
            None,
            false,
        ));
        assert_eq!(added, 1);
        assert_eq!(state.sessions.len(), 2);
    }

    #[tokio::test]
    async fn busy_toggle_is_rejected() {
        let (fake, store, slice) = setup(2);
        store.update(|s| s.combined.mode = CombinedMode::Toggling { enabling: true });
        assert!(matches!(slice.toggle().await, Err(ToggleError::Busy)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn fetch_more_requires_idle_enabled_mode_and_cursor() {
        let (fake, store, slice) = setup(2);
        assert_eq!(slice.fetch_more().await.unwrap(), FetchOutcome::Skipped);

        enabled(&store);
        store.update(|s| s.combined.has_more = true);
        assert_eq!(slice.fetch_more().await.unwrap(), FetchOutcome::Skipped);

        store.update(|s| {
            s.combined.next_cursor = Some("c1".into());
            s.combined.mode = CombinedMode::Enabled(LoadPhase::Loading);
        });
        assert_eq!(slice.fetch_more().await.unwrap(), FetchOutcome::Skipped);
        assert!(fake.combined_requests().is_empty());
    }

    #[tokio::test]
    async fn fetch_more_failure_keeps_list_and_records_error() {
        let (fake, store, slice) = setup(2);
        enabled(&store);
        store.update(|s| {
            s.combined.sessions = vec![session("local", "app", "s1", 1)];
            s.combined.next_cursor = Some("c1".into());
            s.combined.has_more = true;
        });
        fake.push_combined(Err(ServiceError::Unavailable("link down".into())));

        assert!(slice.fetch_more().await.is_err());
        let state = store.read(|s| s.combined.clone());
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.mode, CombinedMode::Enabled(LoadPhase::Idle));
        assert_eq!(state.error.as_deref(), Some("link down"));
        assert!(state.has_more);
    }

    #[tokio::test]
    async fn refresh_landing_mid_append_keeps_the_append_in_charge() {
        let (fake, store, slice) = setup(2);
        enabled(&store);
        store.update(|s| {
            s.combined.sessions = vec![session("local", "app", "s1", 5)];
            s.combined.next_cursor = Some("c1".into());
            s.combined.has_more = true;
        });
        let gate = fake.push_combined_gated(Ok(combined_page(
            vec![session("local", "app", "s2", 4)],
            Some("c2"),
            true,
        )));
        fake.push_combined(Ok(combined_page(
            vec![session("remote:gpu", "app", "r1", 9)],
            Some("r1"),
            true,
        )));

        let (first, (refreshed, second)) = tokio::join!(slice.fetch_more(), async {
            let refreshed = slice.refresh_in_place().await.unwrap();
            let second = slice.fetch_more().await.unwrap();
            let _ = gate.send(());
            (refreshed, second)
        });

        assert_eq!(refreshed, FetchOutcome::Applied { added: 1 });
        assert_eq!(second, FetchOutcome::Skipped);
        assert_eq!(first.unwrap(), FetchOutcome::Stale);
        let state = store.read(|s| s.combined.clone());
        assert_eq!(state.mode, CombinedMode::Enabled(LoadPhase::Idle));
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].id, "r1");
        assert_eq!(state.next_cursor.as_deref(), Some("r1"));
        assert!(state.has_more);

        fake.push_combined(Ok(combined_page(
            vec![session("remote:gpu", "app", "r2", 8)],
            None,
            false,
        )));
        assert_eq!(
            slice.fetch_more().await.unwrap(),
            FetchOutcome::Applied { added: 1 }
        );
        let cursors: Vec<_> = fake
            .combined_requests()
            .into_iter()
            .map(|(cursor, _)| cursor)
            .collect();
        assert_eq!(
            cursors,
            vec![Some("c1".to_string()), None, Some("r1".to_string())]
        );
    }

    #[tokio::test]
    async fn superseded_first_page_leaves_the_loading_state_to_its_successor() {
        let (fake, store, slice) = setup(2);
        enabled(&store);
        let gate = fake.push_combined_gated(Ok(combined_page(
            vec![session("local", "app", "old", 1)],
            None,
            false,
        )));
        let (first, (mode_during, second)) = tokio::join!(slice.fetch_first_page(), async {
            let mode = store.read(|s| s.combined.mode);
            let second = slice.fetch_first_page().await.unwrap();
            let _ = gate.send(());
            (mode, second)
        });
        assert_eq!(mode_during, CombinedMode::Enabled(LoadPhase::Loading));
        assert_eq!(second, FetchOutcome::Applied { added: 0 });
        assert_eq!(first.unwrap(), FetchOutcome::Stale);
        assert_eq!(
            store.read(|s| s.combined.mode),
            CombinedMode::Enabled(LoadPhase::Idle)
        );
    }

    #[tokio::test]
    async fn refresh_replaces_without_loading_state() {
        let (fake, store, slice) = setup(2);
        enabled(&store);
        store.update(|s| s.combined.sessions = vec![session("local", "app", "old", 1)]);
        fake.push_combined(Ok(combined_page(
            vec![session("remote:gpu", "app", "new", 2)],
            None,
            false,
        )));

        assert_eq!(
            slice.refresh_in_place().await.unwrap(),
            FetchOutcome::Applied { added: 1 }
        );
        let state = store.read(|s| s.combined.clone());
        assert_eq!(state.sessions[0].id, "new");
        assert_eq!(state.mode, CombinedMode::Enabled(LoadPhase::Idle));
    }

    #[tokio::test]
    async fn refresh_is_skipped_while_disabled_or_toggling() {
        let (fake, store, slice) = setup(2);
        assert_eq!(slice.refresh_in_place().await.unwrap(), FetchOutcome::Skipped);
        store.update(|s| s.combined.mode = CombinedMode::Toggling { enabling: true });
        assert_eq!(slice.refresh_in_place().await.unwrap(), FetchOutcome::Skipped);
        assert!(!fake.called("get_combined_sessions_paginated"));
    }

    #[tokio::test]
    async fn disable_clears_list_and_reloads_project_sessions() {
        let (fake, store, slice) = setup(2);
        enabled(&store);
        fake.set_sessions("local", "app", vec![session("local", "app", "s9", 1)]);
        store.update(|s| {
            s.combined.sessions = vec![session("local", "app", "s1", 1)];
            s.combined.has_more = true;
            s.workspace.selected_project_id = Some("app".into());
        });

        assert!(!slice.toggle().await.unwrap());
        let state = store.snapshot();
        assert_eq!(state.combined.mode, CombinedMode::Disabled);
        assert!(state.combined.sessions.is_empty());
        assert!(!state.combined.has_more);
        assert_eq!(state.workspace.sessions[0].id, "s9");
        assert!(fake.called("set_combined_watchers:false"));
    }

    #[tokio::test]
    async fn preference_resumes_combined_mode() {
        let (fake, store, _) = setup(2);
        let kv = Arc::new(MemoryStore::new());
        let prefs = PreferenceStore::new(kv, true);
        let slice = CombinedSessions::new(fake.clone(), store.clone(), prefs, 50);

        slice.resume_from_preference().await.unwrap();
        assert_eq!(
            store.read(|s| s.combined.mode),
            CombinedMode::Enabled(LoadPhase::Idle)
        );
        assert!(fake.combined_watchers());
    }
}
