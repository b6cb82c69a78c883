//! The client's single shared state aggregate.

use sessionhub_core::{ConnectionStatus, ContextId, ContextInfo, SessionKey};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::combined::CombinedSessionsState;
use crate::workspace::WorkspaceState;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientState {
    pub contexts: Vec<ContextInfo>,
    pub active_context_id: ContextId,
    /// Set while a context switch is in flight; further switch requests are dropped.
    pub switching: bool,
    /// Bumped when a switch starts or is superseded. Commits compare it first.
    pub switch_generation: u64,
    /// Root of the in-flight switch target.
    pub switch_target_root: Option<String>,
    pub connection: ConnectionStatus,
    /// Last switch failure shown to the user.
    pub connection_error: Option<String>,
    pub workspace: WorkspaceState,
    /// Multi-selected sessions in the visible list.
    pub multi_select: BTreeSet<SessionKey>,
    pub combined: CombinedSessionsState,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            contexts: Vec::new(),
            active_context_id: ContextId::local(),
            switching: false,
            switch_generation: 0,
            switch_target_root: None,
            connection: ConnectionStatus::disconnected(),
            connection_error: None,
            workspace: WorkspaceState::default(),
            multi_select: BTreeSet::new(),
            combined: CombinedSessionsState::default(),
        }
    }
}

impl ClientState {
    pub fn context(&self, id: &ContextId) -> Option<&ContextInfo> {
        self.contexts.iter().find(|c| &c.id == id)
    }

    /// Snapshot key for a context: its configured root id, or the id itself
    /// for contexts not (yet) listed.
    pub fn root_id_of(&self, id: &ContextId) -> String {
        match self.context(id) {
            Some(info) => info.root_id.clone(),
            None => id.remote_root_id().unwrap_or(id.as_str()).to_string(),
        }
    }
}

/// Cheaply cloneable handle to the shared [`ClientState`].
///
/// The lock is never held across an `.await`; every access goes through a
/// closure.
#[derive(Debug, Clone, Default)]
pub struct ClientStore {
    inner: Arc<Mutex<ClientState>>,
}

impl ClientStore {
    pub fn new(state: ClientState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        f(&self.inner.lock().expect("client state lock poisoned"))
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> R {
        f(&mut self.inner.lock().expect("client state lock poisoned"))
    }

    pub fn snapshot(&self) -> ClientState {
        self.read(Clone::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionhub_core::testing::context_info;

    #[test]
    fn root_id_prefers_listed_context() {
        let state = ClientState {
            contexts: vec![context_info("local", "laptop")],
            ..ClientState::default()
        };
        assert_eq!(state.root_id_of(&ContextId::local()), "laptop");
        assert_eq!(state.root_id_of(&ContextId::remote("gpu")), "gpu");
    }

    #[test]
    fn store_updates_are_visible_to_clones() {
        let store = ClientStore::default();
        let other = store.clone();
        store.update(|s| s.switching = true);
        assert!(other.read(|s| s.switching));
    }
}
