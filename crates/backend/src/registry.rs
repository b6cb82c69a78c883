//! Map of live contexts.
//!
//! Invariants held after every call:
//! - at least one context is registered;
//! - `active_id` names a registered context;
//! - the permanent context is never removed.
//!
//! Every mutation takes `&mut self` and completes without awaiting, so a
//! caller holding the registry lock never exposes a half-applied state.

use sessionhub_core::{ContextId, ContextInfo};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::SessionContext;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("context already registered: {0}")]
    AlreadyRegistered(ContextId),
    #[error("unknown context: {0}")]
    UnknownContext(ContextId),
    #[error("cannot destroy the last remaining context: {0}")]
    LastContext(ContextId),
    #[error("cannot destroy the permanent context: {0}")]
    Permanent(ContextId),
    #[error("replacement id {replacement} does not match {existing}")]
    IdentityMismatch {
        existing: ContextId,
        replacement: ContextId,
    },
}

/// Called with the context about to be destroyed. Failures are logged and
/// never abort the destruction.
pub type WillDestroyListener = Box<dyn Fn(&ContextInfo) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchResult {
    pub previous: ContextId,
    pub current: ContextId,
}

pub struct ContextRegistry {
    contexts: BTreeMap<ContextId, SessionContext>,
    active: ContextId,
    combined_watchers: bool,
    listeners: Vec<WillDestroyListener>,
}

impl ContextRegistry {
    /// Create a registry around the permanent context, which becomes active.
    pub fn new(mut permanent: SessionContext) -> Self {
        permanent.set_permanent(true);
        permanent.start_watcher();
        let active = permanent.id().clone();
        let mut contexts = BTreeMap::new();
        contexts.insert(active.clone(), permanent);
        Self {
            contexts,
            active,
            combined_watchers: false,
            listeners: Vec::new(),
        }
    }

    pub fn register(&mut self, mut context: SessionContext) -> Result<(), RegistryError> {
        let id = context.id().clone();
        if self.contexts.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        context.set_permanent(false);
        if self.combined_watchers {
            context.start_watcher();
        }
        info!("Registered context {} ({})", id, context.info().kind);
        self.contexts.insert(id, context);
        Ok(())
    }

    pub fn switch(&mut self, id: &ContextId) -> Result<SwitchResult, RegistryError> {
        if !self.contexts.contains_key(id) {
            return Err(RegistryError::UnknownContext(id.clone()));
        }
        let previous = self.active.clone();
        if &previous == id {
            return Ok(SwitchResult {
                previous: previous.clone(),
                current: previous,
            });
        }

        if !self.combined_watchers {
            if let Some(prev) = self.contexts.get_mut(&previous) {
                prev.stop_watcher();
            }
            if let Some(next) = self.contexts.get_mut(id) {
                next.start_watcher();
            }
        }
        self.active = id.clone();
        info!("Switched active context {} -> {}", previous, id);
        Ok(SwitchResult {
            previous,
            current: id.clone(),
        })
    }

    pub fn destroy(&mut self, id: &ContextId) -> Result<ContextInfo, RegistryError> {
        let Some(context) = self.contexts.get(id) else {
            return Err(RegistryError::UnknownContext(id.clone()));
        };
        if self.contexts.len() == 1 {
            return Err(RegistryError::LastContext(id.clone()));
        }
        if context.is_permanent() {
            return Err(RegistryError::Permanent(id.clone()));
        }

        let info = context.info().clone();
        for listener in &self.listeners {
            if let Err(e) = listener(&info) {
                warn!("will-destroy listener failed for {}: {:#}", id, e);
            }
        }

        if let Some(mut context) = self.contexts.remove(id) {
            context.dispose();
        }

        if &self.active == id {
            let fallback = self
                .contexts
                .values()
                .find(|c| c.is_permanent())
                .or_else(|| self.contexts.values().next())
                .map(|c| c.id().clone());
            if let Some(fallback) = fallback {
                info!("Active context {} destroyed, falling back to {}", id, fallback);
                self.active = fallback;
            }
        }
        info!("Destroyed context {}", id);
        Ok(info)
    }

    /// Swap a context's implementation in place, keeping its identity, its
    /// permanence and its watcher state. The old instance is disposed.
    pub fn replace(
        &mut self,
        id: &ContextId,
        mut replacement: SessionContext,
    ) -> Result<(), RegistryError> {
        if replacement.id() != id {
            return Err(RegistryError::IdentityMismatch {
                existing: id.clone(),
                replacement: replacement.id().clone(),
            });
        }
        let Some(mut old) = self.contexts.remove(id) else {
            return Err(RegistryError::UnknownContext(id.clone()));
        };
        let was_watching = old.watcher_running();
        replacement.set_permanent(old.is_permanent());
        old.dispose();
        if was_watching {
            replacement.start_watcher();
        }
        self.contexts.insert(id.clone(), replacement);
        info!("Replaced context {}", id);
        Ok(())
    }

    /// Centralized watcher mode: every context watches while enabled; only the
    /// active one does otherwise.
    pub fn set_combined_watchers(&mut self, enabled: bool) {
        self.combined_watchers = enabled;
        for (id, context) in self.contexts.iter_mut() {
            if enabled || id == &self.active {
                context.start_watcher();
            } else {
                context.stop_watcher();
            }
        }
        info!("Combined watchers {}", if enabled { "on" } else { "off" });
    }

    pub fn combined_watchers(&self) -> bool {
        self.combined_watchers
    }

    /// Make sure the active context's watcher runs, e.g. after a destroy
    /// reassigned the active context.
    pub fn ensure_active_watcher(&mut self) {
        if let Some(active) = self.contexts.get_mut(&self.active) {
            if !active.watcher_running() {
                active.start_watcher();
            }
        }
    }

    pub fn on_will_destroy(&mut self, listener: WillDestroyListener) {
        self.listeners.push(listener);
    }

    pub fn get(&self, id: &ContextId) -> Option<&SessionContext> {
        self.contexts.get(id)
    }

    pub fn contains(&self, id: &ContextId) -> bool {
        self.contexts.contains_key(id)
    }

    pub fn active_id(&self) -> &ContextId {
        &self.active
    }

    pub fn active(&self) -> &SessionContext {
        // The active id always names a registered context.
        &self.contexts[&self.active]
    }

    pub fn list(&self) -> Vec<ContextInfo> {
        self.contexts.values().map(|c| c.info().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionContext> {
        self.contexts.values()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
