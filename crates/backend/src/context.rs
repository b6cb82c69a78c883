use sessionhub_core::{ContextId, ContextInfo, SessionScanner};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::RecencyCache;
use crate::watcher::ContextWatcher;

/// One live backend data source together with the resources it owns.
pub struct SessionContext {
    info: ContextInfo,
    permanent: bool,
    scanner: Arc<dyn SessionScanner>,
    cache: Option<Arc<RecencyCache>>,
    watcher: Box<dyn ContextWatcher>,
    on_dispose: Option<DisposeHook>,
}

/// Extra cleanup run once when a context is disposed (e.g. closing a remote channel).
pub type DisposeHook = Box<dyn FnOnce(&ContextInfo) + Send>;

impl SessionContext {
    pub fn new(
        info: ContextInfo,
        scanner: Arc<dyn SessionScanner>,
        watcher: Box<dyn ContextWatcher>,
    ) -> Self {
        Self {
            info,
            permanent: false,
            scanner,
            cache: None,
            watcher,
            on_dispose: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<RecencyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_dispose_hook(mut self, hook: DisposeHook) -> Self {
        self.on_dispose = Some(hook);
        self
    }

    pub(crate) fn set_permanent(&mut self, permanent: bool) {
        self.permanent = permanent;
    }

    pub fn id(&self) -> &ContextId {
        &self.info.id
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn scanner(&self) -> Arc<dyn SessionScanner> {
        Arc::clone(&self.scanner)
    }

    /// The cache, but only while a running watcher keeps it current.
    pub fn live_cache(&self) -> Option<Arc<RecencyCache>> {
        self.cache
            .clone()
            .filter(|_| self.watcher.reports_changes())
    }

    /// Events missed while stopped leave the cache stale, so any change in
    /// watcher state drops it until the next re-warm.
    pub fn start_watcher(&mut self) {
        let was_reporting = self.watcher.reports_changes();
        if let Err(e) = self.watcher.start() {
            warn!("[{}] watcher failed to start: {:#}", self.info.id, e);
        }
        if !was_reporting {
            self.invalidate_cache();
        }
    }

    pub fn stop_watcher(&mut self) {
        if self.watcher.reports_changes() {
            self.invalidate_cache();
        }
        self.watcher.stop();
    }

    fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn watcher_running(&self) -> bool {
        self.watcher.is_running()
    }

    /// Release owned resources. The scanner is shared with in-flight fetches,
    /// so it is simply dropped with the context.
    pub fn dispose(&mut self) {
        debug!("[{}] disposing context", self.info.id);
        self.watcher.stop();
        self.invalidate_cache();
        if let Some(hook) = self.on_dispose.take() {
            hook(&self.info);
        }
        self.info.connected = false;
    }
}
