use sessionhub_core::session::recency_order;
use sessionhub_core::{DetailLevel, ScanError, SessionScanner, SessionSummary};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bounded window of a context's most recent sessions, used to answer the
/// first combined page without a full scan.
///
/// Only trustworthy for the first page: once a listing goes deeper than
/// `capacity` items the cache cannot know what lies beyond its window.
pub struct RecencyCache {
    capacity: usize,
    items: RwLock<Vec<SessionSummary>>,
    warmed: AtomicBool,
}

impl RecencyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: RwLock::new(Vec::new()),
            warmed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("recency cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filled to its ceiling, so the context may hold more than the window shows.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.len() >= self.capacity
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        self.items.read().expect("recency cache lock poisoned").clone()
    }

    pub fn replace(&self, mut items: Vec<SessionSummary>) {
        items.sort_by(recency_order);
        items.truncate(self.capacity);
        *self.items.write().expect("recency cache lock poisoned") = items;
        self.warmed.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.items
            .write()
            .expect("recency cache lock poisoned")
            .clear();
        self.warmed.store(false, Ordering::Release);
    }

    /// Refill from the scanner's first page.
    pub async fn warm(&self, scanner: &dyn SessionScanner) -> Result<usize, ScanError> {
        let page = scanner
            .list_recent_sessions_global(None, self.capacity, DetailLevel::Minimal, None)
            .await?;
        let count = page.sessions.len();
        self.replace(page.sessions);
        Ok(count)
    }
}
