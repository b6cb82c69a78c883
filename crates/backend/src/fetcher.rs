//! Combined session feed across every registered context.
//!
//! Each call fans out to all contexts concurrently, merges the contributions
//! by recency and records, per context, where the page was cut. A context
//! that fails is isolated: it contributes nothing, keeps its slot and is
//! retried on the next page.

use futures::future::join_all;
use sessionhub_core::session::recency_order;
use sessionhub_core::{
    CombinedSessionsResponse, CompositeCursor, ContextId, ContextInfo, CursorSlot, DetailLevel,
    RecencyCursor, ScanError, SessionPage, SessionScanner, SessionSummary,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::RecencyCache;
use crate::context::SessionContext;

/// Extra items requested per context to absorb cross-context interleaving.
pub const OVERFETCH: usize = 5;

/// What the fetcher needs from one context, detached from the registry so no
/// lock is held while scanners run.
#[derive(Clone)]
pub struct FetchTarget {
    pub info: ContextInfo,
    pub scanner: Arc<dyn SessionScanner>,
    pub cache: Option<Arc<RecencyCache>>,
}

impl FetchTarget {
    pub fn from_context(context: &SessionContext) -> Self {
        Self {
            info: context.info().clone(),
            scanner: context.scanner(),
            cache: context.live_cache(),
        }
    }
}

/// Merged page plus the contexts that failed while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedPage {
    pub sessions: Vec<SessionSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total_count: u64,
    pub errored: Vec<ContextId>,
}

impl From<CombinedPage> for CombinedSessionsResponse {
    fn from(page: CombinedPage) -> Self {
        Self {
            sessions: page.sessions,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            total_count: page.total_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CombinedFetcher {
    overfetch: usize,
}

impl Default for CombinedFetcher {
    fn default() -> Self {
        Self::new(OVERFETCH)
    }
}

/// Outcome of one context's fetch before the merge.
enum Contribution {
    Skipped {
        total: u64,
    },
    Errored {
        previous: CursorSlot,
        total: u64,
    },
    Fetched {
        previous: CursorSlot,
        page: SessionPage,
    },
}

impl CombinedFetcher {
    pub fn new(overfetch: usize) -> Self {
        Self { overfetch }
    }

    pub async fn fetch(
        &self,
        targets: &[FetchTarget],
        cursor: &CompositeCursor,
        limit: usize,
    ) -> CombinedPage {
        let request = limit + self.overfetch;
        let contributions = join_all(
            targets
                .iter()
                .map(|target| self.fetch_one(target, cursor, request)),
        )
        .await;

        let mut errored = Vec::new();
        let mut pool: Vec<SessionSummary> = Vec::new();
        for (target, contribution) in targets.iter().zip(&contributions) {
            match contribution {
                Contribution::Fetched { page, .. } => pool.extend(page.sessions.iter().cloned()),
                Contribution::Errored { .. } => errored.push(target.info.id.clone()),
                Contribution::Skipped { .. } => {}
            }
        }
        pool.sort_by(recency_order);
        pool.truncate(limit);

        let mut next = CompositeCursor::default();
        let mut has_more = false;
        for (target, contribution) in targets.iter().zip(contributions) {
            let id = target.info.id.clone();
            let (slot, total, more) = match contribution {
                Contribution::Skipped { total } => (CursorSlot::Exhausted, total, false),
                Contribution::Errored { previous, total } => (previous, total, true),
                Contribution::Fetched { previous, page } => {
                    let taken: Vec<&SessionSummary> =
                        pool.iter().filter(|s| s.context_id == id).collect();
                    let (slot, more) = cut_slot(previous, &page, &taken);
                    (slot, page.total_count, more)
                }
            };
            has_more |= more;
            next.per_context.insert(id.clone(), slot);
            next.per_context_totals.insert(id, total);
        }

        let total_count = next.per_context_totals.values().sum();
        debug!(
            "combined page: {} sessions from {} contexts (errored: {}, has_more: {})",
            pool.len(),
            targets.len(),
            errored.len(),
            has_more
        );
        CombinedPage {
            sessions: pool,
            next_cursor: has_more.then(|| next.encode()),
            has_more,
            total_count,
            errored,
        }
    }

    async fn fetch_one(
        &self,
        target: &FetchTarget,
        cursor: &CompositeCursor,
        request: usize,
    ) -> Contribution {
        let id = &target.info.id;
        let previous = cursor.slot(id);
        let total = cursor.total(id);
        if previous.is_exhausted() {
            return Contribution::Skipped { total };
        }

        match self.scan(target, &previous, request).await {
            Ok(mut page) => {
                for session in &mut page.sessions {
                    session.context_id = id.clone();
                    session.root_name = target.info.root_name.clone();
                    session.root_type = target.info.kind;
                }
                Contribution::Fetched { previous, page }
            }
            Err(e) => {
                warn!("[{}] combined fetch failed, retrying next page: {}", id, e);
                Contribution::Errored { previous, total }
            }
        }
    }

    async fn scan(
        &self,
        target: &FetchTarget,
        slot: &CursorSlot,
        request: usize,
    ) -> Result<SessionPage, ScanError> {
        // The cache only mirrors the head of the listing; deeper pages always scan.
        let cache = target.cache.as_ref().filter(|cache| {
            matches!(slot, CursorSlot::Start)
                && cache.is_warmed()
                && request <= cache.capacity()
        });

        let Some(cache) = cache else {
            return target
                .scanner
                .list_recent_sessions_global(slot.native(), request, DetailLevel::Minimal, None)
                .await;
        };

        let hint = cache.snapshot();
        let mut page = target
            .scanner
            .list_recent_sessions_global(None, request, DetailLevel::Minimal, Some(&hint))
            .await?;

        // A full cache may be hiding older items: its "exhausted" answer only
        // means the window ended.
        if cache.is_full() && !page.has_more && page.next_cursor.is_none() {
            if let Some(last) = hint.last() {
                debug!("[{}] cache ceiling reached, continuing past it", target.info.id);
                page.next_cursor = Some(RecencyCursor::after(last).encode());
                page.has_more = true;
            }
        }
        Ok(page)
    }
}

/// New slot for a context after the merge cut, and whether it has more.
fn cut_slot(
    previous: CursorSlot,
    page: &SessionPage,
    taken: &[&SessionSummary],
) -> (CursorSlot, bool) {
    if taken.len() == page.sessions.len() {
        return match (&page.next_cursor, page.has_more) {
            (Some(next), true) => (CursorSlot::At(next.clone()), true),
            (_, false) => (CursorSlot::Exhausted, false),
            (None, true) => match taken.last() {
                Some(last) => (CursorSlot::At(RecencyCursor::after(last).encode()), true),
                None => (previous, true),
            },
        };
    }
    match taken.last() {
        Some(last) => (CursorSlot::At(RecencyCursor::after(last).encode()), true),
        None => (previous, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionhub_core::ContextKind;
    use sessionhub_core::testing::{StaticScanner, session};

    fn target(id: ContextId, scanner: Arc<StaticScanner>) -> FetchTarget {
        let kind = if id.is_local() {
            ContextKind::Local
        } else {
            ContextKind::Remote
        };
        FetchTarget {
            info: ContextInfo {
                root_id: id.to_string(),
                root_name: format!("{id}-name"),
                id,
                kind,
                connected: true,
            },
            scanner,
            cache: None,
        }
    }

    fn listing(context: &str, count: i64, start_ms: i64, step: i64) -> Vec<SessionSummary> {
        (0..count)
            .map(|i| session(context, "p", &format!("{context}-{i}"), start_ms - i * step))
            .collect()
    }

    fn decode(page: &CombinedPage) -> CompositeCursor {
        CompositeCursor::decode(page.next_cursor.as_deref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn merges_by_recency_and_stamps_origin() {
        let local = Arc::new(StaticScanner::new(listing("local", 3, 1_000, 20)));
        let remote = Arc::new(StaticScanner::new(listing("local", 3, 1_010, 20)));
        let targets = vec![
            target(ContextId::local(), local),
            target(ContextId::remote("box"), remote),
        ];

        let page = CombinedFetcher::default()
            .fetch(&targets, &CompositeCursor::default(), 4)
            .await;

        let order: Vec<_> = page
            .sessions
            .iter()
            .map(|s| (s.context_id.to_string(), s.modified_at.timestamp_millis()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("remote:box".to_string(), 1_010),
                ("local".to_string(), 1_000),
                ("remote:box".to_string(), 990),
                ("local".to_string(), 980),
            ]
        );
        assert_eq!(page.sessions[0].root_name, "remote:box-name");
        assert_eq!(page.sessions[0].root_type, ContextKind::Remote);
        assert!(page.has_more);
        assert_eq!(page.total_count, 6);
    }

    #[tokio::test]
    async fn ties_break_on_context_then_session_id() {
        let a = Arc::new(StaticScanner::new(vec![session("local", "p", "b", 5)]));
        let b = Arc::new(StaticScanner::new(vec![
            session("local", "p", "a", 5),
            session("local", "p", "c", 5),
        ]));
        let targets = vec![
            target(ContextId::remote("z"), a),
            target(ContextId::local(), b),
        ];
        let page = CombinedFetcher::default()
            .fetch(&targets, &CompositeCursor::default(), 10)
            .await;
        let ids: Vec<_> = page.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn requests_limit_plus_overfetch_per_context() {
        let scanner = Arc::new(StaticScanner::new(listing("local", 30, 10_000, 1)));
        let targets = vec![target(ContextId::local(), Arc::clone(&scanner))];
        CombinedFetcher::default()
            .fetch(&targets, &CompositeCursor::default(), 10)
            .await;
        assert_eq!(scanner.last_limit(), 10 + OVERFETCH);
    }

    #[tokio::test]
    async fn paging_visits_every_session_exactly_once() {
        let local = Arc::new(StaticScanner::new(listing("local", 7, 10_000, 30)));
        let remote = Arc::new(StaticScanner::new(listing("local", 11, 10_005, 13)));
        let targets = vec![
            target(ContextId::local(), local),
            target(ContextId::remote("box"), remote),
        ];
        let fetcher = CombinedFetcher::default();

        let mut seen = Vec::new();
        let mut cursor = CompositeCursor::default();
        for _ in 0..20 {
            let page = fetcher.fetch(&targets, &cursor, 4).await;
            assert_eq!(page.total_count, 18);
            seen.extend(page.sessions.iter().map(|s| s.key()));
            if !page.has_more {
                break;
            }
            cursor = decode(&page);
        }

        assert_eq!(seen.len(), 18);
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 18);
    }

    #[tokio::test]
    async fn exhausted_context_is_skipped_and_total_carried() {
        let local = Arc::new(StaticScanner::new(listing("local", 2, 1_000, 10)));
        let remote = Arc::new(StaticScanner::new(listing("local", 10, 900, 10)));
        let targets = vec![
            target(ContextId::local(), Arc::clone(&local)),
            target(ContextId::remote("box"), remote),
        ];
        let fetcher = CombinedFetcher::default();

        let first = fetcher
            .fetch(&targets, &CompositeCursor::default(), 5)
            .await;
        let cursor = decode(&first);
        assert_eq!(cursor.slot(&ContextId::local()), CursorSlot::Exhausted);
        assert_eq!(cursor.total(&ContextId::local()), 2);

        let calls = local.calls();
        let second = fetcher.fetch(&targets, &cursor, 5).await;
        assert_eq!(local.calls(), calls);
        assert!(
            second
                .sessions
                .iter()
                .all(|s| s.context_id == ContextId::remote("box"))
        );
        assert_eq!(second.total_count, 12);
    }

    #[tokio::test]
    async fn failing_context_keeps_its_slot_and_total() {
        let local = Arc::new(StaticScanner::new(listing("local", 10, 1_000, 10)));
        let remote = Arc::new(StaticScanner::new(listing("local", 10, 995, 10)));
        let targets = vec![
            target(ContextId::local(), Arc::clone(&local)),
            target(ContextId::remote("box"), Arc::clone(&remote)),
        ];
        let fetcher = CombinedFetcher::default();

        let first = fetcher
            .fetch(&targets, &CompositeCursor::default(), 4)
            .await;
        let cursor = decode(&first);
        let remote_slot = cursor.slot(&ContextId::remote("box"));

        remote.set_failing(true);
        let second = fetcher.fetch(&targets, &cursor, 4).await;
        assert_eq!(second.errored, vec![ContextId::remote("box")]);
        assert!(second.has_more);
        assert_eq!(second.total_count, 20);
        assert!(
            second
                .sessions
                .iter()
                .all(|s| s.context_id == ContextId::local())
        );
        let after = decode(&second);
        assert_eq!(after.slot(&ContextId::remote("box")), remote_slot);
        assert_eq!(after.total(&ContextId::remote("box")), 10);
    }

    #[tokio::test]
    async fn context_missing_from_cursor_starts_from_the_top() {
        let local = Arc::new(StaticScanner::new(listing("local", 3, 1_000, 10)));
        let fresh = Arc::new(StaticScanner::new(listing("local", 3, 2_000, 10)));
        let mut cursor = CompositeCursor::default();
        cursor
            .per_context
            .insert(ContextId::local(), CursorSlot::Exhausted);
        cursor.per_context_totals.insert(ContextId::local(), 3);

        let targets = vec![
            target(ContextId::local(), local),
            target(ContextId::remote("new"), fresh),
        ];
        let page = CombinedFetcher::default().fetch(&targets, &cursor, 10).await;
        assert_eq!(page.sessions.len(), 3);
        assert_eq!(page.sessions[0].modified_at.timestamp_millis(), 2_000);
        assert_eq!(page.total_count, 6);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn first_page_uses_warm_cache_when_it_fits() {
        let scanner = Arc::new(StaticScanner::new(listing("local", 8, 1_000, 10)));
        let cache = Arc::new(RecencyCache::new(20));
        cache.warm(scanner.as_ref()).await.unwrap();

        let mut t = target(ContextId::local(), Arc::clone(&scanner));
        t.cache = Some(Arc::clone(&cache));
        let fetcher = CombinedFetcher::default();

        let page = fetcher
            .fetch(std::slice::from_ref(&t), &CompositeCursor::default(), 5)
            .await;
        assert_eq!(scanner.hinted_calls(), 1);
        assert_eq!(page.sessions.len(), 5);

        // Deep pages never consult the cache.
        fetcher.fetch(&[t], &decode(&page), 5).await;
        assert_eq!(scanner.hinted_calls(), 1);
    }

    #[tokio::test]
    async fn cache_is_skipped_when_request_exceeds_capacity() {
        let scanner = Arc::new(StaticScanner::new(listing("local", 8, 1_000, 10)));
        let cache = Arc::new(RecencyCache::new(6));
        cache.warm(scanner.as_ref()).await.unwrap();
        let mut t = target(ContextId::local(), Arc::clone(&scanner));
        t.cache = Some(cache);

        CombinedFetcher::default()
            .fetch(&[t], &CompositeCursor::default(), 5)
            .await;
        assert_eq!(scanner.hinted_calls(), 0);
    }

    #[tokio::test]
    async fn full_cache_does_not_declare_exhaustion() {
        // The cache window is exactly one page; two older sessions lie beyond it.
        let scanner = Arc::new(StaticScanner::new(listing("local", 12, 1_000, 10)));
        let cache = Arc::new(RecencyCache::new(10));
        cache.warm(scanner.as_ref()).await.unwrap();
        assert!(cache.is_full());

        let mut t = target(ContextId::local(), Arc::clone(&scanner));
        t.cache = Some(cache);
        let fetcher = CombinedFetcher::new(0);
        let targets = [t];

        let first = fetcher
            .fetch(&targets, &CompositeCursor::default(), 10)
            .await;
        assert_eq!(scanner.hinted_calls(), 1);
        assert_eq!(first.sessions.len(), 10);
        assert!(first.has_more);

        let second = fetcher.fetch(&targets, &decode(&first), 10).await;
        let ids: Vec<_> = second.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["local-10", "local-11"]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn fully_consumed_context_reporting_no_more_is_exhausted() {
        let local = Arc::new(StaticScanner::new(listing("local", 2, 1_000, 10)));
        let targets = vec![target(ContextId::local(), local)];
        let page = CombinedFetcher::default()
            .fetch(&targets, &CompositeCursor::default(), 10)
            .await;
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn cut_keeps_previous_slot_when_nothing_taken() {
        let page = SessionPage {
            sessions: vec![session("local", "p", "x", 1)],
            next_cursor: None,
            has_more: false,
            total_count: 1,
        };
        let previous = CursorSlot::At("prev".to_string());
        let (slot, more) = cut_slot(previous.clone(), &page, &[]);
        assert_eq!(slot, previous);
        assert!(more);
    }
}
