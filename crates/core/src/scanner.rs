use async_trait::async_trait;
use thiserror::Error;

use crate::cursor::RecencyCursor;
use crate::session::{DetailLevel, ProjectSummary, SessionPage, SessionSummary, recency_order};
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cursor(#[from] ValidationError),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

/// Session listing for one context (local filesystem or remote machine).
///
/// Native cursors are [`RecencyCursor`] tokens: the combined fetcher mints
/// anchors itself when it cuts a context's contribution mid-page, so every
/// implementation must accept an anchor it did not produce.
#[async_trait]
pub trait SessionScanner: Send + Sync {
    /// Most recent sessions across every project of this context.
    ///
    /// `cached_hint`, when given, is a pre-warmed recency window whose order
    /// matches the scanner's own; implementations may answer from it instead
    /// of scanning.
    async fn list_recent_sessions_global(
        &self,
        cursor: Option<&str>,
        limit: usize,
        detail: DetailLevel,
        cached_hint: Option<&[SessionSummary]>,
    ) -> Result<SessionPage, ScanError>;

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ScanError>;

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>, ScanError>;
}

/// Keyset-paginate an in-memory listing. `items` need not be sorted.
pub fn paginate_recent(
    mut items: Vec<SessionSummary>,
    cursor: Option<&str>,
    limit: usize,
) -> Result<SessionPage, ScanError> {
    let total_count = items.len() as u64;
    items.sort_by(recency_order);

    if let Some(token) = cursor {
        let anchor = RecencyCursor::decode(token)?;
        items.retain(|session| anchor.admits(session));
    }

    let has_more = items.len() > limit;
    items.truncate(limit);
    let next_cursor = if has_more {
        items.last().map(|last| RecencyCursor::after(last).encode())
    } else {
        None
    };

    Ok(SessionPage {
        sessions: items,
        next_cursor,
        has_more,
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn paginate_walks_the_whole_listing_once() {
        let items: Vec<_> = (0..7)
            .map(|i| testing::session("local", "p", &format!("s{i}"), 1_000 + i))
            .collect();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = paginate_recent(items.clone(), cursor.as_deref(), 3).unwrap();
            assert_eq!(page.total_count, 7);
            seen.extend(page.sessions.iter().map(|s| s.id.clone()));
            if !page.has_more {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(seen, vec!["s6", "s5", "s4", "s3", "s2", "s1", "s0"]);
    }

    #[test]
    fn paginate_rejects_foreign_cursor() {
        let err = paginate_recent(Vec::new(), Some("???"), 3).unwrap_err();
        assert!(matches!(err, ScanError::Cursor(_)));
    }
}
