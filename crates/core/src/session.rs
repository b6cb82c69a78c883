use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ContextId, ContextKind};

/// Lightweight projection of one session log, as listed by a scanner.
///
/// `context_id`, `root_name` and `root_type` are stamped by the backend when
/// a session leaves its context; scanners may leave them at their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub project_id: String,
    pub context_id: ContextId,
    pub root_name: String,
    pub root_type: ContextKind,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub size_bytes: u64,
}

impl SessionSummary {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            context_id: self.context_id.clone(),
            project_id: self.project_id.clone(),
            session_id: self.id.clone(),
        }
    }
}

/// Identity of a session across contexts. The same session id may appear in
/// several projects or contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub context_id: ContextId,
    pub project_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub session_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// How much per-session metadata a scanner should compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    /// Only what the listing needs (file metadata).
    #[default]
    Minimal,
    /// Also read titles and message counts.
    Full,
}

/// One page returned by a single scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total_count: u64,
}

impl SessionPage {
    pub fn empty() -> Self {
        Self {
            sessions: Vec::new(),
            next_cursor: None,
            has_more: false,
            total_count: 0,
        }
    }
}

/// Response of `getCombinedSessionsPaginated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total_count: u64,
}

/// Recency order used by every listing: most recently modified first (at
/// millisecond resolution, the precision cursors carry), then context id, then
/// session id, so that merges are deterministic.
pub fn recency_order(a: &SessionSummary, b: &SessionSummary) -> std::cmp::Ordering {
    b.modified_at
        .timestamp_millis()
        .cmp(&a.modified_at.timestamp_millis())
        .then_with(|| a.context_id.cmp(&b.context_id))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.project_id.cmp(&b.project_id))
}
