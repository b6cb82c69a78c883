//! Filesystem scanner over a Claude Code style `projects` directory:
//! `<root>/<project>/<session>.jsonl`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sessionhub_core::scanner::paginate_recent;
use sessionhub_core::{
    ContextId, ContextKind, DetailLevel, ProjectSummary, ScanError, SessionPage, SessionScanner,
    SessionSummary,
};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

pub struct LocalScanner {
    context_id: ContextId,
    root_name: String,
    root: PathBuf,
    last_total: AtomicU64,
}

impl LocalScanner {
    pub fn new(context_id: ContextId, root_name: impl Into<String>, root: PathBuf) -> Self {
        Self {
            context_id,
            root_name: root_name.into(),
            root,
            last_total: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn scan_all(&self) -> Result<Vec<SessionSummary>, ScanError> {
        let root = self.root.clone();
        let context_id = self.context_id.clone();
        let root_name = self.root_name.clone();
        let sessions = tokio::task::spawn_blocking(move || {
            scan_root(&root, &context_id, &root_name)
        })
        .await
        .map_err(|e| ScanError::Other(format!("scan task failed: {e}")))??;
        self.last_total
            .store(sessions.len() as u64, Ordering::Relaxed);
        Ok(sessions)
    }

    async fn enrich(&self, sessions: Vec<SessionSummary>) -> Result<Vec<SessionSummary>, ScanError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            sessions
                .into_iter()
                .map(|mut session| {
                    let path = root
                        .join(&session.project_id)
                        .join(format!("{}.jsonl", session.id));
                    if let Ok((title, count)) = read_details(&path) {
                        session.title = title;
                        session.message_count = count;
                    }
                    session
                })
                .collect()
        })
        .await
        .map_err(|e| ScanError::Other(format!("detail task failed: {e}")))
    }
}

#[async_trait]
impl SessionScanner for LocalScanner {
    async fn list_recent_sessions_global(
        &self,
        cursor: Option<&str>,
        limit: usize,
        detail: DetailLevel,
        cached_hint: Option<&[SessionSummary]>,
    ) -> Result<SessionPage, ScanError> {
        let mut page = match cached_hint {
            Some(hint) => {
                let mut page = paginate_recent(hint.to_vec(), cursor, limit)?;
                // The hint is only a window; report the last full count when we have one.
                let known = self.last_total.load(Ordering::Relaxed);
                page.total_count = page.total_count.max(known);
                page
            }
            None => paginate_recent(self.scan_all().await?, cursor, limit)?,
        };
        if detail == DetailLevel::Full {
            page.sessions = self.enrich(page.sessions).await?;
        }
        Ok(page)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ScanError> {
        let sessions = self.scan_all().await?;
        let mut projects: BTreeMap<String, ProjectSummary> = BTreeMap::new();
        for session in sessions {
            let entry = projects
                .entry(session.project_id.clone())
                .or_insert_with(|| ProjectSummary {
                    id: session.project_id.clone(),
                    name: project_display_name(&session.project_id),
                    session_count: 0,
                    last_modified: None,
                });
            entry.session_count += 1;
            if entry.last_modified.is_none_or(|t| t < session.modified_at) {
                entry.last_modified = Some(session.modified_at);
            }
        }
        let mut projects: Vec<_> = projects.into_values().collect();
        projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(projects)
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>, ScanError> {
        if project_id.is_empty() || project_id.contains(['/', '\\']) || project_id == ".." {
            return Err(ScanError::ProjectNotFound(project_id.to_string()));
        }
        if !self.root.join(project_id).is_dir() {
            return Err(ScanError::ProjectNotFound(project_id.to_string()));
        }
        let mut sessions: Vec<_> = self
            .scan_all()
            .await?
            .into_iter()
            .filter(|s| s.project_id == project_id)
            .collect();
        sessions.sort_by(sessionhub_core::session::recency_order);
        Ok(sessions)
    }
}

fn scan_root(
    root: &Path,
    context_id: &ContextId,
    root_name: &str,
) -> Result<Vec<SessionSummary>, ScanError> {
    if !root.exists() {
        debug!("[{}] root {} does not exist yet", context_id, root.display());
        return Ok(Vec::new());
    }
    let pattern = format!("{}/*/*.jsonl", root.display());
    let paths = glob::glob(&pattern).map_err(|e| ScanError::Other(e.to_string()))?;

    let mut sessions = Vec::new();
    for path in paths.filter_map(Result::ok) {
        let Some(summary) = summarize(&path, context_id, root_name)? else {
            continue;
        };
        sessions.push(summary);
    }
    Ok(sessions)
}

fn summarize(
    path: &Path,
    context_id: &ContextId,
    root_name: &str,
) -> Result<Option<SessionSummary>, ScanError> {
    let (Some(id), Some(project_id)) = (
        path.file_stem().and_then(|s| s.to_str()),
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str()),
    ) else {
        return Ok(None);
    };

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        // Deleted between the glob and the stat.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let modified_at = to_millis(meta.modified()?);
    let created_at = meta.created().map(to_millis).unwrap_or(modified_at);

    Ok(Some(SessionSummary {
        id: id.to_string(),
        project_id: project_id.to_string(),
        context_id: context_id.clone(),
        root_name: root_name.to_string(),
        root_type: if context_id.is_local() {
            ContextKind::Local
        } else {
            ContextKind::Remote
        },
        created_at,
        modified_at,
        title: None,
        message_count: 0,
        size_bytes: meta.len(),
    }))
}

/// Truncate to the millisecond precision cursors carry.
fn to_millis(time: SystemTime) -> DateTime<Utc> {
    let ms = DateTime::<Utc>::from(time).timestamp_millis();
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// First `summary` entry as title, plus the number of user/assistant lines.
fn read_details(path: &Path) -> std::io::Result<(Option<String>, u64)> {
    let file = std::fs::File::open(path)?;
    let mut title = None;
    let mut count = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Ok(entry) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        match entry.get("type").and_then(|t| t.as_str()) {
            Some("summary") if title.is_none() => {
                title = entry
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .map(str::to_string);
            }
            Some("user" | "assistant") => count += 1,
            _ => {}
        }
    }
    Ok((title, count))
}

/// `-Users-me-src-app` → `app`
fn project_display_name(project_id: &str) -> String {
    project_id
        .rsplit('-')
        .find(|part| !part.is_empty())
        .unwrap_or(project_id)
        .to_string()
}
