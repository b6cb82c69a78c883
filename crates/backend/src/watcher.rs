use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use sessionhub_core::ContextId;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// A session file change observed inside one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChange {
    pub context_id: ContextId,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Change feed owned by a context. Start/stop are idempotent.
pub trait ContextWatcher: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;

    /// Whether this watcher will actually emit events for the context. A
    /// recency cache is only kept fresh while this holds.
    fn reports_changes(&self) -> bool {
        self.is_running()
    }
}

/// Watches a local root directory and forwards session-file events.
pub struct FsWatcher {
    context_id: ContextId,
    root: PathBuf,
    tx: mpsc::UnboundedSender<ContextChange>,
    handle: Option<RecommendedWatcher>,
}

impl FsWatcher {
    pub fn new(
        context_id: ContextId,
        root: PathBuf,
        tx: mpsc::UnboundedSender<ContextChange>,
    ) -> Self {
        Self {
            context_id,
            root,
            tx,
            handle: None,
        }
    }
}

impl ContextWatcher for FsWatcher {
    fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let tx = self.tx.clone();
        let context_id = self.context_id.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let kind = match event.kind {
                        notify::EventKind::Create(_) => Some(ChangeKind::Created),
                        notify::EventKind::Modify(_) => Some(ChangeKind::Modified),
                        notify::EventKind::Remove(_) => Some(ChangeKind::Removed),
                        _ => None,
                    };

                    if let Some(kind) = kind {
                        for path in event.paths {
                            if is_session_file(&path) {
                                debug!("[{}] change: {} ({:?})", context_id, path.display(), kind);
                                let _ = tx.send(ContextChange {
                                    context_id: context_id.clone(),
                                    path,
                                    kind,
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("[{}] watcher error: {}", context_id, e);
                }
            }
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;
        info!("[{}] watching {}", self.context_id, self.root.display());
        self.handle = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        if self.handle.take().is_some() {
            info!("[{}] stopped watching {}", self.context_id, self.root.display());
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// Watcher for contexts whose change feed lives elsewhere (remote links poll
/// on their own schedule). Only tracks the running flag.
#[derive(Debug, Default)]
pub struct NoopWatcher {
    running: bool,
}

impl ContextWatcher for NoopWatcher {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn reports_changes(&self) -> bool {
        false
    }
}

/// Check if a file looks like a session log we care about
fn is_session_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "jsonl" | "json")
}
