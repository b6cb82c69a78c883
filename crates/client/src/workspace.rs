//! User-visible navigation state for one root, and its reconciliation
//! against fresh backend listings.

use serde::{Deserialize, Serialize};
use sessionhub_core::{ProjectSummary, SessionSummary};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Tab {
    pub fn new(project_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pane {
    pub id: String,
    #[serde(default)]
    pub tab_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tab_id: Option<String>,
}

impl Pane {
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tab_ids: Vec::new(),
            active_tab_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationState {
    #[serde(default)]
    pub unread: u64,
    #[serde(default)]
    pub panel_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiFlags {
    #[serde(default)]
    pub sidebar_collapsed: bool,
    #[serde(default)]
    pub show_analytics: bool,
}

/// Everything a workspace snapshot captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    #[serde(default)]
    pub projects: Vec<ProjectSummary>,
    /// Session list of the selected project.
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
    #[serde(default)]
    pub selected_project_id: Option<String>,
    #[serde(default)]
    pub selected_session_id: Option<String>,
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub panes: Vec<Pane>,
    #[serde(default)]
    pub active_pane_id: Option<String>,
    #[serde(default)]
    pub notifications: NotificationState,
    #[serde(default)]
    pub ui: UiFlags,
}

impl Default for WorkspaceState {
    /// Valid empty workspace: no data, one empty pane.
    fn default() -> Self {
        let pane = Pane::empty();
        Self {
            projects: Vec::new(),
            sessions: Vec::new(),
            selected_project_id: None,
            selected_session_id: None,
            tabs: Vec::new(),
            active_pane_id: Some(pane.id.clone()),
            panes: vec![pane],
            notifications: NotificationState::default(),
            ui: UiFlags::default(),
        }
    }
}

/// What [`WorkspaceState::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Fresh listing was empty while the workspace had data; the workspace was kept.
    pub kept_stale: bool,
    pub dropped_tabs: usize,
    pub cleared_project_selection: bool,
    pub cleared_session_selection: bool,
}

impl WorkspaceState {
    pub fn has_data(&self) -> bool {
        !self.projects.is_empty() || !self.sessions.is_empty()
    }

    /// Open a tab in the active pane and focus it.
    pub fn open_tab(&mut self, project_id: &str, session_id: Option<String>) -> String {
        self.normalize();
        let tab = Tab::new(project_id, session_id);
        let tab_id = tab.id.clone();
        self.tabs.push(tab);
        let active = self.active_pane_id.clone();
        if let Some(pane) = self.panes.iter_mut().find(|p| Some(&p.id) == active.as_ref()) {
            pane.tab_ids.push(tab_id.clone());
            pane.active_tab_id = Some(tab_id.clone());
        }
        tab_id
    }

    /// Validate against fresh listings.
    ///
    /// `fresh_sessions` is the session list of the selected project, when one
    /// was fetched. If the workspace had data and the fresh project listing is
    /// empty, the listing is assumed to be a transient backend failure and the
    /// workspace data is kept as is.
    pub fn reconcile(
        &mut self,
        fresh_projects: Vec<ProjectSummary>,
        fresh_sessions: Option<Vec<SessionSummary>>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if fresh_projects.is_empty() && self.has_data() {
            report.kept_stale = true;
            self.normalize();
            return report;
        }

        self.projects = fresh_projects;
        let known_projects: HashSet<&str> = self.projects.iter().map(|p| p.id.as_str()).collect();

        if let Some(selected) = &self.selected_project_id {
            if !known_projects.contains(selected.as_str()) {
                self.selected_project_id = None;
                report.cleared_project_selection = true;
            }
        }
        match (&self.selected_project_id, fresh_sessions) {
            (Some(_), Some(sessions)) => self.sessions = sessions,
            (None, _) => self.sessions.clear(),
            (Some(_), None) => {}
        }

        let selected_project = self.selected_project_id.clone();
        let known_sessions: HashSet<&str> = self.sessions.iter().map(|s| s.id.as_str()).collect();
        if let Some(session) = &self.selected_session_id {
            if !known_sessions.contains(session.as_str()) {
                self.selected_session_id = None;
                report.cleared_session_selection = true;
            }
        }

        let before = self.tabs.len();
        self.tabs.retain(|tab| {
            if !known_projects.contains(tab.project_id.as_str()) {
                return false;
            }
            // Session lists are only known for the selected project.
            match (&tab.session_id, &selected_project) {
                (Some(session), Some(project)) if &tab.project_id == project => {
                    known_sessions.contains(session.as_str())
                }
                _ => true,
            }
        });
        report.dropped_tabs = before - self.tabs.len();

        self.normalize();
        report
    }

    /// Repair pane/tab references: every pane only names existing tabs, each
    /// pane's active tab is one of its tabs, at least one pane exists and the
    /// active pane exists.
    pub fn normalize(&mut self) {
        let live: HashSet<String> = self.tabs.iter().map(|t| t.id.clone()).collect();
        for pane in &mut self.panes {
            pane.tab_ids.retain(|id| live.contains(id));
            let active_ok = pane
                .active_tab_id
                .as_ref()
                .is_some_and(|id| pane.tab_ids.contains(id));
            if !active_ok {
                pane.active_tab_id = pane.tab_ids.first().cloned();
            }
        }
        if self.panes.is_empty() {
            self.panes.push(Pane::empty());
        }
        let pane_ok = self
            .active_pane_id
            .as_ref()
            .is_some_and(|id| self.panes.iter().any(|p| &p.id == id));
        if !pane_ok {
            self.active_pane_id = self.panes.first().map(|p| p.id.clone());
        }
    }
}
