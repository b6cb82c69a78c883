//! Request/response boundary between the client and the backend process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{ContextId, ContextInfo};
use crate::scanner::ScanError;
use crate::session::{CombinedSessionsResponse, ProjectSummary, SessionSummary};
use crate::validate::ValidationError;

// ─── Service Error ───────────────────────────────────────────────────────────

/// Framework-agnostic boundary error. Each variant maps to a status code so
/// any transport can render it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServiceError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Unavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Unavailable(m)
            | Self::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ServiceError {}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<ScanError> for ServiceError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Cursor(v) => v.into(),
            ScanError::ProjectNotFound(_) => Self::NotFound(e.to_string()),
            ScanError::Unavailable(_) => Self::Unavailable(e.to_string()),
            ScanError::Io(_) | ScanError::Other(_) => Self::Internal(e.to_string()),
        }
    }
}

// ─── Context switching ───────────────────────────────────────────────────────

/// Result of `context.switch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchResponse {
    pub context_id: ContextId,
    pub previous_context_id: ContextId,
}

// ─── Remote connection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub host: Option<String>,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(host: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Connected,
            host: Some(host.into()),
            error: None,
        }
    }
}

/// Fully resolved credentials for one remote root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConnectConfig {
    pub root_id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub remote_path: String,
}

// ─── Boundary traits ─────────────────────────────────────────────────────────

/// Everything the client may ask of the backend process.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, ServiceError>;

    async fn get_active_context(&self) -> Result<ContextId, ServiceError>;

    async fn switch_context(&self, context_id: &str) -> Result<SwitchResponse, ServiceError>;

    async fn set_combined_watchers(&self, enabled: bool) -> Result<(), ServiceError>;

    async fn get_combined_sessions_paginated(
        &self,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<CombinedSessionsResponse, ServiceError>;

    /// Projects of the active context.
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ServiceError>;

    /// Sessions of one project of the active context.
    async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>, ServiceError>;

    /// Unread notification count for the active context.
    async fn notification_count(&self) -> Result<u64, ServiceError>;

    /// Reset the active context's unread count.
    async fn mark_notifications_read(&self) -> Result<(), ServiceError>;
}

/// Remote-connection manager. At most one remote connection is live.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, config: &RemoteConnectConfig) -> Result<(), ServiceError>;

    async fn disconnect(&self) -> ConnectionStatus;

    async fn status(&self) -> ConnectionStatus;
}
