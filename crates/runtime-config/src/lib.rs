//! Shared backend/client configuration types.
//!
//! Both the backend service and the client read `sessionhub.toml` through
//! these types. Root definitions are decoded into tagged variants and checked
//! by [`RuntimeConfig::validate`] before anything else consumes them; nothing
//! in this crate mutates the root → profile → credentials mapping after load.

use serde::{Deserialize, Serialize};
use sessionhub_core::{ContextId, RemoteConnectConfig};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "sessionhub.toml";

/// Root id used when no local root is configured.
pub const DEFAULT_LOCAL_ROOT_ID: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate root id: {0}")]
    DuplicateRoot(String),
    #[error("duplicate remote profile id: {0}")]
    DuplicateProfile(String),
    #[error("invalid root id {id:?}: {reason}")]
    InvalidRootId { id: String, reason: String },
    #[error("root {root} references unknown remote profile {profile}")]
    UnknownProfile { root: String, profile: String },
    #[error("root {0} has an empty path")]
    EmptyPath(String),
    #[error("only one local root may be configured, found {0}")]
    MultipleLocalRoots(usize),
    #[error("unknown root: {0}")]
    UnknownRoot(String),
    #[error("root {0} is not a remote root")]
    NotRemote(String),
    #[error("could not determine home directory")]
    NoHome,
}

/// Top-level configuration (persisted as `sessionhub.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub pagination: PaginationSettings,
    #[serde(default)]
    pub snapshots: SnapshotSettings,
    #[serde(default)]
    pub ui: UiSettings,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub roots: Vec<RootConfig>,
    #[serde(default)]
    pub remote_profiles: Vec<RemoteProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationSettings {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_recency_cache_size")]
    pub recency_cache_size: usize,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            overfetch: default_overfetch(),
            max_limit: default_max_limit(),
            recency_cache_size: default_recency_cache_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_snapshot_ttl_secs")]
    pub ttl_secs: u64,
    /// Directory for the file-backed snapshot store. In-memory when unset.
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_snapshot_ttl_secs(),
            dir: None,
        }
    }
}

/// Change-feed tuning for context watchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Quiet period before a burst of file changes re-warms a context.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UiSettings {
    /// Persisted combined-sessions preference.
    #[serde(default)]
    pub combined_sessions: bool,
}

/// A configured data source. Tagged by `type` in TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RootConfig {
    Local {
        id: String,
        name: String,
        path: String,
    },
    Remote {
        id: String,
        name: String,
        profile: String,
        remote_path: String,
    },
}

impl RootConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Local { id, .. } | Self::Remote { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Remote { name, .. } => name,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Context id this root materializes as once registered.
    pub fn context_id(&self) -> ContextId {
        match self {
            Self::Local { .. } => ContextId::local(),
            Self::Remote { id, .. } => ContextId::remote(id),
        }
    }
}

/// Local root with its path already expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRoot {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteProfile {
    pub id: String,
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
}

/// Per-call credential overrides (e.g. a password typed into a prompt).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOverrides {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub password: Option<String>,
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a path; a missing file yields the validated default.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut profile_ids = HashSet::new();
        for profile in &self.remote_profiles {
            if !profile_ids.insert(profile.id.as_str()) {
                return Err(ConfigError::DuplicateProfile(profile.id.clone()));
            }
        }

        let mut root_ids = HashSet::new();
        let mut local_roots = 0usize;
        for root in &self.roots {
            let id = root.id();
            // Remote roots become `remote:<id>` context ids; hold local ids to the same rules.
            ContextId::parse(&format!("remote:{id}")).map_err(|e| {
                ConfigError::InvalidRootId {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if id.is_empty() {
                return Err(ConfigError::InvalidRootId {
                    id: id.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            if !root_ids.insert(id) {
                return Err(ConfigError::DuplicateRoot(id.to_string()));
            }
            match root {
                RootConfig::Local { path, .. } => {
                    local_roots += 1;
                    if path.trim().is_empty() {
                        return Err(ConfigError::EmptyPath(id.to_string()));
                    }
                }
                RootConfig::Remote {
                    profile,
                    remote_path,
                    ..
                } => {
                    if !profile_ids.contains(profile.as_str()) {
                        return Err(ConfigError::UnknownProfile {
                            root: id.to_string(),
                            profile: profile.clone(),
                        });
                    }
                    if remote_path.trim().is_empty() {
                        return Err(ConfigError::EmptyPath(id.to_string()));
                    }
                }
            }
        }
        if local_roots > 1 {
            return Err(ConfigError::MultipleLocalRoots(local_roots));
        }
        Ok(())
    }

    pub fn root(&self, root_id: &str) -> Option<&RootConfig> {
        self.roots.iter().find(|root| root.id() == root_id)
    }

    /// The single local root, falling back to the Claude Code projects directory.
    pub fn local_root(&self) -> LocalRoot {
        let configured = self.roots.iter().find_map(|root| match root {
            RootConfig::Local { id, name, path } => Some((id.clone(), name.clone(), path.clone())),
            RootConfig::Remote { .. } => None,
        });
        let (id, name, path) = configured.unwrap_or_else(|| {
            (
                DEFAULT_LOCAL_ROOT_ID.to_string(),
                "This machine".to_string(),
                DEFAULT_LOCAL_PATH.to_string(),
            )
        });
        LocalRoot {
            id,
            name,
            path: expand_path(&path),
        }
    }

    pub fn remote_roots(&self) -> impl Iterator<Item = &RootConfig> {
        self.roots.iter().filter(|root| root.is_remote())
    }

    /// Resolve root → profile → connection credentials.
    pub fn resolve_credentials(
        &self,
        root_id: &str,
        overrides: Option<&CredentialOverrides>,
    ) -> Result<RemoteConnectConfig, ConfigError> {
        let root = self
            .root(root_id)
            .ok_or_else(|| ConfigError::UnknownRoot(root_id.to_string()))?;
        let RootConfig::Remote {
            profile,
            remote_path,
            ..
        } = root
        else {
            return Err(ConfigError::NotRemote(root_id.to_string()));
        };
        let profile = self
            .remote_profiles
            .iter()
            .find(|p| &p.id == profile)
            .ok_or_else(|| ConfigError::UnknownProfile {
                root: root_id.to_string(),
                profile: profile.clone(),
            })?;

        let overrides = overrides.cloned().unwrap_or_default();
        Ok(RemoteConnectConfig {
            root_id: root_id.to_string(),
            host: profile.host.clone(),
            port: overrides.port.unwrap_or(profile.port),
            user: overrides.user.unwrap_or_else(|| profile.user.clone()),
            identity_file: overrides
                .identity_file
                .or_else(|| profile.identity_file.clone()),
            password: overrides.password,
            remote_path: remote_path.clone(),
        })
    }
}

/// `$HOME/.config/sessionhub`
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config").join("sessionhub"))
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand `~` and environment variables; leaves the path untouched when expansion fails.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

pub const DEFAULT_LOCAL_PATH: &str = "~/.claude/projects";

// ── Serde default functions ─────────────────────────────────────────────

fn default_page_size() -> usize {
    50
}
fn default_overfetch() -> usize {
    5
}
fn default_max_limit() -> usize {
    200
}
fn default_recency_cache_size() -> usize {
    50
}
fn default_snapshot_ttl_secs() -> u64 {
    300
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_ssh_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[pagination]
page_size = 25

[[roots]]
type = "local"
id = "laptop"
name = "Laptop"
path = "/tmp/projects"

[[roots]]
type = "remote"
id = "gpu-box"
name = "GPU box"
profile = "lab"
remote_path = "~/.claude/projects"

[[remote_profiles]]
id = "lab"
host = "gpu.lab.internal"
user = "dev"
identity_file = "~/.ssh/id_lab"
"#;

    #[test]
    fn defaults_are_stable() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.pagination.page_size, 50);
        assert_eq!(cfg.pagination.overfetch, 5);
        assert_eq!(cfg.pagination.max_limit, 200);
        assert_eq!(cfg.snapshots.ttl_secs, 300);
        assert_eq!(cfg.watch.debounce_ms, 500);
        assert!(!cfg.ui.combined_sessions);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.local_root().id, DEFAULT_LOCAL_ROOT_ID);
    }

    #[test]
    fn roots_decode_into_tagged_variants() {
        let cfg = RuntimeConfig::parse(SAMPLE).expect("parse sample");
        assert_eq!(cfg.pagination.page_size, 25);
        assert_eq!(cfg.pagination.overfetch, 5);
        assert_eq!(cfg.roots.len(), 2);
        assert!(!cfg.roots[0].is_remote());
        assert_eq!(cfg.roots[1].context_id(), ContextId::remote("gpu-box"));
        assert_eq!(cfg.local_root().path, PathBuf::from("/tmp/projects"));
        assert_eq!(cfg.remote_roots().count(), 1);
        assert_eq!(cfg.remote_profiles[0].port, 22);
    }

    #[test]
    fn credentials_resolve_through_profile_with_overrides() {
        let cfg = RuntimeConfig::parse(SAMPLE).expect("parse sample");
        let plain = cfg.resolve_credentials("gpu-box", None).unwrap();
        assert_eq!(plain.host, "gpu.lab.internal");
        assert_eq!(plain.user, "dev");
        assert_eq!(plain.port, 22);
        assert_eq!(plain.identity_file.as_deref(), Some("~/.ssh/id_lab"));
        assert_eq!(plain.remote_path, "~/.claude/projects");

        let overridden = cfg
            .resolve_credentials(
                "gpu-box",
                Some(&CredentialOverrides {
                    user: Some("root".to_string()),
                    port: Some(2222),
                    password: Some("hunter2".to_string()),
                    ..Default::default()
                }),
            )
            .unwrap();
        assert_eq!(overridden.user, "root");
        assert_eq!(overridden.port, 2222);
        assert_eq!(overridden.password.as_deref(), Some("hunter2"));

        assert!(matches!(
            cfg.resolve_credentials("laptop", None),
            Err(ConfigError::NotRemote(_))
        ));
        assert!(matches!(
            cfg.resolve_credentials("nope", None),
            Err(ConfigError::UnknownRoot(_))
        ));
    }

    #[test]
    fn validation_rejects_inconsistent_roots() {
        let unknown_profile = r#"
[[roots]]
type = "remote"
id = "x"
name = "X"
profile = "missing"
remote_path = "/data"
"#;
        assert!(matches!(
            RuntimeConfig::parse(unknown_profile),
            Err(ConfigError::UnknownProfile { .. })
        ));

        let duplicate = r#"
[[roots]]
type = "local"
id = "a"
name = "A"
path = "/a"

[[roots]]
type = "local"
id = "a"
name = "B"
path = "/b"
"#;
        assert!(matches!(
            RuntimeConfig::parse(duplicate),
            Err(ConfigError::DuplicateRoot(_))
        ));

        let two_locals = r#"
[[roots]]
type = "local"
id = "a"
name = "A"
path = "/a"

[[roots]]
type = "local"
id = "b"
name = "B"
path = "/b"
"#;
        assert!(matches!(
            RuntimeConfig::parse(two_locals),
            Err(ConfigError::MultipleLocalRoots(2))
        ));

        let bad_id = r#"
[[roots]]
type = "local"
id = "has space"
name = "A"
path = "/a"
"#;
        assert!(matches!(
            RuntimeConfig::parse(bad_id),
            Err(ConfigError::InvalidRootId { .. })
        ));

        let unknown_type = r#"
[[roots]]
type = "cloud"
id = "a"
name = "A"
"#;
        assert!(matches!(
            RuntimeConfig::parse(unknown_type),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig::load_from(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(cfg.roots.is_empty());

        let path = dir.path().join("custom.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = RuntimeConfig::load_from(&path).unwrap();
        assert_eq!(cfg.roots.len(), 2);
    }
}
