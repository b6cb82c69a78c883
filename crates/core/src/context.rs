use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::validate::ValidationError;

const MAX_CONTEXT_ID_LEN: usize = 128;
const LOCAL_CONTEXT_ID: &str = "local";
const REMOTE_CONTEXT_PREFIX: &str = "remote:";

static CONTEXT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._:\-]+$").expect("context id pattern is a valid regex")
});

/// Identifier of one backend data source.
///
/// Always validated: non-empty, at most 128 characters, drawn from
/// `[A-Za-z0-9._:-]`. Construct through [`ContextId::parse`] at trust
/// boundaries; [`ContextId::local`] and [`ContextId::remote`] build the
/// well-known shapes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextId(String);

impl ContextId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyContextId);
        }
        if trimmed.len() > MAX_CONTEXT_ID_LEN {
            return Err(ValidationError::ContextIdTooLong {
                len: trimmed.len(),
                max: MAX_CONTEXT_ID_LEN,
            });
        }
        if !CONTEXT_ID_RE.is_match(trimmed) {
            return Err(ValidationError::InvalidContextId {
                id: trimmed.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The permanent local context.
    pub fn local() -> Self {
        Self(LOCAL_CONTEXT_ID.to_string())
    }

    /// Context id for a remote root. Root ids are validated by the config
    /// layer with the same character set, so this cannot produce an invalid id.
    pub fn remote(root_id: &str) -> Self {
        Self(format!("{REMOTE_CONTEXT_PREFIX}{root_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_CONTEXT_ID
    }

    /// Root id encoded in a `remote:<root>` context id.
    pub fn remote_root_id(&self) -> Option<&str> {
        self.0.strip_prefix(REMOTE_CONTEXT_PREFIX)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContextId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContextId> for String {
    fn from(value: ContextId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Local,
    Remote,
}

impl ContextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public descriptor of a registered context, as returned by `context.list()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub id: ContextId,
    #[serde(rename = "type")]
    pub kind: ContextKind,
    pub root_id: String,
    pub root_name: String,
    pub connected: bool,
}

impl ContextInfo {
    pub fn is_remote(&self) -> bool {
        self.kind == ContextKind::Remote
    }
}
