//! Pagination cursors.
//!
//! Two layers:
//!
//! - [`RecencyCursor`] is the keyset anchor every scanner understands as its
//!   native cursor: "continue strictly after `(modified_at, session_id,
//!   project_id)`". Encoded as base64url JSON.
//! - [`CompositeCursor`] is the opaque token handed to clients of the combined
//!   feed. It records, per context, a native cursor / start / exhausted slot
//!   plus the last known total for that context. Wire format is standard
//!   base64 of `{"perContext": {..}, "perContextTotals": {..}}`.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::ContextId;
use crate::session::SessionSummary;
use crate::validate::ValidationError;

/// Wire marker for an exhausted context slot.
pub const EXHAUSTED: &str = "EXHAUSTED";

/// Pagination position of one context inside a composite cursor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CursorSlot {
    /// Not started yet (first page). Also the meaning of an absent slot.
    #[default]
    Start,
    /// Backend-native cursor for the next page.
    At(String),
    /// The context has no further pages.
    Exhausted,
}

impl CursorSlot {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    pub fn native(&self) -> Option<&str> {
        match self {
            Self::At(cursor) => Some(cursor),
            _ => None,
        }
    }
}

impl Serialize for CursorSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Start => serializer.serialize_none(),
            Self::At(cursor) => serializer.serialize_str(cursor),
            Self::Exhausted => serializer.serialize_str(EXHAUSTED),
        }
    }
}

impl<'de> Deserialize<'de> for CursorSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(match raw {
            None => Self::Start,
            Some(value) if value == EXHAUSTED => Self::Exhausted,
            Some(value) => Self::At(value),
        })
    }
}

/// Opaque multi-context pagination token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeCursor {
    #[serde(default)]
    pub per_context: BTreeMap<ContextId, CursorSlot>,
    #[serde(default)]
    pub per_context_totals: BTreeMap<ContextId, u64>,
}

impl CompositeCursor {
    /// Slot for a context. Contexts registered after the cursor was minted
    /// have no entry and start from the beginning.
    pub fn slot(&self, context_id: &ContextId) -> CursorSlot {
        self.per_context.get(context_id).cloned().unwrap_or_default()
    }

    pub fn total(&self, context_id: &ContextId) -> u64 {
        self.per_context_totals
            .get(context_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn encode(&self) -> String {
        // BTreeMap keys are strings and values are plain JSON, serialization cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, ValidationError> {
        let bytes = STANDARD
            .decode(token.trim())
            .map_err(|e| ValidationError::InvalidCursor {
                reason: format!("base64: {e}"),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| ValidationError::InvalidCursor {
            reason: format!("json: {e}"),
        })
    }

    /// Decode an optional wire cursor; `None` and empty strings mean "first page".
    pub fn decode_opt(token: Option<&str>) -> Result<Self, ValidationError> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => Self::decode(token),
            None => Ok(Self::default()),
        }
    }
}

/// Keyset anchor: the listing continues strictly after this position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyCursor {
    #[serde(rename = "t")]
    pub modified_at_ms: i64,
    #[serde(rename = "s")]
    pub session_id: String,
    #[serde(rename = "p")]
    pub project_id: String,
}

impl RecencyCursor {
    pub fn after(session: &SessionSummary) -> Self {
        Self {
            modified_at_ms: session.modified_at.timestamp_millis(),
            session_id: session.id.clone(),
            project_id: session.project_id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, ValidationError> {
        let bytes =
            URL_SAFE_NO_PAD
                .decode(token.trim())
                .map_err(|e| ValidationError::InvalidCursor {
                    reason: format!("base64url: {e}"),
                })?;
        serde_json::from_slice(&bytes).map_err(|e| ValidationError::InvalidCursor {
            reason: format!("json: {e}"),
        })
    }

    /// True when `session` sorts strictly after the anchor within one context.
    pub fn admits(&self, session: &SessionSummary) -> bool {
        let ms = session.modified_at.timestamp_millis();
        if ms != self.modified_at_ms {
            return ms < self.modified_at_ms;
        }
        (session.id.as_str(), session.project_id.as_str())
            > (self.session_id.as_str(), self.project_id.as_str())
    }
}
