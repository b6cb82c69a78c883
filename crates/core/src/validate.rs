use thiserror::Error;

/// Malformed input rejected at the request boundary, before any state is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("context id must not be empty")]
    EmptyContextId,
    #[error("context id is {len} characters long, limit is {max}")]
    ContextIdTooLong { len: usize, max: usize },
    #[error("invalid context id: {id}")]
    InvalidContextId { id: String },
    #[error("limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: i64, max: usize },
    #[error("invalid cursor: {reason}")]
    InvalidCursor { reason: String },
    #[error("missing required field: {field}")]
    MissingField { field: String },
}

/// Validate a requested page size. Accepts a signed value because the wire
/// contract carries a plain number.
pub fn validate_limit(limit: i64, max: usize) -> Result<usize, ValidationError> {
    if limit < 1 || limit as u64 > max as u64 {
        return Err(ValidationError::InvalidLimit { limit, max });
    }
    Ok(limit as usize)
}
