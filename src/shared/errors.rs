use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One human-readable validation failure, keyed by the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Terminal failures surfaced to the caller. Partial failures (oversized
/// uploads, blocked items inside a bulk batch) are folded into successful
/// results instead and never appear here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("blocked by open deals: {}", .blocking.join(", "))]
    BusinessRuleBlocked { blocking: Vec<String> },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
