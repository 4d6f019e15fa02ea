use chrono::NaiveTime;
use serde::Serialize;

use crate::error::AppError;
use crate::models::shift::{InvalidShiftError, ShiftKey};

// ============================================================================
// Run summary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Delete,
}

/// One create or delete that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub key: ShiftKey,
    pub operation: Operation,
    pub code: String,
    pub message: String,
}

impl SyncFailure {
    pub fn new(key: ShiftKey, operation: Operation, error: &AppError) -> Self {
        Self {
            key,
            operation,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Non-fatal findings about the source data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncWarning {
    /// Several records shared a key; the one ending last was kept.
    DuplicateShift {
        key: ShiftKey,
        kept_end: NaiveTime,
        discarded_end: NaiveTime,
    },
    /// A record failed validation and was dropped.
    InvalidShift { reference: String, reason: String },
}

impl From<InvalidShiftError> for SyncWarning {
    fn from(error: InvalidShiftError) -> Self {
        SyncWarning::InvalidShift {
            reference: error.reference,
            reason: error.reason,
        }
    }
}

/// Outcome of reconciling one week. Replacements count once in `deleted`
/// and once in `created`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub errors: Vec<SyncFailure>,
    pub warnings: Vec<SyncWarning>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<&ShiftKey> {
        self.errors.iter().map(|failure| &failure.key).collect()
    }
}
