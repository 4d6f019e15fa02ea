use crate::models::InvalidShiftError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid shift: {0}")]
    InvalidShift(#[from] InvalidShiftError),

    #[error("Shift source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Event store read failed: {0}")]
    EventStoreRead(String),

    #[error("Event store write failed: {0}")]
    EventStoreWrite(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Google Calendar API error: {0}")]
    GoogleApi(String),
}

impl AppError {
    /// Stable machine-readable code, reported next to failed keys in the run summary.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidShift(_) => "INVALID_SHIFT",
            AppError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            AppError::EventStoreRead(_) => "EVENT_STORE_READ_FAILED",
            AppError::EventStoreWrite(_) => "EVENT_STORE_WRITE_FAILED",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::Request(_) => "EXTERNAL_REQUEST_FAILED",
            AppError::GoogleApi(_) => "GOOGLE_API_ERROR",
        }
    }

    /// Only a missing source or an unreadable destination stops a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::SourceUnavailable(_) | AppError::EventStoreRead(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
