use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub mod google_calendar;
pub mod init;
pub mod reconciler;
pub mod silae;
pub mod source;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod testing;

/// Run one adapter call under the per-call timeout.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
