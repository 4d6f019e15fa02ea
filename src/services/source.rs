use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{DateRange, InvalidShiftError, ShiftRecord};

/// A record as delivered by the source: either a valid shift or the reason it
/// was rejected at the boundary.
pub type FetchedShift = Result<ShiftRecord, InvalidShiftError>;

/// Where shifts come from.
///
/// Implementations must be idempotent per call. An empty vector is a valid
/// answer (a week off); network or authentication problems are reported as
/// `AppError::SourceUnavailable`.
#[async_trait]
pub trait ShiftSource: Send + Sync {
    async fn fetch(&self, range: &DateRange) -> AppResult<Vec<FetchedShift>>;
}
