use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{DateRange, DestinationEvent, EventDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The event was already gone; deletes are idempotent.
    AlreadyAbsent,
}

/// The destination calendar, seen only through machine-managed events.
///
/// Pagination is the implementation's business: every call returns or
/// affects one complete logical set.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Tagged events overlapping `range`. Foreign events are never returned.
    async fn list_managed_events(&self, range: &DateRange) -> AppResult<Vec<DestinationEvent>>;

    /// Create a tagged event; failures are `AppError::EventStoreWrite`.
    async fn create_event(&self, draft: &EventDraft) -> AppResult<DestinationEvent>;

    async fn delete_event(&self, event_id: &str) -> AppResult<DeleteOutcome>;
}
