use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::{
    DestinationEvent, EventDraft, Operation, ShiftKey, ShiftRecord, SyncFailure, SyncSummary,
    SyncWarning,
};
use crate::services::store::{DeleteOutcome, EventStore};
use crate::services::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    /// No shift has this key any more.
    Removed,
    /// The shift changed; a create with the new representation follows.
    Replaced,
    /// Another event already carries the same key.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct PlannedDelete {
    pub event_id: String,
    pub key: ShiftKey,
    pub reason: DeleteReason,
}

#[derive(Debug, Clone)]
pub struct PlannedCreate {
    pub draft: EventDraft,
    /// Event this create replaces. The create is skipped if any delete for
    /// its key fails.
    pub replaces: Option<String>,
}

/// Minimal diff between the shifts of a week and its managed events.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub deletes: Vec<PlannedDelete>,
    pub creates: Vec<PlannedCreate>,
    pub unchanged: Vec<ShiftKey>,
    pub warnings: Vec<SyncWarning>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty()
    }
}

/// Computes and applies the create/delete operations that make the
/// destination calendar show exactly the given shifts.
///
/// - Shifts and managed events are matched on `(employee, date, start)`.
/// - Matching pairs whose representation differs are replaced (delete, then
///   create); identical pairs are left alone.
/// - Every delete runs before any create, one call at a time, so a failure
///   midway leaves an event missing rather than duplicated.
/// - A failing call is recorded against its key and the rest carry on.
pub struct Reconciler<'a> {
    store: &'a dyn EventStore,
    timezone: Tz,
    call_timeout: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn EventStore, timezone: Tz, call_timeout: Duration) -> Self {
        Self {
            store,
            timezone,
            call_timeout,
        }
    }

    pub async fn reconcile(
        &self,
        shifts: Vec<ShiftRecord>,
        existing: Vec<DestinationEvent>,
    ) -> SyncSummary {
        let plan = self.plan(shifts, existing);
        self.apply(plan).await
    }

    /// Classify every key without touching the store.
    pub fn plan(&self, shifts: Vec<ShiftRecord>, existing: Vec<DestinationEvent>) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();
        let shifts = dedupe_shifts(shifts, &mut plan.warnings);

        let mut existing_by_key: BTreeMap<ShiftKey, Vec<DestinationEvent>> = BTreeMap::new();
        for event in existing {
            existing_by_key
                .entry(event.sync_tag.clone())
                .or_default()
                .push(event);
        }

        for (key, shift) in shifts {
            let draft = shift.to_draft(&self.timezone);

            let Some(mut events) = existing_by_key.remove(&key) else {
                plan.creates.push(PlannedCreate {
                    draft,
                    replaces: None,
                });
                continue;
            };

            // Keep the event that already matches, if any; the others are extras.
            let keep = events.iter().position(|e| draft.matches(e)).unwrap_or(0);
            let kept = events.remove(keep);
            for extra in events {
                plan.deletes.push(PlannedDelete {
                    event_id: extra.event_id,
                    key: key.clone(),
                    reason: DeleteReason::Duplicate,
                });
            }

            if draft.matches(&kept) {
                plan.unchanged.push(key);
            } else {
                plan.deletes.push(PlannedDelete {
                    event_id: kept.event_id.clone(),
                    key,
                    reason: DeleteReason::Replaced,
                });
                plan.creates.push(PlannedCreate {
                    draft,
                    replaces: Some(kept.event_id),
                });
            }
        }

        for (key, events) in existing_by_key {
            for event in events {
                plan.deletes.push(PlannedDelete {
                    event_id: event.event_id,
                    key: key.clone(),
                    reason: DeleteReason::Removed,
                });
            }
        }

        plan
    }

    /// Issue the planned deletes, then the planned creates, sequentially.
    pub async fn apply(&self, plan: ReconcilePlan) -> SyncSummary {
        if plan.is_noop() {
            info!("Calendar already up to date ({} shifts)", plan.unchanged.len());
        }

        let mut summary = SyncSummary {
            unchanged: plan.unchanged.len(),
            warnings: plan.warnings,
            ..SyncSummary::default()
        };
        // Keys with an event still in place that should have gone.
        let mut failed_deletes: HashSet<ShiftKey> = HashSet::new();

        for delete in &plan.deletes {
            let result = with_timeout(
                self.call_timeout,
                "delete event",
                self.store.delete_event(&delete.event_id),
            )
            .await
            .map_err(write_failure);

            match result {
                Ok(DeleteOutcome::Deleted) => {
                    info!(
                        "Deleted calendar event {} for shift {} ({:?})",
                        delete.event_id, delete.key, delete.reason
                    );
                    summary.deleted += 1;
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    info!(
                        "Calendar event {} for shift {} was already gone",
                        delete.event_id, delete.key
                    );
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to delete calendar event {} for shift {}: {}",
                        delete.event_id, delete.key, e
                    );
                    failed_deletes.insert(delete.key.clone());
                    summary
                        .errors
                        .push(SyncFailure::new(delete.key.clone(), Operation::Delete, &e));
                }
            }
        }

        for create in &plan.creates {
            if failed_deletes.contains(&create.draft.key) {
                warn!(
                    "Not creating event for shift {} (replacing {:?}); an outdated event could not be deleted",
                    create.draft.key, create.replaces
                );
                continue;
            }

            let result = with_timeout(
                self.call_timeout,
                "create event",
                self.store.create_event(&create.draft),
            )
            .await
            .map_err(write_failure);

            match result {
                Ok(event) => {
                    info!(
                        "Created calendar event {} for shift {} ({} to {})",
                        event.event_id, create.draft.key, create.draft.start, create.draft.end
                    );
                    summary.created += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to create calendar event for shift {}: {}",
                        create.draft.key, e
                    );
                    summary.errors.push(SyncFailure::new(
                        create.draft.key.clone(),
                        Operation::Create,
                        &e,
                    ));
                }
            }
        }

        summary
    }
}

/// A create or delete that timed out is a write failure like any other.
fn write_failure(error: AppError) -> AppError {
    match error {
        AppError::Timeout { .. } => AppError::EventStoreWrite(error.to_string()),
        other => other,
    }
}

/// Collapse records sharing a key, keeping the one that ends last.
fn dedupe_shifts(
    shifts: Vec<ShiftRecord>,
    warnings: &mut Vec<SyncWarning>,
) -> BTreeMap<ShiftKey, ShiftRecord> {
    let mut by_key: BTreeMap<ShiftKey, ShiftRecord> = BTreeMap::new();

    for shift in shifts {
        match by_key.entry(shift.key()) {
            Entry::Vacant(slot) => {
                slot.insert(shift);
            }
            Entry::Occupied(mut slot) => {
                let discarded = if shift.end_local() > slot.get().end_local() {
                    slot.insert(shift)
                } else {
                    shift
                };
                warn!(
                    "Duplicate shift {}: keeping end {}, discarding end {}",
                    slot.key(),
                    slot.get().end_time(),
                    discarded.end_time()
                );
                warnings.push(SyncWarning::DuplicateShift {
                    key: slot.key().clone(),
                    kept_end: slot.get().end_time(),
                    discarded_end: discarded.end_time(),
                });
            }
        }
    }

    by_key
}
