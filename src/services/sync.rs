use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{AppError, AppResult};
use crate::models::{DateRange, ShiftRecord, SyncSummary, SyncWarning};
use crate::services::reconciler::Reconciler;
use crate::services::source::ShiftSource;
use crate::services::store::EventStore;
use crate::services::with_timeout;

/// What one run did, printed as JSON on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    #[serde(flatten)]
    pub summary: SyncSummary,
}

/// Weekly sync manager:
///
/// - Picks the target week (next Monday to Monday, or the configured override).
/// - Fetches the employee's shifts from the source; invalid records become
///   warnings, records dated outside the week are ignored.
/// - Lists the managed events of the week and keeps those whose tag date is
///   inside it, so a neighbouring week's overnight shift is never touched.
/// - Hands both sides to the [`Reconciler`].
///
/// Failing to read either side aborts the run before anything is written.
pub struct WeeklySyncManager<S, E> {
    source: S,
    store: E,
    settings: SyncConfig,
}

impl<S: ShiftSource, E: EventStore> WeeklySyncManager<S, E> {
    pub fn new(source: S, store: E, settings: SyncConfig) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }

    pub fn target_range(&self, now: DateTime<Utc>) -> DateRange {
        match self.settings.week_start {
            Some(date) => DateRange::week_containing(date, self.settings.timezone),
            None => DateRange::next_week(now, self.settings.timezone),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> AppResult<SyncReport> {
        let range = self.target_range(now);
        info!("Starting shift sync for week {}", range);

        let fetched = with_timeout(
            self.settings.call_timeout,
            "fetch shifts",
            self.source.fetch(&range),
        )
        .await
        .map_err(|e| match e {
            AppError::SourceUnavailable(_) => e,
            other => AppError::SourceUnavailable(other.to_string()),
        })
        .inspect_err(|e| error!("Aborting sync, shifts could not be fetched: {}", e))?;

        let mut warnings = Vec::new();
        let mut shifts: Vec<ShiftRecord> = Vec::new();
        for record in fetched {
            match record {
                Ok(shift) if range.contains(shift.date()) => shifts.push(shift),
                Ok(shift) => debug!("Ignoring shift {} outside week {}", shift.key(), range),
                Err(invalid) => {
                    warn!("Dropping invalid shift record: {}", invalid);
                    warnings.push(SyncWarning::from(invalid));
                }
            }
        }
        info!("Fetched {} shifts for week {}", shifts.len(), range);

        let listed = with_timeout(
            self.settings.call_timeout,
            "list events",
            self.store.list_managed_events(&range),
        )
        .await
        .map_err(|e| match e {
            AppError::EventStoreRead(_) => e,
            other => AppError::EventStoreRead(other.to_string()),
        })
        .inspect_err(|e| error!("Aborting sync, calendar could not be read: {}", e))?;

        let existing: Vec<_> = listed
            .into_iter()
            .filter(|event| {
                let owned = range.contains(event.sync_tag.date);
                if !owned {
                    debug!(
                        "Leaving event {} ({}) to the run of its own week",
                        event.event_id, event.sync_tag
                    );
                }
                owned
            })
            .collect();

        let reconciler = Reconciler::new(
            &self.store,
            self.settings.timezone,
            self.settings.call_timeout,
        );
        let mut summary = reconciler.reconcile(shifts, existing).await;
        warnings.append(&mut summary.warnings);
        summary.warnings = warnings;

        info!(
            "Shift sync for week {} finished: {} created, {} deleted, {} unchanged, {} errors, {} warnings",
            range,
            summary.created,
            summary.deleted,
            summary.unchanged,
            summary.errors.len(),
            summary.warnings.len()
        );

        Ok(SyncReport {
            week_start: range.start,
            week_end: range.last_day(),
            summary,
        })
    }
}
