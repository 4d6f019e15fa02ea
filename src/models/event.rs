use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::models::shift::ShiftKey;

// ============================================================================
// Destination events
// ============================================================================

/// A machine-managed event already present in the destination calendar.
///
/// Only events carrying a decodable [`SyncTag`] are ever materialized as a
/// `DestinationEvent`; anything else in the calendar is invisible to the sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationEvent {
    pub event_id: String,
    pub sync_tag: ShiftKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
}

/// What a shift should look like in the destination calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub key: ShiftKey,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl EventDraft {
    /// True when `event` already shows exactly this draft.
    ///
    /// Instants are compared in UTC; text fields are compared trimmed, with
    /// an empty value equal to a missing one.
    pub fn matches(&self, event: &DestinationEvent) -> bool {
        self.key == event.sync_tag
            && self.start.with_timezone(&Utc) == event.start
            && self.end.with_timezone(&Utc) == event.end
            && self.title.trim() == event.title.trim()
            && normalized(self.description.as_deref()) == normalized(event.description.as_deref())
            && normalized(self.location.as_deref()) == normalized(event.location.as_deref())
    }

    /// The managed event this draft becomes once stored under `event_id`.
    pub fn to_event(&self, event_id: impl Into<String>) -> DestinationEvent {
        DestinationEvent {
            event_id: event_id.into(),
            sync_tag: self.key.clone(),
            start: self.start.with_timezone(&Utc),
            end: self.end.with_timezone(&Utc),
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
        }
    }
}

fn normalized(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Sync tag
// ============================================================================

/// Marker embedded in an event's private properties. It flags the event as
/// machine-managed and carries the originating shift key.
pub struct SyncTag;

impl SyncTag {
    pub const MARKER_KEY: &'static str = "shift_sync_managed";
    pub const MARKER_VALUE: &'static str = "weekly_shift_sync";
    pub const EMPLOYEE_KEY: &'static str = "shift_sync_employee";
    pub const DATE_KEY: &'static str = "shift_sync_date";
    pub const START_KEY: &'static str = "shift_sync_start";

    pub fn encode(key: &ShiftKey) -> HashMap<String, String> {
        HashMap::from([
            (Self::MARKER_KEY.to_string(), Self::MARKER_VALUE.to_string()),
            (Self::EMPLOYEE_KEY.to_string(), key.employee_id.clone()),
            (Self::DATE_KEY.to_string(), key.date.format("%Y-%m-%d").to_string()),
            (
                Self::START_KEY.to_string(),
                key.start_time.format("%H:%M:%S").to_string(),
            ),
        ])
    }

    /// Returns `None` unless the marker is present and every key part parses.
    pub fn decode(properties: &HashMap<String, String>) -> Option<ShiftKey> {
        if properties.get(Self::MARKER_KEY).map(String::as_str) != Some(Self::MARKER_VALUE) {
            return None;
        }

        let employee_id = properties.get(Self::EMPLOYEE_KEY)?.trim();
        if employee_id.is_empty() {
            return None;
        }
        let date = NaiveDate::parse_from_str(properties.get(Self::DATE_KEY)?, "%Y-%m-%d").ok()?;
        let start_time =
            NaiveTime::parse_from_str(properties.get(Self::START_KEY)?, "%H:%M:%S").ok()?;

        Some(ShiftKey {
            employee_id: employee_id.to_string(),
            date,
            start_time,
        })
    }
}
