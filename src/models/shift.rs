use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::date_range::localize;
use crate::models::event::EventDraft;

const DEFAULT_TITLE: &str = "Work shift";

// ============================================================================
// Validation error
// ============================================================================

/// A source record that cannot become a [`ShiftRecord`].
///
/// `reference` identifies the offending record in the source (portal id or
/// employee/date pair) so the warning can be traced back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record {reference}: {reason}")]
pub struct InvalidShiftError {
    pub reference: String,
    pub reason: String,
}

impl InvalidShiftError {
    pub fn new(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Shift identity
// ============================================================================

/// Identity of a shift across runs: same employee, same day, same start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShiftKey {
    pub employee_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

impl fmt::Display for ShiftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} {}",
            self.employee_id,
            self.date,
            self.start_time.format("%H:%M")
        )
    }
}

// ============================================================================
// Shift record
// ============================================================================

/// One scheduled work period for one employee, validated at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftRecord {
    employee_id: String,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    role: Option<String>,
    location: Option<String>,
    code: Option<String>,
    /// Portal wording of the shift length, e.g. `8h`.
    duration: Option<String>,
    break_minutes: Option<u32>,
    notes: Option<String>,
}

impl ShiftRecord {
    pub fn new(
        employee_id: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Self, InvalidShiftError> {
        let employee_id = employee_id.into().trim().to_string();
        if employee_id.is_empty() {
            return Err(InvalidShiftError::new(
                format!("?@{}", date),
                "employee id is empty",
            ));
        }

        Ok(Self {
            employee_id,
            date,
            start_time,
            end_time,
            role: None,
            location: None,
            code: None,
            duration: None,
            break_minutes: None,
            notes: None,
        })
    }

    /// Build a record from textual fields: `YYYY-MM-DD` and `HH:MM[:SS]`.
    pub fn parse(
        employee_id: &str,
        date: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<Self, InvalidShiftError> {
        let reference = format!("{}@{}", employee_id.trim(), date.trim());

        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| {
            InvalidShiftError::new(&reference, format!("invalid date '{}'", date))
        })?;
        let start = parse_wall_clock(start_time).ok_or_else(|| {
            InvalidShiftError::new(&reference, format!("invalid start time '{}'", start_time))
        })?;
        let end = parse_wall_clock(end_time).ok_or_else(|| {
            InvalidShiftError::new(&reference, format!("invalid end time '{}'", end_time))
        })?;

        Self::new(employee_id, date, start, end)
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = non_blank(role.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = non_blank(location.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = non_blank(code.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = non_blank(duration.into());
        self
    }

    pub fn with_break_minutes(mut self, minutes: u32) -> Self {
        self.break_minutes = (minutes > 0).then_some(minutes);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = non_blank(notes.into());
        self
    }

    #[cfg(test)]
    pub fn employee_id(&self) -> &str {
        &self.employee_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end_time
    }

    pub fn key(&self) -> ShiftKey {
        ShiftKey {
            employee_id: self.employee_id.clone(),
            date: self.date,
            start_time: self.start_time,
        }
    }

    /// An end earlier than the start means the shift finishes the next day.
    pub fn is_overnight(&self) -> bool {
        self.end_time < self.start_time
    }

    pub fn start_local(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn end_local(&self) -> NaiveDateTime {
        let end_date = if self.is_overnight() {
            self.date + Duration::days(1)
        } else {
            self.date
        };
        end_date.and_time(self.end_time)
    }

    pub fn title(&self) -> String {
        self.role
            .clone()
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    /// Multi-line summary of the descriptive fields, `None` when there are none.
    pub fn description(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(code) = &self.code {
            lines.push(format!("Code: {}", code));
        }
        if let Some(role) = &self.role {
            lines.push(format!("Role: {}", role));
        }
        if let Some(duration) = &self.duration {
            lines.push(format!("Duration: {}", duration));
        }
        if let Some(minutes) = self.break_minutes {
            lines.push(format!("Break: {} min", minutes));
        }
        if let Some(notes) = &self.notes {
            lines.push(format!("Notes: {}", notes));
        }

        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    /// Destination representation of this shift in `timezone`.
    pub fn to_draft(&self, timezone: &Tz) -> EventDraft {
        EventDraft {
            key: self.key(),
            start: localize(timezone, self.start_local()),
            end: localize(timezone, self.end_local()),
            title: self.title(),
            description: self.description(),
            location: self.location.clone(),
        }
    }
}

fn parse_wall_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
