use std::fmt;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

// ============================================================================
// Weekly date range
// ============================================================================

/// Half-open range of local calendar dates `[start, end)` in a timezone.
///
/// Both adapters receive the same range: the shift source asks the portal for
/// the dates inside it, the event store lists events overlapping its instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timezone: Tz,
}

impl DateRange {
    /// The Monday-to-Monday week containing `date`.
    pub fn week_containing(date: NaiveDate, timezone: Tz) -> Self {
        let start = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        DateRange {
            start,
            end: start + Duration::days(7),
            timezone,
        }
    }

    /// The week starting on the first Monday strictly after the local date of
    /// `now`. Running on a Monday targets the Monday one week later.
    pub fn next_week(now: DateTime<Utc>, timezone: Tz) -> Self {
        let today = now.with_timezone(&timezone).date_naive();
        let days_ahead = 7 - i64::from(today.weekday().num_days_from_monday());
        Self::week_containing(today + Duration::days(days_ahead), timezone)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Last date inside the range (the portal expects inclusive bounds).
    pub fn last_day(&self) -> NaiveDate {
        self.end - Duration::days(1)
    }

    pub fn start_instant(&self) -> DateTime<Tz> {
        localize(&self.timezone, self.start.and_time(chrono::NaiveTime::MIN))
    }

    pub fn end_instant(&self) -> DateTime<Tz> {
        localize(&self.timezone, self.end.and_time(chrono::NaiveTime::MIN))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {} ({})", self.start, self.last_day(), self.timezone.name())
    }
}

/// Attach `timezone` to a local wall-clock time.
///
/// Ambiguous times (clocks going back) resolve to the earlier instant; times
/// that do not exist (clocks going forward) are moved forward by one hour.
pub fn localize(timezone: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    match timezone.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            timezone
                .from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| timezone.from_utc_datetime(&local))
        }
    }
}
