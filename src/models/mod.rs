//! Domain models: shift records from the portal, events in the destination
//! calendar, the weekly date range and the per-run summary.
//! Everything is re-exported at `crate::models` so callers can write
//! `use crate::models::{ShiftRecord, DestinationEvent};`.

pub mod date_range;
pub mod event;
pub mod shift;
pub mod summary;

pub use self::date_range::*;
pub use self::event::*;
pub use self::shift::*;
pub use self::summary::*;
