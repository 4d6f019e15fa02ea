//! In-memory adapters for exercising the sync without a network.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::models::{DateRange, DestinationEvent, EventDraft, ShiftKey};
use crate::services::source::{FetchedShift, ShiftSource};
use crate::services::store::{DeleteOutcome, EventStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ShiftKey),
    Delete(String),
}

#[derive(Default)]
struct StoreState {
    next_id: u64,
    managed: Vec<DestinationEvent>,
    /// Ids of untagged events; never listed as managed.
    foreign: Vec<String>,
    calls: Vec<Call>,
    write_delay: Option<Duration>,
    fail_list: bool,
    fail_create: HashSet<ShiftKey>,
    fail_delete: HashSet<String>,
}

impl StoreState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("evt-{}", self.next_id)
    }
}

/// Calendar fake holding both tagged and foreign events.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEventStore {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    /// Every managed event, regardless of date.
    pub fn managed(&self) -> Vec<DestinationEvent> {
        self.state().managed.clone()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        let state = self.state();
        state.managed.iter().any(|e| e.event_id == event_id)
            || state.foreign.iter().any(|id| id == event_id)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn fail_list(&self) {
        self.state().fail_list = true;
    }

    pub fn fail_create_for(&self, key: ShiftKey) {
        self.state().fail_create.insert(key);
    }

    pub fn fail_delete_for(&self, event_id: &str) {
        self.state().fail_delete.insert(event_id.to_string());
    }

    /// Make every create and delete take `delay` before answering.
    pub fn slow_writes(&self, delay: Duration) {
        self.state().write_delay = Some(delay);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_list = false;
        state.fail_create.clear();
        state.fail_delete.clear();
    }

    /// The event the store would hold for `draft`, without storing it.
    pub fn materialize(&self, draft: &EventDraft, event_id: &str) -> DestinationEvent {
        draft.to_event(event_id)
    }

    /// Seed a managed event, letting the caller alter it first.
    pub fn insert_managed<F>(&self, draft: &EventDraft, edit: F) -> String
    where
        F: FnOnce(&mut DestinationEvent),
    {
        let event_id = self.state().next_id();
        let mut event = self.materialize(draft, &event_id);
        edit(&mut event);
        self.state().managed.push(event);
        event_id
    }

    /// Seed an untagged event created by someone else.
    pub fn insert_foreign(&self) -> String {
        let mut state = self.state();
        let event_id = state.next_id();
        state.foreign.push(event_id.clone());
        event_id
    }

    async fn write_delay(&self) {
        let delay = self.state().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn list_managed_events(&self, range: &DateRange) -> AppResult<Vec<DestinationEvent>> {
        let state = self.state();
        if state.fail_list {
            return Err(AppError::EventStoreRead("listing disabled".to_string()));
        }

        let from = range.start_instant().with_timezone(&Utc);
        let to = range.end_instant().with_timezone(&Utc);
        Ok(state
            .managed
            .iter()
            .filter(|e| e.start < to && e.end > from)
            .cloned()
            .collect())
    }

    async fn create_event(&self, draft: &EventDraft) -> AppResult<DestinationEvent> {
        self.write_delay().await;
        let mut state = self.state();
        state.calls.push(Call::Create(draft.key.clone()));
        if state.fail_create.contains(&draft.key) {
            return Err(AppError::EventStoreWrite(format!(
                "create rejected for {}",
                draft.key
            )));
        }

        let event_id = state.next_id();
        let event = self.materialize(draft, &event_id);
        state.managed.push(event.clone());
        Ok(event)
    }

    async fn delete_event(&self, event_id: &str) -> AppResult<DeleteOutcome> {
        self.write_delay().await;
        let mut state = self.state();
        state.calls.push(Call::Delete(event_id.to_string()));
        if state.fail_delete.contains(event_id) {
            return Err(AppError::EventStoreWrite(format!(
                "delete rejected for {}",
                event_id
            )));
        }

        let before = state.managed.len() + state.foreign.len();
        state.managed.retain(|e| e.event_id != event_id);
        state.foreign.retain(|id| id != event_id);
        if state.managed.len() + state.foreign.len() < before {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}

#[derive(Default)]
struct SourceState {
    shifts: Vec<FetchedShift>,
    unavailable: bool,
    requested: Vec<DateRange>,
}

/// Shift source fake returning whatever it was given.
#[derive(Clone, Default)]
pub struct StaticShiftSource {
    state: Arc<Mutex<SourceState>>,
}

impl StaticShiftSource {
    pub fn new(shifts: Vec<FetchedShift>) -> Self {
        let source = Self::default();
        source.set_shifts(shifts);
        source
    }

    pub fn set_shifts(&self, shifts: Vec<FetchedShift>) {
        self.state.lock().unwrap().shifts = shifts;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn requested(&self) -> Vec<DateRange> {
        self.state.lock().unwrap().requested.clone()
    }
}

#[async_trait]
impl ShiftSource for StaticShiftSource {
    async fn fetch(&self, range: &DateRange) -> AppResult<Vec<FetchedShift>> {
        let mut state = self.state.lock().unwrap();
        state.requested.push(*range);
        if state.unavailable {
            return Err(AppError::SourceUnavailable("portal is down".to_string()));
        }
        Ok(state.shifts.clone())
    }
}
