use crate::domain::models::{BlockTitles, ExternalEvent, ManagedBlock, ResponseStatus, TimeSlot};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    block_properties_patch, decode_external_event, encode_block_event, is_cancelled,
};
use crate::infrastructure::google_calendar_client::{GoogleCalendarClient, ListEventsRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Everything the engine needs from a calendar provider.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// All events, all-day ones included, overlapping `[range_start, range_end)`.
    async fn list_events(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, InfraError>;

    async fn create_block(&self, title: &str, slot: &TimeSlot) -> Result<ManagedBlock, InfraError>;

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError>;

    async fn enforce_properties(&self, block_id: &str) -> Result<(), InfraError>;
}

pub struct GoogleCalendarBackend<C>
where
    C: GoogleCalendarClient,
{
    client: Arc<C>,
    access_token: String,
    calendar_id: String,
    timezone: Tz,
    titles: BlockTitles,
}

impl<C> GoogleCalendarBackend<C>
where
    C: GoogleCalendarClient,
{
    pub fn new(
        client: Arc<C>,
        access_token: impl Into<String>,
        calendar_id: impl Into<String>,
        timezone: Tz,
        titles: BlockTitles,
    ) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            calendar_id: calendar_id.into(),
            timezone,
            titles,
        }
    }
}

#[async_trait]
impl<C> CalendarBackend for GoogleCalendarBackend<C>
where
    C: GoogleCalendarClient,
{
    async fn list_events(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, InfraError> {
        let raw = self
            .client
            .list_events(
                &self.access_token,
                &self.calendar_id,
                ListEventsRequest {
                    time_min: range_start,
                    time_max: range_end,
                },
            )
            .await?;

        let mut events = Vec::with_capacity(raw.len());
        for event in raw.iter().filter(|event| !is_cancelled(event)) {
            match decode_external_event(event, self.timezone) {
                Ok(decoded) => events.push(decoded),
                Err(error) => warn!(
                    event_id = event.id.as_deref().unwrap_or("<none>"),
                    %error,
                    "ignoring undecodable calendar event"
                ),
            }
        }
        Ok(events)
    }

    async fn create_block(&self, title: &str, slot: &TimeSlot) -> Result<ManagedBlock, InfraError> {
        let family = self.titles.family_of(title).ok_or_else(|| {
            InfraError::InvalidConfig(format!("'{title}' is not a managed block title"))
        })?;
        let id = self
            .client
            .create_event(
                &self.access_token,
                &self.calendar_id,
                &encode_block_event(title, slot),
            )
            .await?;
        Ok(ManagedBlock {
            id,
            family,
            start_at: slot.start,
            end_at: slot.end,
        })
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError> {
        self.client
            .delete_event(&self.access_token, &self.calendar_id, block_id)
            .await
    }

    async fn enforce_properties(&self, block_id: &str) -> Result<(), InfraError> {
        self.client
            .patch_event(
                &self.access_token,
                &self.calendar_id,
                block_id,
                &block_properties_patch(),
            )
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Create { title: String, slot: TimeSlot },
    Delete { block_id: String },
    EnforceProperties { block_id: String },
}

#[derive(Debug, Default)]
struct InMemoryState {
    events: Vec<ExternalEvent>,
    calls: Vec<BackendCall>,
    next_id: u64,
    failing_list_starts: HashSet<DateTime<Utc>>,
    list_count: u32,
    failing_list_calls: HashSet<u32>,
    removed_after_next_list: Vec<String>,
    fail_creates: bool,
    fail_deletes: bool,
}

/// Calendar held in process memory. Managed blocks it creates show up in later
/// `list_events` calls exactly like blocks on a real calendar would.
#[derive(Debug)]
pub struct InMemoryCalendarBackend {
    titles: BlockTitles,
    state: Mutex<InMemoryState>,
}

impl InMemoryCalendarBackend {
    pub fn new(titles: BlockTitles) -> Self {
        Self {
            titles,
            state: Mutex::new(InMemoryState::default()),
        }
    }

    pub fn with_events(titles: BlockTitles, events: Vec<ExternalEvent>) -> Self {
        let backend = Self::new(titles);
        if let Ok(mut state) = backend.state.lock() {
            state.events = events;
        }
        backend
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryState>, InfraError> {
        self.state.lock().map_err(|error| {
            InfraError::Calendar(format!("in-memory calendar lock poisoned: {error}"))
        })
    }

    pub fn insert_event(&self, event: ExternalEvent) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        state.events.retain(|existing| existing.id != event.id);
        state.events.push(event);
        Ok(())
    }

    pub fn remove_event(&self, event_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock()?;
        let before = state.events.len();
        state.events.retain(|existing| existing.id != event_id);
        Ok(state.events.len() != before)
    }

    pub fn events(&self) -> Result<Vec<ExternalEvent>, InfraError> {
        Ok(self.lock()?.events.clone())
    }

    pub fn managed_blocks(&self) -> Result<Vec<ManagedBlock>, InfraError> {
        let mut blocks = self
            .lock()?
            .events
            .iter()
            .filter_map(|event| ManagedBlock::from_event(event, &self.titles))
            .collect::<Vec<_>>();
        blocks.sort_by_key(|block| block.start_at);
        Ok(blocks)
    }

    pub fn calls(&self) -> Result<Vec<BackendCall>, InfraError> {
        Ok(self.lock()?.calls.clone())
    }

    pub fn clear_calls(&self) -> Result<(), InfraError> {
        self.lock()?.calls.clear();
        Ok(())
    }

    /// Create and delete calls; property enforcement does not change the calendar shape.
    pub fn mutation_count(&self) -> Result<usize, InfraError> {
        Ok(self
            .lock()?
            .calls
            .iter()
            .filter(|call| !matches!(call, BackendCall::EnforceProperties { .. }))
            .count())
    }

    pub fn fail_list_starting_at(&self, range_start: DateTime<Utc>) -> Result<(), InfraError> {
        self.lock()?.failing_list_starts.insert(range_start);
        Ok(())
    }

    /// Fails only the `nth` `list_events` call from now on, counting from 1.
    pub fn fail_nth_list_call(&self, nth: u32) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let call = state.list_count + nth;
        state.failing_list_calls.insert(call);
        Ok(())
    }

    /// Removes the event right after the next listing has been returned, as if
    /// someone deleted it from the calendar in between.
    pub fn remove_after_next_list(&self, event_id: &str) -> Result<(), InfraError> {
        self.lock()?.removed_after_next_list.push(event_id.to_string());
        Ok(())
    }

    pub fn set_fail_creates(&self, fail: bool) -> Result<(), InfraError> {
        self.lock()?.fail_creates = fail;
        Ok(())
    }

    pub fn set_fail_deletes(&self, fail: bool) -> Result<(), InfraError> {
        self.lock()?.fail_deletes = fail;
        Ok(())
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendarBackend {
    async fn list_events(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, InfraError> {
        let mut state = self.lock()?;
        state.list_count += 1;
        let call = state.list_count;
        if state.failing_list_starts.contains(&range_start)
            || state.failing_list_calls.remove(&call)
        {
            return Err(InfraError::Calendar(format!(
                "simulated failure listing events from {range_start}"
            )));
        }
        let range = TimeSlot::new(range_start, range_end);
        let mut events = state
            .events
            .iter()
            .filter(|event| event.overlaps(&range))
            .cloned()
            .collect::<Vec<_>>();
        events.sort_by_key(|event| event.start_at);

        let removed = std::mem::take(&mut state.removed_after_next_list);
        state.events.retain(|event| !removed.contains(&event.id));
        Ok(events)
    }

    async fn create_block(&self, title: &str, slot: &TimeSlot) -> Result<ManagedBlock, InfraError> {
        let family = self.titles.family_of(title).ok_or_else(|| {
            InfraError::InvalidConfig(format!("'{title}' is not a managed block title"))
        })?;
        let mut state = self.lock()?;
        if state.fail_creates {
            return Err(InfraError::Calendar("simulated failure creating block".to_string()));
        }
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.events.push(ExternalEvent {
            id: id.clone(),
            title: title.to_string(),
            start_at: slot.start,
            end_at: slot.end,
            all_day: false,
            guest_count: 0,
            response: ResponseStatus::Organizer,
        });
        state.calls.push(BackendCall::Create {
            title: title.to_string(),
            slot: *slot,
        });
        Ok(ManagedBlock {
            id,
            family,
            start_at: slot.start,
            end_at: slot.end,
        })
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        if state.fail_deletes {
            return Err(InfraError::Calendar("simulated failure deleting block".to_string()));
        }
        let before = state.events.len();
        state.events.retain(|event| event.id != block_id);
        if state.events.len() == before {
            return Err(InfraError::NotFound(format!("block {block_id}")));
        }
        state.calls.push(BackendCall::Delete {
            block_id: block_id.to_string(),
        });
        Ok(())
    }

    async fn enforce_properties(&self, block_id: &str) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        if !state.events.iter().any(|event| event.id == block_id) {
            return Err(InfraError::NotFound(format!("block {block_id}")));
        }
        state.calls.push(BackendCall::EnforceProperties {
            block_id: block_id.to_string(),
        });
        Ok(())
    }
}
