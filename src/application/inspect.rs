use crate::application::reconcile::managed_blocks;
use crate::domain::classifier::{Classification, classify};
use crate::domain::models::{DayFrame, EngineConfig, ExternalEvent, ManagedBlock};
use crate::infrastructure::calendar_backend::CalendarBackend;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayListing<T> {
    pub date: NaiveDate,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub event: ExternalEvent,
    pub classification: Classification,
}

/// Read-only views of the calendar for debugging. Never writes.
pub struct CalendarInspector<B>
where
    B: CalendarBackend + ?Sized,
{
    backend: Arc<B>,
    config: Arc<EngineConfig>,
}

impl<B> CalendarInspector<B>
where
    B: CalendarBackend + ?Sized,
{
    pub fn new(backend: Arc<B>, config: Arc<EngineConfig>) -> Self {
        Self { backend, config }
    }

    async fn events_for(&self, date: NaiveDate) -> Result<Vec<ExternalEvent>, InfraError> {
        let frame = DayFrame::new(date, &self.config).ok_or_else(|| {
            InfraError::InvalidConfig(format!("cannot resolve local day boundaries for {date}"))
        })?;
        self.backend.list_events(frame.day_start, frame.day_end).await
    }

    pub async fn list_blocks(
        &self,
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<DayListing<ManagedBlock>>, InfraError> {
        let mut listings = Vec::new();
        for date in today.iter_days().take(days as usize) {
            let events = self.events_for(date).await?;
            listings.push(DayListing {
                date,
                items: managed_blocks(&events, &self.config.titles),
            });
        }
        Ok(listings)
    }

    pub async fn list_events(
        &self,
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<DayListing<ClassifiedEvent>>, InfraError> {
        let mut listings = Vec::new();
        for date in today.iter_days().take(days as usize) {
            let mut events = self.events_for(date).await?;
            events.sort_by_key(|event| (!event.all_day, event.start_at));
            let items = events
                .into_iter()
                .map(|event| ClassifiedEvent {
                    classification: classify(&event, &self.config.titles),
                    event,
                })
                .collect();
            listings.push(DayListing { date, items });
        }
        Ok(listings)
    }
}

fn local_hhmm(instant: DateTime<Utc>, timezone: Tz) -> String {
    instant.with_timezone(&timezone).format("%H:%M").to_string()
}

pub fn render_blocks(listings: &[DayListing<ManagedBlock>], timezone: Tz) -> String {
    let mut out = String::new();
    for listing in listings {
        let _ = writeln!(out, "{} ({})", listing.date, listing.date.format("%a"));
        if listing.items.is_empty() {
            let _ = writeln!(out, "  (no blocks)");
        }
        for block in &listing.items {
            let _ = writeln!(
                out,
                "  {}-{}  {:<8}  {}",
                local_hhmm(block.start_at, timezone),
                local_hhmm(block.end_at, timezone),
                block.family.as_str(),
                block.id
            );
        }
    }
    out
}

pub fn render_events(listings: &[DayListing<ClassifiedEvent>], timezone: Tz) -> String {
    let mut out = String::new();
    for listing in listings {
        let _ = writeln!(out, "{} ({})", listing.date, listing.date.format("%a"));
        if listing.items.is_empty() {
            let _ = writeln!(out, "  (no events)");
        }
        for item in &listing.items {
            let when = if item.event.all_day {
                "all day    ".to_string()
            } else {
                format!(
                    "{}-{}",
                    local_hhmm(item.event.start_at, timezone),
                    local_hhmm(item.event.end_at, timezone)
                )
            };
            let _ = writeln!(
                out,
                "  {when}  [{}] {} (guests: {}, response: {:?})",
                item.classification.label(),
                item.event.title,
                item.event.guest_count,
                item.event.response
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ResponseStatus;
    use crate::infrastructure::calendar_backend::InMemoryCalendarBackend;
    use chrono::Duration;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn event(id: &str, title: &str, start: &str, minutes: i64, guests: u32) -> ExternalEvent {
        ExternalEvent {
            id: id.to_string(),
            title: title.to_string(),
            start_at: at(start),
            end_at: at(start) + Duration::minutes(minutes),
            all_day: false,
            guest_count: guests,
            response: ResponseStatus::Accepted,
        }
    }

    fn inspector() -> (Arc<InMemoryCalendarBackend>, CalendarInspector<InMemoryCalendarBackend>) {
        let config = EngineConfig::default();
        let backend = Arc::new(InMemoryCalendarBackend::with_events(
            config.titles.clone(),
            vec![
                event("m1", "Design review", "2026-02-16T11:00:00Z", 60, 3),
                event("focus", "Focus time", "2026-02-16T13:00:00Z", 60, 0),
                event("blk", "Check Messages", "2026-02-16T09:55:00Z", 5, 0),
                event("m2", "Tuesday sync", "2026-02-17T10:00:00Z", 30, 2),
            ],
        ));
        (
            Arc::clone(&backend),
            CalendarInspector::new(backend, Arc::new(config)),
        )
    }

    #[tokio::test]
    async fn lists_blocks_per_day() {
        let (_, inspector) = inspector();
        let today = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let listings = inspector.list_blocks(today, 2).await.expect("list blocks");

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].items.len(), 1);
        assert_eq!(listings[0].items[0].id, "blk");
        assert!(listings[1].items.is_empty());

        let rendered = render_blocks(&listings, Tz::UTC);
        assert!(rendered.contains("09:55-10:00  check"));
        assert!(rendered.contains("(no blocks)"));
    }

    #[tokio::test]
    async fn lists_events_with_classification_and_writes_nothing() {
        let (backend, inspector) = inspector();
        let today = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let listings = inspector.list_events(today, 1).await.expect("list events");

        let labels = listings[0]
            .items
            .iter()
            .map(|item| (item.event.id.as_str(), item.classification))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                ("blk", Classification::Managed(crate::domain::models::BlockFamily::Check)),
                ("m1", Classification::Obstruction),
                ("focus", Classification::NoGuests),
            ]
        );

        let rendered = render_events(&listings, Tz::UTC);
        assert!(rendered.contains("[OBSTRUCTION] Design review"));
        assert!(backend.calls().expect("calls").is_empty());
    }
}
