use crate::application::reconcile::{BlockTarget, DayState, ReconciliationController};
use crate::application::run_context::{NowProvider, RunContext, RunMode, RunSummary};
use crate::domain::models::{DayFrame, EngineConfig, SkipReason, TimeSlot};
use crate::infrastructure::calendar_backend::CalendarBackend;
use crate::infrastructure::error::InfraError;
use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayOutcome {
    Processed,
    NotWorkDay(Weekday),
    OutOfOffice { keyword: String, event_id: String },
}

/// Runs the reconciliation over the lookahead window, one day at a time.
pub struct DayOrchestrator<B>
where
    B: CalendarBackend + ?Sized,
{
    backend: Arc<B>,
    config: Arc<EngineConfig>,
    controller: ReconciliationController<B>,
    now_provider: NowProvider,
}

impl<B> DayOrchestrator<B>
where
    B: CalendarBackend + ?Sized,
{
    pub fn new(backend: Arc<B>, config: Arc<EngineConfig>) -> Self {
        let controller = ReconciliationController::new(Arc::clone(&backend), config.titles.clone());
        Self {
            backend,
            config,
            controller,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn start_context(&self, mode: RunMode, days: u32) -> RunContext {
        let started_at = (self.now_provider)();
        RunContext::new(mode, self.config.today(started_at), days, started_at)
    }

    pub fn lookahead(&self, today: NaiveDate, days: u32) -> Vec<NaiveDate> {
        today.iter_days().take(days as usize).collect()
    }

    /// The hourly entry point. Errors never escape; they end up in the summary.
    pub async fn run(&self, days: u32, dry_run: bool) -> RunSummary {
        let mut context = self.start_context(RunMode::Reconcile, days).with_dry_run(dry_run);
        let span = info_span!("run", run_id = %context.run_id, dry_run);
        self.run_days(&mut context).instrument(span).await;
        context.finish((self.now_provider)(), None)
    }

    async fn run_days(&self, context: &mut RunContext) {
        info!(today = %context.today, days = context.days, "reconciliation started");
        for date in self.lookahead(context.today, context.days) {
            let span = info_span!("day", %date);
            if let Err(error) = self.process_day(context, date).instrument(span).await {
                error!(%date, %error, "day failed");
                context.record_error();
            }
        }
    }

    pub async fn process_day(
        &self,
        context: &mut RunContext,
        date: NaiveDate,
    ) -> Result<DayOutcome, InfraError> {
        let frame = DayFrame::new(date, &self.config).ok_or_else(|| {
            InfraError::InvalidConfig(format!("cannot resolve local day boundaries for {date}"))
        })?;

        if !self.config.work_hours.is_work_day(date) {
            context.stats.days_skipped += 1;
            info!("not a work day, skipping");
            return Ok(DayOutcome::NotWorkDay(date.weekday()));
        }

        let events = self.backend.list_events(frame.day_start, frame.day_end).await?;
        let out_of_office = events
            .iter()
            .filter(|event| event.all_day)
            .find_map(|event| {
                self.config
                    .out_of_office_keyword(&event.title)
                    .map(|keyword| (keyword.to_string(), event.id.clone()))
            });
        if let Some((keyword, event_id)) = out_of_office {
            context.stats.days_skipped += 1;
            info!(%keyword, %event_id, "out of office, skipping");
            return Ok(DayOutcome::OutOfOffice { keyword, event_id });
        }

        let mut day = DayState::new(frame);
        for spec in self.config.block_specs() {
            match BlockTarget::for_day(&spec, &frame, self.config.cascade_iteration_cap) {
                Some(target) => {
                    self.controller.reconcile(context, &mut day, &target).await;
                }
                None => self.controller.skip(
                    context,
                    spec.family(),
                    &spec.tag(),
                    SkipReason::OutsideLocalTime,
                ),
            }
        }
        self.controller.sweep_unclaimed(context, &day).await;

        context.stats.days_processed += 1;
        Ok(DayOutcome::Processed)
    }

    /// Deletes every managed block in the lookahead window, work days or not.
    pub async fn clear(&self, days: u32) -> RunSummary {
        let mut context = self.start_context(RunMode::Clear, days);
        let span = info_span!("clear", run_id = %context.run_id);
        let result: Result<(), InfraError> = async {
            let range = lookahead_range(&self.config, context.today, days)?;
            self.controller.delete_all(&mut context, range).await
        }
        .instrument(span)
        .await;

        let aborted = match result {
            Ok(()) => {
                context.stats.days_processed = days;
                None
            }
            Err(error) => {
                error!(%error, "clear aborted");
                context.record_error();
                Some(error.to_string())
            }
        };
        context.finish((self.now_provider)(), aborted)
    }
}

/// The UTC span from the start of `today` to the end of the last lookahead day.
pub fn lookahead_range(
    config: &EngineConfig,
    today: NaiveDate,
    days: u32,
) -> Result<TimeSlot, InfraError> {
    let last = today
        .checked_add_days(Days::new(u64::from(days.max(1) - 1)))
        .ok_or_else(|| InfraError::InvalidConfig(format!("lookahead of {days} days overflows")))?;
    match (DayFrame::new(today, config), DayFrame::new(last, config)) {
        (Some(first), Some(last)) => Ok(TimeSlot::new(first.day_start, last.day_end)),
        _ => Err(InfraError::InvalidConfig(format!(
            "cannot resolve local day boundaries between {today} and {last}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExternalEvent, ManagedBlock, ResponseStatus};
    use crate::infrastructure::calendar_backend::InMemoryCalendarBackend;
    use chrono::{DateTime, Duration};

    const MONDAY: &str = "2026-02-16";
    const TUESDAY: &str = "2026-02-17";
    const SATURDAY: &str = "2026-02-21";

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn at(date: &str, hhmm: &str) -> DateTime<Utc> {
        fixed_time(&format!("{date}T{hhmm}:00Z"))
    }

    fn meeting(id: &str, date: &str, start: &str, end: &str) -> ExternalEvent {
        ExternalEvent {
            id: id.to_string(),
            title: format!("Meeting {id}"),
            start_at: at(date, start),
            end_at: at(date, end),
            all_day: false,
            guest_count: 3,
            response: ResponseStatus::Accepted,
        }
    }

    fn all_day(id: &str, date: &str, title: &str) -> ExternalEvent {
        let start = at(date, "00:00");
        ExternalEvent {
            id: id.to_string(),
            title: title.to_string(),
            start_at: start,
            end_at: start + Duration::days(1),
            all_day: true,
            guest_count: 0,
            response: ResponseStatus::Organizer,
        }
    }

    fn orchestrator(
        config: EngineConfig,
        events: Vec<ExternalEvent>,
        today: &str,
    ) -> (Arc<InMemoryCalendarBackend>, DayOrchestrator<InMemoryCalendarBackend>) {
        let backend = Arc::new(InMemoryCalendarBackend::with_events(
            config.titles.clone(),
            events,
        ));
        let now = at(today, "07:00");
        let orchestrator = DayOrchestrator::new(Arc::clone(&backend), Arc::new(config))
            .with_now_provider(Arc::new(move || now));
        (backend, orchestrator)
    }

    fn blocks_on(backend: &InMemoryCalendarBackend, date: &str) -> Vec<ManagedBlock> {
        let day = TimeSlot::new(at(date, "00:00"), at(date, "00:00") + Duration::days(1));
        backend
            .managed_blocks()
            .expect("blocks")
            .into_iter()
            .filter(|block| block.slot().start >= day.start && block.slot().start < day.end)
            .collect()
    }

    fn busy_monday() -> Vec<ExternalEvent> {
        vec![
            meeting("standup", MONDAY, "09:30", "10:15"),
            meeting("planning", MONDAY, "10:15", "11:00"),
            meeting("review", MONDAY, "12:30", "14:00"),
            meeting("retro", MONDAY, "15:50", "16:20"),
        ]
    }

    #[tokio::test]
    async fn empty_work_day_gets_every_default_block() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), MONDAY);
        let summary = orchestrator.run(1, false).await;

        assert!(summary.succeeded());
        assert_eq!(summary.stats.response.created, 2);
        assert_eq!(summary.stats.check.created, 7);
        assert_eq!(summary.stats.days_processed, 1);

        let starts = blocks_on(&backend, MONDAY)
            .iter()
            .map(|block| block.start_at)
            .collect::<Vec<_>>();
        assert!(starts.contains(&at(MONDAY, "12:45")));
        assert!(starts.contains(&at(MONDAY, "16:00")));
        assert!(starts.contains(&at(MONDAY, "09:55")));
    }

    #[tokio::test]
    async fn second_run_without_changes_is_a_no_op() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), busy_monday(), MONDAY);
        let first = orchestrator.run(7, false).await;
        assert!(first.stats.mutations() > 0);
        let placed = backend.managed_blocks().expect("blocks");

        backend.clear_calls().expect("clear calls");
        let second = orchestrator.run(7, false).await;

        assert_eq!(second.stats.mutations(), 0);
        assert_eq!(backend.mutation_count().expect("count"), 0);
        assert_eq!(second.stats.errors, 0);
        assert_eq!(backend.managed_blocks().expect("blocks"), placed);
    }

    #[tokio::test]
    async fn busy_monday_places_shifted_and_nearest_blocks() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), busy_monday(), MONDAY);
        orchestrator.run(1, false).await;

        let slots = blocks_on(&backend, MONDAY)
            .iter()
            .map(ManagedBlock::slot)
            .collect::<Vec<_>>();
        assert!(slots.contains(&TimeSlot::new(at(MONDAY, "11:00"), at(MONDAY, "11:05"))));
        assert!(slots.contains(&TimeSlot::new(at(MONDAY, "14:00"), at(MONDAY, "14:45"))));
        assert!(!slots.contains(&TimeSlot::new(at(MONDAY, "09:55"), at(MONDAY, "10:00"))));
    }

    #[tokio::test]
    async fn annual_leave_day_is_skipped_entirely() {
        let (backend, orchestrator) = orchestrator(
            EngineConfig::default(),
            vec![all_day("leave", MONDAY, "Annual Leave")],
            MONDAY,
        );
        let summary = orchestrator.run(1, false).await;

        assert_eq!(summary.stats.days_skipped, 1);
        assert_eq!(summary.stats.days_processed, 0);
        assert_eq!(summary.stats.mutations(), 0);
        assert!(blocks_on(&backend, MONDAY).is_empty());
    }

    #[tokio::test]
    async fn skipped_days_keep_existing_blocks() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), MONDAY);
        orchestrator.run(1, false).await;
        backend
            .insert_event(all_day("ooo", MONDAY, "OOO - dentist"))
            .expect("insert");
        backend.clear_calls().expect("clear calls");

        let summary = orchestrator.run(1, false).await;
        assert_eq!(summary.stats.days_skipped, 1);
        assert_eq!(backend.mutation_count().expect("count"), 0);
        assert_eq!(blocks_on(&backend, MONDAY).len(), 9);
    }

    #[tokio::test]
    async fn weekend_is_skipped_without_backend_calls() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), SATURDAY);
        backend
            .fail_list_starting_at(at(SATURDAY, "00:00"))
            .expect("arm failure");
        let summary = orchestrator.run(2, false).await;

        assert_eq!(summary.stats.days_skipped, 2);
        assert_eq!(summary.stats.errors, 0);
        assert!(backend.calls().expect("calls").is_empty());
    }

    #[tokio::test]
    async fn failing_day_does_not_stop_later_days() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), MONDAY);
        backend
            .fail_list_starting_at(at(MONDAY, "00:00"))
            .expect("arm failure");
        let summary = orchestrator.run(2, false).await;

        assert!(summary.succeeded());
        assert_eq!(summary.stats.errors, 1);
        assert_eq!(summary.stats.days_processed, 1);
        assert!(blocks_on(&backend, MONDAY).is_empty());
        assert_eq!(blocks_on(&backend, TUESDAY).len(), 9);
    }

    #[tokio::test]
    async fn new_meeting_over_a_block_moves_it() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), MONDAY);
        orchestrator.run(1, false).await;

        backend
            .insert_event(meeting("late-add", MONDAY, "12:30", "13:30"))
            .expect("insert");
        backend.clear_calls().expect("clear calls");
        let summary = orchestrator.run(1, false).await;

        assert_eq!(summary.stats.response.deleted, 1);
        assert_eq!(summary.stats.response.created, 1);
        let slots = blocks_on(&backend, MONDAY)
            .iter()
            .map(ManagedBlock::slot)
            .collect::<Vec<_>>();
        assert!(slots.contains(&TimeSlot::new(at(MONDAY, "13:30"), at(MONDAY, "14:15"))));
    }

    #[tokio::test]
    async fn nonexistent_local_time_skips_only_that_block() {
        let mut config = EngineConfig {
            timezone: chrono_tz::America::New_York,
            anchored_hours: vec![2, 9],
            ..EngineConfig::default()
        };
        config.work_hours.days.push(Weekday::Sun);
        let (backend, orchestrator) = orchestrator(config, Vec::new(), "2026-03-08");
        let summary = orchestrator.run(1, false).await;

        assert_eq!(summary.stats.check.skipped, 1);
        assert_eq!(summary.stats.check.created, 1);
        assert_eq!(summary.stats.response.created, 2);
        assert_eq!(backend.managed_blocks().expect("blocks").len(), 3);
    }

    #[tokio::test]
    async fn clear_removes_only_managed_blocks() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), busy_monday(), MONDAY);
        orchestrator.run(2, false).await;

        let summary = orchestrator.clear(2).await;
        assert!(summary.succeeded());
        assert_eq!(summary.mode, RunMode::Clear);
        assert!(summary.stats.check.deleted > 0);
        assert!(backend.managed_blocks().expect("blocks").is_empty());
        assert_eq!(backend.events().expect("events").len(), busy_monday().len());
    }

    #[tokio::test]
    async fn clear_reports_listing_failure_as_aborted() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), MONDAY);
        backend
            .fail_list_starting_at(at(MONDAY, "00:00"))
            .expect("arm failure");

        let summary = orchestrator.clear(1).await;
        assert!(!summary.succeeded());
        assert_eq!(summary.stats.errors, 1);
    }

    #[tokio::test]
    async fn one_failed_listing_mid_day_deletes_nothing() {
        let (backend, orchestrator) = orchestrator(EngineConfig::default(), Vec::new(), MONDAY);
        orchestrator.run(1, false).await;
        assert_eq!(blocks_on(&backend, MONDAY).len(), 9);

        backend.clear_calls().expect("clear calls");
        // call 1 is the day listing, call 2 the first windowed block
        backend.fail_nth_list_call(2).expect("arm failure");
        let summary = orchestrator.run(1, false).await;

        assert!(summary.succeeded());
        assert_eq!(summary.stats.errors, 1);
        assert_eq!(summary.stats.response.deleted, 0);
        assert_eq!(summary.stats.check.deleted, 0);
        assert_eq!(backend.mutation_count().expect("count"), 0);
        assert_eq!(blocks_on(&backend, MONDAY).len(), 9);
    }
}
