use crate::application::run_context::RunContext;
use crate::domain::anchored::AnchoredTarget;
use crate::domain::interval_query::IntervalQuery;
use crate::domain::models::{
    BlockFamily, BlockSpec, BlockTitles, DayFrame, ExternalEvent, ManagedBlock, Placement,
    Resolution, SkipReason, TimeSlot,
};
use crate::domain::windowed::WindowedTarget;
use crate::infrastructure::calendar_backend::CalendarBackend;
use crate::infrastructure::error::InfraError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// A block spec pinned to one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockTarget {
    Anchored(AnchoredTarget),
    Windowed(WindowedTarget),
}

impl BlockTarget {
    /// `None` when one of the block spec's wall-clock times does not exist on that date.
    pub fn for_day(spec: &BlockSpec, frame: &DayFrame, iteration_cap: u32) -> Option<Self> {
        match spec {
            BlockSpec::Anchored(spec) => {
                AnchoredTarget::for_day(spec, frame, iteration_cap).map(Self::Anchored)
            }
            BlockSpec::Windowed(spec) => WindowedTarget::for_day(spec, frame).map(Self::Windowed),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Anchored(target) => &target.tag,
            Self::Windowed(target) => &target.tag,
        }
    }

    pub fn family(&self) -> BlockFamily {
        match self {
            Self::Anchored(_) => BlockFamily::Check,
            Self::Windowed(_) => BlockFamily::Response,
        }
    }

    pub fn claims(&self, block: &ManagedBlock) -> bool {
        match self {
            Self::Anchored(target) => target.claims(block),
            Self::Windowed(target) => target.claims(block),
        }
    }

    pub fn resolve(&self, query: &IntervalQuery<'_>) -> Resolution {
        match self {
            Self::Anchored(target) => target.resolve(query),
            Self::Windowed(target) => target.resolve(query),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecOutcome {
    Kept,
    Created { shortened: bool },
    Skipped(SkipReason),
    Failed,
}

/// Blocks already accounted for on one day, and families whose blocks must
/// survive the sweep because one of their targets failed.
#[derive(Debug, Clone)]
pub struct DayState {
    pub frame: DayFrame,
    claimed: HashSet<String>,
    held: HashSet<BlockFamily>,
}

impl DayState {
    pub fn new(frame: DayFrame) -> Self {
        Self {
            frame,
            claimed: HashSet::new(),
            held: HashSet::new(),
        }
    }

    pub fn hold_sweep(&mut self, family: BlockFamily) {
        self.held.insert(family);
    }

    pub fn is_held(&self, family: BlockFamily) -> bool {
        self.held.contains(&family)
    }

    pub fn claim(&mut self, block_id: &str) {
        self.claimed.insert(block_id.to_string());
    }

    pub fn is_claimed(&self, block_id: &str) -> bool {
        self.claimed.contains(block_id)
    }
}

pub fn managed_blocks(events: &[ExternalEvent], titles: &BlockTitles) -> Vec<ManagedBlock> {
    let mut blocks = events
        .iter()
        .filter_map(|event| ManagedBlock::from_event(event, titles))
        .collect::<Vec<_>>();
    blocks.sort_by_key(|block| (block.start_at, block.end_at));
    blocks
}

pub struct ReconciliationController<B>
where
    B: CalendarBackend + ?Sized,
{
    backend: Arc<B>,
    titles: BlockTitles,
}

impl<B> ReconciliationController<B>
where
    B: CalendarBackend + ?Sized,
{
    pub fn new(backend: Arc<B>, titles: BlockTitles) -> Self {
        Self { backend, titles }
    }

    /// Brings one target on one day in line with the calendar. Never fails; a
    /// backend error is logged and counted, the outcome is `Failed` and the
    /// target's family is held back from the day's sweep.
    pub async fn reconcile(
        &self,
        context: &mut RunContext,
        day: &mut DayState,
        target: &BlockTarget,
    ) -> SpecOutcome {
        let span = info_span!("spec", tag = %target.tag());
        match self.try_reconcile(context, day, target).instrument(span).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(date = %day.frame.date, tag = %target.tag(), %error, "block spec failed");
                context.record_error();
                day.hold_sweep(target.family());
                SpecOutcome::Failed
            }
        }
    }

    async fn try_reconcile(
        &self,
        context: &mut RunContext,
        day: &mut DayState,
        target: &BlockTarget,
    ) -> Result<SpecOutcome, InfraError> {
        let family = target.family();
        let events = self
            .backend
            .list_events(day.frame.day_start, day.frame.day_end)
            .await?;
        let query = IntervalQuery::new(&events, &self.titles);
        let blocks = managed_blocks(&events, &self.titles);

        let mut removed = None;
        if let Some(existing) = blocks
            .iter()
            .find(|block| !day.is_claimed(&block.id) && target.claims(block))
        {
            if !query.has_conflict(&existing.slot(), Some(&existing.id)) {
                day.claim(&existing.id);
                self.backend.enforce_properties(&existing.id).await?;
                context.stats.family_mut(family).kept += 1;
                info!(block_id = %existing.id, start = %existing.start_at, "kept block");
                return Ok(SpecOutcome::Kept);
            }

            if self.delete(&existing.id).await? {
                context.stats.family_mut(family).deleted += 1;
                info!(
                    block_id = %existing.id,
                    start = %existing.start_at,
                    "deleted conflicting block"
                );
            }
            removed = Some(existing.id.as_str());
        }

        match target.resolve(&query) {
            Resolution::Place(placement) => {
                let identical = blocks.iter().find(|block| {
                    Some(block.id.as_str()) != removed && block.occupies(family, &placement.slot)
                });
                match identical {
                    Some(block) => {
                        day.claim(&block.id);
                        self.backend.enforce_properties(&block.id).await?;
                        context.stats.family_mut(family).kept += 1;
                        info!(
                            block_id = %block.id,
                            start = %block.start_at,
                            "kept block at resolved placement"
                        );
                        Ok(SpecOutcome::Kept)
                    }
                    None => self.create(context, day, family, placement).await,
                }
            }
            Resolution::Skip(reason) => {
                context.stats.family_mut(family).skipped += 1;
                info!(reason = reason.as_str(), "skipped block");
                Ok(SpecOutcome::Skipped(reason))
            }
        }
    }

    async fn create(
        &self,
        context: &mut RunContext,
        day: &mut DayState,
        family: BlockFamily,
        placement: Placement,
    ) -> Result<SpecOutcome, InfraError> {
        let block = self
            .backend
            .create_block(self.titles.title(family), &placement.slot)
            .await?;
        day.claim(&block.id);

        let stats = context.stats.family_mut(family);
        stats.created += 1;
        if placement.is_shortened() {
            stats.shortened += 1;
        }
        info!(
            block_id = %block.id,
            start = %block.start_at,
            end = %block.end_at,
            kind = ?placement.kind,
            "created block"
        );
        Ok(SpecOutcome::Created {
            shortened: placement.is_shortened(),
        })
    }

    /// `Ok(false)` when the block was already gone from the calendar.
    async fn delete(&self, block_id: &str) -> Result<bool, InfraError> {
        match self.backend.delete_block(block_id).await {
            Ok(()) => Ok(true),
            Err(InfraError::NotFound(message)) => {
                info!(%block_id, %message, "block already deleted");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Records a target that could not be evaluated at all on this day.
    pub fn skip(
        &self,
        context: &mut RunContext,
        family: BlockFamily,
        tag: &str,
        reason: SkipReason,
    ) {
        context.stats.family_mut(family).skipped += 1;
        warn!(tag, reason = reason.as_str(), "skipped block");
    }

    /// Deletes managed blocks on the day that no target claimed. Families
    /// held by a failed target are left alone until the next run.
    pub async fn sweep_unclaimed(&self, context: &mut RunContext, day: &DayState) {
        for family in [BlockFamily::Check, BlockFamily::Response] {
            if day.is_held(family) {
                warn!(
                    date = %day.frame.date,
                    family = family.as_str(),
                    "sweep held back after failure"
                );
            }
        }

        let events = match self
            .backend
            .list_events(day.frame.day_start, day.frame.day_end)
            .await
        {
            Ok(events) => events,
            Err(error) => {
                error!(date = %day.frame.date, %error, "listing events for sweep failed");
                context.record_error();
                return;
            }
        };

        for block in managed_blocks(&events, &self.titles)
            .into_iter()
            .filter(|block| !day.is_claimed(&block.id) && !day.is_held(block.family))
        {
            match self.delete(&block.id).await {
                Ok(true) => {
                    context.stats.family_mut(block.family).deleted += 1;
                    info!(
                        block_id = %block.id,
                        start = %block.start_at,
                        family = block.family.as_str(),
                        "deleted unclaimed block"
                    );
                }
                Ok(false) => {}
                Err(error) => {
                    error!(block_id = %block.id, %error, "deleting unclaimed block failed");
                    context.record_error();
                }
            }
        }
    }

    /// Deletes every managed block inside `range`.
    pub async fn delete_all(
        &self,
        context: &mut RunContext,
        range: TimeSlot,
    ) -> Result<(), InfraError> {
        let events = self.backend.list_events(range.start, range.end).await?;
        for block in managed_blocks(&events, &self.titles) {
            match self.delete(&block.id).await {
                Ok(true) => {
                    context.stats.family_mut(block.family).deleted += 1;
                    info!(block_id = %block.id, start = %block.start_at, "deleted block");
                }
                Ok(false) => {}
                Err(error) => {
                    error!(block_id = %block.id, %error, "deleting block failed");
                    context.record_error();
                }
            }
        }
        Ok(())
    }
}
