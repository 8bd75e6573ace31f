use crate::domain::interval_query::IntervalQuery;
use crate::domain::models::{
    BlockFamily, DayFrame, ManagedBlock, Placement, PlacementKind, Resolution, SkipReason,
    TimeSlot, WindowedSpec,
};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedTarget {
    pub tag: String,
    pub default_start: DateTime<Utc>,
    pub window: TimeSlot,
    pub duration: Duration,
    pub min_shortened: Duration,
}

impl WindowedTarget {
    pub fn for_day(spec: &WindowedSpec, frame: &DayFrame) -> Option<Self> {
        Some(Self {
            tag: spec.tag(),
            default_start: frame.at(spec.default_time)?,
            window: TimeSlot::new(frame.at(spec.window_start)?, frame.at(spec.window_end)?),
            duration: Duration::minutes(i64::from(spec.duration_minutes)),
            min_shortened: Duration::minutes(i64::from(spec.min_shortened_minutes)),
        })
    }

    pub fn claims(&self, block: &ManagedBlock) -> bool {
        block.family == BlockFamily::Response
            && block.start_at >= self.window.start
            && block.start_at <= self.window.end
    }

    pub fn default_slot(&self) -> TimeSlot {
        TimeSlot::starting_at(self.default_start, self.duration)
    }

    /// Default time, then the nearest full slot, then the largest partial gap.
    pub fn resolve(&self, query: &IntervalQuery<'_>) -> Resolution {
        let default_slot = self.default_slot();
        if !query.has_conflict(&default_slot, None) {
            return Resolution::Place(Placement {
                slot: default_slot,
                kind: PlacementKind::Default,
            });
        }

        if let Some(slot) = query.nearest_slot(&self.window, self.duration, self.default_start) {
            debug!(tag = %self.tag, start = %slot.start, "default taken, using nearest slot");
            return Resolution::Place(Placement {
                slot,
                kind: PlacementKind::Nearest,
            });
        }

        match query.largest_gap(&self.window) {
            Some(gap) if gap.duration() >= self.min_shortened => {
                debug!(
                    tag = %self.tag,
                    start = %gap.start,
                    minutes = gap.duration().num_minutes(),
                    "no full slot, shortening to largest gap"
                );
                Resolution::Place(Placement {
                    slot: gap,
                    kind: PlacementKind::Shortened,
                })
            }
            _ => Resolution::Skip(SkipReason::NoSlotInWindow),
        }
    }
}
