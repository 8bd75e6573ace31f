use crate::domain::interval_query::IntervalQuery;
use crate::domain::models::{
    AnchoredSpec, BlockFamily, DayFrame, ManagedBlock, Placement, PlacementKind, Resolution,
    SkipReason, TimeSlot,
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::debug;

/// An anchored spec pinned to concrete instants on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchoredTarget {
    pub tag: String,
    pub hour_start: DateTime<Utc>,
    pub anchor: DateTime<Utc>,
    pub duration: Duration,
    pub work_end: DateTime<Utc>,
    pub iteration_cap: u32,
}

impl AnchoredTarget {
    pub fn for_day(spec: &AnchoredSpec, frame: &DayFrame, iteration_cap: u32) -> Option<Self> {
        let hour_start = frame.at(NaiveTime::from_hms_opt(spec.hour, 0, 0)?)?;
        let anchor = frame.at(NaiveTime::from_hms_opt(spec.hour, spec.minute, 0)?)?;
        Some(Self {
            tag: spec.tag(),
            hour_start,
            anchor,
            duration: Duration::minutes(i64::from(spec.duration_minutes)),
            work_end: frame.work_end,
            iteration_cap,
        })
    }

    /// A check block belongs to hour H if it starts inside H or exactly at H+1:00,
    /// which is where a single forward shift usually lands it.
    pub fn claims(&self, block: &ManagedBlock) -> bool {
        let next_hour = self.hour_start + Duration::hours(1);
        block.family == BlockFamily::Check
            && ((block.start_at >= self.hour_start && block.start_at < next_hour)
                || block.start_at == next_hour)
    }

    pub fn default_slot(&self) -> TimeSlot {
        TimeSlot::starting_at(self.anchor, self.duration)
    }

    pub fn resolve(&self, query: &IntervalQuery<'_>) -> Resolution {
        let mut candidate = self.default_slot();
        if !query.has_conflict(&candidate, None) {
            return self.bounded(Placement {
                slot: candidate,
                kind: PlacementKind::Default,
            });
        }

        let mut shifts = 0;
        while shifts < self.iteration_cap {
            let Some(latest_end) = query
                .conflicts_in(&candidate)
                .into_iter()
                .map(|event| event.end_at)
                .max()
            else {
                break;
            };
            candidate = TimeSlot::starting_at(latest_end, self.duration);
            shifts += 1;
            debug!(tag = %self.tag, shifts, start = %candidate.start, "anchored block shifted");

            if !query.has_conflict(&candidate, None) {
                return self.bounded(Placement {
                    slot: candidate,
                    kind: PlacementKind::Shifted { shifts },
                });
            }
        }

        Resolution::Skip(SkipReason::CascadeCapReached)
    }

    fn bounded(&self, placement: Placement) -> Resolution {
        if placement.slot.end > self.work_end {
            return Resolution::Skip(SkipReason::PastWorkday);
        }
        Resolution::Place(placement)
    }
}
