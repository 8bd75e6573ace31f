use crate::domain::classifier::is_obstruction;
use crate::domain::models::{BlockTitles, ExternalEvent, TimeSlot};
use chrono::{DateTime, Duration, Utc};

/// Read-only view over one fetch of a day's events.
///
/// Every query reclassifies the snapshot, so callers should build a new view
/// after the calendar has been changed by anyone other than the engine.
#[derive(Debug, Clone, Copy)]
pub struct IntervalQuery<'a> {
    events: &'a [ExternalEvent],
    titles: &'a BlockTitles,
}

impl<'a> IntervalQuery<'a> {
    pub fn new(events: &'a [ExternalEvent], titles: &'a BlockTitles) -> Self {
        Self { events, titles }
    }

    pub fn conflicts_in(&self, range: &TimeSlot) -> Vec<&'a ExternalEvent> {
        let mut conflicts = self
            .events
            .iter()
            .filter(|event| event.overlaps(range) && is_obstruction(event, self.titles))
            .collect::<Vec<_>>();
        conflicts.sort_by(|left, right| {
            left.start_at
                .cmp(&right.start_at)
                .then(left.end_at.cmp(&right.end_at))
        });
        conflicts
    }

    pub fn has_conflict(&self, range: &TimeSlot, exclude_id: Option<&str>) -> bool {
        self.events.iter().any(|event| {
            exclude_id != Some(event.id.as_str())
                && event.overlaps(range)
                && is_obstruction(event, self.titles)
        })
    }

    pub fn gaps_in(&self, range: &TimeSlot) -> Vec<TimeSlot> {
        if range.is_empty() {
            return Vec::new();
        }

        let mut gaps = Vec::new();
        let mut cursor = range.start;
        for conflict in self.conflicts_in(range) {
            if conflict.start_at > cursor {
                gaps.push(TimeSlot::new(cursor, conflict.start_at.min(range.end)));
            }
            if conflict.end_at > cursor {
                cursor = conflict.end_at;
            }
        }
        if cursor < range.end {
            gaps.push(TimeSlot::new(cursor, range.end));
        }
        gaps.retain(|gap| !gap.is_empty());
        gaps
    }

    /// Full-duration slot starting at a gap boundary, closest to `anchor`.
    ///
    /// Candidates come from gaps clipped to the window, so none ends past
    /// `window.end`.
    pub fn nearest_slot(
        &self,
        window: &TimeSlot,
        duration: Duration,
        anchor: DateTime<Utc>,
    ) -> Option<TimeSlot> {
        self.gaps_in(window)
            .into_iter()
            .filter(|gap| gap.duration() >= duration)
            .map(|gap| TimeSlot::starting_at(gap.start, duration))
            .min_by_key(|candidate| (candidate.start - anchor).abs())
    }

    /// Longest gap in the window; the earliest one wins a tie.
    pub fn largest_gap(&self, window: &TimeSlot) -> Option<TimeSlot> {
        self.gaps_in(window)
            .into_iter()
            .fold(None, |largest: Option<TimeSlot>, gap| match largest {
                Some(current) if current.duration() >= gap.duration() => Some(current),
                _ => Some(gap),
            })
    }
}
