use crate::domain::models::{BlockFamily, BlockTitles, ExternalEvent, ResponseStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Managed(BlockFamily),
    AllDay,
    NoGuests,
    Declined,
    AwaitingResponse,
    Obstruction,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Self::Managed(BlockFamily::Check) => "managed check block",
            Self::Managed(BlockFamily::Response) => "managed response block",
            Self::AllDay => "all-day",
            Self::NoGuests => "no guests",
            Self::Declined => "declined",
            Self::AwaitingResponse => "no response",
            Self::Obstruction => "OBSTRUCTION",
        }
    }
}

/// Checks run in a fixed order so a managed block is always reported as managed.
pub fn classify(event: &ExternalEvent, titles: &BlockTitles) -> Classification {
    if let Some(family) = titles.family_of(&event.title) {
        return Classification::Managed(family);
    }
    if event.all_day {
        return Classification::AllDay;
    }
    if event.guest_count == 0 {
        return Classification::NoGuests;
    }
    match event.response {
        ResponseStatus::Accepted | ResponseStatus::Tentative | ResponseStatus::Organizer => {
            Classification::Obstruction
        }
        ResponseStatus::Declined => Classification::Declined,
        ResponseStatus::NoResponse => Classification::AwaitingResponse,
    }
}

pub fn is_obstruction(event: &ExternalEvent, titles: &BlockTitles) -> bool {
    classify(event, titles) == Classification::Obstruction
}
