use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Accepted,
    Declined,
    Tentative,
    NoResponse,
    Organizer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalEvent {
    pub id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub guest_count: u32,
    pub response: ResponseStatus,
}

impl ExternalEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        if !self.all_day && self.end_at <= self.start_at {
            return Err("event.end_at must be after event.start_at".to_string());
        }
        Ok(())
    }

    pub fn overlaps(&self, slot: &TimeSlot) -> bool {
        self.start_at < slot.end && self.end_at > slot.start
    }

    pub fn slot(&self) -> TimeSlot {
        TimeSlot {
            start: self.start_at,
            end: self.end_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockFamily {
    Check,
    Response,
}

impl BlockFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Response => "response",
        }
    }
}

/// The two fixed titles that identify managed blocks on the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTitles {
    pub check: String,
    pub response: String,
}

impl BlockTitles {
    pub fn title(&self, family: BlockFamily) -> &str {
        match family {
            BlockFamily::Check => &self.check,
            BlockFamily::Response => &self.response,
        }
    }

    pub fn family_of(&self, title: &str) -> Option<BlockFamily> {
        let title = title.trim();
        if title == self.check.trim() {
            Some(BlockFamily::Check)
        } else if title == self.response.trim() {
            Some(BlockFamily::Response)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.check, "config.titles.check")?;
        validate_non_empty(&self.response, "config.titles.response")?;
        if self.check.trim() == self.response.trim() {
            return Err("config.titles.check and config.titles.response must differ".to_string());
        }
        Ok(())
    }
}

impl Default for BlockTitles {
    fn default() -> Self {
        Self {
            check: "Check Messages".to_string(),
            response: "Respond to Messages".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagedBlock {
    pub id: String,
    pub family: BlockFamily,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl ManagedBlock {
    pub fn from_event(event: &ExternalEvent, titles: &BlockTitles) -> Option<Self> {
        if event.all_day {
            return None;
        }
        let family = titles.family_of(&event.title)?;
        Some(Self {
            id: event.id.clone(),
            family,
            start_at: event.start_at,
            end_at: event.end_at,
        })
    }

    pub fn slot(&self) -> TimeSlot {
        TimeSlot {
            start: self.start_at,
            end: self.end_at,
        }
    }

    pub fn occupies(&self, family: BlockFamily, slot: &TimeSlot) -> bool {
        self.family == family && self.start_at == slot.start && self.end_at == slot.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    Default,
    Shifted { shifts: u32 },
    Nearest,
    Shortened,
}

/// Where one block spec lands on one day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    pub slot: TimeSlot,
    pub kind: PlacementKind,
}

impl Placement {
    pub fn is_shortened(&self) -> bool {
        self.kind == PlacementKind::Shortened
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PastWorkday,
    CascadeCapReached,
    NoSlotInWindow,
    OutsideLocalTime,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PastWorkday => "shifted past end of working day",
            Self::CascadeCapReached => "cascade iteration cap reached",
            Self::NoSlotInWindow => "no gap in window meets the minimum duration",
            Self::OutsideLocalTime => "local time does not exist on this date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Place(Placement),
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchoredSpec {
    pub hour: u32,
    pub minute: u32,
    pub duration_minutes: u32,
}

impl AnchoredSpec {
    pub fn tag(&self) -> String {
        format!("check@{}", self.hour)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedSpec {
    pub name: String,
    pub default_time: NaiveTime,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub duration_minutes: u32,
    pub min_shortened_minutes: u32,
}

impl WindowedSpec {
    pub fn tag(&self) -> String {
        format!("response@{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSpec {
    Anchored(AnchoredSpec),
    Windowed(WindowedSpec),
}

impl BlockSpec {
    pub fn tag(&self) -> String {
        match self {
            Self::Anchored(spec) => spec.tag(),
            Self::Windowed(spec) => spec.tag(),
        }
    }

    pub fn family(&self) -> BlockFamily {
        match self {
            Self::Anchored(_) => BlockFamily::Check,
            Self::Windowed(_) => BlockFamily::Response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub days: Vec<Weekday>,
}

impl WorkHours {
    pub fn validate(&self) -> Result<(), String> {
        if self.end <= self.start {
            return Err("config.work_hours.end must be after config.work_hours.start".to_string());
        }
        if self.days.is_empty() {
            return Err("config.work_hours.days must not be empty".to_string());
        }
        Ok(())
    }

    pub fn is_work_day(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedBlockConfig {
    pub name: String,
    pub default_time: NaiveTime,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub timezone: Tz,
    pub calendar_id: String,
    pub work_hours: WorkHours,
    pub lookahead_days: u32,
    pub short_block_minutes: u32,
    pub long_block_minutes: u32,
    pub min_shortened_minutes: u32,
    pub anchor_minute: u32,
    pub anchored_hours: Vec<u32>,
    pub cascade_iteration_cap: u32,
    pub windowed_blocks: Vec<WindowedBlockConfig>,
    pub out_of_office_keywords: Vec<String>,
    pub titles: BlockTitles,
}

pub const MAX_LOOKAHEAD_DAYS: u32 = 60;

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.calendar_id, "config.calendar_id")?;
        self.work_hours.validate()?;
        self.titles.validate()?;
        if self.lookahead_days == 0 || self.lookahead_days > MAX_LOOKAHEAD_DAYS {
            return Err(format!(
                "config.lookahead_days must be between 1 and {MAX_LOOKAHEAD_DAYS}"
            ));
        }
        if self.short_block_minutes == 0 {
            return Err("config.short_block_minutes must be > 0".to_string());
        }
        if self.long_block_minutes == 0 {
            return Err("config.long_block_minutes must be > 0".to_string());
        }
        if self.min_shortened_minutes == 0 {
            return Err("config.min_shortened_minutes must be > 0".to_string());
        }
        if self.min_shortened_minutes > self.long_block_minutes {
            return Err(
                "config.min_shortened_minutes must be <= config.long_block_minutes".to_string(),
            );
        }
        if self.anchor_minute > 59 {
            return Err("config.anchor_minute must be between 0 and 59".to_string());
        }
        if self.cascade_iteration_cap == 0 {
            return Err("config.cascade_iteration_cap must be > 0".to_string());
        }

        let mut seen_hours = HashSet::new();
        for hour in &self.anchored_hours {
            if *hour > 23 {
                return Err(format!("config.anchored_hours[] has invalid hour {hour}"));
            }
            if !seen_hours.insert(*hour) {
                return Err(format!("config.anchored_hours[] has duplicate hour {hour}"));
            }
        }

        let long = Duration::minutes(i64::from(self.long_block_minutes));
        let mut seen_names = HashSet::new();
        for block in &self.windowed_blocks {
            validate_non_empty(&block.name, "config.windowed_blocks[].name")?;
            if !seen_names.insert(block.name.trim().to_ascii_lowercase()) {
                return Err(format!(
                    "config.windowed_blocks[] has duplicate name '{}'",
                    block.name
                ));
            }
            if block.default_time < block.window_start || block.default_time > block.window_end {
                return Err(format!(
                    "config.windowed_blocks[{}].default_time must lie inside its window",
                    block.name
                ));
            }
            if block.window_end - block.window_start < long {
                return Err(format!(
                    "config.windowed_blocks[{}] window is shorter than long_block_minutes",
                    block.name
                ));
            }
        }

        for keyword in &self.out_of_office_keywords {
            validate_non_empty(keyword, "config.out_of_office_keywords[]")?;
        }
        Ok(())
    }

    pub fn anchored_specs(&self) -> Vec<AnchoredSpec> {
        self.anchored_hours
            .iter()
            .map(|hour| AnchoredSpec {
                hour: *hour,
                minute: self.anchor_minute,
                duration_minutes: self.short_block_minutes,
            })
            .collect()
    }

    pub fn windowed_specs(&self) -> Vec<WindowedSpec> {
        self.windowed_blocks
            .iter()
            .map(|block| WindowedSpec {
                name: block.name.trim().to_string(),
                default_time: block.default_time,
                window_start: block.window_start,
                window_end: block.window_end,
                duration_minutes: self.long_block_minutes,
                min_shortened_minutes: self.min_shortened_minutes,
            })
            .collect()
    }

    /// Windowed specs first, then anchored specs, each group in configured order.
    pub fn block_specs(&self) -> Vec<BlockSpec> {
        self.windowed_specs()
            .into_iter()
            .map(BlockSpec::Windowed)
            .chain(self.anchored_specs().into_iter().map(BlockSpec::Anchored))
            .collect()
    }

    pub fn out_of_office_keyword(&self, title: &str) -> Option<&str> {
        let title = title.to_lowercase();
        self.out_of_office_keywords
            .iter()
            .map(|keyword| keyword.trim())
            .find(|keyword| !keyword.is_empty() && title.contains(&keyword.to_lowercase()))
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            calendar_id: "primary".to_string(),
            work_hours: WorkHours {
                start: hm(9, 0),
                end: hm(17, 0),
                days: vec![
                    Weekday::Mon,
                    Weekday::Tue,
                    Weekday::Wed,
                    Weekday::Thu,
                    Weekday::Fri,
                ],
            },
            lookahead_days: 7,
            short_block_minutes: 5,
            long_block_minutes: 45,
            min_shortened_minutes: 20,
            anchor_minute: 55,
            anchored_hours: vec![9, 10, 11, 13, 14, 15, 16],
            cascade_iteration_cap: 10,
            windowed_blocks: vec![
                WindowedBlockConfig {
                    name: "post-lunch".to_string(),
                    default_time: hm(12, 45),
                    window_start: hm(10, 45),
                    window_end: hm(14, 45),
                },
                WindowedBlockConfig {
                    name: "end-of-day".to_string(),
                    default_time: hm(16, 0),
                    window_start: hm(14, 45),
                    window_end: hm(17, 0),
                },
            ],
            out_of_office_keywords: vec![
                "out of office".to_string(),
                "ooo".to_string(),
                "vacation".to_string(),
                "annual leave".to_string(),
                "holiday".to_string(),
                "pto".to_string(),
                "sick".to_string(),
            ],
            titles: BlockTitles::default(),
        }
    }
}

/// One calendar date expressed as UTC instants in the owner's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayFrame {
    pub date: NaiveDate,
    pub timezone: Tz,
    pub day_start: DateTime<Utc>,
    pub day_end: DateTime<Utc>,
    pub work_end: DateTime<Utc>,
}

impl DayFrame {
    pub fn new(date: NaiveDate, config: &EngineConfig) -> Option<Self> {
        let timezone = config.timezone;
        let day_start = local_instant(timezone, date, NaiveTime::MIN)?;
        let day_end = local_instant(timezone, date.succ_opt()?, NaiveTime::MIN)?;
        let work_end = local_instant(timezone, date, config.work_hours.end)?;
        Some(Self {
            date,
            timezone,
            day_start,
            day_end,
            work_end,
        })
    }

    pub fn at(&self, time: NaiveTime) -> Option<DateTime<Utc>> {
        local_instant(self.timezone, self.date, time)
    }

    pub fn whole_day(&self) -> TimeSlot {
        TimeSlot::new(self.day_start, self.day_end)
    }
}

/// Resolves a wall-clock time on a date; ambiguous times take the earlier instant.
pub fn local_instant(timezone: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|value| value.with_timezone(&Utc))
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

pub fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
