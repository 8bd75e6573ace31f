use crate::domain::models::{ExternalEvent, ResponseStatus, TimeSlot, local_instant};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const BLOCK_VISIBILITY: &str = "public";
const BLOCK_TRANSPARENCY: &str = "transparent";
const BLOCK_COLOR_ID: &str = "8";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct EventAttendee {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "self", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_self: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resource: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub organizer: bool,
    #[serde(rename = "responseStatus", skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct EventOrganizer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "self", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_self: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct EventReminders {
    #[serde(rename = "useDefault", default)]
    pub use_default: bool,
    #[serde(default)]
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<EventAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<EventOrganizer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    #[serde(rename = "colorId", skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<EventReminders>,
}

/// Fixed cosmetics applied to every managed block.
#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct BlockPropertiesPatch {
    pub visibility: String,
    pub transparency: String,
    #[serde(rename = "colorId")]
    pub color_id: String,
    pub reminders: EventReminders,
}

pub fn block_properties_patch() -> BlockPropertiesPatch {
    BlockPropertiesPatch {
        visibility: BLOCK_VISIBILITY.to_string(),
        transparency: BLOCK_TRANSPARENCY.to_string(),
        color_id: BLOCK_COLOR_ID.to_string(),
        reminders: EventReminders {
            use_default: false,
            overrides: Vec::new(),
        },
    }
}

pub fn encode_block_event(title: &str, slot: &TimeSlot) -> GoogleCalendarEvent {
    let properties = block_properties_patch();
    GoogleCalendarEvent {
        id: None,
        summary: Some(title.to_string()),
        status: Some("confirmed".to_string()),
        start: CalendarEventDateTime {
            date_time: Some(slot.start.to_rfc3339()),
            ..CalendarEventDateTime::default()
        },
        end: CalendarEventDateTime {
            date_time: Some(slot.end.to_rfc3339()),
            ..CalendarEventDateTime::default()
        },
        attendees: Vec::new(),
        organizer: None,
        visibility: Some(properties.visibility),
        transparency: Some(properties.transparency),
        color_id: Some(properties.color_id),
        reminders: Some(properties.reminders),
    }
}

pub fn is_cancelled(event: &GoogleCalendarEvent) -> bool {
    event
        .status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case("cancelled"))
}

pub fn decode_external_event(
    event: &GoogleCalendarEvent,
    timezone: Tz,
) -> Result<ExternalEvent, InfraError> {
    let id = event
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InfraError::Calendar("calendar event is missing an id".to_string()))?
        .to_string();

    let all_day = event.start.date_time.is_none() && event.start.date.is_some();
    let start_at = parse_event_boundary(&event.start, timezone, "start")?;
    let end_at = parse_event_boundary(&event.end, timezone, "end")?;

    let decoded = ExternalEvent {
        id,
        title: event.summary.clone().unwrap_or_default(),
        start_at,
        end_at,
        all_day,
        guest_count: guest_count(event),
        response: owner_response(event),
    };
    decoded.validate().map_err(InfraError::Calendar)?;
    Ok(decoded)
}

fn guest_count(event: &GoogleCalendarEvent) -> u32 {
    let guests = event
        .attendees
        .iter()
        .filter(|attendee| !attendee.is_self && !attendee.resource)
        .count();
    u32::try_from(guests).unwrap_or(u32::MAX)
}

fn owner_response(event: &GoogleCalendarEvent) -> ResponseStatus {
    if event.organizer.as_ref().is_some_and(|organizer| organizer.is_self) {
        return ResponseStatus::Organizer;
    }
    if event.attendees.is_empty() {
        return ResponseStatus::Organizer;
    }
    event
        .attendees
        .iter()
        .find(|attendee| attendee.is_self)
        .map(|attendee| {
            if attendee.organizer {
                ResponseStatus::Organizer
            } else {
                parse_response_status(attendee.response_status.as_deref().unwrap_or_default())
            }
        })
        .unwrap_or(ResponseStatus::NoResponse)
}

pub fn parse_response_status(value: &str) -> ResponseStatus {
    match value.trim().to_ascii_lowercase().as_str() {
        "accepted" => ResponseStatus::Accepted,
        "declined" => ResponseStatus::Declined,
        "tentative" => ResponseStatus::Tentative,
        _ => ResponseStatus::NoResponse,
    }
}

fn parse_event_boundary(
    value: &CalendarEventDateTime,
    timezone: Tz,
    field_name: &str,
) -> Result<DateTime<Utc>, InfraError> {
    if let Some(date_time) = value.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(date_time)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|error| {
                InfraError::Calendar(format!(
                    "invalid calendar event {field_name}.dateTime '{date_time}': {error}"
                ))
            });
    }

    let Some(date) = value.date.as_deref() else {
        return Err(InfraError::Calendar(format!(
            "calendar event {field_name} has neither dateTime nor date"
        )));
    };
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|error| {
        InfraError::Calendar(format!(
            "invalid calendar event {field_name}.date '{date}': {error}"
        ))
    })?;
    Ok(local_instant(timezone, date, NaiveTime::MIN)
        .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn parse_event(raw: serde_json::Value) -> GoogleCalendarEvent {
        serde_json::from_value(raw).expect("valid event payload")
    }

    #[test]
    fn decodes_meeting_with_self_attendee_response() {
        let event = parse_event(serde_json::json!({
            "id": "evt-1",
            "summary": "Quarterly review",
            "status": "confirmed",
            "start": { "dateTime": "2026-02-16T11:00:00+01:00" },
            "end": { "dateTime": "2026-02-16T12:00:00+01:00" },
            "organizer": { "email": "boss@example.com" },
            "attendees": [
                { "email": "me@example.com", "self": true, "responseStatus": "tentative" },
                { "email": "boss@example.com", "organizer": true, "responseStatus": "accepted" },
                { "email": "room@example.com", "resource": true, "responseStatus": "accepted" }
            ]
        }));

        let decoded = decode_external_event(&event, Tz::UTC).expect("decode");
        assert_eq!(decoded.start_at, fixed_time("2026-02-16T10:00:00Z"));
        assert_eq!(decoded.end_at, fixed_time("2026-02-16T11:00:00Z"));
        assert_eq!(decoded.guest_count, 1);
        assert_eq!(decoded.response, ResponseStatus::Tentative);
        assert!(!decoded.all_day);
    }

    #[test]
    fn organizer_events_report_organizer_response() {
        let event = parse_event(serde_json::json!({
            "id": "evt-2",
            "summary": "1:1",
            "start": { "dateTime": "2026-02-16T09:00:00Z" },
            "end": { "dateTime": "2026-02-16T09:30:00Z" },
            "organizer": { "email": "me@example.com", "self": true },
            "attendees": [
                { "email": "me@example.com", "self": true, "organizer": true, "responseStatus": "accepted" },
                { "email": "report@example.com", "responseStatus": "needsAction" }
            ]
        }));

        let decoded = decode_external_event(&event, Tz::UTC).expect("decode");
        assert_eq!(decoded.response, ResponseStatus::Organizer);
        assert_eq!(decoded.guest_count, 1);
    }

    #[test]
    fn event_without_attendees_is_a_personal_placeholder() {
        let event = parse_event(serde_json::json!({
            "id": "evt-3",
            "summary": "Focus",
            "start": { "dateTime": "2026-02-16T13:00:00Z" },
            "end": { "dateTime": "2026-02-16T14:00:00Z" }
        }));

        let decoded = decode_external_event(&event, Tz::UTC).expect("decode");
        assert_eq!(decoded.guest_count, 0);
        assert_eq!(decoded.response, ResponseStatus::Organizer);
    }

    #[test]
    fn all_day_dates_use_local_midnight() {
        let event = parse_event(serde_json::json!({
            "id": "evt-4",
            "summary": "Annual Leave",
            "start": { "date": "2026-02-16" },
            "end": { "date": "2026-02-17" }
        }));

        let decoded =
            decode_external_event(&event, chrono_tz::Europe::Berlin).expect("decode");
        assert!(decoded.all_day);
        assert_eq!(decoded.start_at, fixed_time("2026-02-15T23:00:00Z"));
        assert_eq!(decoded.end_at, fixed_time("2026-02-16T23:00:00Z"));
    }

    #[test]
    fn decode_rejects_invalid_datetime_and_missing_id() {
        let mut event = encode_block_event(
            "Check Messages",
            &TimeSlot::new(
                fixed_time("2026-02-16T09:55:00Z"),
                fixed_time("2026-02-16T10:00:00Z"),
            ),
        );
        assert!(decode_external_event(&event, Tz::UTC).is_err());

        event.id = Some("blk-1".to_string());
        assert!(decode_external_event(&event, Tz::UTC).is_ok());

        event.start.date_time = Some("invalid-timestamp".to_string());
        assert!(decode_external_event(&event, Tz::UTC).is_err());
    }

    #[test]
    fn encoded_block_carries_fixed_cosmetics() {
        let slot = TimeSlot::new(
            fixed_time("2026-02-16T12:45:00Z"),
            fixed_time("2026-02-16T13:30:00Z"),
        );
        let encoded = serde_json::to_value(encode_block_event("Respond to Messages", &slot))
            .expect("serialize");

        assert_eq!(encoded["summary"], "Respond to Messages");
        assert_eq!(encoded["visibility"], "public");
        assert_eq!(encoded["transparency"], "transparent");
        assert_eq!(encoded["colorId"], "8");
        assert_eq!(encoded["reminders"]["useDefault"], false);
        assert_eq!(encoded["reminders"]["overrides"], serde_json::json!([]));
        assert!(encoded.get("attendees").is_none());
    }

    #[test]
    fn response_status_parsing_defaults_to_no_response() {
        assert_eq!(parse_response_status("accepted"), ResponseStatus::Accepted);
        assert_eq!(parse_response_status("DECLINED"), ResponseStatus::Declined);
        assert_eq!(parse_response_status("needsAction"), ResponseStatus::NoResponse);
        assert_eq!(parse_response_status(""), ResponseStatus::NoResponse);
    }
}
