use crate::domain::models::CalendarEvent;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};

/// Either a timed instant (`dateTime`) or an all-day date (`date`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Wire shape of one item in a Google Calendar `events.list` page.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub start: CalendarEventDateTime,
    #[serde(default)]
    pub end: CalendarEventDateTime,
}

impl GoogleCalendarEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("cancelled"))
    }

    pub fn is_all_day(&self) -> bool {
        self.start.date_time.is_none() && self.start.date.is_some()
    }
}

/// Maps a wire event to a timed [`CalendarEvent`].
///
/// Cancelled events, all-day events and events without an id yield `None`;
/// a malformed timestamp or an end before the start is an error.
pub fn decode_calendar_event(
    calendar_id: &str,
    event: &GoogleCalendarEvent,
) -> Result<Option<CalendarEvent>, InfraError> {
    if event.is_cancelled() || event.is_all_day() {
        return Ok(None);
    }
    let Some(id) = event
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let Some(start_raw) = event.start.date_time.as_deref() else {
        return Ok(None);
    };
    let start_at = parse_rfc3339_utc(start_raw, "start.dateTime")?;
    let end_at = match event.end.date_time.as_deref() {
        Some(end_raw) => parse_rfc3339_utc(end_raw, "end.dateTime")?,
        None => start_at,
    };
    if end_at < start_at {
        return Err(InfraError::Calendar(format!(
            "invalid calendar event {id}: end is before start"
        )));
    }

    Ok(Some(CalendarEvent {
        id: id.to_string(),
        calendar_id: calendar_id.to_string(),
        title: event
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
        start_at,
        end_at,
    }))
}

fn parse_rfc3339_utc(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::Calendar(format!(
                "invalid calendar event {field_name} '{value}': {error}"
            ))
        })
}
