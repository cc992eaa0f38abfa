use crate::domain::models::CalendarEvent;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{decode_calendar_event, GoogleCalendarEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tracing::warn;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
const PAGE_SIZE: &str = "2500";

/// Per-calendar event listing for a time range.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, InfraError>;
}

/// Google Calendar `events.list` over HTTPS. The bearer token is obtained by
/// the caller.
#[derive(Debug, Clone)]
pub struct GoogleCalendarProvider {
    client: Client,
    access_token: String,
    api_base: Url,
}

impl GoogleCalendarProvider {
    pub fn new(access_token: impl Into<String>) -> Result<Self, InfraError> {
        let api_base = Url::parse(CALENDAR_API_BASE)
            .map_err(|error| InfraError::Calendar(format!("invalid calendar api base url: {error}")))?;
        Ok(Self {
            client: Client::new(),
            access_token: access_token.into(),
            api_base,
        })
    }

    pub fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Calendar(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("google calendar api error: http {}", status.as_u16())
        } else {
            format!("google calendar api error: http {}; body={body}", status.as_u16())
        };
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            InfraError::CalendarUnavailable(message)
        } else {
            InfraError::Calendar(message)
        }
    }

    fn events_endpoint(&self, calendar_id: &str) -> Result<Url, InfraError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Calendar("calendar api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }
}

/// Decodes one page of events. A malformed event is logged and skipped so the
/// rest of the calendar still loads.
fn decode_page(calendar_id: &str, items: Vec<GoogleCalendarEvent>) -> Vec<CalendarEvent> {
    let mut events = Vec::with_capacity(items.len());
    for event in &items {
        match decode_calendar_event(calendar_id, event) {
            Ok(Some(decoded)) => events.push(decoded),
            Ok(None) => {}
            Err(error) => warn!(
                calendar_id,
                event_id = event.id.as_deref().unwrap_or("<none>"),
                error = %error,
                "skipping malformed calendar event"
            ),
        }
    }
    events
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        Self::ensure_non_empty(&self.access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.events_endpoint(calendar_id)?;
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut request = self
                .client
                .get(endpoint.clone())
                .bearer_auth(&self.access_token)
                .query(&[
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", PAGE_SIZE),
                ])
                .query(&[
                    ("timeMin", time_min.to_rfc3339()),
                    ("timeMax", time_max.to_rfc3339()),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                request = request.query(&[("pageToken", page_token)]);
            }

            let response = request.send().await.map_err(|error| {
                InfraError::CalendarUnavailable(format!(
                    "network error while listing events for {calendar_id}: {error}"
                ))
            })?;
            let status = response.status();
            let body = response.text().await.map_err(|error| {
                InfraError::CalendarUnavailable(format!("failed reading events list response: {error}"))
            })?;
            if !status.is_success() {
                return Err(Self::http_error(status, &body));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Calendar(format!("invalid events list payload: {error}"))
            })?;
            events.extend(decode_page(calendar_id, parsed.items.take().unwrap_or_default()));

            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_endpoint_escapes_calendar_id() {
        let provider = GoogleCalendarProvider::new("token").expect("provider");
        let url = provider
            .events_endpoint("team@group.calendar.google.com")
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@group.calendar.google.com/events"
        );

        let url = provider.events_endpoint("a/b").expect("endpoint");
        assert!(url.as_str().ends_with("/calendars/a%2Fb/events"));
    }

    #[test]
    fn custom_api_base_is_used_for_endpoints() {
        let base = Url::parse("http://localhost:8089/calendar/v3").expect("base url");
        let provider = GoogleCalendarProvider::new("token")
            .expect("provider")
            .with_api_base(base);
        let url = provider.events_endpoint("primary").expect("endpoint");
        assert_eq!(url.as_str(), "http://localhost:8089/calendar/v3/calendars/primary/events");
    }

    #[test]
    fn malformed_event_is_skipped_without_dropping_the_page() {
        let page: EventsPageResponse = serde_json::from_value(serde_json::json!({
            "items": [
                {
                    "id": "good-1",
                    "summary": "Standup",
                    "start": { "dateTime": "2024-01-10T09:00:00Z" },
                    "end": { "dateTime": "2024-01-10T09:15:00Z" }
                },
                {
                    "id": "broken",
                    "start": { "dateTime": "tomorrow-ish" },
                    "end": { "dateTime": "2024-01-10T11:00:00Z" }
                },
                {
                    "id": "good-2",
                    "start": { "dateTime": "2024-01-10T13:00:00+01:00" },
                    "end": { "dateTime": "2024-01-10T13:30:00+01:00" }
                }
            ]
        }))
        .expect("page payload");

        let events = decode_page("work", page.items.unwrap_or_default());
        let ids: Vec<_> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["good-1", "good-2"]);
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(matches!(
            GoogleCalendarProvider::http_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            InfraError::CalendarUnavailable(_)
        ));
        assert!(matches!(
            GoogleCalendarProvider::http_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            InfraError::CalendarUnavailable(_)
        ));
        assert!(matches!(
            GoogleCalendarProvider::http_error(StatusCode::NOT_FOUND, ""),
            InfraError::Calendar(_)
        ));
    }

    #[tokio::test]
    async fn empty_calendar_id_is_rejected_before_any_request() {
        let provider = GoogleCalendarProvider::new("token").expect("provider");
        let now = Utc::now();
        let result = provider.list_events(" ", now, now).await;
        assert!(matches!(result, Err(InfraError::Calendar(_))));
    }
}
