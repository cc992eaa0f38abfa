use crate::domain::clock::resolve_local;
use crate::domain::models::{minute_of_day, CalendarEvent, ScheduledTask, TimeSlot};
use crate::domain::time_slots::find_slot_for_minute;
use crate::infrastructure::calendar_client::CalendarProvider;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarFetchFailure {
    pub calendar_id: String,
    pub message: String,
}

/// Events from every calendar that answered, plus one entry per calendar that
/// did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarFetchOutcome {
    pub events: Vec<CalendarEvent>,
    pub failures: Vec<CalendarFetchFailure>,
}

impl CalendarFetchOutcome {
    /// One user-facing line summarizing every failed calendar.
    pub fn warning(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let details = self
            .failures
            .iter()
            .map(|failure| format!("{} ({})", failure.calendar_id, failure.message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(format!(
            "{} calendar(s) could not be loaded: {details}",
            self.failures.len()
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarOverlay {
    pub placements: Vec<(String, ScheduledTask)>,
    pub dropped: Vec<CalendarEvent>,
}

pub struct CalendarMergeService<P>
where
    P: CalendarProvider + ?Sized + 'static,
{
    provider: Arc<P>,
    retry_policy: RetryPolicy,
}

impl<P> CalendarMergeService<P>
where
    P: CalendarProvider + ?Sized + 'static,
{
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Fetches every calendar concurrently for the local day `date`.
    ///
    /// A failing calendar never aborts the others; its error is collected into
    /// [`CalendarFetchOutcome::failures`]. Events come back ordered by start.
    pub async fn fetch_day(
        &self,
        calendar_ids: &[String],
        date: NaiveDate,
        timezone: Tz,
    ) -> CalendarFetchOutcome {
        let (time_min, time_max) = day_bounds(date, timezone);
        let mut unique_ids: Vec<String> = Vec::new();
        for id in calendar_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            if !unique_ids.iter().any(|existing| existing == id) {
                unique_ids.push(id.to_string());
            }
        }

        let mut join_set = JoinSet::new();
        for calendar_id in unique_ids.iter().cloned() {
            let provider = Arc::clone(&self.provider);
            let retry_policy = self.retry_policy.clone();
            join_set.spawn(async move {
                let result = list_events_with_retry(
                    provider.as_ref(),
                    &retry_policy,
                    &calendar_id,
                    time_min,
                    time_max,
                )
                .await;
                (calendar_id, result)
            });
        }

        let mut results: HashMap<String, Result<Vec<CalendarEvent>, String>> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((calendar_id, result)) => {
                    results.insert(calendar_id, result.map_err(|error| error.to_string()));
                }
                Err(error) => warn!(error = %error, "calendar fetch task failed to complete"),
            }
        }

        let mut outcome = CalendarFetchOutcome::default();
        for calendar_id in unique_ids {
            match results.remove(&calendar_id) {
                Some(Ok(events)) => {
                    debug!(calendar_id = %calendar_id, count = events.len(), "calendar events fetched");
                    outcome.events.extend(events);
                }
                Some(Err(message)) => {
                    warn!(calendar_id = %calendar_id, error = %message, "calendar fetch failed");
                    outcome.failures.push(CalendarFetchFailure {
                        calendar_id,
                        message,
                    });
                }
                None => outcome.failures.push(CalendarFetchFailure {
                    calendar_id,
                    message: "fetch task aborted".to_string(),
                }),
            }
        }
        outcome.events.sort_by(|left, right| left.start_at.cmp(&right.start_at));
        outcome
    }
}

async fn list_events_with_retry<P>(
    provider: &P,
    retry_policy: &RetryPolicy,
    calendar_id: &str,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
) -> Result<Vec<CalendarEvent>, InfraError>
where
    P: CalendarProvider + ?Sized,
{
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt: u8 = 0;

    loop {
        match provider.list_events(calendar_id, time_min, time_max).await {
            Ok(events) => return Ok(events),
            Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                let delay = retry_policy
                    .base_delay_ms
                    .saturating_mul(2u64.saturating_pow(u32::from(attempt)));
                debug!(calendar_id, attempt, delay_ms = delay, "retrying calendar fetch");
                sleep(TokioDuration::from_millis(delay)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    matches!(error, InfraError::CalendarUnavailable(_))
}

/// Local midnight of `date` up to local midnight of the following day.
pub fn day_bounds(date: NaiveDate, timezone: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    (
        resolve_local(timezone, date.and_time(NaiveTime::MIN)),
        resolve_local(timezone, next.and_time(NaiveTime::MIN)),
    )
}

/// Places each event into the slot containing its local start time, rounded
/// to the nearest minute. Events starting on another local day or outside
/// every slot are dropped rather than moved to a neighbouring slot.
pub fn overlay(
    slots: &[TimeSlot],
    events: &[CalendarEvent],
    date: NaiveDate,
    timezone: Tz,
) -> CalendarOverlay {
    let mut result = CalendarOverlay::default();
    for event in events {
        let local_start = round_to_minute(event.start_at).with_timezone(&timezone);
        let index = (local_start.date_naive() == date)
            .then(|| find_slot_for_minute(slots, minute_of_day(local_start.time())))
            .flatten();
        match index {
            Some(index) => result
                .placements
                .push((slots[index].id.clone(), ScheduledTask::calendar_event(event))),
            None => result.dropped.push(event.clone()),
        }
    }
    result
}

fn round_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = instant
        .with_second(0)
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(instant);
    if instant.second() >= 30 {
        truncated + Duration::minutes(1)
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DayWindow, SlotInterval};
    use crate::domain::time_slots::generate_day_slots;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum FakeResponse {
        Events(Vec<CalendarEvent>),
        Unavailable,
        Denied,
    }

    #[derive(Debug, Default)]
    struct ScriptedCalendarProvider {
        responses: Mutex<HashMap<String, VecDeque<FakeResponse>>>,
        calls: AtomicUsize,
    }

    impl ScriptedCalendarProvider {
        fn script(self, calendar_id: &str, responses: Vec<FakeResponse>) -> Self {
            self.responses
                .lock()
                .expect("responses lock poisoned")
                .insert(calendar_id.to_string(), responses.into());
            self
        }
    }

    #[async_trait]
    impl CalendarProvider for ScriptedCalendarProvider {
        async fn list_events(
            &self,
            calendar_id: &str,
            _time_min: DateTime<Utc>,
            _time_max: DateTime<Utc>,
        ) -> Result<Vec<CalendarEvent>, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .expect("responses lock poisoned")
                .get_mut(calendar_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(FakeResponse::Events(Vec::new()));
            match response {
                FakeResponse::Events(events) => Ok(events),
                FakeResponse::Unavailable => Err(InfraError::CalendarUnavailable(
                    "network error while listing events".to_string(),
                )),
                FakeResponse::Denied => Err(InfraError::Calendar(
                    "google calendar api error: http 403".to_string(),
                )),
            }
        }
    }

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date")
    }

    fn event(calendar_id: &str, id: &str, start: &str) -> CalendarEvent {
        let start_at = at(start);
        CalendarEvent {
            id: id.to_string(),
            calendar_id: calendar_id.to_string(),
            title: Some(format!("Event {id}")),
            start_at,
            end_at: start_at + Duration::minutes(30),
        }
    }

    fn fast_retry(max_attempts: u8) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn one_failing_calendar_does_not_block_the_others() {
        let provider = Arc::new(
            ScriptedCalendarProvider::default()
                .script("work", vec![FakeResponse::Events(vec![event("work", "w1", "2024-01-10T09:00:00Z")])])
                .script("family", vec![FakeResponse::Denied])
                .script("gym", vec![FakeResponse::Events(vec![event("gym", "g1", "2024-01-10T07:00:00Z")])]),
        );
        let service = CalendarMergeService::new(provider).with_retry_policy(fast_retry(1));

        let outcome = service
            .fetch_day(
                &["work".to_string(), "family".to_string(), "gym".to_string()],
                date(),
                chrono_tz::UTC,
            )
            .await;

        let ids: Vec<_> = outcome.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "w1"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].calendar_id, "family");
        let warning = outcome.warning().expect("warning present");
        assert!(warning.starts_with("1 calendar(s) could not be loaded"));
        assert!(warning.contains("family"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_permanent_ones_are_not() {
        let provider = Arc::new(
            ScriptedCalendarProvider::default()
                .script(
                    "work",
                    vec![
                        FakeResponse::Unavailable,
                        FakeResponse::Events(vec![event("work", "w1", "2024-01-10T09:00:00Z")]),
                    ],
                )
                .script("family", vec![FakeResponse::Denied]),
        );
        let service =
            CalendarMergeService::new(Arc::clone(&provider)).with_retry_policy(fast_retry(3));

        let outcome = service
            .fetch_day(&["work".to_string(), "family".to_string()], date(), chrono_tz::UTC)
            .await;

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn duplicate_and_blank_calendar_ids_are_fetched_once() {
        let provider = Arc::new(ScriptedCalendarProvider::default());
        let service = CalendarMergeService::new(Arc::clone(&provider));

        let outcome = service
            .fetch_day(
                &["work".to_string(), " ".to_string(), "work".to_string()],
                date(),
                chrono_tz::UTC,
            )
            .await;

        assert_eq!(outcome, CalendarFetchOutcome::default());
        assert_eq!(outcome.warning(), None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlay_uses_local_start_and_drops_unplaceable_events() {
        let window = DayWindow::parse("08:00", "18:00").expect("valid window");
        let slots = generate_day_slots(date(), SlotInterval::ThirtyMinutes, window).slots;
        let tokyo = chrono_tz::Asia::Tokyo;
        let events = vec![
            // 09:14:45 local rounds to 09:15.
            event("work", "inside", "2024-01-10T00:14:45Z"),
            // 07:00 local is before the window.
            event("work", "early", "2024-01-09T22:00:00Z"),
            // Previous local day.
            event("work", "yesterday", "2024-01-09T10:00:00Z"),
        ];

        let result = overlay(&slots, &events, date(), tokyo);

        assert_eq!(result.placements.len(), 1);
        let (slot_id, task) = &result.placements[0];
        assert_eq!(slot_id, "09:00");
        assert!(task.is_calendar_event);
        assert_eq!(task.id, "calendar:work:inside");
        let dropped: Vec<_> = result.dropped.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(dropped, vec!["early", "yesterday"]);
    }

    #[test]
    fn start_seconds_round_to_nearest_minute() {
        let slots = generate_day_slots(date(), SlotInterval::ThirtyMinutes, DayWindow::default()).slots;
        let events = vec![event("work", "late", "2024-01-10T09:29:30Z")];
        let result = overlay(&slots, &events, date(), chrono_tz::UTC);
        assert_eq!(result.placements[0].0, "09:30");
    }

    #[test]
    fn day_bounds_follow_local_midnight() {
        let (start, end) = day_bounds(date(), chrono_tz::America::New_York);
        assert_eq!(start, at("2024-01-10T05:00:00Z"));
        assert_eq!(end, at("2024-01-11T05:00:00Z"));
    }

    // Feature: timeboxer, Property 9: every placed event lands in the slot holding its start
    proptest! {
        #[test]
        fn placed_events_land_in_containing_slot(offset_minutes in 0i64..(24 * 60)) {
            let slots = generate_day_slots(date(), SlotInterval::OneHour, DayWindow::default()).slots;
            let start = at("2024-01-10T00:00:00Z") + Duration::minutes(offset_minutes);
            let event = CalendarEvent {
                id: "evt".to_string(),
                calendar_id: "work".to_string(),
                title: None,
                start_at: start,
                end_at: start,
            };
            let result = overlay(&slots, &[event], date(), chrono_tz::UTC);
            prop_assert_eq!(result.placements.len(), 1);
            let expected = format!("{:02}:00", offset_minutes / 60);
            prop_assert_eq!(&result.placements[0].0, &expected);
        }
    }
}
