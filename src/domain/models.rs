use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MINUTES_PER_DAY: u32 = 24 * 60;
const WINDOW_ALIGNMENT_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unsupported task status: {other}")),
        }
    }
}

/// A schedulable item owned by the task repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannerTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub source_id: Option<String>,
    pub deferred_until: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrencePattern>,
    pub created_at: DateTime<Utc>,
}

impl PlannerTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        if let Some(pattern) = &self.recurrence {
            pattern.validate()?;
        }
        Ok(())
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// Denormalized snapshot of a task placed into a slot.
///
/// Edits to the originating [`PlannerTask`] do not flow back into snapshots
/// that were already scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: String,
    pub label: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub is_calendar_event: bool,
}

impl ScheduledTask {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            status: TaskStatus::Pending,
            source_id: None,
            is_calendar_event: false,
        }
    }

    pub fn from_task(task: &PlannerTask) -> Self {
        Self {
            id: task.id.clone(),
            label: task.title.clone(),
            status: task.status,
            source_id: task.source_id.clone(),
            is_calendar_event: false,
        }
    }

    pub fn calendar_event(event: &CalendarEvent) -> Self {
        let label = event
            .title
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("(busy)")
            .to_string();
        Self {
            id: format!("calendar:{}:{}", event.calendar_id, event.id),
            label,
            status: TaskStatus::Pending,
            source_id: Some(event.id.clone()),
            is_calendar_event: true,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Slot granularity. Serialized as the number of minutes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum SlotInterval {
    #[default]
    ThirtyMinutes,
    OneHour,
    TwoHours,
}

impl SlotInterval {
    pub fn minutes(self) -> u32 {
        match self {
            Self::ThirtyMinutes => 30,
            Self::OneHour => 60,
            Self::TwoHours => 120,
        }
    }

    pub fn from_minutes(minutes: u32) -> Result<Self, String> {
        match minutes {
            30 => Ok(Self::ThirtyMinutes),
            60 => Ok(Self::OneHour),
            120 => Ok(Self::TwoHours),
            other => Err(format!("slot interval must be 30, 60 or 120 minutes, got {other}")),
        }
    }
}

impl TryFrom<u32> for SlotInterval {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_minutes(value)
    }
}

impl From<SlotInterval> for u32 {
    fn from(value: SlotInterval) -> Self {
        value.minutes()
    }
}

/// The part of the day covered by slots, in minutes since local midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayWindow {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl Default for DayWindow {
    fn default() -> Self {
        Self {
            start_minute: 0,
            end_minute: MINUTES_PER_DAY,
        }
    }
}

impl DayWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let window = Self {
            start_minute: parse_minute_of_day(start, "schedule.dayStart")?,
            end_minute: parse_minute_of_day(end, "schedule.dayEnd")?,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.end_minute > MINUTES_PER_DAY {
            return Err("day window must end at or before 24:00".to_string());
        }
        if self.end_minute <= self.start_minute {
            return Err("day window end must be after its start".to_string());
        }
        if self.start_minute % WINDOW_ALIGNMENT_MINUTES != 0
            || self.end_minute % WINDOW_ALIGNMENT_MINUTES != 0
        {
            return Err("day window bounds must be aligned to 30 minutes".to_string());
        }
        Ok(())
    }

    pub fn contains_minute(&self, minute: u32) -> bool {
        minute >= self.start_minute && minute < self.end_minute
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SlotBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub id: String,
    pub start_minute: u32,
    pub end_minute: u32,
    pub duration_minutes: u32,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub block_label: Option<String>,
    pub tasks: Vec<ScheduledTask>,
}

impl TimeSlot {
    pub fn new(start_minute: u32, end_minute: u32) -> Self {
        Self {
            id: slot_id(start_minute),
            start_minute,
            end_minute,
            duration_minutes: end_minute.saturating_sub(start_minute),
            is_blocked: false,
            block_reason: None,
            block_label: None,
            tasks: Vec::new(),
        }
    }

    pub fn contains_minute(&self, minute: u32) -> bool {
        minute >= self.start_minute && minute < self.end_minute
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn block(&self) -> Option<SlotBlock> {
        self.is_blocked.then(|| SlotBlock {
            reason: self.block_reason.clone(),
            label: self.block_label.clone(),
        })
    }

    pub fn genuine_tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.tasks.iter().filter(|task| !task.is_calendar_event)
    }
}

/// Slot ids are the slot's local start time, `HH:MM`.
pub fn slot_id(start_minute: u32) -> String {
    format_minute(start_minute)
}

fn format_minute(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        };
        f.write_str(value)
    }
}

fn default_frequency() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrencePattern {
    #[serde(rename = "type")]
    pub recurrence_type: RecurrenceType,
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<Weekday>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl RecurrencePattern {
    pub fn daily(start_date: NaiveDate) -> Self {
        Self {
            recurrence_type: RecurrenceType::Daily,
            frequency: 1,
            days_of_week: Vec::new(),
            day_of_month: None,
            start_date,
            end_date: None,
        }
    }

    pub fn weekly(start_date: NaiveDate, days_of_week: Vec<Weekday>) -> Self {
        Self {
            recurrence_type: RecurrenceType::Weekly,
            days_of_week,
            ..Self::daily(start_date)
        }
    }

    pub fn monthly(start_date: NaiveDate, day_of_month: Option<u32>) -> Self {
        Self {
            recurrence_type: RecurrenceType::Monthly,
            day_of_month,
            ..Self::daily(start_date)
        }
    }

    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.frequency == 0 {
            return Err("recurrence.frequency must be > 0".to_string());
        }
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err("recurrence.day_of_month must be within 1..=31".to_string());
            }
        }
        if let Some(end_date) = self.end_date {
            if end_date < self.start_date {
                return Err("recurrence.end_date must not be before start_date".to_string());
            }
        }
        Ok(())
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.is_none_or(|end_date| date <= end_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecurringCompletion {
    pub date: NaiveDate,
    pub task_id: String,
}

/// A timed event reported by an external calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub title: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

/// Parses `HH:MM` into minutes since midnight; `24:00` is accepted as the end
/// of the day.
pub fn parse_minute_of_day(value: &str, field_name: &str) -> Result<u32, String> {
    let value = value.trim();
    if value == "24:00" {
        return Ok(MINUTES_PER_DAY);
    }
    let time = NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    Ok(minute_of_day(time))
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD, got '{}'", value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        parse_date(value, "date").expect("valid date")
    }

    fn sample_task() -> PlannerTask {
        PlannerTask {
            id: "tsk-1".to_string(),
            title: "Write tests".to_string(),
            status: TaskStatus::Pending,
            source_id: Some("thought-7".to_string()),
            deferred_until: None,
            recurrence: Some(RecurrencePattern::weekly(
                date("2024-01-01"),
                vec![Weekday::Mon, Weekday::Fri],
            )),
            created_at: fixed_time("2024-01-01T08:00:00Z"),
        }
    }

    #[test]
    fn task_validate_rejects_empty_title() {
        let mut task = sample_task();
        task.title = "   ".to_string();
        assert!(task.validate().is_err());
    }

    #[test]
    fn recurrence_validate_rejects_zero_frequency_and_reversed_bounds() {
        let pattern = RecurrencePattern::daily(date("2024-01-10")).with_frequency(0);
        assert!(pattern.validate().is_err());

        let pattern = RecurrencePattern::daily(date("2024-01-10")).with_end_date(date("2024-01-09"));
        assert!(pattern.validate().is_err());
    }

    #[test]
    fn slot_interval_accepts_only_supported_granularities() {
        assert_eq!(SlotInterval::from_minutes(60), Ok(SlotInterval::OneHour));
        assert!(SlotInterval::from_minutes(45).is_err());
        let parsed: Result<SlotInterval, _> = serde_json::from_str("15");
        assert!(parsed.is_err());
        assert_eq!(serde_json::to_string(&SlotInterval::TwoHours).expect("serialize"), "120");
    }

    #[test]
    fn day_window_parses_end_of_day_and_rejects_misaligned_bounds() {
        let window = DayWindow::parse("08:00", "24:00").expect("valid window");
        assert_eq!(window.start_minute, 480);
        assert_eq!(window.end_minute, MINUTES_PER_DAY);
        assert!(DayWindow::parse("08:15", "17:00").is_err());
        assert!(DayWindow::parse("17:00", "08:00").is_err());
        assert!(DayWindow::parse("8am", "17:00").is_err());
    }

    #[test]
    fn calendar_pseudo_task_is_read_only_and_labelled() {
        let event = CalendarEvent {
            id: "evt-1".to_string(),
            calendar_id: "work".to_string(),
            title: None,
            start_at: fixed_time("2024-01-01T09:00:00Z"),
            end_at: fixed_time("2024-01-01T10:00:00Z"),
        };
        let task = ScheduledTask::calendar_event(&event);
        assert!(task.is_calendar_event);
        assert_eq!(task.id, "calendar:work:evt-1");
        assert_eq!(task.label, "(busy)");
    }

    #[test]
    fn planner_task_supports_serde_roundtrip() {
        let task = sample_task();
        let roundtrip: PlannerTask =
            serde_json::from_str(&serde_json::to_string(&task).expect("serialize task"))
                .expect("deserialize task");
        assert_eq!(roundtrip, task);
    }
}
