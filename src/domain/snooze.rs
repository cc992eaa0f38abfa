use crate::domain::clock::Clock;
use crate::domain::models::PlannerTask;
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MORNING_HOUR: u32 = 6;
const WORKDAY_START_HOUR: u32 = 9;
const EVENING_HOUR: u32 = 18;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnoozeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SnoozeAnchor {
    UntilTomorrow,
    UntilNextWeek,
    UntilTonight,
    UntilMorning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnoozeSpec {
    Duration { value: u32, unit: SnoozeUnit },
    Anchor(SnoozeAnchor),
}

impl FromStr for SnoozeUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(Self::Minutes),
            "hour" | "hours" => Ok(Self::Hours),
            "day" | "days" => Ok(Self::Days),
            "week" | "weeks" => Ok(Self::Weeks),
            "month" | "months" => Ok(Self::Months),
            other => Err(format!("unsupported snooze unit: {other}")),
        }
    }
}

impl FromStr for SnoozeAnchor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "until-tomorrow" => Ok(Self::UntilTomorrow),
            "until-next-week" => Ok(Self::UntilNextWeek),
            "until-tonight" => Ok(Self::UntilTonight),
            "until-morning" => Ok(Self::UntilMorning),
            other => Err(format!("unsupported snooze anchor: {other}")),
        }
    }
}

impl fmt::Display for SnoozeAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::UntilTomorrow => "until-tomorrow",
            Self::UntilNextWeek => "until-next-week",
            Self::UntilTonight => "until-tonight",
            Self::UntilMorning => "until-morning",
        };
        f.write_str(value)
    }
}

impl SnoozeSpec {
    /// Reads `(value, unit)` or a named anchor; the value is ignored for
    /// anchors and required for units.
    pub fn parse(value: Option<u32>, unit_or_anchor: &str) -> Result<Self, String> {
        if let Ok(anchor) = unit_or_anchor.parse::<SnoozeAnchor>() {
            return Ok(Self::Anchor(anchor));
        }
        let unit = unit_or_anchor.parse::<SnoozeUnit>()?;
        let value = value.ok_or_else(|| format!("snooze value is required for unit {unit_or_anchor}"))?;
        if value == 0 {
            return Err("snooze value must be > 0".to_string());
        }
        Ok(Self::Duration { value, unit })
    }
}

/// Resolves a snooze request into the absolute instant it ends.
pub fn calculate_snooze_until(spec: SnoozeSpec, clock: &Clock) -> DateTime<Utc> {
    let now = clock.now();
    match spec {
        SnoozeSpec::Duration { value, unit } => {
            let value = i64::from(value);
            match unit {
                SnoozeUnit::Minutes => now + Duration::minutes(value),
                SnoozeUnit::Hours => now + Duration::hours(value),
                SnoozeUnit::Days => now + Duration::days(value),
                SnoozeUnit::Weeks => now + Duration::weeks(value),
                // Calendar months in local time; the day clamps to the month end.
                SnoozeUnit::Months => clock
                    .now_local()
                    .naive_local()
                    .checked_add_months(Months::new(value as u32))
                    .map(|local| clock.resolve_local(local))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            }
        }
        SnoozeSpec::Anchor(anchor) => resolve_anchor(anchor, clock),
    }
}

fn resolve_anchor(anchor: SnoozeAnchor, clock: &Clock) -> DateTime<Utc> {
    let now_local = clock.now_local();
    let today = now_local.date_naive();
    let (day_offset, hour) = match anchor {
        SnoozeAnchor::UntilTomorrow => (1, WORKDAY_START_HOUR),
        SnoozeAnchor::UntilNextWeek => {
            let days_until_monday = (7 - today.weekday().num_days_from_monday()) % 7;
            (if days_until_monday == 0 { 7 } else { days_until_monday }, WORKDAY_START_HOUR)
        }
        SnoozeAnchor::UntilTonight => {
            let evening = at_hour(EVENING_HOUR);
            if now_local.time() < evening {
                (0, EVENING_HOUR)
            } else {
                (1, EVENING_HOUR)
            }
        }
        SnoozeAnchor::UntilMorning => (1, MORNING_HOUR),
    };

    let target_date = today
        .checked_add_days(Days::new(u64::from(day_offset)))
        .unwrap_or(today);
    clock.resolve_local(target_date.and_time(at_hour(hour)))
}

fn at_hour(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Anything that can be deferred until an instant.
pub trait Deferrable {
    fn deferred_until(&self) -> Option<DateTime<Utc>>;
}

impl Deferrable for PlannerTask {
    fn deferred_until(&self) -> Option<DateTime<Utc>> {
        self.deferred_until
    }
}

/// True while the deferral lies strictly in the future. Evaluated on every
/// read; an expired snooze needs no cleanup.
pub fn is_snoozed<T: Deferrable + ?Sized>(entity: &T, now: DateTime<Utc>) -> bool {
    entity.deferred_until().is_some_and(|until| until > now)
}
