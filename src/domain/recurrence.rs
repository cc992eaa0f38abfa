//! Recurrence evaluation for habitual tasks.
//!
//! Every function here is a pure read of the pattern; nothing is cached
//! between calls.

use crate::domain::clock::Clock;
use crate::domain::models::{RecurrencePattern, RecurrenceType, RecurringCompletion};
use chrono::{Datelike, Days, NaiveDate};
use std::collections::HashSet;

pub const NEXT_OCCURRENCE_HORIZON_DAYS: u64 = 365;

pub fn should_occur(pattern: &RecurrencePattern, date: NaiveDate) -> bool {
    if !pattern.covers(date) {
        return false;
    }

    let frequency = i64::from(pattern.frequency.max(1));
    let start = pattern.start_date;
    match pattern.recurrence_type {
        RecurrenceType::Daily => {
            let elapsed_days = (date - start).num_days();
            elapsed_days % frequency == 0
        }
        RecurrenceType::Weekly => {
            let elapsed_weeks = (date - start).num_days() / 7;
            if elapsed_weeks % frequency != 0 {
                return false;
            }
            if pattern.days_of_week.is_empty() {
                date.weekday() == start.weekday()
            } else {
                pattern.days_of_week.contains(&date.weekday())
            }
        }
        RecurrenceType::Monthly => {
            let elapsed_months = i64::from(date.year() - start.year()) * 12
                + i64::from(date.month()) - i64::from(start.month());
            if elapsed_months % frequency != 0 {
                return false;
            }
            let target_day = pattern.day_of_month.unwrap_or_else(|| start.day());
            date.day() == target_day
        }
        // Custom rules have no evaluator; they never occur.
        RecurrenceType::Custom => false,
    }
}

/// All dates in `range_start..=range_end` on which the pattern occurs.
pub fn get_occurrence_dates(
    pattern: &RecurrencePattern,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> Vec<NaiveDate> {
    if range_end < range_start {
        return Vec::new();
    }
    range_start
        .iter_days()
        .take_while(|date| *date <= range_end)
        .filter(|date| should_occur(pattern, *date))
        .collect()
}

/// First occurrence strictly after `from_date`, searching at most a year ahead.
pub fn next_occurrence(pattern: &RecurrencePattern, from_date: NaiveDate) -> Option<NaiveDate> {
    (1..=NEXT_OCCURRENCE_HORIZON_DAYS)
        .filter_map(|offset| from_date.checked_add_days(Days::new(offset)))
        .find(|date| should_occur(pattern, *date))
}

/// Consecutive completed occurrences counting back from the clock's today.
pub fn current_streak(
    completions: &[RecurringCompletion],
    pattern: &RecurrencePattern,
    clock: &Clock,
) -> u32 {
    streak_as_of(completions, pattern, clock.today())
}

/// Walks backward from `today` to the pattern start. Days on which the pattern
/// does not occur are skipped; the first occurrence without a completion ends
/// the streak.
pub fn streak_as_of(
    completions: &[RecurringCompletion],
    pattern: &RecurrencePattern,
    today: NaiveDate,
) -> u32 {
    let completed: HashSet<NaiveDate> = completions.iter().map(|entry| entry.date).collect();
    let mut streak = 0;
    let mut cursor = today;

    while cursor >= pattern.start_date {
        if should_occur(pattern, cursor) {
            if !completed.contains(&cursor) {
                break;
            }
            streak += 1;
        }
        let Some(previous) = cursor.pred_opt() else {
            break;
        };
        cursor = previous;
    }

    streak
}
