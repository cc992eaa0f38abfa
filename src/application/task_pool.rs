use crate::domain::models::{PlannerTask, TaskStatus};
use crate::domain::recurrence::should_occur;
use crate::domain::snooze::is_snoozed;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;

/// Tasks that can still be dragged onto `date`'s board.
///
/// Excludes tasks already on the board and tasks snoozed past `now`. A
/// recurring task qualifies only on dates it occurs and until that occurrence
/// has a completion; a one-off task qualifies until it is completed.
pub fn unscheduled_pool(
    tasks: &[PlannerTask],
    on_board: &HashSet<String>,
    completed_on_date: &HashSet<String>,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<PlannerTask> {
    tasks
        .iter()
        .filter(|task| !on_board.contains(&task.id))
        .filter(|task| !is_snoozed(*task, now))
        .filter(|task| match &task.recurrence {
            Some(pattern) => should_occur(pattern, date) && !completed_on_date.contains(&task.id),
            None => task.status != TaskStatus::Completed,
        })
        .cloned()
        .collect()
}
