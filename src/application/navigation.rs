use crate::domain::clock::Clock;
use crate::domain::models::{parse_date, ScheduledTask};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::timebox_store::TimeboxStore;
use chrono::{Days, NaiveDate};
use serde::Serialize;

/// Incomplete genuine tasks found on today's board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarryForward {
    pub from_date: NaiveDate,
    pub tasks: Vec<ScheduledTask>,
    pub count: usize,
}

/// Tracks the active date. Moving between days never loads data; callers
/// reload the board for the returned date themselves.
#[derive(Debug, Clone)]
pub struct NavigationController {
    active_date: NaiveDate,
    clock: Clock,
}

impl NavigationController {
    pub fn new(clock: Clock) -> Self {
        Self {
            active_date: clock.today(),
            clock,
        }
    }

    pub fn active_date(&self) -> NaiveDate {
        self.active_date
    }

    pub fn go_to_previous_day(&mut self) -> NaiveDate {
        if let Some(previous) = self.active_date.checked_sub_days(Days::new(1)) {
            self.active_date = previous;
        }
        self.active_date
    }

    pub fn go_to_next_day(&mut self) -> NaiveDate {
        if let Some(next) = self.active_date.checked_add_days(Days::new(1)) {
            self.active_date = next;
        }
        self.active_date
    }

    pub fn go_to_today(&mut self) -> NaiveDate {
        self.active_date = self.clock.today();
        self.active_date
    }

    pub fn go_to_date(&mut self, value: &str) -> Result<NaiveDate, InfraError> {
        self.active_date = parse_date(value, "date").map_err(InfraError::InvalidDate)?;
        Ok(self.active_date)
    }

    pub fn is_tomorrow(&self) -> bool {
        self.clock
            .today()
            .checked_add_days(Days::new(1))
            .is_some_and(|tomorrow| tomorrow == self.active_date)
    }

    /// Collects today's incomplete, non-calendar tasks for the active day.
    ///
    /// Only allowed while the active date is exactly tomorrow by the clock.
    /// Nothing is inserted anywhere; placing the tasks is up to the caller.
    pub async fn copy_incomplete_tasks<S>(
        &self,
        store: &S,
        user_id: &str,
    ) -> Result<CarryForward, InfraError>
    where
        S: TimeboxStore + ?Sized,
    {
        let today = self.clock.today();
        if !self.is_tomorrow() {
            return Err(InfraError::CarryForwardUnavailable {
                active: self.active_date,
                expected: today.checked_add_days(Days::new(1)).unwrap_or(today),
            });
        }

        let mut tasks: Vec<ScheduledTask> = Vec::new();
        if let Some(record) = store.load(user_id, today).await? {
            let candidates = record.tasks().chain(record.unscheduled.iter());
            for task in candidates {
                if task.is_calendar_event || task.is_completed() {
                    continue;
                }
                if !tasks.iter().any(|existing| existing.id == task.id) {
                    tasks.push(task.clone());
                }
            }
        }

        Ok(CarryForward {
            from_date: today,
            count: tasks.len(),
            tasks,
        })
    }
}
