use crate::domain::error::ScheduleError;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Calendar error: {0}")]
    Calendar(String),
    #[error("Calendar temporarily unavailable: {0}")]
    CalendarUnavailable(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("carry-forward is only available for tomorrow ({expected}); active date is {active}")]
    CarryForwardUnavailable {
        active: NaiveDate,
        expected: NaiveDate,
    },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}
