use crate::domain::models::RecurringCompletion;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{NaiveDate, Utc};
use rusqlite::params;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait CompletionRepository: Send + Sync {
    /// Records that `task_id` was completed on `date`. Recording the same
    /// pair twice is a no-op.
    fn record(&self, completion: &RecurringCompletion) -> Result<(), InfraError>;
    fn list_for_task(&self, task_id: &str) -> Result<Vec<RecurringCompletion>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteCompletionRepository {
    db_path: PathBuf,
}

impl SqliteCompletionRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

impl CompletionRepository for SqliteCompletionRepository {
    fn record(&self, completion: &RecurringCompletion) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "INSERT INTO recurring_completions (task_id, day, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id, day) DO NOTHING",
            params![
                completion.task_id,
                completion.date.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn list_for_task(&self, task_id: &str) -> Result<Vec<RecurringCompletion>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection
            .prepare("SELECT day FROM recurring_completions WHERE task_id = ?1 ORDER BY day ASC")?;
        let days = statement
            .query_map(params![task_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        days.into_iter()
            .map(|day| {
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|error| {
                    InfraError::Persistence(format!("invalid recurring_completions.day '{day}': {error}"))
                })?;
                Ok(RecurringCompletion {
                    date,
                    task_id: task_id.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCompletionRepository {
    completions: Mutex<BTreeSet<(String, NaiveDate)>>,
}

impl CompletionRepository for InMemoryCompletionRepository {
    fn record(&self, completion: &RecurringCompletion) -> Result<(), InfraError> {
        let mut completions = self
            .completions
            .lock()
            .map_err(|error| InfraError::Persistence(format!("completion lock poisoned: {error}")))?;
        completions.insert((completion.task_id.clone(), completion.date));
        Ok(())
    }

    fn list_for_task(&self, task_id: &str) -> Result<Vec<RecurringCompletion>, InfraError> {
        let completions = self
            .completions
            .lock()
            .map_err(|error| InfraError::Persistence(format!("completion lock poisoned: {error}")))?;
        Ok(completions
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(id, date)| RecurringCompletion {
                date: *date,
                task_id: id.clone(),
            })
            .collect())
    }
}
