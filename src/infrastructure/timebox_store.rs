//! Durable storage for one day's slot assignments.
//!
//! The unit of persistence is the whole day for one user: `save` replaces the
//! previous record wholesale, so two editors of the same day overwrite each
//! other (last write wins).

use crate::domain::clock::NowProvider;
use crate::domain::models::{ScheduledTask, SlotBlock, SlotInterval};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TimeboxRecord {
    pub interval: SlotInterval,
    pub slots: BTreeMap<String, Vec<ScheduledTask>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocked: BTreeMap<String, SlotBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unscheduled: Vec<ScheduledTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimeboxRecord {
    /// Same assignments, ignoring the store-assigned timestamp.
    pub fn same_assignments(&self, other: &TimeboxRecord) -> bool {
        self.interval == other.interval
            && self.slots == other.slots
            && self.blocked == other.blocked
            && self.unscheduled == other.unscheduled
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.slots.values().flatten()
    }
}

#[async_trait]
pub trait TimeboxStore: Send + Sync {
    async fn load(&self, user_id: &str, date: NaiveDate) -> Result<Option<TimeboxRecord>, InfraError>;

    /// Replaces the stored day and returns the timestamp assigned to it.
    async fn save(
        &self,
        user_id: &str,
        date: NaiveDate,
        record: &TimeboxRecord,
    ) -> Result<DateTime<Utc>, InfraError>;
}

fn strip_calendar_tasks(record: &TimeboxRecord) -> TimeboxRecord {
    let slots = record
        .slots
        .iter()
        .filter_map(|(slot_id, tasks)| {
            let tasks: Vec<_> = tasks
                .iter()
                .filter(|task| !task.is_calendar_event)
                .cloned()
                .collect();
            (!tasks.is_empty()).then(|| (slot_id.clone(), tasks))
        })
        .collect();
    TimeboxRecord {
        interval: record.interval,
        slots,
        blocked: record.blocked.clone(),
        unscheduled: record
            .unscheduled
            .iter()
            .filter(|task| !task.is_calendar_event)
            .cloned()
            .collect(),
        updated_at: record.updated_at,
    }
}

pub struct SqliteTimeboxStore {
    db_path: PathBuf,
    now_provider: NowProvider,
}

impl SqliteTimeboxStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }
}

#[async_trait]
impl TimeboxStore for SqliteTimeboxStore {
    async fn load(&self, user_id: &str, date: NaiveDate) -> Result<Option<TimeboxRecord>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let row: Option<(String, String)> = connection
            .query_row(
                "SELECT payload, updated_at FROM timeboxes WHERE user_id = ?1 AND day = ?2",
                params![user_id, date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, updated_at_raw)) = row else {
            return Ok(None);
        };

        let mut record: TimeboxRecord = serde_json::from_str(&payload)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at_raw).map_err(|error| {
            InfraError::Persistence(format!(
                "invalid timeboxes.updated_at '{updated_at_raw}': {error}"
            ))
        })?;
        record.updated_at = Some(updated_at.with_timezone(&Utc));
        Ok(Some(record))
    }

    async fn save(
        &self,
        user_id: &str,
        date: NaiveDate,
        record: &TimeboxRecord,
    ) -> Result<DateTime<Utc>, InfraError> {
        let updated_at = (self.now_provider)();
        let mut stored = strip_calendar_tasks(record);
        stored.updated_at = None;
        let payload = serde_json::to_string(&stored)?;

        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "INSERT INTO timeboxes (user_id, day, interval_minutes, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, day) DO UPDATE SET
               interval_minutes = excluded.interval_minutes,
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![
                user_id,
                date.to_string(),
                stored.interval.minutes(),
                payload,
                updated_at.to_rfc3339()
            ],
        )?;
        Ok(updated_at)
    }
}

pub struct InMemoryTimeboxStore {
    records: Mutex<HashMap<(String, NaiveDate), TimeboxRecord>>,
    now_provider: NowProvider,
}

impl Default for InMemoryTimeboxStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            now_provider: Arc::new(Utc::now),
        }
    }
}

impl InMemoryTimeboxStore {
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, NaiveDate), TimeboxRecord>>, InfraError> {
        self.records
            .lock()
            .map_err(|error| InfraError::Persistence(format!("timebox store lock poisoned: {error}")))
    }
}

#[async_trait]
impl TimeboxStore for InMemoryTimeboxStore {
    async fn load(&self, user_id: &str, date: NaiveDate) -> Result<Option<TimeboxRecord>, InfraError> {
        let records = self.lock()?;
        Ok(records.get(&(user_id.to_string(), date)).cloned())
    }

    async fn save(
        &self,
        user_id: &str,
        date: NaiveDate,
        record: &TimeboxRecord,
    ) -> Result<DateTime<Utc>, InfraError> {
        let updated_at = (self.now_provider)();
        let mut stored = strip_calendar_tasks(record);
        stored.updated_at = Some(updated_at);
        let mut records = self.lock()?;
        records.insert((user_id.to_string(), date), stored);
        Ok(updated_at)
    }
}
