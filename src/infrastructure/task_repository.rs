use crate::domain::models::PlannerTask;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Source of the schedulable tasks shown in the unscheduled pool.
pub trait TaskRepository: Send + Sync {
    fn create(&self, task: PlannerTask) -> Result<PlannerTask, InfraError>;
    fn get(&self, task_id: &str) -> Result<Option<PlannerTask>, InfraError>;
    /// All tasks in creation order.
    fn list(&self) -> Result<Vec<PlannerTask>, InfraError>;
    fn update(&self, task: PlannerTask) -> Result<PlannerTask, InfraError>;
    fn delete(&self, task_id: &str) -> Result<bool, InfraError>;
}

/// Tasks stored as JSON payloads in `planner_tasks`; row order is creation
/// order.
#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn decode_task(payload: &str) -> Result<PlannerTask, InfraError> {
    serde_json::from_str(payload)
        .map_err(|error| InfraError::Persistence(format!("invalid planner_tasks.payload: {error}")))
}

impl TaskRepository for SqliteTaskRepository {
    fn create(&self, task: PlannerTask) -> Result<PlannerTask, InfraError> {
        task.validate().map_err(InfraError::InvalidInput)?;
        let connection = open_connection(&self.db_path)?;
        let inserted = connection.execute(
            "INSERT INTO planner_tasks (id, payload, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
            params![
                task.id,
                serde_json::to_string(&task)?,
                task.created_at.to_rfc3339()
            ],
        )?;
        if inserted == 0 {
            return Err(InfraError::InvalidInput(format!("task already exists: {}", task.id)));
        }
        Ok(task)
    }

    fn get(&self, task_id: &str) -> Result<Option<PlannerTask>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let payload = connection
            .query_row(
                "SELECT payload FROM planner_tasks WHERE id = ?1",
                params![task_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        payload.as_deref().map(decode_task).transpose()
    }

    fn list(&self) -> Result<Vec<PlannerTask>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection.prepare("SELECT payload FROM planner_tasks ORDER BY rowid ASC")?;
        let payloads = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads.iter().map(|payload| decode_task(payload)).collect()
    }

    fn update(&self, task: PlannerTask) -> Result<PlannerTask, InfraError> {
        task.validate().map_err(InfraError::InvalidInput)?;
        let connection = open_connection(&self.db_path)?;
        let updated = connection.execute(
            "UPDATE planner_tasks SET payload = ?2 WHERE id = ?1",
            params![task.id, serde_json::to_string(&task)?],
        )?;
        if updated == 0 {
            return Err(InfraError::NotFound(format!("task not found: {}", task.id)));
        }
        Ok(task)
    }

    fn delete(&self, task_id: &str) -> Result<bool, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let deleted = connection.execute("DELETE FROM planner_tasks WHERE id = ?1", params![task_id])?;
        Ok(deleted > 0)
    }
}

#[derive(Debug, Default)]
struct TaskTable {
    tasks: HashMap<String, PlannerTask>,
    order: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    table: Mutex<TaskTable>,
}

impl InMemoryTaskRepository {
    fn lock(&self) -> Result<MutexGuard<'_, TaskTable>, InfraError> {
        self.table
            .lock()
            .map_err(|error| InfraError::Persistence(format!("task repository lock poisoned: {error}")))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn create(&self, task: PlannerTask) -> Result<PlannerTask, InfraError> {
        task.validate().map_err(InfraError::InvalidInput)?;
        let mut table = self.lock()?;
        if table.tasks.contains_key(&task.id) {
            return Err(InfraError::InvalidInput(format!("task already exists: {}", task.id)));
        }
        table.order.push(task.id.clone());
        table.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn get(&self, task_id: &str) -> Result<Option<PlannerTask>, InfraError> {
        Ok(self.lock()?.tasks.get(task_id).cloned())
    }

    fn list(&self) -> Result<Vec<PlannerTask>, InfraError> {
        let table = self.lock()?;
        Ok(table
            .order
            .iter()
            .filter_map(|task_id| table.tasks.get(task_id).cloned())
            .collect())
    }

    fn update(&self, task: PlannerTask) -> Result<PlannerTask, InfraError> {
        task.validate().map_err(InfraError::InvalidInput)?;
        let mut table = self.lock()?;
        let Some(stored) = table.tasks.get_mut(&task.id) else {
            return Err(InfraError::NotFound(format!("task not found: {}", task.id)));
        };
        *stored = task.clone();
        Ok(task)
    }

    fn delete(&self, task_id: &str) -> Result<bool, InfraError> {
        let mut table = self.lock()?;
        if table.tasks.remove(task_id).is_none() {
            return Ok(false);
        }
        table.order.retain(|candidate| candidate != task_id);
        Ok(true)
    }
}
