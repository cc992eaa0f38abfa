use thiserror::Error;

/// Precondition violations raised by slot mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("time slot not found: {0}")]
    SlotNotFound(String),
    #[error("time slot is blocked: {0}")]
    SlotBlocked(String),
    #[error("time slot {slot_id} holds {task_count} task(s); clear it before blocking")]
    SlotNotEmpty { slot_id: String, task_count: usize },
    #[error("calendar event task is read-only: {0}")]
    ReadOnlyTask(String),
    #[error("task {task_id} is not in time slot {slot_id}")]
    TaskNotInSlot { task_id: String, slot_id: String },
    #[error("task is not scheduled on this day: {0}")]
    TaskNotScheduled(String),
}
