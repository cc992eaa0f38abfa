//! Input-agnostic drag gesture vocabulary shared by pointer and keyboard paths.

use crate::domain::error::ScheduleError;
use crate::domain::models::{ScheduledTask, TaskStatus};
use serde::Serialize;

/// Identifies one physical gesture from `begin` to its resolution.
pub type GestureId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DragSource {
    /// A task picked up from the unscheduled pool.
    Pool { task: ScheduledTask },
    /// A task already sitting in a slot.
    Slot { slot_id: String, task_id: String },
}

impl DragSource {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Pool { task } => &task.id,
            Self::Slot { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "slot_id")]
pub enum DropTarget {
    Slot(String),
    Pool,
}

/// A single applied change to the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SlotMutation {
    TaskAdded {
        task_id: String,
        slot_id: String,
    },
    TaskMoved {
        task_id: String,
        from_slot_id: String,
        to_slot_id: String,
    },
    TaskRemoved {
        task_id: String,
        slot_id: Option<String>,
    },
    SlotBlocked {
        slot_id: String,
    },
    SlotUnblocked {
        slot_id: String,
    },
    StatusChanged {
        task_id: String,
        status: TaskStatus,
    },
}

impl SlotMutation {
    /// Moves within one slot and removals of absent tasks change nothing.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::TaskMoved {
                from_slot_id,
                to_slot_id,
                ..
            } => from_slot_id == to_slot_id,
            Self::TaskRemoved { slot_id, .. } => slot_id.is_none(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    Applied(SlotMutation),
    Rejected(ScheduleError),
    Cancelled,
    /// The gesture was already resolved, or never existed.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    Grab(DragSource),
    Next,
    Previous,
    Drop,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFeedback {
    Grabbed(GestureId),
    Hovering(String),
    Dropped(DropOutcome),
    Cancelled,
    Ignored,
}
