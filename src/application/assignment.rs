//! The board for one day: slot assignments, blocks and the drag state machine.
//!
//! Every mutation validates all of its preconditions before touching state,
//! so a rejected call leaves the board exactly as it was. A task id appears in
//! at most one slot at any time.

use crate::application::gesture::{
    DragSource, DropOutcome, DropTarget, GestureId, KeyCommand, KeyFeedback, SlotMutation,
};
use crate::domain::error::ScheduleError;
use crate::domain::models::{DayWindow, ScheduledTask, SlotBlock, SlotInterval, TaskStatus, TimeSlot};
use crate::domain::time_slots::{generate_day_slots, remap_assignments, Day, RemapReport};
use crate::infrastructure::timebox_store::TimeboxRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification emitted after the board changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SlotChange {
    Mutated {
        date: NaiveDate,
        mutation: SlotMutation,
    },
    IntervalChanged {
        date: NaiveDate,
        interval: SlotInterval,
    },
    CalendarMerged {
        date: NaiveDate,
        placed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DayStats {
    pub scheduled_count: usize,
    pub completed_count: usize,
    pub total_hours: f64,
    /// Percentage in `0.0..=100.0`.
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GestureState {
    Idle,
    Dragging {
        id: GestureId,
        source: DragSource,
        over: Option<DropTarget>,
    },
}

pub struct AssignmentEngine {
    day: Day,
    unscheduled: Vec<ScheduledTask>,
    gesture: GestureState,
    next_gesture_id: GestureId,
    changes: broadcast::Sender<SlotChange>,
}

impl AssignmentEngine {
    pub fn new(date: NaiveDate, interval: SlotInterval, window: DayWindow) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            day: generate_day_slots(date, interval, window),
            unscheduled: Vec::new(),
            gesture: GestureState::Idle,
            next_gesture_id: 1,
            changes,
        }
    }

    /// Seeds a board from a stored record.
    ///
    /// Tasks filed under slot ids that no longer exist in the window fall back
    /// to the unscheduled list, and a stored block is only restored onto a slot
    /// that is still empty.
    pub fn from_record(
        date: NaiveDate,
        window: DayWindow,
        default_interval: SlotInterval,
        record: Option<&TimeboxRecord>,
    ) -> Self {
        let interval = record.map(|record| record.interval).unwrap_or(default_interval);
        let mut engine = Self::new(date, interval, window);
        let Some(record) = record else {
            return engine;
        };

        let mut seen = HashSet::new();
        for (slot_id, tasks) in &record.slots {
            let index = engine.slot_index(slot_id);
            for task in tasks {
                if task.is_calendar_event || !seen.insert(task.id.clone()) {
                    continue;
                }
                match index {
                    Some(index) => engine.day.slots[index].tasks.push(task.clone()),
                    None => engine.unscheduled.push(task.clone()),
                }
            }
        }
        for task in &record.unscheduled {
            if !task.is_calendar_event && seen.insert(task.id.clone()) {
                engine.unscheduled.push(task.clone());
            }
        }
        for (slot_id, block) in &record.blocked {
            if let Some(index) = engine.slot_index(slot_id) {
                let slot = &mut engine.day.slots[index];
                if slot.tasks.is_empty() {
                    apply_block(slot, block.clone());
                }
            }
        }
        engine
    }

    /// Routes change notifications into an existing channel.
    pub fn with_change_sender(mut self, changes: broadcast::Sender<SlotChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.day.date
    }

    pub fn interval(&self) -> SlotInterval {
        self.day.interval
    }

    pub fn window(&self) -> DayWindow {
        self.day.window
    }

    pub fn day(&self) -> &Day {
        &self.day
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.day.slots
    }

    pub fn slot(&self, slot_id: &str) -> Option<&TimeSlot> {
        self.day.slots.iter().find(|slot| slot.id == slot_id)
    }

    pub fn unscheduled(&self) -> &[ScheduledTask] {
        &self.unscheduled
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SlotChange> {
        self.changes.subscribe()
    }

    /// The persisted shape of the board; calendar pseudo-tasks are left out.
    pub fn to_record(&self) -> TimeboxRecord {
        let mut slots = BTreeMap::new();
        let mut blocked = BTreeMap::new();
        for slot in &self.day.slots {
            let tasks: Vec<_> = slot.genuine_tasks().cloned().collect();
            if !tasks.is_empty() {
                slots.insert(slot.id.clone(), tasks);
            }
            if let Some(block) = slot.block() {
                blocked.insert(slot.id.clone(), block);
            }
        }
        TimeboxRecord {
            interval: self.day.interval,
            slots,
            blocked,
            unscheduled: self.unscheduled.clone(),
            updated_at: None,
        }
    }

    /// Ids of every genuine task currently placed in a slot.
    pub fn scheduled_task_ids(&self) -> HashSet<String> {
        self.day
            .slots
            .iter()
            .flat_map(|slot| slot.genuine_tasks())
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn find_task(&self, task_id: &str) -> Option<(&TimeSlot, &ScheduledTask)> {
        self.day.slots.iter().find_map(|slot| {
            slot.tasks
                .iter()
                .find(|task| task.id == task_id)
                .map(|task| (slot, task))
        })
    }

    pub fn add_task_to_slot(
        &mut self,
        task: ScheduledTask,
        slot_id: &str,
    ) -> Result<SlotMutation, ScheduleError> {
        if task.is_calendar_event {
            return Err(ScheduleError::ReadOnlyTask(task.id));
        }
        let target = self.require_slot(slot_id)?;

        if let Some((from, position)) = self.locate(&task.id) {
            if self.day.slots[from].tasks[position].is_calendar_event {
                return Err(ScheduleError::ReadOnlyTask(task.id));
            }
            let from_slot_id = self.day.slots[from].id.clone();
            if from == target {
                return Ok(SlotMutation::TaskMoved {
                    task_id: task.id,
                    from_slot_id: from_slot_id.clone(),
                    to_slot_id: from_slot_id,
                });
            }
            if self.day.slots[target].is_blocked {
                return Err(ScheduleError::SlotBlocked(slot_id.to_string()));
            }
            let existing = self.day.slots[from].tasks.remove(position);
            self.day.slots[target].tasks.push(existing);
            return Ok(self.emit(SlotMutation::TaskMoved {
                task_id: task.id,
                from_slot_id,
                to_slot_id: slot_id.to_string(),
            }));
        }

        if self.day.slots[target].is_blocked {
            return Err(ScheduleError::SlotBlocked(slot_id.to_string()));
        }
        let task_id = task.id.clone();
        self.unscheduled.retain(|candidate| candidate.id != task_id);
        self.day.slots[target].tasks.push(task);
        Ok(self.emit(SlotMutation::TaskAdded {
            task_id,
            slot_id: slot_id.to_string(),
        }))
    }

    pub fn move_task_between_slots(
        &mut self,
        task_id: &str,
        from_slot_id: &str,
        to_slot_id: &str,
    ) -> Result<SlotMutation, ScheduleError> {
        let from = self.require_slot(from_slot_id)?;
        let to = self.require_slot(to_slot_id)?;
        let position = self.day.slots[from]
            .tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| ScheduleError::TaskNotInSlot {
                task_id: task_id.to_string(),
                slot_id: from_slot_id.to_string(),
            })?;
        if self.day.slots[from].tasks[position].is_calendar_event {
            return Err(ScheduleError::ReadOnlyTask(task_id.to_string()));
        }

        let mutation = SlotMutation::TaskMoved {
            task_id: task_id.to_string(),
            from_slot_id: from_slot_id.to_string(),
            to_slot_id: to_slot_id.to_string(),
        };
        if from == to {
            return Ok(mutation);
        }
        if self.day.slots[to].is_blocked {
            return Err(ScheduleError::SlotBlocked(to_slot_id.to_string()));
        }

        let task = self.day.slots[from].tasks.remove(position);
        self.day.slots[to].tasks.push(task);
        Ok(self.emit(mutation))
    }

    /// Returns the task to the day's unscheduled list. Removing a task that is
    /// not on the board succeeds without change.
    pub fn remove_task_from_slot(&mut self, task_id: &str) -> Result<SlotMutation, ScheduleError> {
        let Some((index, position)) = self.locate(task_id) else {
            return Ok(SlotMutation::TaskRemoved {
                task_id: task_id.to_string(),
                slot_id: None,
            });
        };
        if self.day.slots[index].tasks[position].is_calendar_event {
            return Err(ScheduleError::ReadOnlyTask(task_id.to_string()));
        }
        let removed = self.day.slots[index].tasks.remove(position);
        if !self.unscheduled.iter().any(|existing| existing.id == removed.id) {
            self.unscheduled.push(removed);
        }
        Ok(self.emit(SlotMutation::TaskRemoved {
            task_id: task_id.to_string(),
            slot_id: Some(self.day.slots[index].id.clone()),
        }))
    }

    pub fn block_time_slot(
        &mut self,
        slot_id: &str,
        reason: Option<String>,
        label: Option<String>,
    ) -> Result<SlotMutation, ScheduleError> {
        let index = self.require_slot(slot_id)?;
        let slot = &mut self.day.slots[index];
        if !slot.is_empty() {
            return Err(ScheduleError::SlotNotEmpty {
                slot_id: slot_id.to_string(),
                task_count: slot.tasks.len(),
            });
        }
        apply_block(slot, SlotBlock { reason, label });
        Ok(self.emit(SlotMutation::SlotBlocked {
            slot_id: slot_id.to_string(),
        }))
    }

    pub fn unblock_time_slot(&mut self, slot_id: &str) -> Result<SlotMutation, ScheduleError> {
        let index = self.require_slot(slot_id)?;
        let slot = &mut self.day.slots[index];
        slot.is_blocked = false;
        slot.block_reason = None;
        slot.block_label = None;
        Ok(self.emit(SlotMutation::SlotUnblocked {
            slot_id: slot_id.to_string(),
        }))
    }

    pub fn set_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<SlotMutation, ScheduleError> {
        let (index, position) = self
            .locate(task_id)
            .ok_or_else(|| ScheduleError::TaskNotScheduled(task_id.to_string()))?;
        let task = &mut self.day.slots[index].tasks[position];
        if task.is_calendar_event {
            return Err(ScheduleError::ReadOnlyTask(task_id.to_string()));
        }
        task.status = status;
        Ok(self.emit(SlotMutation::StatusChanged {
            task_id: task_id.to_string(),
            status,
        }))
    }

    /// Rebuilds the grid at a new interval and carries assignments across.
    pub fn change_interval(&mut self, interval: SlotInterval) -> RemapReport {
        if interval == self.day.interval {
            return RemapReport::default();
        }
        let mut target = generate_day_slots(self.day.date, interval, self.day.window);
        let report = remap_assignments(&self.day.slots, &mut target.slots);
        self.day = target;
        for task in &report.unscheduled {
            if !self.unscheduled.iter().any(|existing| existing.id == task.id) {
                self.unscheduled.push(task.clone());
            }
        }
        self.gesture = GestureState::Idle;
        let _ = self.changes.send(SlotChange::IntervalChanged {
            date: self.day.date,
            interval,
        });
        report
    }

    /// Appends tasks to the day's unscheduled list, skipping calendar
    /// pseudo-tasks and anything already on the board or in the list.
    pub fn add_unscheduled(&mut self, tasks: impl IntoIterator<Item = ScheduledTask>) -> usize {
        let scheduled = self.scheduled_task_ids();
        let mut added = 0;
        for task in tasks {
            if task.is_calendar_event
                || scheduled.contains(&task.id)
                || self.unscheduled.iter().any(|existing| existing.id == task.id)
            {
                continue;
            }
            self.unscheduled.push(task);
            added += 1;
        }
        added
    }

    /// Replaces every calendar pseudo-task with `placements` (slot id, task).
    /// Placements naming an unknown slot are skipped.
    pub fn apply_calendar_overlay(&mut self, placements: Vec<(String, ScheduledTask)>) -> usize {
        for slot in &mut self.day.slots {
            slot.tasks.retain(|task| !task.is_calendar_event);
        }
        let mut placed = 0;
        for (slot_id, task) in placements {
            if !task.is_calendar_event {
                continue;
            }
            if let Some(index) = self.slot_index(&slot_id) {
                let slot = &mut self.day.slots[index];
                if !slot.tasks.iter().any(|existing| existing.id == task.id) {
                    slot.tasks.push(task);
                    placed += 1;
                }
            }
        }
        let _ = self.changes.send(SlotChange::CalendarMerged {
            date: self.day.date,
            placed,
        });
        placed
    }

    pub fn stats(&self) -> DayStats {
        let mut scheduled_count = 0;
        let mut completed_count = 0;
        let mut busy_minutes = 0u32;
        for slot in &self.day.slots {
            let mut has_genuine = false;
            for task in slot.genuine_tasks() {
                has_genuine = true;
                scheduled_count += 1;
                if task.is_completed() {
                    completed_count += 1;
                }
            }
            if has_genuine {
                busy_minutes += slot.duration_minutes;
            }
        }
        let completion_rate = if scheduled_count == 0 {
            0.0
        } else {
            completed_count as f64 / scheduled_count as f64 * 100.0
        };
        DayStats {
            scheduled_count,
            completed_count,
            total_hours: f64::from(busy_minutes) / 60.0,
            completion_rate,
        }
    }

    /// Starts a gesture. Beginning a new gesture abandons any gesture still in
    /// flight without mutating the board.
    pub fn begin_drag(&mut self, source: DragSource) -> Result<GestureId, ScheduleError> {
        match &source {
            DragSource::Pool { task } => {
                if task.is_calendar_event {
                    return Err(ScheduleError::ReadOnlyTask(task.id.clone()));
                }
            }
            DragSource::Slot { slot_id, task_id } => {
                let index = self.require_slot(slot_id)?;
                let task = self.day.slots[index]
                    .tasks
                    .iter()
                    .find(|task| task.id == *task_id)
                    .ok_or_else(|| ScheduleError::TaskNotInSlot {
                        task_id: task_id.clone(),
                        slot_id: slot_id.clone(),
                    })?;
                if task.is_calendar_event {
                    return Err(ScheduleError::ReadOnlyTask(task_id.clone()));
                }
            }
        }

        let id = self.next_gesture_id;
        self.next_gesture_id += 1;
        self.gesture = GestureState::Dragging {
            id,
            source,
            over: None,
        };
        Ok(id)
    }

    /// Records the hovered target. Returns false when `gesture` is not the
    /// gesture in flight.
    pub fn move_over(&mut self, gesture: GestureId, target: DropTarget) -> bool {
        match &mut self.gesture {
            GestureState::Dragging { id, over, .. } if *id == gesture => {
                *over = Some(target);
                true
            }
            _ => false,
        }
    }

    /// Resolves the gesture onto `target`, or onto the last hovered target
    /// when `target` is `None`.
    ///
    /// Only the first commit of a gesture can mutate the board; repeated
    /// deliveries of the same drop are [`DropOutcome::Ignored`].
    pub fn commit(&mut self, gesture: GestureId, target: Option<DropTarget>) -> DropOutcome {
        let (source, over) = match std::mem::replace(&mut self.gesture, GestureState::Idle) {
            GestureState::Dragging { id, source, over } if id == gesture => (source, over),
            other => {
                self.gesture = other;
                return DropOutcome::Ignored;
            }
        };
        let Some(target) = target.or(over) else {
            return DropOutcome::Cancelled;
        };

        let result = match (source, target) {
            (DragSource::Pool { task }, DropTarget::Slot(slot_id)) => {
                self.add_task_to_slot(task, &slot_id)
            }
            (DragSource::Slot { slot_id, task_id }, DropTarget::Slot(to_slot_id)) => {
                self.move_task_between_slots(&task_id, &slot_id, &to_slot_id)
            }
            (DragSource::Slot { task_id, .. }, DropTarget::Pool) => {
                self.remove_task_from_slot(&task_id)
            }
            (DragSource::Pool { .. }, DropTarget::Pool) => return DropOutcome::Cancelled,
        };
        match result {
            Ok(mutation) => DropOutcome::Applied(mutation),
            Err(error) => DropOutcome::Rejected(error),
        }
    }

    /// Abandons the gesture in flight. Nothing is mutated until commit, so
    /// cancelling restores nothing.
    pub fn cancel(&mut self, gesture: GestureId) -> bool {
        match &self.gesture {
            GestureState::Dragging { id, .. } if *id == gesture => {
                self.gesture = GestureState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn active_gesture(&self) -> Option<GestureId> {
        match &self.gesture {
            GestureState::Dragging { id, .. } => Some(*id),
            GestureState::Idle => None,
        }
    }

    /// Keyboard path onto the same gesture state machine: `Next`/`Previous`
    /// step the hovered slot through the day in order.
    pub fn handle_key(&mut self, command: KeyCommand) -> KeyFeedback {
        match command {
            KeyCommand::Grab(source) => match self.begin_drag(source) {
                Ok(id) => KeyFeedback::Grabbed(id),
                Err(error) => KeyFeedback::Dropped(DropOutcome::Rejected(error)),
            },
            KeyCommand::Next => self.step_hover(1),
            KeyCommand::Previous => self.step_hover(-1),
            KeyCommand::Drop => match self.active_gesture() {
                Some(id) => KeyFeedback::Dropped(self.commit(id, None)),
                None => KeyFeedback::Ignored,
            },
            KeyCommand::Cancel => match self.active_gesture() {
                Some(id) => {
                    self.cancel(id);
                    KeyFeedback::Cancelled
                }
                None => KeyFeedback::Ignored,
            },
        }
    }

    fn step_hover(&mut self, step: isize) -> KeyFeedback {
        let last = self.day.slots.len().saturating_sub(1);
        let current = match &self.gesture {
            GestureState::Dragging { over, source, .. } => {
                let hovered = match over {
                    Some(DropTarget::Slot(slot_id)) => self.slot_index(slot_id),
                    _ => None,
                };
                let origin = match source {
                    DragSource::Slot { slot_id, .. } => self.slot_index(slot_id),
                    DragSource::Pool { .. } => None,
                };
                hovered.or(origin)
            }
            GestureState::Idle => return KeyFeedback::Ignored,
        };
        if self.day.slots.is_empty() {
            return KeyFeedback::Ignored;
        }

        let next = match current {
            Some(index) if step > 0 => (index + 1).min(last),
            Some(index) => index.saturating_sub(1),
            None if step > 0 => 0,
            None => last,
        };
        let slot_id = self.day.slots[next].id.clone();
        if let GestureState::Dragging { over, .. } = &mut self.gesture {
            *over = Some(DropTarget::Slot(slot_id.clone()));
        }
        KeyFeedback::Hovering(slot_id)
    }

    fn slot_index(&self, slot_id: &str) -> Option<usize> {
        self.day.slots.iter().position(|slot| slot.id == slot_id)
    }

    fn require_slot(&self, slot_id: &str) -> Result<usize, ScheduleError> {
        self.slot_index(slot_id)
            .ok_or_else(|| ScheduleError::SlotNotFound(slot_id.to_string()))
    }

    fn locate(&self, task_id: &str) -> Option<(usize, usize)> {
        self.day.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.tasks
                .iter()
                .position(|task| task.id == task_id)
                .map(|position| (index, position))
        })
    }

    fn emit(&self, mutation: SlotMutation) -> SlotMutation {
        // Sending fails only when nobody subscribed.
        let _ = self.changes.send(SlotChange::Mutated {
            date: self.day.date,
            mutation: mutation.clone(),
        });
        mutation
    }
}

fn apply_block(slot: &mut TimeSlot, block: SlotBlock) {
    slot.is_blocked = true;
    slot.block_reason = block.reason;
    slot.block_label = block.label;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date")
    }

    fn engine() -> AssignmentEngine {
        AssignmentEngine::new(date(), SlotInterval::ThirtyMinutes, DayWindow::default())
    }

    fn task(id: &str) -> ScheduledTask {
        ScheduledTask::new(id, format!("Task {id}"))
    }

    fn calendar_task(id: &str) -> ScheduledTask {
        let mut task = ScheduledTask::new(format!("calendar:work:{id}"), "Standup");
        task.is_calendar_event = true;
        task
    }

    fn slot_ids(engine: &AssignmentEngine, task_id: &str) -> Vec<String> {
        engine
            .slots()
            .iter()
            .filter(|slot| slot.tasks.iter().any(|task| task.id == task_id))
            .map(|slot| slot.id.clone())
            .collect()
    }

    // Feature: timeboxer, Property 6: add-then-move leaves exactly one copy
    proptest! {
        #[test]
        fn add_then_move_leaves_exactly_one_copy(from in 0usize..48usize, to in 0usize..48usize) {
            let mut engine = engine();
            let from_id = engine.slots()[from].id.clone();
            let to_id = engine.slots()[to].id.clone();

            engine.add_task_to_slot(task("t"), &from_id).expect("add");
            engine.move_task_between_slots("t", &from_id, &to_id).expect("move");

            prop_assert_eq!(slot_ids(&engine, "t"), vec![to_id.clone()]);
            let copies = engine.slot(&to_id).map(|slot| slot.tasks.iter().filter(|task| task.id == "t").count());
            prop_assert_eq!(copies, Some(1));
        }
    }

    #[test]
    fn add_rejects_unknown_and_blocked_slots() {
        let mut engine = engine();
        assert_eq!(
            engine.add_task_to_slot(task("a"), "25:00"),
            Err(ScheduleError::SlotNotFound("25:00".to_string()))
        );
        engine.block_time_slot("12:00", Some("lunch".to_string()), None).expect("block");
        assert_eq!(
            engine.add_task_to_slot(task("a"), "12:00"),
            Err(ScheduleError::SlotBlocked("12:00".to_string()))
        );
        assert!(engine.scheduled_task_ids().is_empty());
    }

    #[test]
    fn adding_a_scheduled_task_again_moves_it() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        let mutation = engine.add_task_to_slot(task("a"), "10:00").expect("re-add");
        assert_eq!(
            mutation,
            SlotMutation::TaskMoved {
                task_id: "a".to_string(),
                from_slot_id: "09:00".to_string(),
                to_slot_id: "10:00".to_string(),
            }
        );
        assert_eq!(slot_ids(&engine, "a"), vec!["10:00".to_string()]);

        let same = engine.add_task_to_slot(task("a"), "10:00").expect("same slot");
        assert!(same.is_noop());
        assert_eq!(engine.slot("10:00").map(|slot| slot.tasks.len()), Some(1));
    }

    #[test]
    fn move_into_blocked_slot_leaves_task_in_place() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        engine.block_time_slot("10:00", None, Some("Gym".to_string())).expect("block");

        let result = engine.move_task_between_slots("a", "09:00", "10:00");
        assert_eq!(result, Err(ScheduleError::SlotBlocked("10:00".to_string())));
        assert_eq!(slot_ids(&engine, "a"), vec!["09:00".to_string()]);

        let noop = engine.move_task_between_slots("a", "09:00", "09:00").expect("same slot");
        assert!(noop.is_noop());
        assert!(matches!(
            engine.move_task_between_slots("a", "11:00", "12:00"),
            Err(ScheduleError::TaskNotInSlot { .. })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        let first = engine.remove_task_from_slot("a").expect("remove");
        assert!(!first.is_noop());
        let second = engine.remove_task_from_slot("a").expect("remove again");
        assert!(second.is_noop());
        assert!(engine.scheduled_task_ids().is_empty());
        assert_eq!(engine.unscheduled().len(), 1);
    }

    #[test]
    fn removed_task_returns_to_unscheduled_once() {
        let mut engine = engine();
        engine.add_unscheduled([task("carried")]);
        engine.add_task_to_slot(task("carried"), "10:00").expect("schedule");
        assert!(engine.unscheduled().is_empty());

        engine.remove_task_from_slot("carried").expect("remove");
        let ids: Vec<_> = engine.unscheduled().iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["carried"]);

        engine.add_task_to_slot(task("carried"), "11:00").expect("reschedule");
        engine.remove_task_from_slot("carried").expect("remove again");
        assert_eq!(engine.unscheduled().len(), 1);
        assert!(engine.to_record().unscheduled.iter().any(|task| task.id == "carried"));
    }

    #[test]
    fn block_requires_empty_slot_and_unblock_always_succeeds() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        assert_eq!(
            engine.block_time_slot("09:00", None, None),
            Err(ScheduleError::SlotNotEmpty {
                slot_id: "09:00".to_string(),
                task_count: 1,
            })
        );
        assert!(!engine.slot("09:00").map(|slot| slot.is_blocked).unwrap_or(true));

        engine.unblock_time_slot("09:00").expect("unblock unblocked slot");
        engine.block_time_slot("13:00", Some("focus".to_string()), Some("Deep work".to_string()))
            .expect("block");
        let slot = engine.slot("13:00").expect("slot exists");
        assert!(slot.is_blocked);
        assert_eq!(slot.block_label.as_deref(), Some("Deep work"));
        engine.unblock_time_slot("13:00").expect("unblock");
        assert!(!engine.slot("13:00").map(|slot| slot.is_blocked).unwrap_or(true));
    }

    #[test]
    fn calendar_pseudo_tasks_reject_every_mutation() {
        let mut engine = engine();
        let meeting = calendar_task("evt-1");
        let meeting_id = meeting.id.clone();
        engine.apply_calendar_overlay(vec![("09:00".to_string(), meeting.clone())]);

        let read_only = ScheduleError::ReadOnlyTask(meeting_id.clone());
        assert_eq!(engine.add_task_to_slot(meeting, "10:00"), Err(read_only.clone()));
        assert_eq!(
            engine.move_task_between_slots(&meeting_id, "09:00", "10:00"),
            Err(read_only.clone())
        );
        assert_eq!(engine.remove_task_from_slot(&meeting_id), Err(read_only.clone()));
        assert_eq!(
            engine.set_task_status(&meeting_id, TaskStatus::Completed),
            Err(read_only.clone())
        );
        assert!(matches!(
            engine.block_time_slot("09:00", None, None),
            Err(ScheduleError::SlotNotEmpty { .. })
        ));
        assert_eq!(
            engine.begin_drag(DragSource::Slot {
                slot_id: "09:00".to_string(),
                task_id: meeting_id.clone(),
            }),
            Err(read_only)
        );
        assert_eq!(slot_ids(&engine, &meeting_id), vec!["09:00".to_string()]);
    }

    #[test]
    fn record_excludes_calendar_tasks_and_reloads_equivalently() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        engine.add_task_to_slot(task("b"), "09:00").expect("add");
        engine.set_task_status("b", TaskStatus::Completed).expect("complete");
        engine.block_time_slot("12:00", Some("lunch".to_string()), None).expect("block");
        engine.apply_calendar_overlay(vec![("14:00".to_string(), calendar_task("evt-1"))]);

        let record = engine.to_record();
        assert!(record.tasks().all(|task| !task.is_calendar_event));
        assert!(!record.slots.contains_key("14:00"));

        let reloaded = AssignmentEngine::from_record(
            date(),
            DayWindow::default(),
            SlotInterval::OneHour,
            Some(&record),
        );
        assert_eq!(reloaded.interval(), SlotInterval::ThirtyMinutes);
        assert!(reloaded.to_record().same_assignments(&record));
    }

    #[test]
    fn stats_ignore_pseudo_tasks_and_count_busy_slot_hours() {
        let mut engine = AssignmentEngine::new(date(), SlotInterval::OneHour, DayWindow::default());
        assert_eq!(engine.stats().completion_rate, 0.0);

        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        engine.add_task_to_slot(task("b"), "09:00").expect("add");
        engine.add_task_to_slot(task("c"), "11:00").expect("add");
        engine.add_task_to_slot(task("d"), "12:00").expect("add");
        engine.set_task_status("a", TaskStatus::Completed).expect("complete");
        engine.apply_calendar_overlay(vec![("15:00".to_string(), calendar_task("evt-1"))]);

        let stats = engine.stats();
        assert_eq!(stats.scheduled_count, 4);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.total_hours, 3.0);
        assert_eq!(stats.completion_rate, 25.0);
    }

    #[test]
    fn drop_gesture_applies_once_even_when_delivered_twice() {
        let mut engine = engine();
        let gesture = engine
            .begin_drag(DragSource::Pool { task: task("a") })
            .expect("begin");
        assert!(engine.move_over(gesture, DropTarget::Slot("09:00".to_string())));

        let first = engine.commit(gesture, Some(DropTarget::Slot("09:00".to_string())));
        let second = engine.commit(gesture, Some(DropTarget::Slot("09:30".to_string())));

        assert!(matches!(first, DropOutcome::Applied(SlotMutation::TaskAdded { .. })));
        assert_eq!(second, DropOutcome::Ignored);
        assert_eq!(slot_ids(&engine, "a"), vec!["09:00".to_string()]);
    }

    #[test]
    fn cancelled_gesture_leaves_board_untouched() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        let before = engine.to_record();

        let gesture = engine
            .begin_drag(DragSource::Slot {
                slot_id: "09:00".to_string(),
                task_id: "a".to_string(),
            })
            .expect("begin");
        engine.move_over(gesture, DropTarget::Slot("11:00".to_string()));
        assert!(engine.cancel(gesture));

        assert_eq!(engine.commit(gesture, None), DropOutcome::Ignored);
        assert_eq!(engine.to_record(), before);
        assert_eq!(engine.active_gesture(), None);
    }

    #[test]
    fn rejected_drop_reports_error_without_mutation() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        engine.block_time_slot("10:00", None, None).expect("block");

        let gesture = engine
            .begin_drag(DragSource::Slot {
                slot_id: "09:00".to_string(),
                task_id: "a".to_string(),
            })
            .expect("begin");
        let outcome = engine.commit(gesture, Some(DropTarget::Slot("10:00".to_string())));
        assert_eq!(
            outcome,
            DropOutcome::Rejected(ScheduleError::SlotBlocked("10:00".to_string()))
        );
        assert_eq!(slot_ids(&engine, "a"), vec!["09:00".to_string()]);
    }

    #[test]
    fn dropping_onto_pool_unschedules_the_task() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        let gesture = engine
            .begin_drag(DragSource::Slot {
                slot_id: "09:00".to_string(),
                task_id: "a".to_string(),
            })
            .expect("begin");
        let outcome = engine.commit(gesture, Some(DropTarget::Pool));
        assert!(matches!(outcome, DropOutcome::Applied(SlotMutation::TaskRemoved { .. })));
        assert!(engine.scheduled_task_ids().is_empty());
        assert_eq!(engine.unscheduled()[0].id, "a");
    }

    #[test]
    fn keyboard_path_walks_slots_and_drops() {
        let window = DayWindow::parse("09:00", "12:00").expect("valid window");
        let mut engine = AssignmentEngine::new(date(), SlotInterval::OneHour, window);

        assert_eq!(engine.handle_key(KeyCommand::Next), KeyFeedback::Ignored);
        assert!(matches!(
            engine.handle_key(KeyCommand::Grab(DragSource::Pool { task: task("a") })),
            KeyFeedback::Grabbed(_)
        ));
        assert_eq!(engine.handle_key(KeyCommand::Next), KeyFeedback::Hovering("09:00".to_string()));
        assert_eq!(engine.handle_key(KeyCommand::Next), KeyFeedback::Hovering("10:00".to_string()));
        assert_eq!(engine.handle_key(KeyCommand::Next), KeyFeedback::Hovering("11:00".to_string()));
        assert_eq!(engine.handle_key(KeyCommand::Next), KeyFeedback::Hovering("11:00".to_string()));
        assert_eq!(engine.handle_key(KeyCommand::Previous), KeyFeedback::Hovering("10:00".to_string()));

        let dropped = engine.handle_key(KeyCommand::Drop);
        assert!(matches!(
            dropped,
            KeyFeedback::Dropped(DropOutcome::Applied(SlotMutation::TaskAdded { .. }))
        ));
        assert_eq!(slot_ids(&engine, "a"), vec!["10:00".to_string()]);

        engine.handle_key(KeyCommand::Grab(DragSource::Slot {
            slot_id: "10:00".to_string(),
            task_id: "a".to_string(),
        }));
        assert_eq!(engine.handle_key(KeyCommand::Next), KeyFeedback::Hovering("11:00".to_string()));
        assert_eq!(engine.handle_key(KeyCommand::Cancel), KeyFeedback::Cancelled);
        assert_eq!(slot_ids(&engine, "a"), vec!["10:00".to_string()]);
    }

    #[test]
    fn interval_change_carries_tasks_and_blocks() {
        let mut engine = engine();
        engine.add_task_to_slot(task("a"), "09:30").expect("add");
        engine.block_time_slot("12:30", None, None).expect("block");

        let report = engine.change_interval(SlotInterval::TwoHours);
        assert_eq!(report.moved, 1);
        assert_eq!(engine.interval(), SlotInterval::TwoHours);
        assert_eq!(slot_ids(&engine, "a"), vec!["08:00".to_string()]);
        assert!(engine.slot("12:00").map(|slot| slot.is_blocked).unwrap_or(false));
    }

    #[tokio::test]
    async fn subscribers_receive_mutations_in_order() {
        let mut engine = engine();
        let mut changes = engine.subscribe();

        engine.add_task_to_slot(task("a"), "09:00").expect("add");
        engine.remove_task_from_slot("a").expect("remove");

        let first = changes.recv().await.expect("first change");
        let second = changes.recv().await.expect("second change");
        assert!(matches!(
            first,
            SlotChange::Mutated {
                mutation: SlotMutation::TaskAdded { .. },
                ..
            }
        ));
        assert!(matches!(
            second,
            SlotChange::Mutated {
                mutation: SlotMutation::TaskRemoved { .. },
                ..
            }
        ));
    }

    #[test]
    fn from_record_moves_tasks_of_vanished_slots_to_unscheduled() {
        let record = TimeboxRecord {
            interval: SlotInterval::OneHour,
            slots: BTreeMap::from([
                ("07:00".to_string(), vec![task("early")]),
                ("09:00".to_string(), vec![task("on-time")]),
            ]),
            ..TimeboxRecord::default()
        };
        let window = DayWindow::parse("08:00", "18:00").expect("valid window");
        let engine = AssignmentEngine::from_record(date(), window, SlotInterval::ThirtyMinutes, Some(&record));

        assert_eq!(slot_ids(&engine, "on-time"), vec!["09:00".to_string()]);
        assert_eq!(engine.unscheduled().len(), 1);
        assert_eq!(engine.unscheduled()[0].id, "early");
    }
}
