use crate::domain::models::{DayWindow, ScheduledTask, SlotInterval, TimeSlot};
use chrono::NaiveDate;
use serde::Serialize;

/// The active date and its ordered slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Day {
    pub date: NaiveDate,
    pub interval: SlotInterval,
    pub window: DayWindow,
    pub slots: Vec<TimeSlot>,
}

/// Builds the contiguous, non-overlapping slots covering `window`.
///
/// Slot identities depend only on the window and interval, so the same inputs
/// always produce the same ids. When the window length is not a multiple of
/// the interval the final slot is clipped to the window end.
pub fn generate_day_slots(date: NaiveDate, interval: SlotInterval, window: DayWindow) -> Day {
    let step = interval.minutes();
    let mut slots = Vec::new();
    let mut start = window.start_minute;
    while start < window.end_minute {
        let end = (start + step).min(window.end_minute);
        slots.push(TimeSlot::new(start, end));
        start = end;
    }

    Day {
        date,
        interval,
        window,
        slots,
    }
}

pub fn find_slot_for_minute(slots: &[TimeSlot], minute: u32) -> Option<usize> {
    slots.iter().position(|slot| slot.contains_minute(minute))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemapReport {
    pub moved: usize,
    pub unscheduled: Vec<ScheduledTask>,
    pub dropped_blocks: Vec<String>,
    pub calendar_tasks_discarded: usize,
}

/// Carries assignments from `previous` onto a freshly generated `target` grid.
///
/// Each genuine task lands in the target slot containing its old slot's start
/// minute, keeping relative order. Tasks with no containing slot are returned
/// as unscheduled. A block survives only when its new slot ends up empty.
/// Calendar pseudo-tasks are discarded; the next calendar load recomputes them.
pub fn remap_assignments(previous: &[TimeSlot], target: &mut [TimeSlot]) -> RemapReport {
    let mut report = RemapReport::default();
    let mut pending_blocks = Vec::new();

    for old_slot in previous {
        let destination = find_slot_for_minute(target, old_slot.start_minute);
        for task in &old_slot.tasks {
            if task.is_calendar_event {
                report.calendar_tasks_discarded += 1;
                continue;
            }
            match destination {
                Some(index) => {
                    if !target[index].tasks.iter().any(|existing| existing.id == task.id) {
                        target[index].tasks.push(task.clone());
                        report.moved += 1;
                    }
                }
                None => report.unscheduled.push(task.clone()),
            }
        }
        if let Some(block) = old_slot.block() {
            pending_blocks.push((old_slot.id.clone(), destination, block));
        }
    }

    for (old_id, destination, block) in pending_blocks {
        match destination {
            Some(index) if target[index].is_empty() => {
                let slot = &mut target[index];
                if !slot.is_blocked {
                    slot.is_blocked = true;
                    slot.block_reason = block.reason;
                    slot.block_label = block.label;
                }
            }
            _ => report.dropped_blocks.push(old_id),
        }
    }

    report
}
