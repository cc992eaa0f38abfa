use crate::application::assignment::{AssignmentEngine, DayStats, SlotChange};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_merge::{overlay, CalendarMergeService, RetryPolicy};
use crate::application::gesture::{
    DragSource, DropOutcome, DropTarget, GestureId, KeyCommand, KeyFeedback, SlotMutation,
};
use crate::application::navigation::{CarryForward, NavigationController};
use crate::application::task_pool::unscheduled_pool;
use crate::domain::clock::Clock;
use crate::domain::error::ScheduleError;
use crate::domain::models::{
    parse_date, PlannerTask, RecurrencePattern, RecurringCompletion, ScheduledTask, SlotInterval,
    TaskStatus, TimeSlot,
};
use crate::domain::recurrence::{current_streak, next_occurrence};
use crate::domain::snooze::{calculate_snooze_until, SnoozeSpec};
use crate::domain::time_slots::RemapReport;
use crate::infrastructure::calendar_client::CalendarProvider;
use crate::infrastructure::completion_repository::{
    CompletionRepository, InMemoryCompletionRepository, SqliteCompletionRepository,
};
use crate::infrastructure::config::{save_selected_calendar_ids, PlannerConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_repository::{
    InMemoryTaskRepository, SqliteTaskRepository, TaskRepository,
};
use crate::infrastructure::timebox_store::{
    InMemoryTimeboxStore, SqliteTimeboxStore, TimeboxRecord, TimeboxStore,
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CHANGE_CHANNEL_CAPACITY: usize = 128;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

type SharedCalendarMerge = Arc<CalendarMergeService<dyn CalendarProvider>>;

pub struct AppState {
    config_dir: Option<PathBuf>,
    config: PlannerConfig,
    clock: Clock,
    timebox_store: Arc<dyn TimeboxStore>,
    task_repository: Arc<dyn TaskRepository>,
    completion_repository: Arc<dyn CompletionRepository>,
    calendar_merge: Option<SharedCalendarMerge>,
    changes: broadcast::Sender<SlotChange>,
    runtime: Mutex<RuntimeState>,
}

struct RuntimeState {
    navigation: NavigationController,
    engine: AssignmentEngine,
    selected_calendar_ids: Vec<String>,
}

impl AppState {
    /// Bootstraps `workspace_root` and wires the SQLite-backed task, board
    /// and completion stores.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let clock = Clock::system(bootstrap.config.timezone);
        let timebox_store = SqliteTimeboxStore::new(&bootstrap.database_path)
            .with_now_provider(clock.now_provider());
        let mut state = Self::in_memory(bootstrap.config, clock)
            .with_timebox_store(Arc::new(timebox_store))
            .with_task_repository(Arc::new(SqliteTaskRepository::new(&bootstrap.database_path)))
            .with_completion_repository(Arc::new(SqliteCompletionRepository::new(
                &bootstrap.database_path,
            )));
        state.config_dir = Some(bootstrap.config_dir);
        Ok(state)
    }

    /// Fully in-memory state; nothing touches the filesystem.
    pub fn in_memory(config: PlannerConfig, clock: Clock) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let navigation = NavigationController::new(clock.clone());
        let engine = AssignmentEngine::new(
            navigation.active_date(),
            config.default_interval,
            config.day_window,
        )
        .with_change_sender(changes.clone());
        let runtime = RuntimeState {
            navigation,
            engine,
            selected_calendar_ids: config.selected_calendar_ids.clone(),
        };

        let timebox_store: Arc<dyn TimeboxStore> =
            Arc::new(InMemoryTimeboxStore::default().with_now_provider(clock.now_provider()));

        Self {
            config_dir: None,
            config,
            clock,
            timebox_store,
            task_repository: Arc::new(InMemoryTaskRepository::default()),
            completion_repository: Arc::new(InMemoryCompletionRepository::default()),
            calendar_merge: None,
            changes,
            runtime: Mutex::new(runtime),
        }
    }

    pub fn with_timebox_store(mut self, timebox_store: Arc<dyn TimeboxStore>) -> Self {
        self.timebox_store = timebox_store;
        self
    }

    pub fn with_task_repository(mut self, task_repository: Arc<dyn TaskRepository>) -> Self {
        self.task_repository = task_repository;
        self
    }

    pub fn with_completion_repository(
        mut self,
        completion_repository: Arc<dyn CompletionRepository>,
    ) -> Self {
        self.completion_repository = completion_repository;
        self
    }

    pub fn with_calendar_provider(mut self, provider: Arc<dyn CalendarProvider>) -> Self {
        let retry_policy = RetryPolicy {
            max_attempts: self.config.calendar_fetch_attempts,
            base_delay_ms: self.config.calendar_fetch_base_delay_ms,
        };
        self.calendar_merge =
            Some(Arc::new(CalendarMergeService::new(provider).with_retry_policy(retry_policy)));
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<SlotChange> {
        self.changes.subscribe()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub interval: SlotInterval,
    pub slots: Vec<TimeSlot>,
    pub unscheduled: Vec<ScheduledTask>,
    pub stats: DayStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarLoadReport {
    pub date: NaiveDate,
    /// False when the board changed day or interval while fetching.
    pub applied: bool,
    pub placed: usize,
    pub dropped: usize,
    pub warning: Option<String>,
}

fn day_view(engine: &AssignmentEngine) -> DayView {
    DayView {
        date: engine.date(),
        interval: engine.interval(),
        slots: engine.slots().to_vec(),
        unscheduled: engine.unscheduled().to_vec(),
        stats: engine.stats(),
    }
}

/// Loads the stored board for the active date and makes it current.
pub async fn load_day_impl(state: &AppState) -> Result<DayView, InfraError> {
    let date = {
        let runtime = lock_runtime(state)?;
        runtime.navigation.active_date()
    };
    let record = state.timebox_store.load(&state.config.user_id, date).await?;

    let mut runtime = lock_runtime(state)?;
    runtime.engine = AssignmentEngine::from_record(
        date,
        state.config.day_window,
        state.config.default_interval,
        record.as_ref(),
    )
    .with_change_sender(state.changes.clone());
    let view = day_view(&runtime.engine);
    info!(
        command = "load_day",
        %date,
        stored = record.is_some(),
        scheduled = view.stats.scheduled_count,
        "day loaded"
    );
    Ok(view)
}

pub fn view_day_impl(state: &AppState) -> Result<DayView, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(day_view(&runtime.engine))
}

pub fn go_to_previous_day_impl(state: &AppState) -> Result<NaiveDate, InfraError> {
    let date = lock_runtime(state)?.navigation.go_to_previous_day();
    debug!(command = "go_to_previous_day", %date);
    Ok(date)
}

pub fn go_to_next_day_impl(state: &AppState) -> Result<NaiveDate, InfraError> {
    let date = lock_runtime(state)?.navigation.go_to_next_day();
    debug!(command = "go_to_next_day", %date);
    Ok(date)
}

pub fn go_to_today_impl(state: &AppState) -> Result<NaiveDate, InfraError> {
    let date = lock_runtime(state)?.navigation.go_to_today();
    debug!(command = "go_to_today", %date);
    Ok(date)
}

pub fn go_to_date_impl(state: &AppState, date: String) -> Result<NaiveDate, InfraError> {
    let date = lock_runtime(state)?.navigation.go_to_date(&date)?;
    debug!(command = "go_to_date", %date);
    Ok(date)
}

pub fn create_task_impl(
    state: &AppState,
    title: String,
    recurrence: Option<RecurrencePattern>,
) -> Result<PlannerTask, InfraError> {
    let title = normalize_required(&title, "title")?;
    let task = PlannerTask {
        id: next_id("tsk"),
        title,
        status: TaskStatus::Pending,
        source_id: None,
        deferred_until: None,
        recurrence,
        created_at: state.clock.now(),
    };
    let created = state.task_repository.create(task)?;
    info!(command = "create_task", task_id = %created.id, recurring = created.is_recurring(), "task created");
    Ok(created)
}

pub fn list_tasks_impl(state: &AppState) -> Result<Vec<PlannerTask>, InfraError> {
    state.task_repository.list()
}

/// Edits the stored task. Copies already placed on a board keep their old
/// label and status.
pub fn update_task_impl(
    state: &AppState,
    task_id: String,
    title: Option<String>,
    status: Option<String>,
) -> Result<PlannerTask, InfraError> {
    let mut task = require_task(state, &task_id)?;
    if let Some(title) = title {
        task.title = normalize_required(&title, "title")?;
    }
    if let Some(status) = status {
        task.status = TaskStatus::parse(&status).map_err(InfraError::InvalidInput)?;
    }
    let updated = state.task_repository.update(task)?;
    info!(command = "update_task", task_id = %updated.id, "task updated");
    Ok(updated)
}

pub fn delete_task_impl(state: &AppState, task_id: String) -> Result<bool, InfraError> {
    let task_id = normalize_required(&task_id, "task_id")?;
    let deleted = state.task_repository.delete(&task_id)?;
    info!(command = "delete_task", task_id = %task_id, deleted, "task delete requested");
    Ok(deleted)
}

pub async fn add_task_to_slot_impl(
    state: &AppState,
    task_id: String,
    slot_id: String,
) -> Result<SlotMutation, InfraError> {
    let task_id = normalize_required(&task_id, "task_id")?;
    let slot_id = normalize_required(&slot_id, "slot_id")?;
    let snapshot = resolve_snapshot(state, &task_id)?;
    apply_mutation(state, "add_task_to_slot", |engine| {
        engine.add_task_to_slot(snapshot, &slot_id)
    })
    .await
}

pub async fn move_task_between_slots_impl(
    state: &AppState,
    task_id: String,
    from_slot_id: String,
    to_slot_id: String,
) -> Result<SlotMutation, InfraError> {
    let task_id = normalize_required(&task_id, "task_id")?;
    let from_slot_id = normalize_required(&from_slot_id, "from_slot_id")?;
    let to_slot_id = normalize_required(&to_slot_id, "to_slot_id")?;
    apply_mutation(state, "move_task_between_slots", |engine| {
        engine.move_task_between_slots(&task_id, &from_slot_id, &to_slot_id)
    })
    .await
}

pub async fn remove_task_from_slot_impl(
    state: &AppState,
    task_id: String,
) -> Result<SlotMutation, InfraError> {
    let task_id = normalize_required(&task_id, "task_id")?;
    apply_mutation(state, "remove_task_from_slot", |engine| {
        engine.remove_task_from_slot(&task_id)
    })
    .await
}

pub async fn block_time_slot_impl(
    state: &AppState,
    slot_id: String,
    reason: Option<String>,
    label: Option<String>,
) -> Result<SlotMutation, InfraError> {
    let slot_id = normalize_required(&slot_id, "slot_id")?;
    let reason = normalize_optional(reason);
    let label = normalize_optional(label);
    apply_mutation(state, "block_time_slot", |engine| {
        engine.block_time_slot(&slot_id, reason, label)
    })
    .await
}

pub async fn unblock_time_slot_impl(
    state: &AppState,
    slot_id: String,
) -> Result<SlotMutation, InfraError> {
    let slot_id = normalize_required(&slot_id, "slot_id")?;
    apply_mutation(state, "unblock_time_slot", |engine| {
        engine.unblock_time_slot(&slot_id)
    })
    .await
}

/// Toggles a board task. Completing a recurring task also records the
/// occurrence for the board's date; one-off tasks mirror the status into the
/// task repository.
pub async fn set_task_status_impl(
    state: &AppState,
    task_id: String,
    status: String,
) -> Result<SlotMutation, InfraError> {
    let task_id = normalize_required(&task_id, "task_id")?;
    let status = TaskStatus::parse(&status).map_err(InfraError::InvalidInput)?;
    let mutation = apply_mutation(state, "set_task_status", |engine| {
        engine.set_task_status(&task_id, status)
    })
    .await?;

    if let Some(mut task) = state.task_repository.get(&task_id)? {
        if task.is_recurring() {
            if status == TaskStatus::Completed {
                let date = lock_runtime(state)?.engine.date();
                state.completion_repository.record(&RecurringCompletion {
                    date,
                    task_id: task_id.clone(),
                })?;
                info!(command = "set_task_status", task_id = %task_id, %date, "occurrence completed");
            }
        } else if task.status != status {
            task.status = status;
            state.task_repository.update(task)?;
        }
    }
    Ok(mutation)
}

pub async fn change_interval_impl(
    state: &AppState,
    interval_minutes: u32,
) -> Result<RemapReport, InfraError> {
    let interval = SlotInterval::from_minutes(interval_minutes).map_err(InfraError::InvalidInput)?;
    let (report, changed, date, record) = {
        let mut runtime = lock_runtime(state)?;
        let changed = runtime.engine.interval() != interval;
        let report = runtime.engine.change_interval(interval);
        (report, changed, runtime.engine.date(), runtime.engine.to_record())
    };
    info!(
        command = "change_interval",
        %date,
        interval_minutes,
        moved = report.moved,
        unscheduled = report.unscheduled.len(),
        dropped_blocks = report.dropped_blocks.len(),
        "interval changed"
    );
    if changed {
        persist_board(state, "change_interval", date, &record).await?;
    }
    Ok(report)
}

pub fn begin_drag_impl(state: &AppState, source: DragSource) -> Result<GestureId, InfraError> {
    let task_id = source.task_id().to_string();
    let mut runtime = lock_runtime(state)?;
    let gesture = runtime
        .engine
        .begin_drag(source)
        .map_err(|error| rejected("begin_drag", error))?;
    debug!(command = "begin_drag", gesture, task_id = %task_id, "gesture started");
    Ok(gesture)
}

pub fn move_over_impl(
    state: &AppState,
    gesture: GestureId,
    target: DropTarget,
) -> Result<bool, InfraError> {
    Ok(lock_runtime(state)?.engine.move_over(gesture, target))
}

pub fn cancel_gesture_impl(state: &AppState, gesture: GestureId) -> Result<bool, InfraError> {
    let cancelled = lock_runtime(state)?.engine.cancel(gesture);
    debug!(command = "cancel_gesture", gesture, cancelled);
    Ok(cancelled)
}

/// Resolves a pointer gesture. Duplicate deliveries of the same drop come
/// back as [`DropOutcome::Ignored`] and are not persisted.
pub async fn commit_gesture_impl(
    state: &AppState,
    gesture: GestureId,
    target: Option<DropTarget>,
) -> Result<DropOutcome, InfraError> {
    let (outcome, date, record) = {
        let mut runtime = lock_runtime(state)?;
        let outcome = runtime.engine.commit(gesture, target);
        (outcome, runtime.engine.date(), runtime.engine.to_record())
    };
    persist_drop(state, "commit_gesture", &outcome, date, &record).await?;
    Ok(outcome)
}

pub async fn handle_key_impl(
    state: &AppState,
    command: KeyCommand,
) -> Result<KeyFeedback, InfraError> {
    let (feedback, date, record) = {
        let mut runtime = lock_runtime(state)?;
        let feedback = runtime.engine.handle_key(command);
        (feedback, runtime.engine.date(), runtime.engine.to_record())
    };
    if let KeyFeedback::Dropped(outcome) = &feedback {
        persist_drop(state, "handle_key", outcome, date, &record).await?;
    }
    Ok(feedback)
}

pub fn day_stats_impl(state: &AppState) -> Result<DayStats, InfraError> {
    Ok(lock_runtime(state)?.engine.stats())
}

/// Tasks still available for the board's date, followed by tasks parked in
/// the day's unscheduled list. A parked task that still exists in the task
/// repository is judged by its stored copy; one that does not is kept until
/// completed.
pub fn unscheduled_tasks_impl(state: &AppState) -> Result<Vec<ScheduledTask>, InfraError> {
    let tasks = state.task_repository.list()?;
    let (date, on_board, parked) = {
        let runtime = lock_runtime(state)?;
        (
            runtime.engine.date(),
            runtime.engine.scheduled_task_ids(),
            runtime.engine.unscheduled().to_vec(),
        )
    };

    let mut completed_on_date = HashSet::new();
    for task in tasks.iter().filter(|task| task.is_recurring()) {
        let completions = state.completion_repository.list_for_task(&task.id)?;
        if completions.iter().any(|completion| completion.date == date) {
            completed_on_date.insert(task.id.clone());
        }
    }

    let mut pool: Vec<ScheduledTask> =
        unscheduled_pool(&tasks, &on_board, &completed_on_date, date, state.clock.now())
            .iter()
            .map(ScheduledTask::from_task)
            .collect();
    let stored_ids: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    for task in parked {
        if stored_ids.contains(task.id.as_str()) || task.is_completed() {
            continue;
        }
        if !pool.iter().any(|existing| existing.id == task.id) {
            pool.push(task);
        }
    }
    Ok(pool)
}

/// Copies today's incomplete tasks into tomorrow's unscheduled list.
pub async fn copy_incomplete_tasks_impl(state: &AppState) -> Result<CarryForward, InfraError> {
    let (navigation, board_is_active) = {
        let runtime = lock_runtime(state)?;
        let board_is_active = runtime.engine.date() == runtime.navigation.active_date();
        (runtime.navigation.clone(), board_is_active)
    };
    let carry = navigation
        .copy_incomplete_tasks(state.timebox_store.as_ref(), &state.config.user_id)
        .await?;
    if !board_is_active {
        load_day_impl(state).await?;
    }

    let (added, date, record) = {
        let mut runtime = lock_runtime(state)?;
        let added = runtime.engine.add_unscheduled(carry.tasks.clone());
        (added, runtime.engine.date(), runtime.engine.to_record())
    };
    info!(
        command = "copy_incomplete_tasks",
        from = %carry.from_date,
        to = %date,
        eligible = carry.count,
        added,
        "incomplete tasks carried forward"
    );
    if added > 0 {
        persist_board(state, "copy_incomplete_tasks", date, &record).await?;
    }
    Ok(carry)
}

pub fn snooze_task_impl(
    state: &AppState,
    task_id: String,
    value: Option<u32>,
    unit_or_anchor: String,
) -> Result<PlannerTask, InfraError> {
    let spec = SnoozeSpec::parse(value, &unit_or_anchor).map_err(InfraError::InvalidInput)?;
    let mut task = require_task(state, &task_id)?;
    let until = calculate_snooze_until(spec, &state.clock);
    task.deferred_until = Some(until);
    let updated = state.task_repository.update(task)?;
    info!(command = "snooze_task", task_id = %updated.id, %until, "task snoozed");
    Ok(updated)
}

pub fn record_completion_impl(
    state: &AppState,
    task_id: String,
    date: Option<String>,
) -> Result<RecurringCompletion, InfraError> {
    let task = require_task(state, &task_id)?;
    require_pattern(&task)?;
    let date = match date {
        Some(value) => parse_date_input(&value)?,
        None => state.clock.today(),
    };
    let completion = RecurringCompletion {
        date,
        task_id: task.id,
    };
    state.completion_repository.record(&completion)?;
    info!(command = "record_completion", task_id = %completion.task_id, %date, "occurrence completed");
    Ok(completion)
}

pub fn task_streak_impl(state: &AppState, task_id: String) -> Result<u32, InfraError> {
    let task = require_task(state, &task_id)?;
    let pattern = require_pattern(&task)?;
    let completions = state.completion_repository.list_for_task(&task.id)?;
    Ok(current_streak(&completions, pattern, &state.clock))
}

pub fn next_occurrence_impl(
    state: &AppState,
    task_id: String,
    from_date: Option<String>,
) -> Result<Option<NaiveDate>, InfraError> {
    let task = require_task(state, &task_id)?;
    let pattern = require_pattern(&task)?;
    let from_date = match from_date {
        Some(value) => parse_date_input(&value)?,
        None => state.clock.today(),
    };
    Ok(next_occurrence(pattern, from_date))
}

pub fn select_calendars_impl(
    state: &AppState,
    calendar_ids: Vec<String>,
) -> Result<Vec<String>, InfraError> {
    let mut normalized: Vec<String> = Vec::new();
    for id in calendar_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
        if !normalized.iter().any(|existing| existing == id) {
            normalized.push(id.to_string());
        }
    }
    if let Some(config_dir) = state.config_dir() {
        save_selected_calendar_ids(config_dir, &normalized)?;
    }
    lock_runtime(state)?.selected_calendar_ids = normalized.clone();
    info!(command = "select_calendars", count = normalized.len(), "calendar selection saved");
    Ok(normalized)
}

/// Fetches the selected calendars in the background and overlays their events
/// onto the board. The board stays usable meanwhile; the returned handle
/// carries the load's result or error.
pub fn start_calendar_load(
    state: &Arc<AppState>,
) -> Result<JoinHandle<Result<CalendarLoadReport, InfraError>>, InfraError> {
    let service = state
        .calendar_merge
        .clone()
        .ok_or_else(|| InfraError::Calendar("no calendar provider configured".to_string()))?;
    let (date, interval, calendar_ids) = {
        let runtime = lock_runtime(state)?;
        (
            runtime.engine.date(),
            runtime.engine.interval(),
            runtime.selected_calendar_ids.clone(),
        )
    };
    debug!(command = "calendar_load", %date, calendars = calendar_ids.len(), "calendar load started");
    Ok(tokio::spawn(run_calendar_load(
        Arc::clone(state),
        service,
        date,
        interval,
        calendar_ids,
    )))
}

async fn run_calendar_load(
    state: Arc<AppState>,
    service: SharedCalendarMerge,
    date: NaiveDate,
    interval: SlotInterval,
    calendar_ids: Vec<String>,
) -> Result<CalendarLoadReport, InfraError> {
    let timezone = state.clock.timezone();
    let outcome = service.fetch_day(&calendar_ids, date, timezone).await;
    let warning = outcome.warning();
    if let Some(message) = &warning {
        warn!(command = "calendar_load", %date, warning = %message, "calendar load incomplete");
    }

    let mut runtime = lock_runtime(&state)?;
    if runtime.engine.date() != date || runtime.engine.interval() != interval {
        debug!(command = "calendar_load", %date, "board changed during calendar load; result discarded");
        return Ok(CalendarLoadReport {
            date,
            applied: false,
            placed: 0,
            dropped: 0,
            warning,
        });
    }

    let merged = overlay(runtime.engine.slots(), &outcome.events, date, timezone);
    let dropped = merged.dropped.len();
    let placed = runtime.engine.apply_calendar_overlay(merged.placements);
    info!(command = "calendar_load", %date, placed, dropped, "calendar events merged");
    Ok(CalendarLoadReport {
        date,
        applied: true,
        placed,
        dropped,
        warning,
    })
}

async fn apply_mutation<F>(
    state: &AppState,
    command: &'static str,
    mutate: F,
) -> Result<SlotMutation, InfraError>
where
    F: FnOnce(&mut AssignmentEngine) -> Result<SlotMutation, ScheduleError>,
{
    let (mutation, date, record) = {
        let mut runtime = lock_runtime(state)?;
        let mutation = mutate(&mut runtime.engine).map_err(|error| rejected(command, error))?;
        (mutation, runtime.engine.date(), runtime.engine.to_record())
    };
    info!(command, %date, mutation = ?mutation, "board updated");
    if !mutation.is_noop() {
        persist_board(state, command, date, &record).await?;
    }
    Ok(mutation)
}

async fn persist_drop(
    state: &AppState,
    command: &'static str,
    outcome: &DropOutcome,
    date: NaiveDate,
    record: &TimeboxRecord,
) -> Result<(), InfraError> {
    match outcome {
        DropOutcome::Applied(mutation) if !mutation.is_noop() => {
            info!(command, %date, mutation = ?mutation, "drop applied");
            persist_board(state, command, date, record).await
        }
        DropOutcome::Rejected(error) => {
            warn!(command, %date, error = %error, "drop rejected");
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Writes the whole board. A failed write is reported but the in-memory
/// change stays applied.
async fn persist_board(
    state: &AppState,
    command: &'static str,
    date: NaiveDate,
    record: &TimeboxRecord,
) -> Result<(), InfraError> {
    match state.timebox_store.save(&state.config.user_id, date, record).await {
        Ok(updated_at) => {
            debug!(command, %date, %updated_at, "board saved");
            Ok(())
        }
        Err(save_error) => {
            error!(command, %date, error = %save_error, "board save failed; in-memory change kept");
            Err(InfraError::Persistence(format!(
                "failed to save board for {date}: {save_error}"
            )))
        }
    }
}

fn rejected(command: &'static str, error: ScheduleError) -> InfraError {
    warn!(command, error = %error, "slot mutation rejected");
    InfraError::Schedule(error)
}

/// The snapshot to place: the stored task if there is one, else a copy that
/// already lives on the board or in the day's unscheduled list.
fn resolve_snapshot(state: &AppState, task_id: &str) -> Result<ScheduledTask, InfraError> {
    if let Some(task) = state.task_repository.get(task_id)? {
        return Ok(ScheduledTask::from_task(&task));
    }
    let runtime = lock_runtime(state)?;
    runtime
        .engine
        .find_task(task_id)
        .map(|(_, task)| task.clone())
        .or_else(|| {
            runtime
                .engine
                .unscheduled()
                .iter()
                .find(|task| task.id == task_id)
                .cloned()
        })
        .ok_or_else(|| InfraError::NotFound(format!("task not found: {task_id}")))
}

fn require_task(state: &AppState, task_id: &str) -> Result<PlannerTask, InfraError> {
    let task_id = normalize_required(task_id, "task_id")?;
    state
        .task_repository
        .get(&task_id)?
        .ok_or_else(|| InfraError::NotFound(format!("task not found: {task_id}")))
}

fn require_pattern(task: &PlannerTask) -> Result<&RecurrencePattern, InfraError> {
    task.recurrence
        .as_ref()
        .ok_or_else(|| InfraError::InvalidInput(format!("task {} is not recurring", task.id)))
}

fn parse_date_input(value: &str) -> Result<NaiveDate, InfraError> {
    parse_date(value, "date").map_err(InfraError::InvalidDate)
}

fn normalize_required(value: &str, field_name: &str) -> Result<String, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::InvalidInput(format!("{field_name} must not be empty")));
    }
    Ok(value.to_string())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::Persistence(format!("runtime lock poisoned: {error}")))
}
