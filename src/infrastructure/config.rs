use crate::domain::models::{DayWindow, SlotInterval};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SCHEDULE_JSON: &str = "schedule.json";
const CALENDARS_JSON: &str = "calendars.json";
const DEFAULT_USER_ID: &str = "default";
const DEFAULT_FETCH_ATTEMPTS: u8 = 3;
const DEFAULT_FETCH_DELAY_MS: u64 = 200;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub schedule: serde_json::Value,
    pub calendars: serde_json::Value,
}

/// Typed view over the workspace config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    pub app_name: String,
    pub timezone: Tz,
    pub user_id: String,
    pub day_window: DayWindow,
    pub default_interval: SlotInterval,
    pub selected_calendar_ids: Vec<String>,
    pub calendar_fetch_attempts: u8,
    pub calendar_fetch_base_delay_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            app_name: "Timeboxer".to_string(),
            timezone: Tz::UTC,
            user_id: DEFAULT_USER_ID.to_string(),
            day_window: DayWindow::default(),
            default_interval: SlotInterval::default(),
            selected_calendar_ids: vec!["primary".to_string()],
            calendar_fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            calendar_fetch_base_delay_ms: DEFAULT_FETCH_DELAY_MS,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Timeboxer",
                "timezone": "UTC",
                "userId": DEFAULT_USER_ID
            }),
        ),
        (
            SCHEDULE_JSON,
            serde_json::json!({
                "schema": 1,
                "dayStart": "00:00",
                "dayEnd": "24:00",
                "defaultIntervalMinutes": 30
            }),
        ),
        (
            CALENDARS_JSON,
            serde_json::json!({
                "schema": 1,
                "selectedCalendarIds": ["primary"],
                "fetch": {
                    "maxAttempts": DEFAULT_FETCH_ATTEMPTS,
                    "baseDelayMs": DEFAULT_FETCH_DELAY_MS
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        schedule: read_config(&config_dir.join(SCHEDULE_JSON))?,
        calendars: read_config(&config_dir.join(CALENDARS_JSON))?,
    })
}

pub fn load_planner_config(config_dir: &Path) -> Result<PlannerConfig, InfraError> {
    let bundle = load_configs(config_dir)?;
    PlannerConfig::from_bundle(&bundle)
}

impl PlannerConfig {
    pub fn from_bundle(bundle: &ConfigBundle) -> Result<Self, InfraError> {
        let defaults = Self::default();

        let app_name = read_str(&bundle.app, "appName")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.app_name);
        let timezone = match read_str(&bundle.app, "timezone") {
            Some(name) => name.parse::<Tz>().map_err(|error| {
                InfraError::InvalidConfig(format!("app.timezone '{name}' is not an IANA zone: {error}"))
            })?,
            None => defaults.timezone,
        };
        let user_id = read_str(&bundle.app, "userId")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.user_id);

        let day_start = read_str(&bundle.schedule, "dayStart").unwrap_or("00:00");
        let day_end = read_str(&bundle.schedule, "dayEnd").unwrap_or("24:00");
        let day_window = DayWindow::parse(day_start, day_end).map_err(InfraError::InvalidConfig)?;
        let default_interval = match bundle
            .schedule
            .get("defaultIntervalMinutes")
            .and_then(serde_json::Value::as_u64)
        {
            Some(minutes) => {
                let minutes = u32::try_from(minutes).map_err(|_| {
                    InfraError::InvalidConfig("schedule.defaultIntervalMinutes is out of range".to_string())
                })?;
                SlotInterval::from_minutes(minutes).map_err(InfraError::InvalidConfig)?
            }
            None => defaults.default_interval,
        };

        let selected_calendar_ids = bundle
            .calendars
            .get("selectedCalendarIds")
            .and_then(serde_json::Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let fetch = bundle.calendars.get("fetch");
        let calendar_fetch_attempts = fetch
            .and_then(|value| value.get("maxAttempts"))
            .and_then(serde_json::Value::as_u64)
            .map(|value| value.clamp(1, u64::from(u8::MAX)) as u8)
            .unwrap_or(defaults.calendar_fetch_attempts);
        let calendar_fetch_base_delay_ms = fetch
            .and_then(|value| value.get("baseDelayMs"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(defaults.calendar_fetch_base_delay_ms);

        Ok(Self {
            app_name,
            timezone,
            user_id,
            day_window,
            default_interval,
            selected_calendar_ids,
            calendar_fetch_attempts,
            calendar_fetch_base_delay_ms,
        })
    }
}

fn read_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn save_selected_calendar_ids(config_dir: &Path, calendar_ids: &[String]) -> Result<(), InfraError> {
    let path = config_dir.join(CALENDARS_JSON);
    let mut calendars = read_config(&path)?;
    let object = calendars.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;

    let mut normalized: Vec<String> = Vec::new();
    for id in calendar_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
        if !normalized.iter().any(|existing| existing == id) {
            normalized.push(id.to_string());
        }
    }
    object.insert("selectedCalendarIds".to_string(), serde_json::json!(normalized));

    write_config(&path, &calendars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "timeboxer-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_and_loaded() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let config = load_planner_config(&dir.path).expect("load config");
        assert_eq!(config, PlannerConfig::default());
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(dir.path.join(APP_JSON), r#"{"schema": 2}"#).expect("overwrite app.json");
        match load_planner_config(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn work_day_window_interval_and_timezone_are_parsed() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(SCHEDULE_JSON),
            r#"{"schema": 1, "dayStart": "08:00", "dayEnd": "18:00", "defaultIntervalMinutes": 60}"#,
        )
        .expect("overwrite schedule.json");
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema": 1, "timezone": "Europe/Berlin", "userId": "ada"}"#,
        )
        .expect("overwrite app.json");

        let config = load_planner_config(&dir.path).expect("load config");
        assert_eq!(config.day_window.start_minute, 480);
        assert_eq!(config.day_window.end_minute, 1080);
        assert_eq!(config.default_interval, SlotInterval::OneHour);
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.user_id, "ada");
    }

    #[test]
    fn invalid_interval_and_timezone_are_reported() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(SCHEDULE_JSON),
            r#"{"schema": 1, "defaultIntervalMinutes": 45}"#,
        )
        .expect("overwrite schedule.json");
        assert!(matches!(
            load_planner_config(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));

        fs::write(
            dir.path.join(SCHEDULE_JSON),
            r#"{"schema": 1, "defaultIntervalMinutes": 30}"#,
        )
        .expect("restore schedule.json");
        fs::write(dir.path.join(APP_JSON), r#"{"schema": 1, "timezone": "Mars/Olympus"}"#)
            .expect("overwrite app.json");
        assert!(matches!(
            load_planner_config(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn selected_calendars_are_saved_deduplicated() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        save_selected_calendar_ids(
            &dir.path,
            &[
                "work".to_string(),
                " ".to_string(),
                "home".to_string(),
                "work".to_string(),
            ],
        )
        .expect("save calendars");
        let config = load_planner_config(&dir.path).expect("load config");
        assert_eq!(config.selected_calendar_ids, vec!["work".to_string(), "home".to_string()]);
    }
}
