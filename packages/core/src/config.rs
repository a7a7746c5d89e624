//! Runtime settings.
//!
//! Loaded once per run from the environment (after `.env` via `dotenvy`)
//! and passed explicitly to everything that needs it. Every variable has a
//! default; a value that does not parse logs a warning and falls back.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use serde_json::Value;

use crate::calendar::clock::{
    parse_weekday, weekday_label, RolloverHours, DEFAULT_INFER_WINDOW_DAYS, DEFAULT_TIMEZONE,
    WEEKDAYS_FROM_SUNDAY,
};
use crate::calendar::entry::Thresholds;
use crate::calendar::stage::BonusPolicy;
use crate::masking::MaskLevel;

pub const DEFAULT_TARGET_URL: &str = "http://cheeks.nagoya/yoyaku.shtml";
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 180;
pub const DEFAULT_BONUS_SINGLE_DELTA: u32 = 2;
pub const DEFAULT_BONUS_RATIO_THRESHOLD: f64 = 0.50;
pub const DEFAULT_IGNORE_OLDER_THAN: i64 = 1;

/// Which diff signal triggers a notification when no stage action fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotifyMode {
    /// Only days that newly meet the thresholds.
    #[default]
    Newly,
    /// Newly met days plus days whose counts changed.
    Changed,
}

impl fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyMode::Newly => write!(f, "newly"),
            NotifyMode::Changed => write!(f, "changed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub target_url: String,
    pub slack_webhook_url: Option<String>,
    pub thresholds: Thresholds,
    pub notify_mode: NotifyMode,
    pub debug_summary: bool,
    pub bonus: BonusPolicy,
    /// Days at least this many business days old are not re-evaluated
    /// (`0` disables the limit).
    pub ignore_older_than: i64,
    /// Skip days before today's business day.
    pub notify_from_today: bool,
    pub ping_channel: bool,
    pub rollover_hours: RolloverHours,
    pub mask_level: MaskLevel,
    pub mask_config_path: Option<PathBuf>,
    pub timezone: Tz,
    pub date_infer_window_days: i64,
    pub state_path: PathBuf,
    pub history_path: PathBuf,
    pub metrics_path: Option<PathBuf>,
    pub user_agent_contact: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            slack_webhook_url: None,
            thresholds: Thresholds::default(),
            notify_mode: NotifyMode::default(),
            debug_summary: false,
            bonus: BonusPolicy::default(),
            ignore_older_than: DEFAULT_IGNORE_OLDER_THAN,
            notify_from_today: false,
            ping_channel: true,
            rollover_hours: RolloverHours::default(),
            mask_level: MaskLevel::default(),
            mask_config_path: None,
            timezone: DEFAULT_TIMEZONE,
            date_infer_window_days: DEFAULT_INFER_WINDOW_DAYS,
            state_path: PathBuf::from("state.json"),
            history_path: PathBuf::from("history_masked.json"),
            metrics_path: None,
            user_agent_contact: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup (the environment in production,
    /// a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();
        let default_thresholds = Thresholds::default();

        let thresholds = Thresholds {
            female_min: parse_or("FEMALE_MIN", get("FEMALE_MIN"), default_thresholds.female_min),
            female_ratio_min: parse_or("FEMALE_RATIO_MIN", get("FEMALE_RATIO_MIN"), default_thresholds.female_ratio_min),
            min_total: parse_min_total(get("MIN_TOTAL")),
            include_dow: parse_include_dow(get("INCLUDE_DOW").as_deref().unwrap_or("")),
            exclude_keywords: parse_keywords(get("EXCLUDE_KEYWORDS").as_deref().unwrap_or("")),
        };

        let cooldown_minutes: i64 = parse_or("COOLDOWN_MINUTES", get("COOLDOWN_MINUTES"), DEFAULT_COOLDOWN_MINUTES).max(0);
        let bonus = BonusPolicy {
            cooldown_seconds: cooldown_minutes * 60,
            single_delta: parse_or("BONUS_SINGLE_DELTA", get("BONUS_SINGLE_DELTA"), DEFAULT_BONUS_SINGLE_DELTA),
            ratio_threshold: parse_or("BONUS_RATIO_THRESHOLD", get("BONUS_RATIO_THRESHOLD"), DEFAULT_BONUS_RATIO_THRESHOLD),
        };

        let notify_mode = match get("NOTIFY_MODE").map(|m| m.to_lowercase()).as_deref() {
            None | Some("newly") => NotifyMode::Newly,
            Some("changed") => NotifyMode::Changed,
            Some(other) => {
                tracing::warn!("Unknown NOTIFY_MODE={}. Falling back to 'newly'.", other);
                NotifyMode::Newly
            }
        };

        let mask_level = match get("MASK_LEVEL") {
            None => MaskLevel::default(),
            Some(raw) => match raw.parse::<u8>().ok().and_then(MaskLevel::from_number) {
                Some(level) => level,
                None => {
                    tracing::warn!("Invalid MASK_LEVEL={}. Falling back to {}.", raw, MaskLevel::default());
                    MaskLevel::default()
                }
            },
        };

        let timezone = match get("SITE_TIMEZONE") {
            None => DEFAULT_TIMEZONE,
            Some(raw) => Tz::from_str(&raw).unwrap_or_else(|_| {
                tracing::warn!("Unknown SITE_TIMEZONE={}. Falling back to {}.", raw, DEFAULT_TIMEZONE);
                DEFAULT_TIMEZONE
            }),
        };

        let window: i64 = parse_or("DATE_INFER_WINDOW_DAYS", get("DATE_INFER_WINDOW_DAYS"), DEFAULT_INFER_WINDOW_DAYS);
        let date_infer_window_days = if (1..=27).contains(&window) {
            window
        } else {
            tracing::warn!("DATE_INFER_WINDOW_DAYS={} out of range 1..=27. Falling back to {}.", window, DEFAULT_INFER_WINDOW_DAYS);
            DEFAULT_INFER_WINDOW_DAYS
        };

        let settings = Self {
            target_url: get("TARGET_URL").unwrap_or(defaults.target_url),
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            thresholds,
            notify_mode,
            debug_summary: parse_bool("DEBUG_SUMMARY", get("DEBUG_SUMMARY"), false),
            bonus,
            ignore_older_than: parse_or("IGNORE_OLDER_THAN", get("IGNORE_OLDER_THAN"), DEFAULT_IGNORE_OLDER_THAN).max(0),
            notify_from_today: parse_bool("NOTIFY_FROM_TODAY", get("NOTIFY_FROM_TODAY"), false),
            ping_channel: parse_bool("PING_CHANNEL", get("PING_CHANNEL"), true),
            rollover_hours: parse_rollover_hours(get("ROLLOVER_HOURS_JSON").as_deref()),
            mask_level,
            mask_config_path: get("MASK_CONFIG_PATH").map(PathBuf::from),
            timezone,
            date_infer_window_days,
            state_path: get("STATE_PATH").map(PathBuf::from).unwrap_or(defaults.state_path),
            history_path: get("HISTORY_PATH").map(PathBuf::from).unwrap_or(defaults.history_path),
            metrics_path: get("METRICS_PATH").map(PathBuf::from),
            user_agent_contact: get("UA_CONTACT"),
        };
        tracing::debug!("Settings loaded: {:?}", settings);
        settings
    }
}

/// Only `DEBUG_LOG`, so logging can start before the full settings parse.
pub fn debug_log_from_env() -> bool {
    parse_bool("DEBUG_LOG", env::var("DEBUG_LOG").ok().map(|v| v.trim().to_string()), false)
}

fn parse_or<T: FromStr + fmt::Display + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}={}. Falling back to {}.", key, raw, default);
            default
        }),
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> bool {
    let Some(raw) = raw else {
        return default;
    };
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!("Invalid {}={:?}. Falling back to {}.", key, raw, default);
            default
        }
    }
}

fn parse_min_total(raw: Option<String>) -> Option<u32> {
    let raw = raw?;
    match raw.parse::<i64>() {
        Ok(value) if value >= 0 => u32::try_from(value).ok(),
        Ok(_) => None,
        Err(_) => {
            tracing::warn!("Invalid MIN_TOTAL value {}. Ignored.", raw);
            None
        }
    }
}

fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn parse_include_dow(raw: &str) -> Vec<chrono::Weekday> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .filter_map(|v| {
            let parsed = parse_weekday(v);
            if parsed.is_none() {
                tracing::warn!("Unknown day-of-week identifier: {}", v);
            }
            parsed
        })
        .collect()
}

/// Overlay `{"Fri": 6, ...}` on the default cutoffs. Unknown days and
/// invalid hours are ignored individually.
fn parse_rollover_hours(raw: Option<&str>) -> RolloverHours {
    let mut hours = RolloverHours::default();
    let Some(raw) = raw else {
        return hours;
    };
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!("Failed to parse ROLLOVER_HOURS_JSON={}: {}", raw, err);
            return hours;
        }
    };
    let Some(map) = parsed.as_object() else {
        tracing::warn!("ROLLOVER_HOURS_JSON must be an object: {}", raw);
        return hours;
    };
    for (key, value) in map {
        let Some(weekday) = WEEKDAYS_FROM_SUNDAY.into_iter().find(|w| weekday_label(*w) == key) else {
            tracing::warn!("Unknown rollover day key: {}", key);
            continue;
        };
        let hour = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
        match hour {
            Some(hour) if hour <= 0 => hours.set(weekday, 0),
            Some(hour) if hour <= 23 => hours.set(weekday, hour as u32),
            _ => tracing::warn!("Invalid rollover hour for {}: {}", key, value),
        }
    }
    hours
}
