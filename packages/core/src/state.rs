//! Persisted per-day state.
//!
//! The document is loaded once at run start, migrated to the current schema
//! by [`PersistedState::upgrade`], and written back atomically at run end.
//! Nothing past the load step ever sees a legacy key or field name.
//!
//! Schema history:
//! - unversioned: snake_case fields, day keys either ISO dates or bare
//!   day-of-month numerals.
//! - version 2: camelCase fields, ISO date keys only.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::calendar::clock::infer_entry_date;
use crate::calendar::entry::DailyEntry;
use crate::calendar::stage::{PriorStage, Stage, StageOutcome};
use crate::error::{AppError, AppResult};

pub const STATE_VERSION: u32 = 2;

/// Last-known values for one business day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DayRecord {
    #[serde(deserialize_with = "nullable_count")]
    pub male: u32,
    #[serde(deserialize_with = "nullable_count")]
    pub female: u32,
    #[serde(alias = "single_female", deserialize_with = "nullable_count")]
    pub single_female: u32,
    #[serde(deserialize_with = "nullable_count")]
    pub total: u32,
    #[serde(deserialize_with = "nullable_ratio")]
    pub ratio: f64,
    #[serde(deserialize_with = "lenient_bool")]
    pub meets: bool,
    pub dow: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub considered: bool,
    #[serde(alias = "required_single_female")]
    pub required_single: Option<u32>,
    #[serde(alias = "ratio_threshold")]
    pub ratio_threshold: Option<f64>,
    #[serde(deserialize_with = "lenient_stage")]
    pub stage: Stage,
    #[serde(alias = "last_notified_at", deserialize_with = "lenient_timestamp")]
    pub last_notified_at: Option<i64>,
}

impl DayRecord {
    pub fn from_entry(entry: &DailyEntry, stage: Stage, last_notified_at: Option<i64>) -> Self {
        Self {
            male: entry.male,
            female: entry.female,
            single_female: entry.single_female,
            total: entry.total,
            ratio: entry.ratio,
            meets: entry.meets,
            dow: Some(entry.dow_label().to_string()),
            considered: entry.considered,
            required_single: Some(entry.required_single),
            ratio_threshold: Some(entry.ratio_threshold),
            stage,
            last_notified_at,
        }
    }

    pub fn with_outcome(entry: &DailyEntry, outcome: &StageOutcome) -> Self {
        Self::from_entry(entry, outcome.stage, outcome.last_notified_at)
    }

    pub fn prior_stage(&self) -> PriorStage {
        PriorStage {
            stage: self.stage,
            last_notified_at: self.last_notified_at,
        }
    }
}

fn lenient_stage<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Stage, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(label) => Stage::from_label(&label),
        _ => Stage::None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    })
}

// Null counts read as zero; anything else must still be a count.
fn nullable_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_ratio<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// The whole state document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub days: BTreeMap<NaiveDate, DayRecord>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            etag: None,
            last_modified: None,
            days: BTreeMap::new(),
        }
    }
}

impl PersistedState {
    /// Migrate a raw document of any known schema to the current one.
    ///
    /// Bare numeral keys are resolved against `reference` the same way
    /// calendar cells are. Keys that are neither, and records that do not
    /// decode, are dropped individually.
    pub fn upgrade(raw: Value, reference: NaiveDate, window_days: i64) -> Self {
        let Value::Object(mut doc) = raw else {
            tracing::warn!("State document is not an object; starting from empty state");
            return Self::default();
        };

        let validator = |doc: &serde_json::Map<String, Value>, keys: &[&str]| {
            keys.iter()
                .find_map(|k| doc.get(*k).and_then(Value::as_str).map(str::to_string))
        };
        let etag = validator(&doc, &["etag"]);
        let last_modified = validator(&doc, &["lastModified", "last_modified"]);

        let mut days = BTreeMap::new();
        if let Some(Value::Object(raw_days)) = doc.remove("days") {
            for (key, value) in raw_days {
                let Some(day) = resolve_day_key(&key, reference, window_days) else {
                    tracing::debug!("Dropping state entry with unexpected key={}", key);
                    continue;
                };
                match serde_json::from_value::<DayRecord>(value) {
                    Ok(record) => {
                        // An ISO key wins over a numeral key resolving to the same day.
                        if is_iso_key(&key) || !days.contains_key(&day) {
                            days.insert(day, record);
                        }
                    }
                    Err(err) => tracing::debug!("Dropping undecodable state entry {}: {}", key, err),
                }
            }
        }

        Self {
            version: STATE_VERSION,
            etag,
            last_modified,
            days,
        }
    }

    pub fn prior_stage(&self, day: NaiveDate) -> Option<PriorStage> {
        self.days.get(&day).map(DayRecord::prior_stage)
    }
}

fn is_iso_key(key: &str) -> bool {
    key.len() == 10 && NaiveDate::parse_from_str(key, "%Y-%m-%d").is_ok()
}

fn resolve_day_key(key: &str, reference: NaiveDate, window_days: i64) -> Option<NaiveDate> {
    if is_iso_key(key) {
        return NaiveDate::parse_from_str(key, "%Y-%m-%d").ok();
    }
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
        let day: u32 = key.parse().ok()?;
        if (1..=31).contains(&day) {
            return Some(infer_entry_date(day, reference, window_days));
        }
    }
    None
}

/// Load and upgrade the state at `path`.
///
/// A missing or undecodable file yields the default document; only the
/// save step is allowed to fail a run.
pub fn load_state(path: &Path, reference: NaiveDate, window_days: i64) -> PersistedState {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No state file at {}; starting fresh", path.display());
            return PersistedState::default();
        }
        Err(err) => {
            tracing::error!("Failed to read state file {}: {}", path.display(), err);
            return PersistedState::default();
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(raw) => {
            let state = PersistedState::upgrade(raw, reference, window_days);
            tracing::debug!("Loaded state with {} day(s) from {}", state.days.len(), path.display());
            state
        }
        Err(err) => {
            tracing::error!("Failed to decode state file {}: {}", path.display(), err);
            PersistedState::default()
        }
    }
}

pub fn save_state(path: &Path, state: &PersistedState) -> AppResult<()> {
    write_json_atomic(path, state)?;
    tracing::debug!("State saved to {}", path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON next to `path`, then rename over it.
///
/// Readers never observe a partially written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AppError::storage(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp).map_err(|e| AppError::storage(&tmp, e))?;
        file.write_all(body.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| AppError::storage(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| AppError::storage(path, e))?;
    Ok(())
}
