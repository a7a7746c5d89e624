//! Privacy masking.
//!
//! Exact counts never leave the process in shared artefacts. They are
//! replaced either by numeric bands (level 1) or by a coarse word from a
//! short vocabulary (level 2). Both mappings are total and monotonic: every
//! input lands in exactly one label and a larger input never gets an earlier
//! label.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calendar::entry::DailyEntry;
use crate::error::AppResult;
use crate::state::write_json_atomic;

/// Masking verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaskLevel {
    /// Numeric bands such as `3-4` or `40±`.
    #[default]
    Bands,
    /// One word per field.
    Words,
}

impl MaskLevel {
    pub fn from_number(level: u8) -> Option<Self> {
        match level {
            1 => Some(MaskLevel::Bands),
            2 => Some(MaskLevel::Words),
            _ => None,
        }
    }

    pub fn as_number(self) -> u8 {
        match self {
            MaskLevel::Bands => 1,
            MaskLevel::Words => 2,
        }
    }
}

impl fmt::Display for MaskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_number())
    }
}

/// Inclusive band `[low, high]`; `high == None` is open-ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Band<T> {
    pub low: T,
    pub high: Option<T>,
    pub label: String,
}

impl<T: PartialOrd + Copy> Band<T> {
    fn new(low: T, high: Option<T>, label: &str) -> Self {
        Self {
            low,
            high,
            label: label.to_string(),
        }
    }

    fn contains(&self, value: T) -> bool {
        value >= self.low && self.high.map_or(true, |high| value <= high)
    }
}

/// First band containing `value`. Values falling into a gap or outside
/// every band clamp to the nearest band below (or the first band).
fn bin<T: PartialOrd + Copy>(value: T, bands: &[Band<T>]) -> &str {
    bands
        .iter()
        .find(|band| band.contains(value))
        .or_else(|| bands.iter().rev().find(|band| value >= band.low))
        .or_else(|| bands.first())
        .map_or("-", |band| band.label.as_str())
}

/// Level 2 vocabulary per field.
#[derive(Debug, Clone, PartialEq)]
pub struct Level2Words {
    pub single: Vec<String>,
    pub female: Vec<String>,
    pub ratio: Vec<String>,
    pub total: Vec<String>,
}

/// Level 2 divisors for the count fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level2Divisors {
    pub single: u32,
    pub female: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskingConfig {
    pub count_bands: Vec<Band<u32>>,
    pub total_bands: Vec<Band<u32>>,
    /// Over the ratio in `[0, 1]`, compared at whole-percent precision.
    pub ratio_bands: Vec<Band<f64>>,
    pub level2_words: Level2Words,
    pub level2_divisors: Level2Divisors,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            count_bands: vec![
                Band::new(0, Some(0), "0"),
                Band::new(1, Some(1), "1"),
                Band::new(2, Some(2), "2"),
                Band::new(3, Some(4), "3-4"),
                Band::new(5, Some(6), "5-6"),
                Band::new(7, Some(8), "7-8"),
                Band::new(9, None, "9+"),
            ],
            total_bands: vec![
                Band::new(0, Some(9), "<10"),
                Band::new(10, Some(19), "10-19"),
                Band::new(20, Some(29), "20-29"),
                Band::new(30, Some(49), "30-49"),
                Band::new(50, None, "50+"),
            ],
            ratio_bands: vec![
                Band::new(0.0, Some(0.39), "<40%"),
                Band::new(0.40, Some(0.49), "40±"),
                Band::new(0.50, Some(0.59), "50±"),
                Band::new(0.60, Some(0.69), "60±"),
                Band::new(0.70, Some(0.79), "70±"),
                Band::new(0.80, None, "80+%"),
            ],
            level2_words: Level2Words {
                single: words(&["静", "穏", "賑"]),
                female: words(&["薄", "適", "厚"]),
                ratio: words(&["低", "中", "高"]),
                total: words(&["少", "並", "盛"]),
            },
            level2_divisors: Level2Divisors {
                single: 3,
                female: 4,
                total: 15,
            },
        }
    }
}

/// Ratio truncated to whole percent, so band edges like `0.39` / `0.40`
/// leave no gap.
fn quantize_ratio(ratio: f64) -> f64 {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
    (ratio * 100.0 + 1e-9).floor() / 100.0
}

fn word_for_index(vocabulary: &[String], index: usize) -> String {
    vocabulary
        .get(index.min(vocabulary.len().saturating_sub(1)))
        .cloned()
        .unwrap_or_else(|| "-".to_string())
}

impl MaskingConfig {
    pub fn count_label(&self, value: u32) -> String {
        bin(value, &self.count_bands).to_string()
    }

    pub fn total_label(&self, value: u32) -> String {
        bin(value, &self.total_bands).to_string()
    }

    pub fn ratio_label(&self, ratio: f64) -> String {
        bin(quantize_ratio(ratio), &self.ratio_bands).to_string()
    }

    fn count_word(vocabulary: &[String], value: u32, divisor: u32) -> String {
        let index = (value / divisor.max(1)) as usize;
        word_for_index(vocabulary, index)
    }

    fn ratio_word(&self, ratio: f64) -> String {
        let vocabulary = &self.level2_words.ratio;
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        let index = (ratio * vocabulary.len() as f64).floor() as usize;
        word_for_index(vocabulary, index)
    }
}

/// Masked labels for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedEntry {
    pub single: String,
    pub female: String,
    pub ratio: String,
    pub total: String,
}

/// Mask raw counts. Pure; never fails.
pub fn mask_counts(single: u32, female: u32, total: u32, ratio: f64, level: MaskLevel, config: &MaskingConfig) -> MaskedEntry {
    match level {
        MaskLevel::Bands => MaskedEntry {
            single: config.count_label(single),
            female: config.count_label(female),
            ratio: config.ratio_label(ratio),
            total: config.total_label(total),
        },
        MaskLevel::Words => {
            let words = &config.level2_words;
            let divisors = config.level2_divisors;
            MaskedEntry {
                single: MaskingConfig::count_word(&words.single, single, divisors.single),
                female: MaskingConfig::count_word(&words.female, female, divisors.female),
                ratio: config.ratio_word(ratio),
                total: MaskingConfig::count_word(&words.total, total, divisors.total),
            }
        }
    }
}

pub fn mask_entry(entry: &DailyEntry, level: MaskLevel, config: &MaskingConfig) -> MaskedEntry {
    mask_counts(entry.single_female, entry.female, entry.total, entry.ratio, level, config)
}

// ---- config file ----

fn parse_bands<T>(raw: &Value, field: &str, cast: impl Fn(&Value) -> Option<T>) -> Vec<Band<T>> {
    let Some(items) = raw.get(field) else {
        return Vec::new();
    };
    let Some(items) = items.as_array() else {
        tracing::warn!("Masking config {} must be a list; using defaults", field);
        return Vec::new();
    };
    let mut bands = Vec::new();
    for item in items {
        let (low, high, label) = match item {
            Value::Array(parts) if parts.len() == 3 => (&parts[0], &parts[1], &parts[2]),
            Value::Object(map) => (
                map.get("low").unwrap_or(&Value::Null),
                map.get("high").unwrap_or(&Value::Null),
                map.get("label").unwrap_or(&Value::Null),
            ),
            _ => {
                tracing::warn!("Ignoring malformed mask band entry: {}", item);
                continue;
            }
        };
        let Some(low) = cast(low) else {
            tracing::warn!("Invalid lower bound in mask band: {}", item);
            continue;
        };
        let high = if high.is_null() {
            None
        } else if let Some(high) = cast(high) {
            Some(high)
        } else {
            tracing::warn!("Invalid upper bound in mask band: {}", item);
            continue;
        };
        let label = match label {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        bands.push(Band { low, high, label });
    }
    bands
}

fn as_count(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .and_then(|v| u32::try_from(v).ok())
}

fn parse_words(raw: &Value, key: &str) -> Option<Vec<String>> {
    let list: Vec<String> = raw
        .get("level2_words")?
        .get(key)?
        .as_array()?
        .iter()
        .map(|w| match w {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .filter(|w| !w.is_empty())
        .collect();
    (!list.is_empty()).then_some(list)
}

fn parse_divisor(raw: &Value, key: &str) -> Option<u32> {
    let value = raw.get("level2_divisors")?.get(key)?;
    match as_count(value) {
        Some(divisor) => Some(divisor.max(1)),
        None => {
            tracing::warn!("Invalid divisor for {} in masking config: {}", key, value);
            None
        }
    }
}

/// Load a masking config, falling back to the default field by field.
///
/// `None`, a missing file or invalid JSON all yield [`MaskingConfig::default`].
pub fn load_masking_config(path: Option<&Path>) -> MaskingConfig {
    let defaults = MaskingConfig::default();
    let Some(path) = path else {
        return defaults;
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("Masking config {} unavailable ({}); using defaults", path.display(), err);
            return defaults;
        }
    };
    let raw: Value = match serde_json::from_str(&text) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!("Failed to parse masking config {}: {}", path.display(), err);
            return defaults;
        }
    };

    let or_default = |parsed: Vec<Band<u32>>, fallback: Vec<Band<u32>>| if parsed.is_empty() { fallback } else { parsed };
    let count_bands = or_default(parse_bands(&raw, "count_bands", as_count), defaults.count_bands);
    let total_bands = or_default(parse_bands(&raw, "total_bands", as_count), defaults.total_bands);
    let ratio_bands = {
        let parsed = parse_bands(&raw, "ratio_bands", Value::as_f64);
        if parsed.is_empty() { defaults.ratio_bands } else { parsed }
    };

    let fallback_words = defaults.level2_words;
    let level2_words = Level2Words {
        single: parse_words(&raw, "single").unwrap_or(fallback_words.single),
        female: parse_words(&raw, "female").unwrap_or(fallback_words.female),
        ratio: parse_words(&raw, "ratio").unwrap_or(fallback_words.ratio),
        total: parse_words(&raw, "total").unwrap_or(fallback_words.total),
    };
    let fallback_divisors = defaults.level2_divisors;
    let level2_divisors = Level2Divisors {
        single: parse_divisor(&raw, "single").unwrap_or(fallback_divisors.single),
        female: parse_divisor(&raw, "female").unwrap_or(fallback_divisors.female),
        total: parse_divisor(&raw, "total").unwrap_or(fallback_divisors.total),
    };

    tracing::debug!("Loaded masking config from {}", path.display());
    MaskingConfig {
        count_bands,
        total_bands,
        ratio_bands,
        level2_words,
        level2_divisors,
    }
}

// ---- masked history ----

/// Masked labels per business day, shared outside the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedHistory {
    pub generated_at: Option<DateTime<Utc>>,
    pub mask_level: u8,
    pub days: BTreeMap<NaiveDate, MaskedEntry>,
}

impl Default for MaskedHistory {
    fn default() -> Self {
        Self {
            generated_at: None,
            mask_level: MaskLevel::default().as_number(),
            days: BTreeMap::new(),
        }
    }
}

impl MaskedHistory {
    /// Record the labels of every entry's business day.
    ///
    /// Days before `today` that already have labels are settled and keep
    /// them; today and later days are overwritten.
    pub fn merge(
        &mut self,
        entries: &[DailyEntry],
        today: NaiveDate,
        level: MaskLevel,
        config: &MaskingConfig,
        now: DateTime<Utc>,
    ) {
        for entry in entries {
            if entry.business_day < today && self.days.contains_key(&entry.business_day) {
                tracing::debug!("Keeping settled masked history for {}", entry.business_day);
                continue;
            }
            self.days.insert(entry.business_day, mask_entry(entry, level, config));
        }
        self.mask_level = level.as_number();
        self.generated_at = Some(now);
    }
}

/// Load the masked history, dropping anything that does not decode.
pub fn load_masked_history(path: &Path) -> MaskedHistory {
    let Ok(text) = std::fs::read_to_string(path) else {
        return MaskedHistory::default();
    };
    let raw: Value = match serde_json::from_str(&text) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!("Masked history {} is invalid ({}); starting fresh", path.display(), err);
            return MaskedHistory::default();
        }
    };

    let mut history = MaskedHistory {
        generated_at: raw
            .get("generatedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        mask_level: raw
            .get("maskLevel")
            .and_then(Value::as_u64)
            .and_then(|n| u8::try_from(n).ok())
            .and_then(MaskLevel::from_number)
            .unwrap_or_default()
            .as_number(),
        days: BTreeMap::new(),
    };
    if let Some(days) = raw.get("days").and_then(Value::as_object) {
        for (key, value) in days {
            let day = NaiveDate::parse_from_str(key, "%Y-%m-%d").ok();
            let labels = serde_json::from_value::<MaskedEntry>(value.clone()).ok();
            match (day, labels) {
                (Some(day), Some(labels)) => {
                    history.days.insert(day, labels);
                }
                _ => tracing::debug!("Dropping masked history entry {}", key),
            }
        }
    }
    history
}

pub fn save_masked_history(path: &Path, history: &MaskedHistory) -> AppResult<()> {
    write_json_atomic(path, history)
}
