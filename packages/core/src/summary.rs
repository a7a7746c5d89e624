//! Weekly and monthly trend summaries.
//!
//! Reads a raw dataset of per-day counts, computes period statistics and a
//! comparison with the previous period, then produces two outputs: a
//! human-readable report for the webhook and a masked copy for the summary
//! store, which is the only version that is kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{json, Value};

use crate::alerts::message::SlackMessage;
use crate::alerts::webhook::AlertSink;
use crate::error::AppResult;
use crate::masking::{load_masked_history, MaskingConfig};
use crate::state::write_json_atomic;

const WEEKDAYS_JP: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];
const TOP_DAYS: usize = 3;
/// Averages closer than this to the previous period count as flat.
const TREND_DEAD_BAND: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SummaryPeriod {
    Weekly,
    Monthly,
}

impl SummaryPeriod {
    /// Key in the summary store.
    pub fn key(self) -> &'static str {
        match self {
            SummaryPeriod::Weekly => "weekly",
            SummaryPeriod::Monthly => "monthly",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            SummaryPeriod::Weekly => "週次サマリー",
            SummaryPeriod::Monthly => "月次サマリー",
        }
    }
}

/// One day of raw counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRecord {
    pub business_day: NaiveDate,
    pub single_female: u32,
    pub female: u32,
    pub total: u32,
    pub ratio: f64,
}

impl DailyRecord {
    /// Lenient decode: the date is required, counts default to zero, a
    /// missing ratio is recomputed and any ratio is clamped to `[0, 1]`.
    pub fn from_value(value: &Value, tz: Tz) -> Option<Self> {
        let business_day = parse_day(value.get("date")?, tz)?;
        let int = |key: &str| {
            value.get(key).and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_f64().map(|f| f as i64))
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
        };
        let clamp = |v: i64| u32::try_from(v.max(0)).unwrap_or(u32::MAX);

        let single_female = clamp(int("single_female").unwrap_or(0));
        let female = clamp(int("female").unwrap_or(0));
        let mut total = clamp(int("total").unwrap_or(i64::from(female)));
        if total == 0 {
            total = female.max(single_female);
        }
        let mut ratio = value
            .get("ratio")
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .filter(|r| r.is_finite())
            .unwrap_or(0.0);
        if ratio <= 0.0 && total > 0 {
            ratio = f64::from(female) / f64::from(total);
        }

        Some(Self {
            business_day,
            single_female,
            female,
            total,
            ratio: ratio.clamp(0.0, 1.0),
        })
    }

    fn weekday_index(&self) -> usize {
        self.business_day.weekday().num_days_from_monday() as usize
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (converted to `tz`).
fn parse_day(value: &Value, tz: Tz) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(day);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&tz).date_naive())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub period_label: String,
    pub current: Vec<DailyRecord>,
    pub previous: Vec<DailyRecord>,
}

impl RawDataset {
    pub fn from_value(raw: &Value, tz: Tz) -> Self {
        let records = |key: &str| -> Vec<DailyRecord> {
            raw.get(key)
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(|item| DailyRecord::from_value(item, tz)).collect())
                .unwrap_or_default()
        };
        Self {
            period_label: raw
                .get("period_label")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            current: records("days"),
            previous: records("previous_days"),
        }
    }
}

/// Load a raw dataset. Missing or undecodable files read as empty.
pub fn load_raw_dataset(path: Option<&Path>, tz: Tz) -> RawDataset {
    let Some(path) = path else {
        tracing::warn!("Raw dataset path not provided; treating as no data");
        return RawDataset::default();
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("Raw dataset {} is missing: {}", path.display(), err);
            return RawDataset::default();
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(raw) => RawDataset::from_value(&raw, tz),
        Err(err) => {
            tracing::error!("Failed to decode raw dataset {}: {}", path.display(), err);
            RawDataset::default()
        }
    }
}

// ---- statistics ----

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldStats {
    pub average: Option<f64>,
    pub median: Option<f64>,
    pub max: Option<f64>,
}

impl FieldStats {
    fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len();
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        Self {
            average: Some(values.iter().sum::<f64>() / n as f64),
            median: Some(median),
            max: values.last().copied(),
        }
    }
}

/// Per-field statistics. `ratio` is in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodStats {
    pub single: FieldStats,
    pub female: FieldStats,
    pub total: FieldStats,
    pub ratio: FieldStats,
}

impl PeriodStats {
    pub fn from_records(records: &[DailyRecord]) -> Self {
        let collect = |f: fn(&DailyRecord) -> f64| FieldStats::from_values(records.iter().map(f).collect());
        Self {
            single: collect(|r| f64::from(r.single_female)),
            female: collect(|r| f64::from(r.female)),
            total: collect(|r| f64::from(r.total)),
            ratio: collect(|r| r.ratio * 100.0),
        }
    }
}

/// Difference of averages against the previous period (ratio in points).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trend {
    pub single: Option<f64>,
    pub female: Option<f64>,
    pub ratio: Option<f64>,
}

impl Trend {
    fn between(current: &PeriodStats, previous: &PeriodStats) -> Self {
        let diff = |a: &FieldStats, b: &FieldStats| Some(a.average? - b.average?);
        Self {
            single: diff(&current.single, &previous.single),
            female: diff(&current.female, &previous.female),
            ratio: diff(&current.ratio, &previous.ratio),
        }
    }
}

/// Average values for one weekday. `ratio` is in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeekdayProfile {
    pub single: f64,
    pub female: f64,
    pub total: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryContext {
    pub period: SummaryPeriod,
    pub period_label: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub current: Vec<DailyRecord>,
    pub previous: Vec<DailyRecord>,
    pub stats: PeriodStats,
    pub top_days: Vec<DailyRecord>,
    /// Keyed by Monday-based weekday index.
    pub weekday_profile: BTreeMap<usize, WeekdayProfile>,
    pub trend: Trend,
}

/// Busiest days first: singles, then women, ratio, total; earlier date wins ties.
pub fn top_days(records: &[DailyRecord], limit: usize) -> Vec<DailyRecord> {
    let mut ordered = records.to_vec();
    ordered.sort_by(|a, b| {
        b.single_female
            .cmp(&a.single_female)
            .then(b.female.cmp(&a.female))
            .then(b.ratio.total_cmp(&a.ratio))
            .then(b.total.cmp(&a.total))
            .then(a.business_day.cmp(&b.business_day))
    });
    ordered.truncate(limit);
    ordered
}

pub fn weekday_profile(records: &[DailyRecord]) -> BTreeMap<usize, WeekdayProfile> {
    let mut buckets: BTreeMap<usize, Vec<DailyRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(record.weekday_index()).or_default().push(*record);
    }
    buckets
        .into_iter()
        .map(|(weekday, items)| {
            let stats = PeriodStats::from_records(&items);
            let avg = |s: FieldStats| s.average.unwrap_or(0.0);
            let profile = WeekdayProfile {
                single: avg(stats.single),
                female: avg(stats.female),
                total: avg(stats.total),
                ratio: avg(stats.ratio),
            };
            (weekday, profile)
        })
        .collect()
}

/// `None` when the period has no days.
pub fn build_summary_context(period: SummaryPeriod, dataset: &RawDataset) -> Option<SummaryContext> {
    let period_start = dataset.current.iter().map(|r| r.business_day).min()?;
    let period_end = dataset.current.iter().map(|r| r.business_day).max()?;
    let stats = PeriodStats::from_records(&dataset.current);
    let previous_stats = PeriodStats::from_records(&dataset.previous);
    let period_label = if dataset.period_label.is_empty() {
        period.key().to_string()
    } else {
        dataset.period_label.clone()
    };
    Some(SummaryContext {
        period,
        period_label,
        period_start,
        period_end,
        current: dataset.current.clone(),
        previous: dataset.previous.clone(),
        stats,
        top_days: top_days(&dataset.current, TOP_DAYS),
        weekday_profile: weekday_profile(&dataset.current),
        trend: Trend::between(&stats, &previous_stats),
    })
}

// ---- rendering ----

fn weekday_jp(index: usize) -> &'static str {
    WEEKDAYS_JP.get(index).copied().unwrap_or("?")
}

fn short_date(day: NaiveDate) -> String {
    format!(
        "{:02}/{:02}({})",
        day.month(),
        day.day(),
        weekday_jp(day.weekday().num_days_from_monday() as usize)
    )
}

fn day_label(record: &DailyRecord) -> String {
    format!("{}日({})", record.business_day.day(), weekday_jp(record.weekday_index()))
}

fn trend_text(diff: Option<f64>, is_ratio: bool) -> String {
    let Some(diff) = diff else {
        return "比較対象なし".to_string();
    };
    let arrow = |v: f64| if v > 0.0 { "↗" } else if v < 0.0 { "↘" } else { "→" };
    if is_ratio {
        let rounded = diff.round();
        format!("{} {:+}pp", arrow(rounded), rounded as i64)
    } else {
        let rounded = (diff * 10.0).round() / 10.0;
        format!("{} {:+.1}", arrow(rounded), rounded)
    }
}

fn stats_line(stats: &FieldStats, percent: bool) -> String {
    let v = |x: Option<f64>| x.unwrap_or(0.0);
    if percent {
        format!(
            "平均 {:.1}% / 中央 {:.1}% / 最大 {:.1}%",
            v(stats.average),
            v(stats.median),
            v(stats.max)
        )
    } else {
        format!(
            "平均 {:.1} / 中央 {:.1} / 最大 {}",
            v(stats.average),
            v(stats.median),
            v(stats.max).round() as i64
        )
    }
}

/// Report for the webhook. `updated_at` is printed in the footer.
pub fn render_summary(context: &SummaryContext, updated_at: &str) -> SlackMessage {
    let title = format!("Cheekschecker {}", context.period.title());
    let range = format!("{}〜{}", short_date(context.period_start), short_date(context.period_end));
    let headline = format!("*対象期間*: {}\n*対象営業日*: {}日", range, context.current.len());

    let single = stats_line(&context.stats.single, false);
    let female = stats_line(&context.stats.female, false);
    let ratio = stats_line(&context.stats.ratio, true);

    let hot: Vec<String> = context
        .top_days
        .iter()
        .map(|r| {
            format!(
                "{} 単女{} 女{}/全{} ({}%)",
                day_label(r),
                r.single_female,
                r.female,
                r.total,
                (r.ratio * 100.0).round() as i64
            )
        })
        .collect();
    let trends = [
        format!("単独女性: {}", trend_text(context.trend.single, false)),
        format!("女性総数: {}", trend_text(context.trend.female, false)),
        format!("女性比率: {}", trend_text(context.trend.ratio, true)),
    ];
    let mut weekdays: Vec<String> = context
        .weekday_profile
        .iter()
        .map(|(index, p)| {
            format!(
                "{}: 単{:.1} 女{:.1}/全{:.1} ({:.1}%)",
                weekday_jp(*index),
                p.single,
                p.female,
                p.total,
                p.ratio
            )
        })
        .collect();
    if weekdays.is_empty() {
        weekdays.push("データ不足".to_string());
    }

    let bullets = |lines: &[String]| lines.iter().map(|l| format!("• {}", l)).collect::<Vec<_>>().join("\n");
    let dashes = |lines: &[String]| lines.iter().map(|l| format!("- {}", l)).collect::<Vec<_>>();

    let hot_text = if hot.is_empty() { "該当なし".to_string() } else { bullets(&hot) };
    let blocks = vec![
        json!({"type": "header", "text": {"type": "plain_text", "text": &title, "emoji": false}}),
        json!({"type": "section", "text": {"type": "mrkdwn", "text": headline}}),
        json!({"type": "section", "fields": [
            {"type": "mrkdwn", "text": format!("*単独女性*\n{}", single)},
            {"type": "mrkdwn", "text": format!("*女性総数*\n{}", female)},
            {"type": "mrkdwn", "text": format!("*女性比率*\n{}", ratio)},
        ]}),
        json!({"type": "section", "text": {"type": "mrkdwn", "text": format!("*Hot day Top3*\n{}", hot_text)}}),
        json!({"type": "section", "text": {"type": "mrkdwn", "text": format!("*傾向 (直前比)*\n{}", bullets(&trends))}}),
        json!({"type": "section", "text": {"type": "mrkdwn", "text": format!("*曜日別プロファイル*\n{}", bullets(&weekdays))}}),
        json!({"type": "context", "elements": [{"type": "mrkdwn", "text": format!("更新: {}", updated_at)}]}),
    ];

    let mut lines = vec![
        title,
        headline.replace('*', ""),
        format!("単独女性 {}", single),
        format!("女性総数 {}", female),
        format!("女性比率 {}", ratio),
    ];
    if !hot.is_empty() {
        lines.push("Hot day Top3:".to_string());
        lines.extend(dashes(&hot));
    }
    lines.push("傾向:".to_string());
    lines.extend(dashes(&trends));
    lines.push("曜日別プロファイル:".to_string());
    lines.extend(dashes(&weekdays));

    SlackMessage {
        text: lines.join("\n"),
        blocks,
    }
}

// ---- masked summary ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedStats {
    pub average: String,
    pub median: String,
    pub max: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedDay {
    pub label: String,
    pub single: String,
    pub female: String,
    pub total: String,
    pub ratio: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedTrend {
    pub single: &'static str,
    pub female: &'static str,
    pub ratio: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskedSummary {
    pub generated_at: DateTime<Utc>,
    pub mask_level: u8,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<BTreeMap<&'static str, MaskedStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_days: Option<Vec<MaskedDay>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<MaskedTrend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday_profile: Option<BTreeMap<&'static str, MaskedDay>>,
}

/// `up` / `down` beyond the dead band, `flat` inside it, `unknown` without
/// a previous period.
pub fn trend_direction(diff: Option<f64>) -> &'static str {
    match diff {
        None => "unknown",
        Some(d) if d > TREND_DEAD_BAND => "up",
        Some(d) if d < -TREND_DEAD_BAND => "down",
        Some(_) => "flat",
    }
}

struct Masker<'a>(&'a MaskingConfig);

impl Masker<'_> {
    fn count(&self, value: Option<f64>) -> String {
        value.map_or("-".to_string(), |v| self.0.count_label(v.round().max(0.0) as u32))
    }

    fn total(&self, value: Option<f64>) -> String {
        value.map_or("-".to_string(), |v| self.0.total_label(v.round().max(0.0) as u32))
    }

    /// `percent` is in `[0, 100]`.
    fn ratio(&self, percent: Option<f64>) -> String {
        percent.map_or("-".to_string(), |p| self.0.ratio_label(p / 100.0))
    }

    fn stats(&self, stats: &FieldStats, f: fn(&Self, Option<f64>) -> String) -> MaskedStats {
        MaskedStats {
            average: f(self, stats.average),
            median: f(self, stats.median),
            max: f(self, stats.max),
        }
    }
}

pub fn build_masked_summary(
    context: Option<&SummaryContext>,
    mask_level: u8,
    config: &MaskingConfig,
    generated_at: DateTime<Utc>,
) -> MaskedSummary {
    let mut summary = MaskedSummary {
        generated_at,
        mask_level,
        status: "no-data",
        period_start: None,
        period_end: None,
        day_count: None,
        stats: None,
        top_days: None,
        trend: None,
        weekday_profile: None,
    };
    let Some(context) = context else {
        return summary;
    };
    let m = Masker(config);
    let stats = &context.stats;

    summary.status = "ok";
    summary.period_start = Some(context.period_start);
    summary.period_end = Some(context.period_end);
    summary.day_count = Some(context.current.len());
    summary.stats = Some(BTreeMap::from([
        ("single", m.stats(&stats.single, Masker::count)),
        ("female", m.stats(&stats.female, Masker::count)),
        ("total", m.stats(&stats.total, Masker::total)),
        ("ratio", m.stats(&stats.ratio, Masker::ratio)),
    ]));
    summary.top_days = Some(
        context
            .top_days
            .iter()
            .map(|r| MaskedDay {
                label: day_label(r),
                single: m.count(Some(f64::from(r.single_female))),
                female: m.count(Some(f64::from(r.female))),
                total: m.total(Some(f64::from(r.total))),
                ratio: m.ratio(Some(r.ratio * 100.0)),
            })
            .collect(),
    );
    summary.trend = Some(MaskedTrend {
        single: trend_direction(context.trend.single),
        female: trend_direction(context.trend.female),
        ratio: trend_direction(context.trend.ratio),
    });
    summary.weekday_profile = Some(
        context
            .weekday_profile
            .iter()
            .map(|(index, p)| {
                let label = weekday_jp(*index);
                let day = MaskedDay {
                    label: label.to_string(),
                    single: m.count(Some(p.single)),
                    female: m.count(Some(p.female)),
                    total: m.total(Some(p.total)),
                    ratio: m.ratio(Some(p.ratio)),
                };
                (label, day)
            })
            .collect(),
    );
    summary
}

// ---- store + run ----

/// Period key → masked summary. Undecodable stores start over.
pub fn load_summary_store(path: &Path) -> BTreeMap<String, Value> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&text) {
        Ok(store) => store,
        Err(err) => {
            tracing::warn!("Existing summary store is invalid ({}); recreating {}", err, path.display());
            BTreeMap::new()
        }
    }
}

pub struct SummaryRequest {
    pub period: SummaryPeriod,
    pub raw_data: Option<PathBuf>,
    pub history_path: PathBuf,
    pub output_path: PathBuf,
    pub timezone: Tz,
}

/// Build, store and deliver one period summary.
pub async fn run_summary(
    request: &SummaryRequest,
    masking: &MaskingConfig,
    sink: &dyn AlertSink,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let title = format!("Cheekschecker {}", request.period.title());
    let Some(raw_path) = request.raw_data.as_deref() else {
        tracing::warn!("--raw-data not provided; treating as no data");
        return sink
            .deliver(&SlackMessage::simple(&title, "No data for this period / 集計対象なし"))
            .await;
    };

    let mask_level = load_masked_history(&request.history_path).mask_level;
    let dataset = load_raw_dataset(Some(raw_path), request.timezone);
    let context = build_summary_context(request.period, &dataset);

    let mut store = load_summary_store(&request.output_path);
    let masked = build_masked_summary(context.as_ref(), mask_level, masking, now);
    store.insert(request.period.key().to_string(), serde_json::to_value(&masked)?);
    write_json_atomic(&request.output_path, &store)?;
    tracing::info!(
        "Masked {} summary stored in {} (status={})",
        request.period.key(),
        request.output_path.display(),
        masked.status
    );

    let message = match &context {
        Some(context) => {
            let updated_at = now.with_timezone(&request.timezone).format("%m/%d %H:%M %Z").to_string();
            render_summary(context, &updated_at)
        }
        None => SlackMessage::simple(&title, "No data for this period / 集計対象なし"),
    };
    sink.deliver(&message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::clock::DEFAULT_TIMEZONE;

    fn record(day: u32, single: u32, female: u32, total: u32) -> DailyRecord {
        DailyRecord {
            business_day: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            single_female: single,
            female,
            total,
            ratio: if total > 0 { f64::from(female) / f64::from(total) } else { 0.0 },
        }
    }

    // ---- dataset ----

    #[test]
    fn records_are_coerced_leniently() {
        let raw = json!({
            "period_label": " 6月第1週 ",
            "days": [
                {"date": "2024-06-03", "single_female": "2", "female": 4, "total": 10},
                {"date": "2024-06-04T23:30:00+00:00", "female": 3, "ratio": 7.5},
                {"date": "yesterday", "female": 9},
                {"female": 1}
            ],
            "previous_days": "nope"
        });
        let dataset = RawDataset::from_value(&raw, DEFAULT_TIMEZONE);
        assert_eq!(dataset.period_label, "6月第1週");
        assert_eq!(dataset.current.len(), 2);
        assert!(dataset.previous.is_empty());

        let first = dataset.current[0];
        assert_eq!(first.single_female, 2);
        assert!((first.ratio - 0.4).abs() < 1e-9);

        // 23:30 UTC is the next morning in Tokyo; ratio clamps to 1.
        let second = dataset.current[1];
        assert_eq!(second.business_day, NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
        assert_eq!(second.total, 3);
        assert_eq!(second.ratio, 1.0);
    }

    // ---- statistics ----

    #[test]
    fn stats_use_mean_median_and_max() {
        let stats = PeriodStats::from_records(&[record(3, 1, 2, 10), record(4, 3, 4, 10), record(5, 8, 9, 10)]);
        assert_eq!(stats.single.average, Some(4.0));
        assert_eq!(stats.single.median, Some(3.0));
        assert_eq!(stats.single.max, Some(8.0));
        assert!((stats.ratio.average.unwrap() - 50.0).abs() < 1e-9);

        let even = FieldStats::from_values(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(even.median, Some(2.5));
        assert_eq!(FieldStats::from_values(Vec::new()), FieldStats::default());
    }

    #[test]
    fn top_days_prefer_singles_then_earlier_dates() {
        let records = vec![record(3, 2, 5, 10), record(4, 5, 5, 10), record(5, 2, 5, 10), record(6, 1, 9, 10)];
        let top: Vec<u32> = top_days(&records, 3).iter().map(|r| r.business_day.day()).collect();
        assert_eq!(top, vec![4, 3, 5]);
    }

    #[test]
    fn trend_compares_period_averages() {
        let dataset = RawDataset {
            period_label: String::new(),
            current: vec![record(10, 4, 6, 10)],
            previous: vec![record(3, 2, 6, 12)],
        };
        let context = build_summary_context(SummaryPeriod::Weekly, &dataset).unwrap();
        assert_eq!(context.period_label, "weekly");
        assert_eq!(context.trend.single, Some(2.0));
        assert_eq!(context.trend.female, Some(0.0));
        assert!((context.trend.ratio.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(trend_direction(context.trend.single), "up");
        assert_eq!(trend_direction(context.trend.female), "flat");
        assert_eq!(trend_direction(Some(-0.6)), "down");
        assert_eq!(trend_direction(None), "unknown");
    }

    #[test]
    fn empty_dataset_has_no_context() {
        assert!(build_summary_context(SummaryPeriod::Monthly, &RawDataset::default()).is_none());
    }

    // ---- masked output ----

    #[test]
    fn masked_summary_hides_raw_counts() {
        let dataset = RawDataset {
            period_label: String::new(),
            current: vec![record(7, 5, 6, 9), record(8, 1, 2, 30)],
            previous: Vec::new(),
        };
        let context = build_summary_context(SummaryPeriod::Weekly, &dataset).unwrap();
        let masked = build_masked_summary(Some(&context), 1, &MaskingConfig::default(), Utc::now());
        let value = serde_json::to_value(&masked).unwrap();

        assert_eq!(value["status"], "ok");
        assert_eq!(value["day_count"], 2);
        assert_eq!(value["stats"]["single"]["max"], "5-6");
        assert_eq!(value["stats"]["total"]["max"], "30-49");
        assert_eq!(value["top_days"][0]["label"], "7日(金)");
        assert_eq!(value["top_days"][0]["ratio"], "60±");
        assert_eq!(value["trend"]["single"], "unknown");
        assert_eq!(value["weekday_profile"]["金"]["single"], "5-6");

        let empty = serde_json::to_value(build_masked_summary(None, 2, &MaskingConfig::default(), Utc::now())).unwrap();
        assert_eq!(empty["status"], "no-data");
        assert!(empty.get("stats").is_none());
    }

    #[test]
    fn report_text_contains_sections() {
        let dataset = RawDataset {
            period_label: String::new(),
            current: vec![record(7, 5, 6, 9)],
            previous: Vec::new(),
        };
        let context = build_summary_context(SummaryPeriod::Monthly, &dataset).unwrap();
        let message = render_summary(&context, "06/08 09:00 JST");
        assert!(message.text.starts_with("Cheekschecker 月次サマリー"));
        assert!(message.text.contains("対象期間: 06/07(金)〜06/07(金)"));
        assert!(message.text.contains("- 7日(金) 単女5 女6/全9 (67%)"));
        assert!(message.text.contains("単独女性: 比較対象なし"));
        assert_eq!(message.blocks.len(), 7);
    }
}
