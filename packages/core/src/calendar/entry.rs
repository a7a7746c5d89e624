//! Daily entries and the threshold policy applied to them.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::calendar::clock::{infer_entry_date, literal_entry_date, weekday_for_column, weekday_label};
use crate::calendar::extract::{count_cell, CandidateCell, ParticipantCounts};

/// Hard lower bound on the female ratio. Configuration can only raise it.
pub const RATIO_FLOOR: f64 = 0.40;

/// Attendance thresholds applied by [`evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub female_min: u32,
    pub female_ratio_min: f64,
    pub min_total: Option<u32>,
    /// Empty means every weekday is considered.
    pub include_dow: Vec<Weekday>,
    pub exclude_keywords: Vec<String>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            female_min: 3,
            female_ratio_min: 0.3,
            min_total: None,
            include_dow: Vec::new(),
            exclude_keywords: Vec::new(),
        }
    }
}

impl Thresholds {
    pub fn ratio_threshold(&self) -> f64 {
        RATIO_FLOOR.max(self.female_ratio_min)
    }
}

/// Single-woman count a day needs. Friday and Saturday nights need more.
pub fn required_single_for(weekday: Weekday) -> u32 {
    match weekday {
        Weekday::Fri | Weekday::Sat => 5,
        _ => 3,
    }
}

/// One evaluated calendar day.
///
/// Built only through [`DailyEntry::new`], which clamps the count invariants
/// (`female <= total`, `single_female <= female`, `ratio` in `[0, 1]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyEntry {
    pub raw_date: NaiveDate,
    pub business_day: NaiveDate,
    pub day_of_month: u32,
    #[serde(serialize_with = "serialize_weekday")]
    pub dow: Weekday,
    pub column: usize,
    pub male: u32,
    pub female: u32,
    pub single_female: u32,
    pub total: u32,
    pub ratio: f64,
    pub considered: bool,
    pub meets: bool,
    pub required_single: u32,
    pub ratio_threshold: f64,
    pub fragments: Vec<String>,
}

fn serialize_weekday<S: serde::Serializer>(weekday: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(weekday_label(*weekday))
}

/// Where an entry sits in the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPosition {
    pub raw_date: NaiveDate,
    pub business_day: NaiveDate,
    pub day_of_month: u32,
    pub column: usize,
}

impl DailyEntry {
    pub fn new(
        position: EntryPosition,
        counts: ParticipantCounts,
        thresholds: &Thresholds,
        fragments: Vec<String>,
    ) -> Self {
        let dow = weekday_for_column(position.column);
        let male = counts.male;
        let female = counts.female;
        let total = male.saturating_add(female);
        let single_female = counts.single_female.min(female);
        let ratio = if total > 0 {
            (f64::from(female) / f64::from(total)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let required_single = required_single_for(dow);
        let ratio_threshold = thresholds.ratio_threshold();
        let dow_included = thresholds.include_dow.is_empty() || thresholds.include_dow.contains(&dow);
        let total_ok = thresholds.min_total.map_or(true, |min| total >= min);
        let considered = dow_included && total_ok;
        let meets = considered
            && total > 0
            && single_female >= required_single
            && female >= thresholds.female_min.max(required_single)
            && ratio >= ratio_threshold;

        Self {
            raw_date: position.raw_date,
            business_day: position.business_day,
            day_of_month: position.day_of_month,
            dow,
            column: position.column,
            male,
            female,
            single_female,
            total,
            ratio,
            considered,
            meets,
            required_single,
            ratio_threshold,
            fragments,
        }
    }

    pub fn dow_label(&self) -> &'static str {
        weekday_label(self.dow)
    }

    /// Ratio as a rounded integer percentage, for display.
    pub fn percent(&self) -> u32 {
        (self.ratio * 100.0).round() as u32
    }
}

/// Turn extracted cells into evaluated entries, sorted by
/// `(business_day, column)` and unique per business day.
///
/// Month-end numerals can clamp onto the same date (29, 30 and 31 all land
/// on Feb 29 in early March). Only one cell survives per day: the one whose
/// numeral names the date itself, otherwise the leftmost.
pub fn build_entries(
    cells: &[CandidateCell],
    reference: NaiveDate,
    window_days: i64,
    thresholds: &Thresholds,
) -> Vec<DailyEntry> {
    let mut entries: Vec<DailyEntry> = cells
        .iter()
        .map(|cell| {
            let (counts, kept) = count_cell(cell, &thresholds.exclude_keywords);
            let position = EntryPosition {
                raw_date: literal_entry_date(cell.day_of_month, reference),
                business_day: infer_entry_date(cell.day_of_month, reference, window_days),
                day_of_month: cell.day_of_month,
                column: cell.column,
            };
            let entry = DailyEntry::new(position, counts, thresholds, kept);
            tracing::debug!(
                "Evaluated {} {}: male={} female={} single={} ratio={:.3} considered={} meets={}",
                entry.business_day,
                entry.dow_label(),
                entry.male,
                entry.female,
                entry.single_female,
                entry.ratio,
                entry.considered,
                entry.meets
            );
            entry
        })
        .collect();
    entries.sort_by_key(|e| (e.business_day, e.column));
    collapse_business_days(entries)
}

fn collapse_business_days(entries: Vec<DailyEntry>) -> Vec<DailyEntry> {
    let exact = |e: &DailyEntry| e.business_day.day() == e.day_of_month;
    let mut kept: Vec<DailyEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match kept.last_mut() {
            Some(last) if last.business_day == entry.business_day => {
                tracing::debug!(
                    "Cells {} and {} both map to {}",
                    last.day_of_month,
                    entry.day_of_month,
                    entry.business_day
                );
                if !exact(&*last) && exact(&entry) {
                    *last = entry;
                }
            }
            _ => kept.push(entry),
        }
    }
    kept
}
