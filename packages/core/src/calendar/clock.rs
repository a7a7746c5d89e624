//! Business-day clock.
//!
//! The venue's "day" does not end at midnight: a visit at 03:00 on a
//! Saturday still belongs to Friday night. [`derive_business_day`] remaps a
//! wall-clock instant to that logical day using a per-weekday cutoff hour.
//!
//! The calendar page renders only a bare day-of-month numeral per cell, so
//! [`infer_entry_date`] resolves the numeral to a full date by proximity to a
//! reference date. Persisted state keys depend on this, so the policy must
//! stay stable across releases.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// Default site time zone.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Tokyo;

/// Default window (days) used when resolving a bare day numeral.
///
/// Wide enough that every upcoming day of the current month stays in it
/// when the reference is the 1st (day 24 is 23 days ahead), narrow enough
/// that month-end numerals seen in the first week still roll back.
pub const DEFAULT_INFER_WINDOW_DAYS: i64 = 23;

/// All weekdays, Sunday first (the calendar's column order).
pub const WEEKDAYS_FROM_SUNDAY: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Per-weekday rollover cutoff hours in site-local time.
///
/// A local time on weekday `W` whose hour is below `hour_for(W)` is filed
/// under the previous calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverHours {
    hours: [u32; 7],
}

impl RolloverHours {
    /// Cutoffs with every weekday at 0 (plain calendar days).
    pub const fn midnight() -> Self {
        Self { hours: [0; 7] }
    }

    pub fn hour_for(&self, weekday: Weekday) -> u32 {
        self.hours[weekday.num_days_from_sunday() as usize]
    }

    pub fn set(&mut self, weekday: Weekday, hour: u32) {
        self.hours[weekday.num_days_from_sunday() as usize] = hour;
    }

    pub fn with(mut self, weekday: Weekday, hour: u32) -> Self {
        self.set(weekday, hour);
        self
    }
}

impl Default for RolloverHours {
    fn default() -> Self {
        Self {
            // Sun, Mon, Tue, Wed, Thu, Fri, Sat
            hours: [2, 0, 5, 5, 5, 6, 6],
        }
    }
}

/// Short English label used in settings, state documents and messages.
pub fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "Sun",
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
    }
}

/// Parse a weekday label case-insensitively ("fri", "Fri", "friday").
pub fn parse_weekday(label: &str) -> Option<Weekday> {
    let lowered = label.trim().to_lowercase();
    WEEKDAYS_FROM_SUNDAY
        .into_iter()
        .find(|w| lowered == weekday_label(*w).to_lowercase() || lowered == full_name(*w))
}

fn full_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "sunday",
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
    }
}

/// Weekday for a calendar column (Sunday-first layout).
pub fn weekday_for_column(column: usize) -> Weekday {
    WEEKDAYS_FROM_SUNDAY[column % WEEKDAYS_FROM_SUNDAY.len()]
}

/// Derive the logical business day for `now`.
///
/// `now` is converted to `tz`; if the local hour is before that weekday's
/// cutoff, the previous calendar date is returned.
pub fn derive_business_day(now: DateTime<Utc>, rollover: &RolloverHours, tz: Tz) -> NaiveDate {
    let local = now.with_timezone(&tz);
    let cutoff = rollover.hour_for(local.weekday());
    let business_day = if local.hour() < cutoff {
        local.date_naive() - Duration::days(1)
    } else {
        local.date_naive()
    };
    tracing::debug!(
        "Derived business day={} from now={} cutoff={}",
        business_day,
        local.to_rfc3339(),
        cutoff
    );
    business_day
}

/// Number of days in `month` of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Build a date in (`year`, `month`) with `day` clamped to the month length.
pub fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let last = days_in_month(year, month);
    let day = day.clamp(1, last);
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let zero_based = year * 12 + (month as i32 - 1) + delta;
    (zero_based.div_euclid(12), (zero_based.rem_euclid(12) + 1) as u32)
}

/// The literal date of `day` within the reference month (clamped).
pub fn literal_entry_date(day: u32, reference: NaiveDate) -> NaiveDate {
    clamped_date(reference.year(), reference.month(), day)
}

/// Resolve a bare day-of-month numeral to a full date near `reference`.
///
/// The candidate is first placed in the reference month. If it lands more
/// than `window_days` before the reference it belongs to the next month; more
/// than `window_days` after, to the previous month. Clamping to month length
/// applies in whichever month is chosen.
pub fn infer_entry_date(day: u32, reference: NaiveDate, window_days: i64) -> NaiveDate {
    let day = day.clamp(1, 31);
    let candidate = literal_entry_date(day, reference);
    let offset = (candidate - reference).num_days();

    let month_delta = if offset < -window_days {
        1
    } else if offset > window_days {
        -1
    } else {
        0
    };

    if month_delta == 0 {
        return candidate;
    }
    let (year, month) = shift_month(reference.year(), reference.month(), month_delta);
    clamped_date(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn jst(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        DEFAULT_TIMEZONE
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    // ---- infer_entry_date ----

    #[test]
    fn late_reference_low_numeral_moves_to_next_month() {
        assert_eq!(infer_entry_date(3, date(2025, 10, 27), 15), date(2025, 11, 3));
    }

    #[test]
    fn early_reference_high_numeral_moves_to_previous_month() {
        assert_eq!(infer_entry_date(31, date(2024, 4, 5), 15), date(2024, 3, 31));
    }

    #[test]
    fn end_of_april_day_one_is_may_first() {
        assert_eq!(infer_entry_date(1, date(2024, 4, 28), 15), date(2024, 5, 1));
    }

    #[test]
    fn nearby_numeral_stays_in_reference_month() {
        assert_eq!(infer_entry_date(20, date(2024, 4, 15), 15), date(2024, 4, 20));
        assert_eq!(infer_entry_date(1, date(2024, 4, 15), 15), date(2024, 4, 1));
    }

    #[test]
    fn default_window_keeps_upcoming_days_in_reference_month() {
        let w = DEFAULT_INFER_WINDOW_DAYS;
        assert_eq!(infer_entry_date(20, date(2024, 10, 1), w), date(2024, 10, 20));
        assert_eq!(infer_entry_date(24, date(2024, 10, 1), w), date(2024, 10, 24));
        assert_eq!(infer_entry_date(26, date(2024, 10, 10), w), date(2024, 10, 26));
        assert_eq!(infer_entry_date(17, date(2024, 10, 1), w), date(2024, 10, 17));
    }

    #[test]
    fn default_window_still_rolls_month_edges() {
        let w = DEFAULT_INFER_WINDOW_DAYS;
        assert_eq!(infer_entry_date(3, date(2025, 10, 27), w), date(2025, 11, 3));
        assert_eq!(infer_entry_date(31, date(2024, 4, 5), w), date(2024, 3, 31));
        assert_eq!(infer_entry_date(1, date(2024, 4, 28), w), date(2024, 5, 1));
        assert_eq!(infer_entry_date(30, date(2024, 10, 2), w), date(2024, 9, 30));
    }

    #[test]
    fn year_boundaries_roll_both_ways() {
        assert_eq!(infer_entry_date(2, date(2024, 12, 30), 15), date(2025, 1, 2));
        assert_eq!(infer_entry_date(30, date(2025, 1, 2), 15), date(2024, 12, 30));
    }

    #[test]
    fn numeral_is_clamped_to_target_month_length() {
        // 31 in a 30-day reference month, kept in that month.
        assert_eq!(infer_entry_date(31, date(2024, 4, 25), 15), date(2024, 4, 30));
        // 31 pushed into February clamps to the leap day.
        assert_eq!(infer_entry_date(31, date(2024, 3, 2), 15), date(2024, 2, 29));
    }

    #[test]
    fn zero_numeral_is_treated_as_first() {
        assert_eq!(infer_entry_date(0, date(2024, 4, 10), 15), date(2024, 4, 1));
    }

    // ---- derive_business_day ----

    #[test]
    fn before_cutoff_files_under_previous_day() {
        // Saturday 2024-06-08 05:59 JST, Sat cutoff 6 -> Friday.
        let day = derive_business_day(jst(2024, 6, 8, 5, 59), &RolloverHours::default(), DEFAULT_TIMEZONE);
        assert_eq!(day, date(2024, 6, 7));
    }

    #[test]
    fn at_cutoff_uses_calendar_day() {
        let day = derive_business_day(jst(2024, 6, 8, 6, 0), &RolloverHours::default(), DEFAULT_TIMEZONE);
        assert_eq!(day, date(2024, 6, 8));
    }

    #[test]
    fn monday_has_no_rollover_by_default() {
        let day = derive_business_day(jst(2024, 6, 10, 0, 30), &RolloverHours::default(), DEFAULT_TIMEZONE);
        assert_eq!(day, date(2024, 6, 10));
    }

    #[test]
    fn utc_instant_is_converted_to_site_time() {
        // 2024-06-07 20:00 UTC is Saturday 05:00 JST -> Friday business day.
        let now = Utc.with_ymd_and_hms(2024, 6, 7, 20, 0, 0).unwrap();
        assert_eq!(
            derive_business_day(now, &RolloverHours::default(), DEFAULT_TIMEZONE),
            date(2024, 6, 7)
        );
    }

    // ---- weekday helpers ----

    #[test]
    fn weekday_labels_parse_case_insensitively() {
        assert_eq!(parse_weekday("fri"), Some(Weekday::Fri));
        assert_eq!(parse_weekday(" Sat "), Some(Weekday::Sat));
        assert_eq!(parse_weekday("Sunday"), Some(Weekday::Sun));
        assert_eq!(parse_weekday("someday"), None);
    }

    #[test]
    fn columns_map_sunday_first() {
        assert_eq!(weekday_for_column(0), Weekday::Sun);
        assert_eq!(weekday_for_column(5), Weekday::Fri);
        assert_eq!(weekday_for_column(7), Weekday::Sun);
    }

    proptest! {
        #[test]
        fn inferred_date_is_within_about_a_month(
            ordinal in 0i64..20_000,
            day in 1u32..=31,
        ) {
            let reference = date(2000, 1, 1) + Duration::days(ordinal);
            let inferred = infer_entry_date(day, reference, DEFAULT_INFER_WINDOW_DAYS);
            let distance = (inferred - reference).num_days().abs();
            prop_assert!(distance <= 31, "{} -> {} ({} days)", reference, inferred, distance);
        }
    }
}
