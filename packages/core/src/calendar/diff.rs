//! Change detection between the previous run's state and this run's entries.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::calendar::entry::DailyEntry;
use crate::state::DayRecord;

/// Days that changed since the last run. The three lists are independent and
/// may overlap; each is empty rather than absent when nothing changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Counts differ from the stored record, or a first sighting with people.
    pub changed_counts: Vec<DailyEntry>,
    /// Did not meet before, meets now.
    pub newly_met: Vec<DailyEntry>,
    /// `meets` flipped either way, or no record existed.
    pub status_changed: Vec<DailyEntry>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed_counts.is_empty() && self.newly_met.is_empty() && self.status_changed.is_empty()
    }
}

fn counts_differ(entry: &DailyEntry, prev: &DayRecord) -> bool {
    entry.male != prev.male
        || entry.female != prev.female
        || entry.total != prev.total
        || entry.single_female != prev.single_female
}

/// Compare considered entries against the previous day records.
pub fn diff_changes<'a>(
    prev_days: &BTreeMap<NaiveDate, DayRecord>,
    entries: impl IntoIterator<Item = &'a DailyEntry>,
) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for entry in entries {
        if !entry.considered {
            tracing::debug!(
                "Skipping business day {} for diff calculations (considered=false)",
                entry.business_day
            );
            continue;
        }
        let prev = prev_days.get(&entry.business_day);
        let prev_meets = prev.map_or(false, |p| p.meets);

        let changed = match prev {
            None => entry.total > 0,
            Some(prev) => counts_differ(entry, prev),
        };
        if changed {
            changes.changed_counts.push(entry.clone());
        }
        if !prev_meets && entry.meets {
            changes.newly_met.push(entry.clone());
        }
        if prev.is_none() || prev_meets != entry.meets {
            changes.status_changed.push(entry.clone());
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::entry::{EntryPosition, Thresholds};
    use crate::calendar::extract::ParticipantCounts;
    use crate::calendar::stage::Stage;

    fn entry(day: u32, male: u32, female: u32, single_female: u32) -> DailyEntry {
        let date = NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        DailyEntry::new(
            EntryPosition { raw_date: date, business_day: date, day_of_month: day, column: 2 },
            ParticipantCounts { male, female, single_female },
            &Thresholds::default(),
            vec![],
        )
    }

    fn records(entries: &[DailyEntry]) -> BTreeMap<NaiveDate, DayRecord> {
        entries
            .iter()
            .map(|e| (e.business_day, DayRecord::from_entry(e, Stage::None, None)))
            .collect()
    }

    #[test]
    fn first_sighting_is_changed_and_status_changed() {
        let entries = vec![entry(4, 1, 3, 3), entry(5, 0, 0, 0)];
        let changes = diff_changes(&BTreeMap::new(), &entries);

        // Empty day is not a count change but still a status change.
        assert_eq!(changes.changed_counts.len(), 1);
        assert_eq!(changes.newly_met.len(), 1);
        assert_eq!(changes.status_changed.len(), 2);
    }

    #[test]
    fn count_change_without_status_flip() {
        let before = vec![entry(4, 1, 3, 3)];
        let after = vec![entry(4, 2, 3, 3)];
        let changes = diff_changes(&records(&before), &after);
        assert_eq!(changes.changed_counts.len(), 1);
        assert!(changes.newly_met.is_empty());
        assert!(changes.status_changed.is_empty());
    }

    #[test]
    fn losing_status_is_reported_but_not_newly_met() {
        let before = vec![entry(4, 1, 3, 3)];
        let after = vec![entry(4, 10, 3, 3)];
        assert!(!after[0].meets);
        let changes = diff_changes(&records(&before), &after);
        assert!(changes.newly_met.is_empty());
        assert_eq!(changes.status_changed.len(), 1);
    }

    #[test]
    fn unconsidered_entries_are_ignored() {
        let thresholds = Thresholds { min_total: Some(50), ..Thresholds::default() };
        let date = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        let skipped = DailyEntry::new(
            EntryPosition { raw_date: date, business_day: date, day_of_month: 4, column: 2 },
            ParticipantCounts { male: 1, female: 3, single_female: 3 },
            &thresholds,
            vec![],
        );
        assert!(diff_changes(&BTreeMap::new(), [&skipped]).is_empty());
    }

    #[test]
    fn second_run_with_same_entries_is_empty() {
        let entries = vec![entry(4, 1, 3, 3), entry(5, 4, 2, 1), entry(6, 0, 0, 0)];
        let first = diff_changes(&BTreeMap::new(), &entries);
        assert!(!first.is_empty());

        let second = diff_changes(&records(&entries), &entries);
        assert_eq!(second, ChangeSet::default());
    }
}
