//! Per-day notification stage machine.
//!
//! `none -> initial -> bonus`, with `bonus -> initial` once the cooldown has
//! elapsed. Entering `bonus` fires a notification, leaving it does not, so a
//! day gets at most one bonus alert per cooldown window. A day that stops
//! meeting the thresholds always resets to `none`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calendar::entry::DailyEntry;

/// Notification stage persisted per business day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    None,
    Initial,
    Bonus,
}

impl Stage {
    /// Parse a stored label. Unknown or corrupt values read as `None`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "initial" => Stage::Initial,
            "bonus" => Stage::Bonus,
            _ => Stage::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::None => "none",
            Stage::Initial => "initial",
            Stage::Bonus => "bonus",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification fired by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageAction {
    Initial,
    Bonus,
}

impl StageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            StageAction::Initial => "initial",
            StageAction::Bonus => "bonus",
        }
    }
}

/// The stored stage of a day before this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorStage {
    pub stage: Stage,
    pub last_notified_at: Option<i64>,
}

/// Tunables for the bonus tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonusPolicy {
    pub cooldown_seconds: i64,
    pub single_delta: u32,
    pub ratio_threshold: f64,
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self {
            cooldown_seconds: 180 * 60,
            single_delta: 2,
            ratio_threshold: 0.50,
        }
    }
}

/// Result of [`evaluate_stage_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    pub action: Option<StageAction>,
    pub stage: Stage,
    pub last_notified_at: Option<i64>,
}

pub fn evaluate_stage_transition(
    entry: &DailyEntry,
    prior: Option<PriorStage>,
    now_ts: i64,
    policy: &BonusPolicy,
) -> StageOutcome {
    if !entry.meets {
        return StageOutcome {
            action: None,
            stage: Stage::None,
            last_notified_at: None,
        };
    }

    let prior = prior.unwrap_or_default();
    let unchanged = StageOutcome {
        action: None,
        stage: prior.stage,
        last_notified_at: prior.last_notified_at,
    };

    match prior.stage {
        Stage::None => StageOutcome {
            action: Some(StageAction::Initial),
            stage: Stage::Initial,
            last_notified_at: Some(now_ts),
        },
        Stage::Initial => {
            let by_single = entry.single_female >= entry.required_single.saturating_add(policy.single_delta);
            let by_ratio = entry.ratio >= policy.ratio_threshold;
            if by_single || by_ratio {
                StageOutcome {
                    action: Some(StageAction::Bonus),
                    stage: Stage::Bonus,
                    last_notified_at: Some(now_ts),
                }
            } else {
                unchanged
            }
        }
        Stage::Bonus => {
            let cooled_down = prior
                .last_notified_at
                .map_or(true, |last| now_ts - last >= policy.cooldown_seconds);
            if cooled_down {
                StageOutcome {
                    stage: Stage::Initial,
                    ..unchanged
                }
            } else {
                unchanged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::entry::{EntryPosition, Thresholds};
    use crate::calendar::extract::ParticipantCounts;
    use chrono::NaiveDate;

    const COOLDOWN: i64 = 180 * 60;

    fn entry(male: u32, female: u32, single_female: u32) -> DailyEntry {
        // Tuesday column: required single is 3.
        let day = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        DailyEntry::new(
            EntryPosition { raw_date: day, business_day: day, day_of_month: 4, column: 2 },
            ParticipantCounts { male, female, single_female },
            &Thresholds::default(),
            vec![],
        )
    }

    fn prior(stage: Stage, last: Option<i64>) -> Option<PriorStage> {
        Some(PriorStage { stage, last_notified_at: last })
    }

    // ---- transitions ----

    #[test]
    fn first_qualifying_run_fires_initial() {
        // 3 / 7 keeps the ratio under the bonus threshold.
        let outcome = evaluate_stage_transition(&entry(4, 3, 3), None, 1_000, &BonusPolicy::default());
        assert_eq!(outcome.action, Some(StageAction::Initial));
        assert_eq!(outcome.stage, Stage::Initial);
        assert_eq!(outcome.last_notified_at, Some(1_000));
    }

    #[test]
    fn initial_without_bonus_metrics_stays_quiet() {
        let outcome = evaluate_stage_transition(
            &entry(4, 3, 3),
            prior(Stage::Initial, Some(1_000)),
            2_000,
            &BonusPolicy::default(),
        );
        assert_eq!(outcome.action, None);
        assert_eq!(outcome.stage, Stage::Initial);
        assert_eq!(outcome.last_notified_at, Some(1_000));
    }

    #[test]
    fn initial_escalates_on_single_delta_or_ratio() {
        let policy = BonusPolicy::default();
        // 5 singles = required 3 + delta 2, ratio 5 / 11 below 0.5.
        let by_single = evaluate_stage_transition(&entry(6, 5, 5), prior(Stage::Initial, Some(0)), 50, &policy);
        assert_eq!(by_single.action, Some(StageAction::Bonus));
        assert_eq!(by_single.last_notified_at, Some(50));

        let by_ratio = evaluate_stage_transition(&entry(3, 3, 3), prior(Stage::Initial, Some(0)), 60, &policy);
        assert_eq!(by_ratio.action, Some(StageAction::Bonus));
        assert_eq!(by_ratio.stage, Stage::Bonus);
    }

    #[test]
    fn full_sequence_respects_cooldown() {
        let policy = BonusPolicy::default();
        let elevated = entry(2, 6, 5);
        let t0 = 10_000;

        let first = evaluate_stage_transition(&elevated, None, t0, &policy);
        assert_eq!(first.action, Some(StageAction::Initial));

        let second = evaluate_stage_transition(
            &elevated,
            prior(first.stage, first.last_notified_at),
            t0 + 60,
            &policy,
        );
        assert_eq!(second.action, Some(StageAction::Bonus));
        assert_eq!(second.stage, Stage::Bonus);

        let within = evaluate_stage_transition(
            &elevated,
            prior(second.stage, second.last_notified_at),
            t0 + 60 + COOLDOWN - 1,
            &policy,
        );
        assert_eq!(within.action, None);
        assert_eq!(within.stage, Stage::Bonus);

        let elapsed = evaluate_stage_transition(
            &elevated,
            prior(within.stage, within.last_notified_at),
            t0 + 60 + COOLDOWN,
            &policy,
        );
        assert_eq!(elapsed.action, None);
        assert_eq!(elapsed.stage, Stage::Initial);
        assert_eq!(elapsed.last_notified_at, Some(t0 + 60));

        let again = evaluate_stage_transition(
            &elevated,
            prior(elapsed.stage, elapsed.last_notified_at),
            t0 + 60 + COOLDOWN + 1,
            &policy,
        );
        assert_eq!(again.action, Some(StageAction::Bonus));
    }

    #[test]
    fn bonus_without_timestamp_rearms_immediately() {
        let outcome = evaluate_stage_transition(&entry(2, 6, 5), prior(Stage::Bonus, None), 5, &BonusPolicy::default());
        assert_eq!(outcome.action, None);
        assert_eq!(outcome.stage, Stage::Initial);
    }

    #[test]
    fn failing_day_resets_from_any_stage() {
        let failing = entry(10, 1, 1);
        assert!(!failing.meets);
        for stage in [Stage::None, Stage::Initial, Stage::Bonus] {
            let outcome = evaluate_stage_transition(&failing, prior(stage, Some(1)), 2, &BonusPolicy::default());
            assert_eq!(outcome, StageOutcome { action: None, stage: Stage::None, last_notified_at: None });
        }
    }

    // ---- labels ----

    #[test]
    fn corrupt_labels_read_as_none() {
        assert_eq!(Stage::from_label("BONUS"), Stage::Bonus);
        assert_eq!(Stage::from_label(" initial "), Stage::Initial);
        assert_eq!(Stage::from_label("pending"), Stage::None);
        assert_eq!(Stage::from_label(""), Stage::None);
    }
}
