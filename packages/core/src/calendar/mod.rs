//! Calendar domain: reading the page, dating its cells, and deciding which
//! days qualify and which alerts they owe.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `clock` | Business-day clock and day-numeral inference |
//! | `html` | Tolerant markup tree |
//! | `extract` | Calendar cells and participant counting |
//! | `entry` | `DailyEntry` construction and thresholds |
//! | `stage` | Per-day notification stage machine |
//! | `diff` | Change detection across runs |

pub mod clock;
pub mod diff;
pub mod entry;
pub mod extract;
pub mod html;
pub mod stage;

pub use clock::{derive_business_day, infer_entry_date, RolloverHours};
pub use diff::{diff_changes, ChangeSet};
pub use entry::{build_entries, DailyEntry, Thresholds};
pub use extract::{extract_candidate_cells, CandidateCell, ScopeHint};
pub use stage::{evaluate_stage_transition, BonusPolicy, Stage, StageAction, StageOutcome};
