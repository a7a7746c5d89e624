//! Calendar cell extraction and participant counting.
//!
//! [`extract_candidate_cells`] is the only place that knows the page layout.
//! Everything downstream works on [`CandidateCell`] values, so the layout
//! heuristics can be tested (and replaced) independently of the state machine.

use std::fmt;

use crate::calendar::html::{parse_document, Element};

const MALE_GLYPH: char = '♂';
const FEMALE_GLYPH: char = '♀';
const MULTIPLIER_MARKS: &[char] = &['×', 'x', 'X', '＊', '*'];
const GROUP_SUFFIXES: &[char] = &['人', '名', '組'];

/// Keywords that refer to staff are never applied as exclusions.
const STAFF_MARKERS: &[&str] = &["staff", "スタッフ"];

/// One calendar cell with a parsable day numeral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCell {
    pub day_of_month: u32,
    /// Position among the row's day columns (0 = Sunday).
    pub column: usize,
    /// Participant text fragments, trimmed and non-empty.
    pub fragments: Vec<String>,
}

/// Which part of the document the cells were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeHint {
    /// The bordered calendar table the page normally renders.
    CalendarTable,
    /// First table in the document; the calendar table was missing.
    FirstTable,
    /// No table at all; the whole document was scanned.
    Document,
}

impl ScopeHint {
    pub fn is_degraded(self) -> bool {
        !matches!(self, ScopeHint::CalendarTable)
    }
}

impl fmt::Display for ScopeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeHint::CalendarTable => write!(f, "table[border=2]"),
            ScopeHint::FirstTable => write!(f, "table-fallback"),
            ScopeHint::Document => write!(f, "document"),
        }
    }
}

/// Per-fragment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantCounts {
    pub male: u32,
    pub female: u32,
    pub single_female: u32,
}

impl std::ops::AddAssign for ParticipantCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.male += rhs.male;
        self.female += rhs.female;
        self.single_female += rhs.single_female;
    }
}

/// Read every day cell out of the calendar markup.
pub fn extract_candidate_cells(markup: &str) -> (Vec<CandidateCell>, ScopeHint) {
    let document = parse_document(markup);

    let (scope, hint) = if let Some(table) =
        document.find_first(|el| el.name == "table" && el.attr("border").map(str::trim) == Some("2"))
    {
        (table, ScopeHint::CalendarTable)
    } else if let Some(table) = document.find_first(|el| el.name == "table") {
        (table, ScopeHint::FirstTable)
    } else {
        (&document, ScopeHint::Document)
    };

    if hint.is_degraded() {
        tracing::warn!("Calendar table not found; parsing with degraded scope: {}", hint);
    } else {
        tracing::debug!("Parsing day entries using scope: {}", hint);
    }

    let mut cells = Vec::new();
    for row in scope.find_all("tr") {
        let columns = row
            .children_named("td")
            .filter(|td| td.attr("valign").map(|v| v.eq_ignore_ascii_case("top")).unwrap_or(false));
        for (column, td) in columns.enumerate() {
            if let Some(cell) = read_cell(td, column) {
                cells.push(cell);
            }
        }
    }
    (cells, hint)
}

fn read_cell(td: &Element, column: usize) -> Option<CandidateCell> {
    let centers = td.find_all("center");
    let day_text = centers.first()?.text();
    let Some(day_of_month) = leading_number(&day_text) else {
        tracing::debug!("Skipping cell in column {} without a day number: {:?}", column, day_text);
        return None;
    };

    let participants = centers.get(2).or_else(|| centers.get(1));
    let mut fonts = participants.map(|p| p.find_all("font")).unwrap_or_default();
    if fonts.is_empty() {
        fonts = td.find_all("font");
    }

    let fragments = fonts
        .into_iter()
        .map(|font| font.text())
        .filter(|text| !text.is_empty())
        .collect();

    Some(CandidateCell {
        day_of_month,
        column,
        fragments,
    })
}

/// First run of (ASCII or full-width) digits in `text`.
fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| ascii_digit(*c).is_none())
        .map_while(ascii_digit)
        .collect();
    digits.parse().ok()
}

fn ascii_digit(c: char) -> Option<char> {
    match c {
        '0'..='9' => Some(c),
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
        _ => None,
    }
}

/// Numbers attached to a multiplier mark (`×3`, `x 2`) or a group suffix
/// (`2人`, `３名`, `1組`).
pub fn extract_numeric_counts(text: &str) -> Vec<u32> {
    let chars: Vec<char> = text.chars().collect();
    let mut counts = Vec::new();

    // Multiplier: mark, optional whitespace, digits.
    for (i, c) in chars.iter().enumerate() {
        if !MULTIPLIER_MARKS.contains(c) {
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        let digits: String = chars[j..].iter().copied().map_while(ascii_digit).collect();
        if let Ok(value) = digits.parse() {
            counts.push(value);
        }
    }

    // Group count: digits, optional whitespace, suffix.
    let mut i = 0;
    while i < chars.len() {
        if ascii_digit(chars[i]).is_none() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && ascii_digit(chars[i]).is_some() {
            i += 1;
        }
        let digits: String = chars[start..i].iter().copied().filter_map(ascii_digit).collect();
        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j < chars.len() && GROUP_SUFFIXES.contains(&chars[j]) {
            if let Ok(value) = digits.parse() {
                counts.push(value);
            }
        }
    }
    counts
}

/// Count one participant fragment.
///
/// Glyphs are the base counts. A numeral only overrides the female count
/// when there are female glyphs and no male glyphs: mixed groups list one
/// glyph per person, women-only groups are sometimes abbreviated (`♀×3`).
/// A fragment is a single woman when it counts exactly one woman, no men and
/// no numeral above one.
pub fn count_participants(text: &str) -> ParticipantCounts {
    let male = text.chars().filter(|c| *c == MALE_GLYPH).count() as u32;
    let female_glyphs = text.chars().filter(|c| *c == FEMALE_GLYPH).count() as u32;
    let numeral = extract_numeric_counts(text).into_iter().max();

    let female = match numeral {
        Some(n) if female_glyphs > 0 && male == 0 => female_glyphs.max(n),
        _ => female_glyphs,
    };
    let numeric_value = numeral.unwrap_or(female);
    let single_female = u32::from(female == 1 && male == 0 && numeric_value <= 1);

    ParticipantCounts {
        male,
        female,
        single_female,
    }
}

/// Whether a fragment is dropped by the keyword filter.
///
/// Matching is case-insensitive. Keywords mentioning staff never apply:
/// staff entries are still counted.
pub fn should_exclude(text: &str, keywords: &[String]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|keyword| {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() || STAFF_MARKERS.iter().any(|m| keyword.contains(m)) {
            return false;
        }
        lowered.contains(&keyword)
    })
}

/// Sum the counts of a cell's fragments after the keyword filter.
///
/// Returns the totals and the fragments that were kept.
pub fn count_cell(cell: &CandidateCell, exclude_keywords: &[String]) -> (ParticipantCounts, Vec<String>) {
    let mut totals = ParticipantCounts::default();
    let mut kept = Vec::new();
    for fragment in &cell.fragments {
        if should_exclude(fragment, exclude_keywords) {
            tracing::debug!(
                "Excluded text '{}' for day {} due to keyword filter",
                fragment,
                cell.day_of_month
            );
            continue;
        }
        totals += count_participants(fragment);
        kept.push(fragment.clone());
    }
    (totals, kept)
}
