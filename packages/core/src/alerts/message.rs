//! Notification composition and rendering.
//!
//! The pipeline hands over stage notices and a [`ChangeSet`]; this module
//! decides what goes into one message and renders it twice: as Slack blocks
//! and as plain fallback text for clients (or failures) that drop blocks.

use serde_json::{json, Value};

use crate::calendar::diff::ChangeSet;
use crate::calendar::entry::DailyEntry;
use crate::calendar::stage::StageAction;
use crate::config::NotifyMode;

const CHANNEL_MENTION: &str = "<!channel>";
const DEBUG_SUMMARY_DAYS: usize = 10;

/// A rendered message: fallback text plus optional Slack blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct SlackMessage {
    pub text: String,
    pub blocks: Vec<Value>,
}

impl SlackMessage {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: Vec::new(),
        }
    }

    /// JSON body for an incoming webhook.
    pub fn to_payload(&self) -> Value {
        if self.blocks.is_empty() {
            json!({ "text": self.text })
        } else {
            json!({ "text": self.text, "blocks": self.blocks })
        }
    }

    /// Bold title over a one-line message, used for pings and notices.
    pub fn simple(title: &str, message: &str) -> Self {
        Self {
            text: format!("{} {}", title, message),
            blocks: vec![section(&format!("*{}*\n{}", title, message))],
        }
    }
}

fn section(markdown: &str) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": markdown } })
}

/// A stage transition that fired a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StageNotice {
    pub entry: DailyEntry,
    pub action: StageAction,
}

/// Everything one notification carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationBatch {
    pub stage: Vec<StageNotice>,
    pub newly_met: Vec<DailyEntry>,
    pub changed: Vec<DailyEntry>,
}

impl NotificationBatch {
    pub fn is_empty(&self) -> bool {
        self.stage.is_empty() && self.newly_met.is_empty() && self.changed.is_empty()
    }

    /// Pick the sections to send this run.
    ///
    /// With stage notices, newly met days that already have a notice are
    /// dropped and changed days ride along only in `changed` mode. Without
    /// them, `newly` mode sends newly met days and `changed` mode sends
    /// newly met and changed days.
    pub fn compose(stage: Vec<StageNotice>, changes: &ChangeSet, mode: NotifyMode) -> Self {
        let changed = match mode {
            NotifyMode::Changed => changes.changed_counts.clone(),
            NotifyMode::Newly => Vec::new(),
        };
        let newly_met = changes
            .newly_met
            .iter()
            .filter(|entry| !stage.iter().any(|notice| notice.entry.business_day == entry.business_day))
            .cloned()
            .collect();
        Self {
            stage,
            newly_met,
            changed,
        }
    }
}

fn day_label(entry: &DailyEntry, markdown: bool) -> String {
    if markdown {
        format!("*{}*", entry.business_day)
    } else {
        entry.business_day.to_string()
    }
}

pub fn format_entry(entry: &DailyEntry, include_male: bool, markdown: bool) -> String {
    let mut parts = vec![format!("単女{}", entry.single_female), format!("女{}", entry.female)];
    if include_male {
        parts.push(format!("男{}", entry.male));
    }
    parts.push(format!("全{}", entry.total));
    format!("{}: {} ({}%)", day_label(entry, markdown), parts.join(" "), entry.percent())
}

pub fn format_stage_notice(notice: &StageNotice, markdown: bool) -> String {
    let label = match notice.action {
        StageAction::Initial => "初回",
        StageAction::Bonus => "追加",
    };
    let entry = &notice.entry;
    format!(
        "[{}] {}: 単女{} 女{} /全{} ({}%)",
        label,
        day_label(entry, markdown),
        entry.single_female,
        entry.female,
        entry.total,
        entry.percent()
    )
}

const STAGE_HEADING: &str = "基準達成通知";
const NEWLY_HEADING: &str = "新規で条件を満たした日";
const CHANGED_HEADING: &str = "人数が更新された日";

/// Plain-text rendering of a batch.
pub fn render_fallback_text(batch: &NotificationBatch, target_url: &str, ping_channel: bool) -> String {
    let mut lines = Vec::new();
    if !batch.stage.is_empty() {
        lines.push(format!("【{}】", STAGE_HEADING));
        lines.extend(batch.stage.iter().map(|n| format!("- {}", format_stage_notice(n, false))));
    }
    if !batch.newly_met.is_empty() {
        lines.push(format!("【{}】", NEWLY_HEADING));
        lines.extend(batch.newly_met.iter().map(|e| format!("- {}", format_entry(e, false, false))));
    }
    if !batch.changed.is_empty() {
        lines.push(format!("【{}】", CHANGED_HEADING));
        lines.extend(batch.changed.iter().map(|e| format!("- {}", format_entry(e, true, false))));
    }
    lines.push(format!("URL: {}", target_url));
    let text = lines.join("\n");
    if ping_channel {
        format!("{} {}", CHANNEL_MENTION, text)
    } else {
        text
    }
}

/// Slack rendering of a batch, with the fallback text attached.
pub fn render_batch(batch: &NotificationBatch, target_url: &str, ping_channel: bool) -> SlackMessage {
    let mut blocks = Vec::new();
    let mut push_section = |heading: &str, lines: Vec<String>| {
        if lines.is_empty() {
            return;
        }
        blocks.push(section(&format!("*{}*", heading)));
        blocks.push(section(&lines.join("\n")));
    };
    push_section(
        STAGE_HEADING,
        batch.stage.iter().map(|n| format!("• {}", format_stage_notice(n, true))).collect(),
    );
    push_section(
        NEWLY_HEADING,
        batch.newly_met.iter().map(|e| format!("• {}", format_entry(e, false, true))).collect(),
    );
    push_section(
        CHANGED_HEADING,
        batch.changed.iter().map(|e| format!("• {}", format_entry(e, true, true))).collect(),
    );

    if !blocks.is_empty() {
        blocks.push(json!({
            "type": "actions",
            "elements": [{
                "type": "button",
                "text": { "type": "plain_text", "text": "月間カレンダーを開く" },
                "url": target_url,
            }],
        }));
    }
    if ping_channel {
        blocks.insert(0, section(CHANNEL_MENTION));
    }

    SlackMessage {
        text: render_fallback_text(batch, target_url, ping_channel),
        blocks,
    }
}

/// First days of the parse, for eyeballing the parser from the channel.
pub fn render_debug_summary(entries: &[DailyEntry], ping_channel: bool) -> SlackMessage {
    let title = format!("デバッグサマリー（上位{}日）", DEBUG_SUMMARY_DAYS);
    let mention = if ping_channel { format!("{} ", CHANNEL_MENTION) } else { String::new() };

    let mut sorted: Vec<&DailyEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.business_day);
    let shown = &sorted[..sorted.len().min(DEBUG_SUMMARY_DAYS)];

    let plain: Vec<String> = shown.iter().map(|e| format_entry(e, true, false)).collect();
    let bullets: Vec<String> = shown.iter().map(|e| format!("• {}", format_entry(e, true, true))).collect();

    SlackMessage {
        text: format!("{}【{}】\n{}", mention, title, plain.join("\n")),
        blocks: vec![section(&format!("{}*{}*", mention, title)), section(&bullets.join("\n"))],
    }
}

pub fn render_fetch_failure(reason: &str) -> SlackMessage {
    SlackMessage::text_only(format!("[ERROR] fetch failed: {}", reason))
}
