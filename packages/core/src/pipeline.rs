//! One watcher run.
//!
//! Loads the previous state, fetches the calendar (unless its cache
//! validators are unchanged), evaluates every day, writes the next state and
//! then notifies. Only a failed fetch or a failed state write fails the run;
//! delivery and masked-history problems are logged and the run continues.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};

use crate::alerts::message::{render_batch, render_debug_summary, render_fetch_failure};
use crate::alerts::{AlertSink, NotificationBatch, SlackMessage, StageNotice};
use crate::calendar::{
    build_entries, derive_business_day, diff_changes, evaluate_stage_transition, extract_candidate_cells, DailyEntry,
};
use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::masking::{load_masked_history, save_masked_history, MaskingConfig};
use crate::metrics::RunMetrics;
use crate::services::{fetch_with_retry, CacheValidators, CalendarSource, RetryPolicy};
use crate::state::{load_state, save_state, DayRecord, PersistedState, STATE_VERSION};

/// Collaborators for [`run_once`].
pub struct WatchContext<'a> {
    pub settings: &'a Settings,
    pub source: &'a dyn CalendarSource,
    pub sink: &'a dyn AlertSink,
    pub metrics: &'a RunMetrics,
    pub masking: &'a MaskingConfig,
    pub retry: RetryPolicy,
    /// Write the fetched markup here before parsing.
    pub dump_markup: Option<PathBuf>,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub business_day: Option<NaiveDate>,
    /// The page was unchanged and nothing was evaluated.
    pub skipped: bool,
    pub entries: usize,
    pub meeting: usize,
    pub stage_actions: usize,
    pub notified: bool,
}

/// Whether a day is still re-evaluated this run.
///
/// Past days drop out once they are `ignore_older_than` days old, or
/// immediately with `notify_from_today`. Future days are always eligible.
pub fn is_eligible(entry: &DailyEntry, today: NaiveDate, settings: &Settings) -> bool {
    let age = (today - entry.business_day).num_days();
    if settings.notify_from_today && age > 0 {
        return false;
    }
    !(settings.ignore_older_than > 0 && age >= settings.ignore_older_than)
}

async fn deliver_logged(sink: &dyn AlertSink, message: &SlackMessage, what: &str) -> bool {
    match sink.deliver(message).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("Failed to deliver {} via {}: {}", what, sink.sink_name(), err);
            false
        }
    }
}

pub async fn run_once(ctx: &WatchContext<'_>, now: DateTime<Utc>) -> AppResult<RunReport> {
    let settings = ctx.settings;
    let today = derive_business_day(now, &settings.rollover_hours, settings.timezone);
    tracing::info!("Watch run for business day {}", today);
    let previous = load_state(&settings.state_path, today, settings.date_infer_window_days);

    let validators = match ctx.source.probe().await {
        Ok(validators) => validators,
        Err(err) => {
            tracing::warn!("HEAD probe via {} failed: {}", ctx.source.source_name(), err);
            CacheValidators::default()
        }
    };
    if validators.matches(previous.etag.as_deref(), previous.last_modified.as_deref()) {
        tracing::info!("Calendar unchanged (ETag/Last-Modified). Skipping fetch.");
        ctx.metrics.runs_skipped_total.inc();
        ctx.metrics.last_run_timestamp.set(now.timestamp() as f64);
        return Ok(RunReport {
            business_day: Some(today),
            skipped: true,
            ..RunReport::default()
        });
    }

    let markup = match fetch_with_retry(ctx.source, &ctx.retry, ctx.metrics).await {
        Ok(markup) => markup,
        Err(err) => {
            let reason = err.to_string();
            deliver_logged(ctx.sink, &render_fetch_failure(&reason), "fetch failure notice").await;
            return Err(AppError::Network(reason));
        }
    };
    if let Some(path) = &ctx.dump_markup {
        match std::fs::write(path, &markup) {
            Ok(()) => tracing::info!("Fetched markup written to {}", path.display()),
            Err(err) => tracing::warn!("Could not write markup to {}: {}", path.display(), err),
        }
    }

    let (cells, scope) = extract_candidate_cells(&markup);
    if scope.is_degraded() {
        tracing::warn!("Calendar table not found; parsed {} instead", scope);
    }
    let entries = build_entries(&cells, today, settings.date_infer_window_days, &settings.thresholds);
    if entries.is_empty() {
        tracing::warn!("No calendar entries parsed");
    }

    let eligible: Vec<&DailyEntry> = entries.iter().filter(|e| is_eligible(e, today, settings)).collect();
    tracing::debug!("{} of {} entries eligible", eligible.len(), entries.len());
    let changes = diff_changes(&previous.days, eligible.iter().copied());

    let now_ts = now.timestamp();
    let mut notices = Vec::new();
    let mut next_days = BTreeMap::new();
    for entry in &entries {
        let prior = previous.prior_stage(entry.business_day);
        let record = if is_eligible(entry, today, settings) {
            let outcome = evaluate_stage_transition(entry, prior, now_ts, &settings.bonus);
            if let Some(action) = outcome.action {
                tracing::info!("Stage {} for {}", action.as_str(), entry.business_day);
                ctx.metrics
                    .stage_notifications_total
                    .with_label_values(&[action.as_str()])
                    .inc();
                notices.push(StageNotice {
                    entry: entry.clone(),
                    action,
                });
            }
            DayRecord::with_outcome(entry, &outcome)
        } else {
            let prior = prior.unwrap_or_default();
            DayRecord::from_entry(entry, prior.stage, prior.last_notified_at)
        };
        next_days.insert(entry.business_day, record);
    }

    let next = PersistedState {
        version: STATE_VERSION,
        etag: validators.etag,
        last_modified: validators.last_modified,
        days: next_days,
    };
    save_state(&settings.state_path, &next)?;

    let stage_actions = notices.len();
    let batch = NotificationBatch::compose(notices, &changes, settings.notify_mode);
    let notified = if batch.is_empty() {
        tracing::info!("No notification-worthy changes");
        false
    } else {
        let message = render_batch(&batch, &settings.target_url, settings.ping_channel);
        deliver_logged(ctx.sink, &message, "notification").await
    };
    if settings.debug_summary {
        let summary = render_debug_summary(&entries, settings.ping_channel);
        deliver_logged(ctx.sink, &summary, "debug summary").await;
    }

    let mut history = load_masked_history(&settings.history_path);
    history.merge(&entries, today, settings.mask_level, ctx.masking, now);
    if let Err(err) = save_masked_history(&settings.history_path, &history) {
        tracing::error!("Failed to save masked history: {}", err);
    }

    let meeting = entries.iter().filter(|e| e.meets).count();
    ctx.metrics.entries_parsed.set(entries.len() as f64);
    ctx.metrics.entries_meeting.set(meeting as f64);
    ctx.metrics.changed_days.set(changes.changed_counts.len() as f64);
    ctx.metrics.last_run_timestamp.set(now_ts as f64);

    tracing::info!(
        "Run complete: {} entries, {} meeting, {} stage action(s), notified={}",
        entries.len(),
        meeting,
        stage_actions,
        notified
    );
    Ok(RunReport {
        business_day: Some(today),
        skipped: false,
        entries: entries.len(),
        meeting,
        stage_actions,
        notified,
    })
}
