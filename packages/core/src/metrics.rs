//! Prometheus metrics for a watcher run.
//!
//! [`RunMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. The binary runs once per schedule tick, so nothing scrapes it
//! live: at the end of a run the registry is rendered in text exposition
//! format and written to `METRICS_PATH` for a node-exporter text-file
//! collector to pick up.

use std::path::Path;

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};

use crate::error::{AppError, AppResult};

pub struct RunMetrics {
    /// Calendar page fetch attempts (success + failure).
    pub fetch_attempts_total: Counter,
    /// Failed calendar page fetch attempts.
    pub fetch_errors_total: Counter,
    /// Runs skipped because the page validators were unchanged.
    pub runs_skipped_total: Counter,
    /// Day entries parsed in the last run.
    pub entries_parsed: Gauge,
    /// Day entries meeting the thresholds in the last run.
    pub entries_meeting: Gauge,
    /// Days whose counts changed since the previous run.
    pub changed_days: Gauge,
    /// Stage notifications fired, labelled by action.
    pub stage_notifications_total: CounterVec,
    /// Unix time of the last completed run.
    pub last_run_timestamp: Gauge,
    pub registry: Registry,
}

impl RunMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fetch_attempts_total = Counter::with_opts(Opts::new(
            "cheekschecker_fetch_attempts_total",
            "Calendar page fetch attempts",
        ))?;
        let fetch_errors_total = Counter::with_opts(Opts::new(
            "cheekschecker_fetch_errors_total",
            "Failed calendar page fetch attempts",
        ))?;
        let runs_skipped_total = Counter::with_opts(Opts::new(
            "cheekschecker_runs_skipped_total",
            "Runs skipped on matching ETag / Last-Modified",
        ))?;
        let entries_parsed = Gauge::with_opts(Opts::new(
            "cheekschecker_entries_parsed",
            "Day entries parsed in the last run",
        ))?;
        let entries_meeting = Gauge::with_opts(Opts::new(
            "cheekschecker_entries_meeting",
            "Day entries meeting the thresholds in the last run",
        ))?;
        let changed_days = Gauge::with_opts(Opts::new(
            "cheekschecker_changed_days",
            "Days whose counts changed since the previous run",
        ))?;
        let stage_notifications_total = CounterVec::new(
            Opts::new(
                "cheekschecker_stage_notifications_total",
                "Stage notifications fired by action",
            ),
            &["action"],
        )?;
        let last_run_timestamp = Gauge::with_opts(Opts::new(
            "cheekschecker_last_run_timestamp_seconds",
            "Unix time of the last completed run",
        ))?;

        registry.register(Box::new(fetch_attempts_total.clone()))?;
        registry.register(Box::new(fetch_errors_total.clone()))?;
        registry.register(Box::new(runs_skipped_total.clone()))?;
        registry.register(Box::new(entries_parsed.clone()))?;
        registry.register(Box::new(entries_meeting.clone()))?;
        registry.register(Box::new(changed_days.clone()))?;
        registry.register(Box::new(stage_notifications_total.clone()))?;
        registry.register(Box::new(last_run_timestamp.clone()))?;

        Ok(Self {
            fetch_attempts_total,
            fetch_errors_total,
            runs_skipped_total,
            entries_parsed,
            entries_meeting,
            changed_days,
            stage_notifications_total,
            last_run_timestamp,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }

    /// Write the rendered metrics to `path` atomically.
    pub fn write_textfile(&self, path: &Path) -> AppResult<()> {
        let body = self
            .render()
            .map_err(|err| AppError::Parse(format!("metrics encoding: {}", err)))?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, body).map_err(|e| AppError::storage(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| AppError::storage(path, e))?;
        tracing::debug!("Metrics written to {}", path.display());
        Ok(())
    }
}
