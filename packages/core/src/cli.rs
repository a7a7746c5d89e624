use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Settings;
use crate::summary::SummaryPeriod;

/// Cheekschecker CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "cheekschecker",
    version,
    about = "Watches a venue's attendance calendar and posts threshold alerts"
)]
pub struct Cli {
    /// Verbose logging (same as DEBUG_LOG=1)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Defaults to `watch`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the calendar once, update state and notify
    Watch(WatchArgs),
    /// Post a weekly or monthly trend summary
    Summarize(SummarizeArgs),
    /// Post a webhook health message
    Ping(PingArgs),
}

impl Default for Command {
    fn default() -> Self {
        Command::Watch(WatchArgs::default())
    }
}

#[derive(Debug, Default, Args)]
pub struct WatchArgs {
    /// State file (overrides STATE_PATH)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Masked history file (overrides HISTORY_PATH)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Prometheus text file (overrides METRICS_PATH)
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,

    /// Save the fetched markup here for offline debugging
    #[arg(long)]
    pub dump_markup: Option<PathBuf>,
}

impl WatchArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(state) = &self.state {
            settings.state_path = state.clone();
        }
        if let Some(history) = &self.history {
            settings.history_path = history.clone();
        }
        if let Some(metrics_path) = &self.metrics_path {
            settings.metrics_path = Some(metrics_path.clone());
        }
    }
}

#[derive(Debug, Args)]
pub struct SummarizeArgs {
    #[arg(long, value_enum, default_value = "weekly")]
    pub period: SummaryPeriod,

    /// Raw dataset JSON; without it the summary reports no data
    #[arg(long)]
    pub raw_data: Option<PathBuf>,

    /// Masked history file (overrides HISTORY_PATH)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Masked summary store
    #[arg(long, default_value = "summary_masked.json")]
    pub output: PathBuf,

    /// Overrides SLACK_WEBHOOK_URL
    #[arg(long)]
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Args)]
pub struct PingArgs {
    /// Overrides SLACK_WEBHOOK_URL
    #[arg(long)]
    pub slack_webhook: Option<String>,
}
