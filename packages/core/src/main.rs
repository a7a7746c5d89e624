use chrono::Utc;
use clap::Parser;
use dotenvy::dotenv;

use cheekschecker::alerts::{AlertSink, SlackMessage, SlackWebhook};
use cheekschecker::cli::{Cli, Command, PingArgs, SummarizeArgs, WatchArgs};
use cheekschecker::config::{debug_log_from_env, Settings};
use cheekschecker::error::{AppError, AppResult};
use cheekschecker::logging::init_logging;
use cheekschecker::masking::load_masking_config;
use cheekschecker::metrics::RunMetrics;
use cheekschecker::pipeline::{run_once, WatchContext};
use cheekschecker::services::{HttpCalendarSource, RetryPolicy};
use cheekschecker::summary::{run_summary, SummaryRequest};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.debug || debug_log_from_env());

    let settings = Settings::from_env();
    let result = match cli.command.unwrap_or_default() {
        Command::Watch(args) => watch(args, settings).await,
        Command::Summarize(args) => summarize(args, settings).await,
        Command::Ping(args) => ping(args, settings).await,
    };

    if let Err(err) = result {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn watch(args: WatchArgs, mut settings: Settings) -> AppResult<()> {
    args.apply(&mut settings);
    let metrics = RunMetrics::new().map_err(|err| AppError::Config(format!("metrics registry: {}", err)))?;
    let source = HttpCalendarSource::new(settings.target_url.clone(), settings.user_agent_contact.as_deref())?;
    let sink = SlackWebhook::new(settings.slack_webhook_url.clone())?;
    let masking = load_masking_config(settings.mask_config_path.as_deref());

    let ctx = WatchContext {
        settings: &settings,
        source: &source,
        sink: &sink,
        metrics: &metrics,
        masking: &masking,
        retry: RetryPolicy::default(),
        dump_markup: args.dump_markup.clone(),
    };
    let result = run_once(&ctx, Utc::now()).await;

    if let Some(path) = &settings.metrics_path {
        if let Err(err) = metrics.write_textfile(path) {
            tracing::warn!("Failed to write metrics: {}", err);
        }
    }
    let report = result?;
    tracing::debug!("Run report: {:?}", report);
    Ok(())
}

async fn summarize(args: SummarizeArgs, settings: Settings) -> AppResult<()> {
    let sink = SlackWebhook::new(args.slack_webhook.or(settings.slack_webhook_url))?;
    let masking = load_masking_config(settings.mask_config_path.as_deref());
    let request = SummaryRequest {
        period: args.period,
        raw_data: args.raw_data,
        history_path: args.history.unwrap_or(settings.history_path),
        output_path: args.output,
        timezone: settings.timezone,
    };
    run_summary(&request, &masking, &sink, Utc::now()).await
}

async fn ping(args: PingArgs, settings: Settings) -> AppResult<()> {
    let sink = SlackWebhook::new(args.slack_webhook.or(settings.slack_webhook_url))?;
    sink.deliver(&SlackMessage::simple("Cheekschecker: Webhook OK", "Webhook OK"))
        .await
}
