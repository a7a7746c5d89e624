//! End-to-end watcher and summary runs.
//!
//! Each test wires the real HTTP collaborators against two wiremock servers,
//! one serving the calendar page and one standing in for the Slack incoming
//! webhook, with state files in a temporary directory.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use cheekschecker::{
    alerts::SlackWebhook,
    calendar::Stage,
    config::Settings,
    masking::MaskingConfig,
    metrics::RunMetrics,
    pipeline::{run_once, RunReport, WatchContext},
    services::{HttpCalendarSource, RetryPolicy},
    state::load_state,
    summary::{run_summary, SummaryPeriod, SummaryRequest},
};

// ---- Helpers ----------------------------------------------------------------

/// One week row, 2024-06-09 (Sun) .. 2024-06-15 (Sat). Friday the 14th has
/// five single women, one woman with a partner and two more men.
const CALENDAR: &str = r#"<html><body>
<table border="1"><tr><td>menu</td></tr></table>
<table border="2">
<tr><th>日</th><th>月</th><th>火</th><th>水</th><th>木</th><th>金</th><th>土</th></tr>
<tr>
<td valign="top"><center>9</center><center>Sun</center><center></center></td>
<td valign="top"><center>10</center><center>Mon</center><center><font>♂ a</font></center></td>
<td valign="top"><center>11</center><center>Tue</center><center></center></td>
<td valign="top"><center>12</center><center>Wed</center><center><font>♀ b</font></center></td>
<td valign="top"><center>13</center><center>Thu</center><center></center></td>
<td valign="top"><center>14</center><center>Fri</center><center>
<font>♀ A</font><font>♀ B</font><font>♀ C</font><font>♀ D</font><font>♀ E</font>
<font>♀♂ F</font><font>♂♂ G</font></center></td>
<td valign="top"><center>15</center><center>Sat</center><center></center></td>
</tr>
</table>
</body></html>"#;

// Friday 2024-06-14 12:00 JST.
fn friday_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 14, 3, 0, 0).unwrap()
}

async fn calendar_server(etag: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/yoyaku.shtml"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", etag))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/yoyaku.shtml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CALENDAR))
        .mount(&server)
        .await;
    server
}

async fn webhook_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

async fn posted_texts(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|req| serde_json::from_slice::<Value>(&req.body).ok())
        .filter_map(|body| body["text"].as_str().map(str::to_string))
        .collect()
}

async fn watch(settings: &Settings, now: DateTime<Utc>) -> RunReport {
    let metrics = RunMetrics::new().unwrap();
    let masking = MaskingConfig::default();
    let source = HttpCalendarSource::new(settings.target_url.clone(), None).unwrap();
    let sink = SlackWebhook::new(settings.slack_webhook_url.clone()).unwrap();
    let ctx = WatchContext {
        settings,
        source: &source,
        sink: &sink,
        metrics: &metrics,
        masking: &masking,
        retry: RetryPolicy::immediate(2),
        dump_markup: None,
    };
    run_once(&ctx, now).await.unwrap()
}

// ---- Watcher ----------------------------------------------------------------

#[tokio::test]
async fn busy_friday_is_announced_once_and_persisted() {
    let page = calendar_server("\"v1\"").await;
    let hook = webhook_server().await;
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        target_url: format!("{}/yoyaku.shtml", page.uri()),
        slack_webhook_url: Some(format!("{}/hook", hook.uri())),
        state_path: dir.path().join("state.json"),
        history_path: dir.path().join("history_masked.json"),
        ..Settings::default()
    };

    let report = watch(&settings, friday_noon()).await;
    assert_eq!(report.entries, 7);
    assert_eq!(report.meeting, 1);
    assert!(report.notified);

    let texts = posted_texts(&hook).await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("<!channel> 【基準達成通知】"));
    assert!(texts[0].contains("[初回] 2024-06-14: 単女5 女6 /全9 (67%)"));
    assert!(texts[0].contains(&settings.target_url));

    let friday = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
    let state = load_state(&settings.state_path, friday, 15);
    assert_eq!(state.etag.as_deref(), Some("\"v1\""));
    assert_eq!(state.days[&friday].stage, Stage::Initial);

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&settings.state_path).unwrap()).unwrap();
    assert_eq!(raw["version"], 2);
    assert_eq!(raw["days"]["2024-06-14"]["singleFemale"], 5);

    let history: Value = serde_json::from_str(&std::fs::read_to_string(&settings.history_path).unwrap()).unwrap();
    assert_eq!(history["days"]["2024-06-14"]["ratio"], "60±");
    assert!(history["days"]["2024-06-14"].get("female").is_some());

    // Same ETag on the next tick: nothing is fetched or sent.
    let again = watch(&settings, friday_noon() + Duration::minutes(5)).await;
    assert!(again.skipped);
    assert_eq!(posted_texts(&hook).await.len(), 1);
}

#[tokio::test]
async fn legacy_state_is_upgraded_before_evaluation() {
    let page = calendar_server("\"v2\"").await;
    let hook = webhook_server().await;
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::write(
        &state_path,
        r#"{"etag": "\"v1\"", "days": {
            "14": {"male": 3, "female": 6, "single_female": 5, "total": 9, "ratio": 0.667,
                   "meets": true, "stage": "bonus", "last_notified_at": 1718330400},
            "bogus": {"male": 1}
        }}"#,
    )
    .unwrap();
    let settings = Settings {
        target_url: format!("{}/yoyaku.shtml", page.uri()),
        slack_webhook_url: Some(format!("{}/hook", hook.uri())),
        state_path: state_path.clone(),
        history_path: dir.path().join("history_masked.json"),
        ping_channel: false,
        ..Settings::default()
    };

    // 10 minutes after the stored notification: still cooling down.
    let now = Utc.timestamp_opt(1_718_330_400 + 600, 0).unwrap();
    let report = watch(&settings, now).await;
    assert_eq!(report.stage_actions, 0);
    assert!(!report.notified);
    assert!(posted_texts(&hook).await.is_empty());

    let friday = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
    let state = load_state(&state_path, friday, 15);
    assert_eq!(state.version, 2);
    assert_eq!(state.days[&friday].stage, Stage::Bonus);
    assert_eq!(state.days[&friday].last_notified_at, Some(1_718_330_400));
}

// ---- Summary ----------------------------------------------------------------

#[tokio::test]
async fn weekly_summary_is_stored_masked_and_posted() {
    let hook = webhook_server().await;
    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("raw.json");
    std::fs::write(
        &raw_path,
        r#"{"period_label": "2024-W24",
            "days": [
              {"date": "2024-06-14", "single_female": 5, "female": 6, "total": 9, "ratio": 0.667},
              {"date": "2024-06-15", "single_female": 1, "female": 3, "total": 12}
            ],
            "previous_days": [
              {"date": "2024-06-07", "single_female": 2, "female": 4, "total": 10}
            ]}"#,
    )
    .unwrap();
    let output = dir.path().join("summary_masked.json");
    let request = SummaryRequest {
        period: SummaryPeriod::Weekly,
        raw_data: Some(raw_path),
        history_path: dir.path().join("history_masked.json"),
        output_path: output.clone(),
        timezone: chrono_tz::Asia::Tokyo,
    };
    let sink = SlackWebhook::new(Some(format!("{}/hook", hook.uri()))).unwrap();

    run_summary(&request, &MaskingConfig::default(), &sink, friday_noon()).await.unwrap();

    let store: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(store["weekly"]["status"], "ok");
    assert_eq!(store["weekly"]["day_count"], 2);
    assert_eq!(store["weekly"]["trend"]["single"], "up");
    assert_eq!(store["weekly"]["top_days"][0]["label"], "14日(金)");
    assert!(!store.to_string().contains("\"single_female\""));

    let texts = posted_texts(&hook).await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Cheekschecker 週次サマリー"));
    assert!(texts[0].contains("対象営業日: 2日"));
}

#[tokio::test]
async fn summary_without_raw_data_reports_no_data() {
    let hook = webhook_server().await;
    let dir = tempfile::tempdir().unwrap();
    let request = SummaryRequest {
        period: SummaryPeriod::Monthly,
        raw_data: None,
        history_path: dir.path().join("history_masked.json"),
        output_path: dir.path().join("summary_masked.json"),
        timezone: chrono_tz::Asia::Tokyo,
    };
    let sink = SlackWebhook::new(Some(format!("{}/hook", hook.uri()))).unwrap();

    run_summary(&request, &MaskingConfig::default(), &sink, friday_noon()).await.unwrap();

    let texts = posted_texts(&hook).await;
    assert_eq!(texts, vec!["Cheekschecker 月次サマリー No data for this period / 集計対象なし".to_string()]);
}
