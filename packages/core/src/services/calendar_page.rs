//! Calendar page source.
//!
//! The page is plain server-rendered markup. [`HttpCalendarSource`] probes it
//! with `HEAD` so unchanged pages can be skipped, and fetches it with a
//! browser-like `User-Agent` because the host serves a reduced page to
//! unknown clients.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{ACCEPT_LANGUAGE, ETAG, LAST_MODIFIED, USER_AGENT};
use reqwest::Client;

use crate::error::ProviderError;
use crate::metrics::RunMetrics;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP cache validators reported by the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidators {
    /// True when either validator is present on both sides and equal.
    pub fn matches(&self, etag: Option<&str>, last_modified: Option<&str>) -> bool {
        let same = |ours: &Option<String>, theirs: Option<&str>| match (ours.as_deref(), theirs) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        };
        same(&self.etag, etag) || same(&self.last_modified, last_modified)
    }
}

/// Where calendar markup comes from.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Read the page's cache validators without downloading it.
    async fn probe(&self) -> Result<CacheValidators, ProviderError>;

    async fn fetch_markup(&self) -> Result<String, ProviderError>;

    /// Name used in logs.
    fn source_name(&self) -> &str;
}

#[derive(Clone)]
pub struct HttpCalendarSource {
    url: String,
    user_agent: String,
    http: Client,
}

impl HttpCalendarSource {
    /// `contact` is appended to the user agent so the site owner can reach us.
    pub fn new(url: impl Into<String>, contact: Option<&str>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NetworkError { message: e.to_string() })?;
        let user_agent = match contact.map(str::trim).filter(|c| !c.is_empty()) {
            Some(contact) => format!("{} (+{})", BROWSER_USER_AGENT, contact),
            None => BROWSER_USER_AGENT.to_string(),
        };
        Ok(Self {
            url: url.into(),
            user_agent,
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl CalendarSource for HttpCalendarSource {
    async fn probe(&self) -> Result<CacheValidators, ProviderError> {
        let response = self
            .http
            .head(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError { message: e.to_string() })?;
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }
        Ok(CacheValidators {
            etag: header_value(&response, ETAG),
            last_modified: header_value(&response, LAST_MODIFIED),
        })
    }

    async fn fetch_markup(&self) -> Result<String, ProviderError> {
        tracing::info!("Fetching calendar HTML from {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT_LANGUAGE, "ja,en;q=0.8")
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError { message: e.to_string() })?;
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }
        response
            .text()
            .await
            .map_err(|e| ProviderError::DecodeError { message: e.to_string() })
    }

    fn source_name(&self) -> &str {
        "http"
    }
}

/// Attempts and backoff for [`fetch_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    /// Upper bound of the random delay added to each wait.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            initial_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }
}

/// Fetch markup, retrying with `delay = delay * 2 + 1s` plus jitter.
///
/// Returns the last error once every attempt has failed.
pub async fn fetch_with_retry(
    source: &dyn CalendarSource,
    policy: &RetryPolicy,
    metrics: &RunMetrics,
) -> Result<String, ProviderError> {
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        metrics.fetch_attempts_total.inc();
        match source.fetch_markup().await {
            Ok(markup) => return Ok(markup),
            Err(err) => {
                metrics.fetch_errors_total.inc();
                tracing::error!("Fetch attempt {} via {} failed: {}", attempt, source.source_name(), err);
                if attempt >= attempts {
                    return Err(err);
                }
            }
        }

        let jitter_ms = policy.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        tokio::time::sleep(delay + jitter).await;
        if !delay.is_zero() {
            delay = delay * 2 + Duration::from_secs(1);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source_for(server: &MockServer) -> HttpCalendarSource {
        HttpCalendarSource::new(format!("{}/yoyaku.shtml", server.uri()), Some("ops@example.test")).unwrap()
    }

    // ---- validators ----

    #[test]
    fn validators_match_on_either_header() {
        let current = CacheValidators {
            etag: Some("\"v2\"".into()),
            last_modified: Some("Tue".into()),
        };
        assert!(current.matches(Some("\"v2\""), None));
        assert!(current.matches(Some("\"v1\""), Some("Tue")));
        assert!(!current.matches(Some("\"v1\""), Some("Mon")));
        assert!(!CacheValidators::default().matches(None, None));
    }

    // ---- HTTP ----

    #[tokio::test]
    async fn probe_reads_cache_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/yoyaku.shtml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .insert_header("Last-Modified", "Tue, 04 Jun 2024 10:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let validators = source_for(&server).await.probe().await.unwrap();
        assert_eq!(validators.etag.as_deref(), Some("\"abc\""));
        assert!(validators.last_modified.is_some());
    }

    #[tokio::test]
    async fn fetch_sends_language_and_agent_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/yoyaku.shtml"))
            .and(header("accept-language", "ja,en;q=0.8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<table border=2></table>"))
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert!(source.user_agent.ends_with("(+ops@example.test)"));
        assert_eq!(source.fetch_markup().await.unwrap(), "<table border=2></table>");
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source_for(&server).await.fetch_markup().await.unwrap_err();
        assert!(matches!(err, ProviderError::HttpStatus { status: 503, .. }));
    }

    // ---- retry ----

    #[tokio::test]
    async fn retry_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let metrics = RunMetrics::new().unwrap();
        let source = source_for(&server).await;
        let markup = fetch_with_retry(&source, &RetryPolicy::immediate(3), &metrics).await.unwrap();
        assert_eq!(markup, "ok");
        assert_eq!(metrics.fetch_attempts_total.get() as u32, 2);
        assert_eq!(metrics.fetch_errors_total.get() as u32, 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let metrics = RunMetrics::new().unwrap();
        let source = source_for(&server).await;
        let result = fetch_with_retry(&source, &RetryPolicy::immediate(3), &metrics).await;
        assert!(result.is_err());
        assert_eq!(metrics.fetch_errors_total.get() as u32, 3);
    }
}
