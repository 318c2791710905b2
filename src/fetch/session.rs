//! Fetch session implementation
//!
//! A session pairs one egress rotation context with a reqwest client built to
//! look like an ordinary desktop browser talking to the JSON API. All fetches
//! go through [`FetchSession::fetch_json`], which applies the response-code
//! policy, in priority order:
//!
//! | Condition | Action |
//! |-----------|--------|
//! | 200, parseable JSON | Success, return body |
//! | 200, unparseable body | Permanent, no retry, caller treats as empty |
//! | 404 (detail endpoints) | `Missing`, not an error |
//! | 403 / 429 | Sleep jittered backoff, retry |
//! | other 4xx / 5xx | Log, retry |
//! | transport error | Sleep short backoff, retry |
//! | attempts exhausted | `FetchError::Exhausted` |

use crate::config::FetchConfig;
use crate::fetch::rotation::{RotationContext, RotationError, RotationProvider};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, REFERER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Fixed pool of desktop User-Agent strings; one is chosen per session.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:139.0) Gecko/20100101 Firefox/139.0",
    "Opera/9.80 (Linux mips ; U; HbbTV/1.1.1 (; Philips; ; ; ; ) CE-HTML/1.0 NETTV/3.2.4; en) Presto/2.6.33 Version/10.70",
    "Mozilla/5.0 (Windows; U; Windows NT 6.0; de; rv:1.9.2.20) Gecko/20110803 Firefox/3.6.19",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36 OPR/77.0.4054.203",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36 OPR/121.0.0.0",
];

/// Errors from a fetch operation
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Gave up on {url} after {attempts} attempts")]
    Exhausted { url: String, attempts: u32 },
}

/// Result of a successful (non-exhausted) fetch
#[derive(Debug)]
pub enum FetchOutcome {
    /// 200 with a parseable JSON body
    Body(serde_json::Value),

    /// 200 whose body was not valid JSON; permanent, the caller treats the
    /// unit as empty rather than retrying
    Unparseable,

    /// 404 from the upstream; only meaningful on detail lookups, where it
    /// signals a listing removed between discovery and extraction
    Missing,
}

/// Retry policy for one class of fetches
///
/// Fields are public so tests can shrink the backoff ranges; production code
/// uses the [`RetryPolicy::search`] and [`RetryPolicy::detail`] constructors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before giving up with `FetchError::Exhausted`
    pub max_attempts: u32,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Jittered sleep range after a 403/429, in seconds
    pub rate_limit_backoff: (f64, f64),

    /// Jittered sleep range after a transport error, in seconds
    pub network_backoff: (f64, f64),

    /// Whether a 404 means "listing gone" rather than a retryable error
    pub missing_on_404: bool,
}

impl RetryPolicy {
    /// Policy for bulk search-page fetches
    pub fn search(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.search_max_attempts,
            request_timeout: Duration::from_millis(config.search_timeout_ms),
            rate_limit_backoff: (2.0, 5.0),
            network_backoff: (2.0, 3.0),
            missing_on_404: false,
        }
    }

    /// Policy for per-listing detail fetches
    pub fn detail(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.detail_max_attempts,
            request_timeout: Duration::from_millis(config.detail_timeout_ms),
            rate_limit_backoff: (1.0, 3.0),
            network_backoff: (1.0, 1.0),
            missing_on_404: true,
        }
    }

    /// Policy for the dispatcher's page-count probe: a single attempt, because
    /// the dispatcher rotates its whole session on failure instead of backing
    /// off in place
    pub fn probe(config: &FetchConfig) -> Self {
        Self {
            max_attempts: 1,
            request_timeout: Duration::from_millis(config.search_timeout_ms),
            rate_limit_backoff: (2.0, 5.0),
            network_backoff: (2.0, 3.0),
            missing_on_404: false,
        }
    }
}

/// A fetch session: one egress context plus one configured HTTP client
///
/// Sessions must be closed with [`FetchSession::close`] on every exit path so
/// the rotation context is handed back to the provider; dropping an unclosed
/// session logs a warning.
pub struct FetchSession<'p> {
    client: Client,
    context: Option<RotationContext>,
    provider: &'p dyn RotationProvider,
    regions: Vec<String>,
}

impl<'p> FetchSession<'p> {
    /// Acquires a new session
    ///
    /// Binds a rotation context to one randomly chosen region from the
    /// configured pool and builds a client with a randomly chosen User-Agent.
    /// Acquisition failure is fatal for the enclosing invocation.
    pub async fn acquire(
        provider: &'p dyn RotationProvider,
        config: &FetchConfig,
    ) -> Result<FetchSession<'p>, RotationError> {
        let region = pick_region(&config.regions);
        tracing::info!("Acquiring egress context in region {}", region);
        let context = provider.open(&region).await?;
        let client = build_client();

        Ok(Self {
            client,
            context: Some(context),
            provider,
            regions: config.regions.clone(),
        })
    }

    /// Region of the current rotation context
    pub fn region(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.region.as_str())
    }

    /// Releases the current context and acquires a fresh one
    ///
    /// Used by the dispatcher when a page-count probe keeps failing: a new
    /// region and a new User-Agent give the next attempt a clean identity.
    pub async fn rotate(&mut self) -> Result<(), RotationError> {
        if let Some(old) = self.context.take() {
            tracing::info!("Rotating egress context {} (region {})", old.id, old.region);
            self.provider.close(old).await?;
        }

        let region = pick_region(&self.regions);
        let context = self.provider.open(&region).await?;
        self.client = build_client();
        self.context = Some(context);
        Ok(())
    }

    /// Releases the rotation context
    ///
    /// Release failures are logged rather than propagated; by this point the
    /// invocation's real work is already committed or reported.
    pub async fn close(mut self) {
        if let Some(context) = self.context.take() {
            tracing::info!(
                "Releasing egress context {} (region {})",
                context.id,
                context.region
            );
            if let Err(e) = self.provider.close(context).await {
                tracing::warn!("Failed to release egress context: {}", e);
            }
        }
    }

    /// Fetches a URL expecting a JSON body, applying the retry policy
    pub async fn fetch_json(
        &self,
        url: &str,
        policy: &RetryPolicy,
    ) -> Result<FetchOutcome, FetchError> {
        let mut attempts = 0;

        while attempts < policy.max_attempts {
            attempts += 1;

            let response = match self
                .client
                .get(url)
                .timeout(policy.request_timeout)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Network error for {} (attempt {}): {}", url, attempts, e);
                    sleep_jittered(policy.network_backoff).await;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::OK {
                // Reading the body can still fail mid-stream; that counts as a
                // transport error, not a malformed payload.
                let text = match response.text().await {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!("Failed to read body from {}: {}", url, e);
                        sleep_jittered(policy.network_backoff).await;
                        continue;
                    }
                };

                match serde_json::from_str(&text) {
                    Ok(value) => return Ok(FetchOutcome::Body(value)),
                    Err(e) => {
                        tracing::warn!("Unparseable JSON body from {}: {}", url, e);
                        return Ok(FetchOutcome::Unparseable);
                    }
                }
            }

            if status == StatusCode::NOT_FOUND && policy.missing_on_404 {
                return Ok(FetchOutcome::Missing);
            }

            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(
                    "Rate limited on {} with status {} (attempt {})",
                    url,
                    status.as_u16(),
                    attempts
                );
                sleep_jittered(policy.rate_limit_backoff).await;
                continue;
            }

            tracing::warn!(
                "Failed {} with status {} (attempt {})",
                url,
                status.as_u16(),
                attempts
            );
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
        })
    }
}

impl Drop for FetchSession<'_> {
    fn drop(&mut self) {
        if let Some(context) = &self.context {
            tracing::warn!(
                "Fetch session dropped without release (context {}, region {})",
                context.id,
                context.region
            );
        }
    }
}

/// Builds the HTTP client for one session
///
/// Headers mimic a desktop browser hitting the public JSON API; the upstream
/// rejects obviously bot-shaped traffic.
fn build_client() -> Client {
    let user_agent = {
        let mut rng = rand::thread_rng();
        *USER_AGENTS.choose(&mut rng).expect("non-empty UA pool")
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
        .expect("client construction only fails on invalid TLS/header config")
}

fn pick_region(regions: &[String]) -> String {
    let mut rng = rand::thread_rng();
    regions
        .choose(&mut rng)
        .expect("validated non-empty region pool")
        .clone()
}

async fn sleep_jittered(range: (f64, f64)) {
    let secs = {
        let mut rng = rand::thread_rng();
        if range.0 >= range.1 {
            range.0
        } else {
            rng.gen_range(range.0..range.1)
        }
    };
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fetch_config() -> FetchConfig {
        FetchConfig::default()
    }

    #[test]
    fn test_search_policy() {
        let policy = RetryPolicy::search(&test_fetch_config());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.request_timeout, Duration::from_secs(10));
        assert_eq!(policy.rate_limit_backoff, (2.0, 5.0));
        assert!(!policy.missing_on_404);
    }

    #[test]
    fn test_detail_policy() {
        let policy = RetryPolicy::detail(&test_fetch_config());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.request_timeout, Duration::from_secs(5));
        assert_eq!(policy.rate_limit_backoff, (1.0, 3.0));
        assert!(policy.missing_on_404);
    }

    #[test]
    fn test_probe_policy_single_attempt() {
        let policy = RetryPolicy::probe(&test_fetch_config());
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_pick_region_from_pool() {
        let regions = vec!["eu-west-1".to_string(), "us-east-1".to_string()];
        for _ in 0..20 {
            let region = pick_region(&regions);
            assert!(regions.contains(&region));
        }
    }

    #[tokio::test]
    async fn test_session_close_releases_context() {
        use crate::fetch::DirectEgress;

        let provider = DirectEgress::new();
        let session = FetchSession::acquire(&provider, &test_fetch_config())
            .await
            .unwrap();
        assert!(session.region().is_some());
        session.close().await;
    }

    #[tokio::test]
    async fn test_session_rotate_changes_context() {
        use crate::fetch::DirectEgress;

        let provider = DirectEgress::new();
        let mut session = FetchSession::acquire(&provider, &test_fetch_config())
            .await
            .unwrap();
        let first = session.context.as_ref().unwrap().id;
        session.rotate().await.unwrap();
        let second = session.context.as_ref().unwrap().id;
        assert_ne!(first, second);
        session.close().await;
    }
}
