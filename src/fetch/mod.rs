//! Outbound fetch discipline
//!
//! Every request a scraper makes goes through a [`FetchClient`], which
//! enforces minimum inter-request spacing and a fixed retry/backoff schedule
//! with per-status failure classification:
//!
//! | Failure | Action |
//! |---------|--------|
//! | transport error / 5xx / unexpected status | retry with next backoff step |
//! | 403 | abort immediately, no retries |
//! | 401 / 429 | warm the session cookies, then retry (same schedule) |
//!
//! A single URL exhausting its schedule is never fatal to a cycle; callers
//! log the failure and continue with the remaining URLs.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.70 Safari/537.36";

/// Classified outcome of a fetch that did not produce a body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("hard block ({status}) fetching {url}")]
    Blocked { url: String, status: StatusCode },

    #[error("retries exhausted fetching {url}: {reason}")]
    Exhausted { url: String, reason: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        source: reqwest::Error,
    },
}

/// Fixed backoff schedule; one attempt per entry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: [0, 1, 2, 4].iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        assert!(!delays.is_empty(), "retry policy needs at least one attempt");
        Self { delays }
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    fn delay(&self, attempt: usize) -> Duration {
        self.delays[attempt]
    }
}

/// Minimum spacing between consecutive requests of one scraper instance.
///
/// Deliberately coarse: one throttle per scraper, not per host or target,
/// which keeps behavior predictable against anti-scraping defenses.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until this instance's next request slot, claiming it atomically.
    ///
    /// The slot is reserved under the lock and slept outside it, so
    /// concurrent callers are spaced `min_interval` apart instead of all
    /// waking at once.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let slot = match *last {
                Some(previous) => (previous + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

/// HTTP client bundling the rate limiter and retry policy for one scraper.
///
/// The underlying `reqwest::Client` keeps a cookie jar so a throttling
/// response can be answered with a session warm-up (HEAD to the origin)
/// before the next attempt.
pub struct FetchClient {
    client: Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(min_interval: Duration, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(min_interval),
            policy,
        })
    }

    /// Fetch a URL and return its body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get_with_retries(url).await?;
        response.text().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch a URL and deserialize its body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.get_with_retries(url).await?;
        response.json().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn get_with_retries(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let mut last_reason = String::from("no attempts made");

        for attempt in 0..self.policy.attempts() {
            let delay = self.policy.delay(attempt);
            if !delay.is_zero() {
                debug!(
                    "Sleeping {:?} before retry #{} for {}",
                    delay,
                    attempt + 1,
                    url
                );
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;

            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(error) => {
                    last_reason = error.to_string();
                    debug!("Transport error fetching {} (attempt {}): {}", url, attempt + 1, error);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::FORBIDDEN {
                warn!("Hard block ({}) fetching {}; skipping further retries.", status, url);
                return Err(FetchError::Blocked {
                    url: url.to_string(),
                    status,
                });
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    "Throttled ({}) fetching {} (attempt {}/{})",
                    status,
                    url,
                    attempt + 1,
                    self.policy.attempts()
                );
                self.refresh_session(url).await;
                last_reason = format!("status {status}");
                continue;
            }

            last_reason = format!("status {status}");
            debug!("Unexpected status {} fetching {} (attempt {})", status, url, attempt + 1);
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            reason: last_reason,
        })
    }

    /// Warm the session cookies with a HEAD request to the URL's origin.
    ///
    /// Best-effort: a failed warm-up only means the next retry goes out with
    /// the cookies it already has.
    async fn refresh_session(&self, url: &str) {
        let origin = match Url::parse(url) {
            Ok(parsed) => format!(
                "{}://{}/",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default()
            ),
            Err(_) => return,
        };

        debug!("Warming session cookies via HEAD {}", origin);
        if let Err(error) = self.client.head(&origin).send().await {
            debug!("Session warm-up failed for {}: {}", origin, error);
        }
    }
}
