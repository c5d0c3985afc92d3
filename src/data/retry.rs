//! Backoff for remote properties and bounds fetches.

use anyhow::Result;
use rand::Rng;
use serde_json::json;
use std::fmt;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_str, Category, Level};

/// Failure that another attempt cannot fix, e.g. a 404. Wrap it in the
/// anyhow error to stop `retry_async` early.
#[derive(Debug)]
pub struct Permanent(pub String);

impl fmt::Display for Permanent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Permanent {}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: 0.3,
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = doubled.min(self.max_delay_ms) as f64;
        let spread = capped * self.jitter;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + offset).max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retries are
/// used up. The last error is returned.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= config.max_retries || err.downcast_ref::<Permanent>().is_some() {
            return Err(err);
        }
        let delay = config.backoff(attempt);
        attempt += 1;
        log(
            Level::Warn,
            Category::Source,
            "retry",
            obj(&[
                ("operation", v_str(name)),
                ("attempt", json!(attempt)),
                ("of", json!(config.max_retries)),
                ("error", v_str(&err.to_string())),
                ("delay_ms", json!(delay.as_millis() as u64)),
            ]),
        );
        sleep(delay).await;
    }
}

/// Timeouts, throttling and gateway errors.
pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
