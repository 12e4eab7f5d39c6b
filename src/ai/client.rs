use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use reqwest_eventsource::{CannotCloneRequestError, Event as SseEvent, EventSource};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use crate::utils::{parse_retry_after, TtlCache};

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const WARN_DEDUP_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rate limited after {0} retries")]
    RateLimited(u32),
    #[error("gateway returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("gateway stream failed: {0}")]
    Stream(#[from] reqwest_eventsource::Error),
    #[error("gateway request could not be built: {0}")]
    Request(#[from] CannotCloneRequestError),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, dotenv::Error> {
        Ok(Self {
            base_url: dotenv::var("GATEWAY_BASE_URL")?,
            api_key: dotenv::var("GATEWAY_API_KEY")?,
        })
    }
}

/// HTTP surface to the hosted model gateway. The only transparent retry in
/// the system lives here: 429s are retried up to 3 times, honoring
/// `Retry-After` capped at 60s, warning once per request key inside a TTL
/// window.
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
    warned: Mutex<TtlCache<String>>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            warned: Mutex::new(TtlCache::new(WARN_DEDUP_TTL)),
        }
    }

    fn stream_request(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.config.base_url, path))
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body.to_string())
    }

    /// Open an SSE stream, consuming the initial `Open` event. 429s on the
    /// opening request are retried with the bounded policy; any other
    /// non-success status surfaces as an error without retrying.
    pub async fn open_stream(&self, path: &str, body: &Value) -> Result<EventSource, GatewayError> {
        let mut attempt = 0u32;
        loop {
            let mut source = EventSource::new(self.stream_request(path, body))?;
            match source.next().await {
                Some(Ok(SseEvent::Open)) => return Ok(source),
                Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)))
                    if status == StatusCode::TOO_MANY_REQUESTS =>
                {
                    if attempt >= MAX_RATE_LIMIT_RETRIES {
                        return Err(GatewayError::RateLimited(attempt));
                    }
                    let delay = parse_retry_after(response.headers().get(RETRY_AFTER))
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt))
                        .min(MAX_RETRY_DELAY);
                    self.warn_rate_limited(path, delay).await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(GatewayError::Status { status, body: text });
                }
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(SseEvent::Message(_))) | None => {
                    return Err(GatewayError::Status {
                        status: StatusCode::BAD_GATEWAY,
                        body: "stream ended before open".to_string(),
                    })
                }
            }
        }
    }

    async fn warn_rate_limited(&self, path: &str, delay: Duration) {
        let mut warned = self.warned.lock().await;
        if warned.first_seen(path.to_string()) {
            tracing::warn!(
                "gateway rate limited on {}, retrying in {:?}",
                path,
                delay
            );
        }
    }

    fn bearer(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_reads_process_environment() {
        std::env::set_var("GATEWAY_BASE_URL", "http://localhost:8789");
        std::env::set_var("GATEWAY_API_KEY", "test-key");
        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.base_url, "http://localhost:8789");
        assert_eq!(config.api_key, "test-key");
    }

    #[test]
    fn retry_delay_is_capped() {
        use reqwest::header::HeaderValue;
        let v = HeaderValue::from_static("3600");
        let delay = parse_retry_after(Some(&v)).unwrap().min(MAX_RETRY_DELAY);
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn backoff_without_header_grows() {
        let delays: Vec<Duration> = (0..3u32)
            .map(|attempt| Duration::from_secs(1 << attempt).min(MAX_RETRY_DELAY))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }
}
