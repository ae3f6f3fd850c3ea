//! JSON-over-HTTP transport with bounded timeouts and retries.

use std::time::Duration;

use medgraph_shared::{MedGraphError, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("MedGraph/", env!("CARGO_PKG_VERSION"));

/// Base delay between retries; doubled on each attempt.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) struct Transport {
    client: Client,
    api_key: String,
    timeout_secs: u64,
    max_retries: u32,
    backoff: Duration,
    /// Stage name reported in timeout errors.
    stage: &'static str,
}

impl Transport {
    pub(crate) fn new(
        api_key: String,
        timeout_secs: u64,
        max_retries: u32,
        stage: &'static str,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MedGraphError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            timeout_secs,
            max_retries,
            backoff: DEFAULT_BACKOFF,
            stage,
        })
    }

    pub(crate) fn set_backoff(&mut self, backoff: Duration) {
        self.backoff = backoff;
    }

    /// POST `body` to `url`, retrying timeouts, connection failures, 429 and 5xx.
    pub(crate) async fn post_json<B, R>(&self, url: &Url, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            match self.post_once(url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        stage = self.stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<B, R>(&self, url: &Url, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(url, status, &detail));
        }

        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(stage = self.stage, bytes = text.len(), "provider response received");

        serde_json::from_str(&text).map_err(|e| {
            MedGraphError::Generation(format!("{url}: unexpected response body: {e}"))
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> MedGraphError {
        if e.is_timeout() {
            MedGraphError::timeout(self.stage, self.timeout_secs)
        } else {
            MedGraphError::Network(e.to_string())
        }
    }
}

fn status_error(url: &Url, status: StatusCode, detail: &str) -> MedGraphError {
    let detail: String = detail.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MedGraphError::config(format!("{url}: provider rejected credentials (HTTP {status})"))
        }
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            MedGraphError::Network(format!("{url}: HTTP {status}: {detail}"))
        }
        _ => MedGraphError::Generation(format!("{url}: HTTP {status}: {detail}")),
    }
}

/// Join an endpoint path onto a provider base URL, keeping any base path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    let joined = format!("{}/{}", base_url.trim_end_matches('/'), path);
    Url::parse(&joined)
        .map_err(|e| MedGraphError::config(format!("invalid provider URL '{joined}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        assert_eq!(
            endpoint("https://api.openai.com/v1", "embeddings")
                .unwrap()
                .as_str(),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            endpoint("https://api.deepseek.com/", "chat/completions")
                .unwrap()
                .as_str(),
            "https://api.deepseek.com/chat/completions"
        );
        assert!(endpoint("not a url", "x").is_err());
    }

    #[test]
    fn status_errors_classify_retryability() {
        let url = Url::parse("http://localhost/x").unwrap();
        assert!(status_error(&url, StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(&url, StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error(&url, StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(matches!(
            status_error(&url, StatusCode::UNAUTHORIZED, ""),
            MedGraphError::Config { .. }
        ));
    }
}
