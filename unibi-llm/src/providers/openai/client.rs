//! OpenAI-compatible HTTP client with rate limiting

use super::types::ApiError;
use crate::providers::{invalid_response, rate_limited, request_failed};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use unibi_core::ProviderError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";

/// Sliding-window request budget: at most `limit` requests start within any
/// `window`.
#[derive(Debug)]
pub struct RequestBudget {
    limit: usize,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl RequestBudget {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            limit,
            window,
            started: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Wait until a request may start and record it.
    pub async fn acquire(&self) {
        loop {
            let mut started = self.started.lock().await;
            let now = Instant::now();
            while started
                .front()
                .is_some_and(|at| now.duration_since(*at) >= self.window)
            {
                started.pop_front();
            }
            if started.len() < self.limit {
                started.push_back(now);
                return;
            }
            let wait = match started.front() {
                Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                None => Duration::ZERO,
            };
            drop(started);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Chat-completions API client with a per-minute request budget.
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    budget: RequestBudget,
}

impl OpenAIClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key` - API key sent as a bearer token
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            budget: RequestBudget::per_minute(requests_per_minute),
        }
    }

    /// Point the client at another compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make an API request once the request budget allows it.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Req,
    ) -> Result<Res, ProviderError> {
        self.budget.acquire().await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| invalid_response(PROVIDER, format!("Failed to parse response: {}", e)));
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
            Ok(api_error) => api_error.error.message,
            Err(_) => error_text,
        };

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => rate_limited(PROVIDER, retry_after_ms),
            _ => request_failed(PROVIDER, status.as_u16(), error_msg),
        })
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0) as i64)
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1500));
    }

    #[tokio::test]
    async fn test_budget_waits_for_window_to_slide() {
        let budget = RequestBudget::new(2, Duration::from_millis(100));
        let start = Instant::now();
        budget.acquire().await;
        budget.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));

        budget.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAIClient::new("sk-secret", 60)
            .with_base_url("https://dashscope.example.com/compatible-mode/v1/");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
        assert_eq!(client.base_url(), "https://dashscope.example.com/compatible-mode/v1");
    }
}
