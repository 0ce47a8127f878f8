//! HTTP client wrapper with retry logic and rate limiting.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::rate_limit::TokenBucket;
use crate::application::ports::{HttpMethod, HttpResponse, HttpTransport};
use crate::error::{StreamError, StreamResult};
use crate::infrastructure::config::{ClientConfig, Credentials, HttpSettings};
use crate::infrastructure::metrics;

/// REST client for the brokerage API.
///
/// Signs every request with the bearer token, paces requests through a
/// token bucket, and retries network failures, 408, 429 and 5xx with
/// exponential backoff. A non-retryable status is returned as a normal
/// response.
#[derive(Debug)]
pub struct TradierHttpClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    settings: HttpSettings,
    limiter: TokenBucket,
}

impl TradierHttpClient {
    /// Create a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the access token is empty and `Network` if the
    /// underlying client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        settings: HttpSettings,
    ) -> StreamResult<Self> {
        if credentials.access_token().is_empty() {
            return Err(StreamError::Validation("access token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StreamError::Network(e.to_string()))?;

        let limiter = TokenBucket::new(settings.rate_limit_burst, settings.rate_limit_per_second);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            settings,
            limiter,
        })
    }

    /// Create a client from the full client configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn from_config(config: &ClientConfig) -> StreamResult<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.credentials.clone(),
            config.http.clone(),
        )
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_once(
        &self,
        method: HttpMethod,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HttpResponse, reqwest::Error> {
        let request = match method {
            HttpMethod::Get => self.client.get(url).query(params),
            HttpMethod::Post => self.client.post(url).form(params),
            HttpMethod::Delete => self.client.delete(url).query(params),
        };

        let response = request
            .bearer_auth(self.credentials.access_token())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

#[async_trait]
impl HttpTransport for TradierHttpClient {
    async fn perform(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(String, String)],
    ) -> StreamResult<HttpResponse> {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = ExponentialBackoff::new(&self.settings);
        let mut last_response: Option<HttpResponse> = None;

        loop {
            self.limiter.acquire().await;

            let response = match self.send_once(method, &url, params).await {
                Ok(response) => response,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            error = %e,
                            method = method.as_str(),
                            path,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return last_response.ok_or_else(|| StreamError::Network(e.to_string()));
                }
            };

            metrics::record_http_request(method.as_str(), response.status);

            let delay = match categorize_status(response.status) {
                StatusCategory::Final => return Ok(response),
                StatusCategory::RateLimited => backoff
                    .next_backoff()
                    .map(|computed| retry_after(&response).unwrap_or(computed)),
                StatusCategory::Retryable => backoff.next_backoff(),
            };

            let Some(delay) = delay else {
                tracing::warn!(
                    status = response.status,
                    method = method.as_str(),
                    path,
                    attempts = backoff.attempt,
                    "Retries exhausted"
                );
                return Ok(response);
            };

            tracing::warn!(
                status = response.status,
                method = method.as_str(),
                path,
                delay_ms = delay.as_millis(),
                attempt = backoff.attempt,
                "Retryable status, retrying"
            );
            last_response = Some(response);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Status category for determining retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusCategory {
    RateLimited,
    Retryable,
    Final,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: u16) -> StatusCategory {
    match status {
        429 => StatusCategory::RateLimited,
        408 | 500..=599 => StatusCategory::Retryable,
        _ => StatusCategory::Final,
    }
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_retries: u32,
    current_backoff: Duration,
    max_backoff: Duration,
}

impl ExponentialBackoff {
    const MULTIPLIER: f64 = 2.0;

    const fn new(settings: &HttpSettings) -> Self {
        Self {
            attempt: 0,
            max_retries: settings.max_retries,
            current_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * Self::MULTIPLIER)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(200, StatusCategory::Final)]
    #[test_case(401, StatusCategory::Final)]
    #[test_case(404, StatusCategory::Final)]
    #[test_case(408, StatusCategory::Retryable)]
    #[test_case(429, StatusCategory::RateLimited)]
    #[test_case(500, StatusCategory::Retryable)]
    #[test_case(503, StatusCategory::Retryable)]
    fn categorize(status: u16, expected: StatusCategory) {
        assert_eq!(categorize_status(status), expected);
    }

    #[test]
    fn exponential_backoff_increments() {
        let settings = HttpSettings {
            max_retries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            ..HttpSettings::default()
        };

        let mut backoff = ExponentialBackoff::new(&settings);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let settings = HttpSettings {
            max_retries: 10,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(5),
            ..HttpSettings::default()
        };

        let mut backoff = ExponentialBackoff::new(&settings);
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_retries_never_backs_off() {
        let settings = HttpSettings {
            max_retries: 0,
            ..HttpSettings::default()
        };
        assert!(ExponentialBackoff::new(&settings).next_backoff().is_none());
    }

    #[test]
    fn retry_after_header_parsing() {
        let mut response = HttpResponse::new(429, "");
        assert!(retry_after(&response).is_none());

        response
            .headers
            .insert("retry-after".to_string(), "3".to_string());
        assert_eq!(retry_after(&response), Some(Duration::from_secs(3)));
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = TradierHttpClient::new(
            "https://sandbox.tradier.com",
            Credentials::new(String::new()),
            HttpSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = TradierHttpClient::new(
            "https://sandbox.tradier.com/",
            Credentials::new("t".to_string()),
            HttpSettings::default(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://sandbox.tradier.com");
    }
}
