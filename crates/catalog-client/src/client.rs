//! HTTP client core with retry logic shared by every collaborator adapter.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::ApiError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    policies::ExponentialBackoff, RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use std::sync::Arc;

/// JSON-over-HTTP client for one collaborator service.
///
/// Idempotent methods (GET, PUT, DELETE) are retried with exponential backoff;
/// POST requests are sent exactly once so a retried create never runs twice.
pub struct ServiceClient {
    http: ClientWithMiddleware,
    http_once: ClientWithMiddleware,
    config: ClientConfig,
}

impl ServiceClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("viewsync-client")),
        );

        if let Some(ref api_key) = config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|_| ClientError::Config("Invalid API key format".to_string()))?,
            );
        }

        let reqwest_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(config.retry_initial_delay, config.retry_max_delay)
            .build_with_max_retries(config.max_retries);

        let http = ClientBuilder::new(reqwest_client.clone())
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransientRetryStrategy,
            ))
            .build();
        let http_once = ClientBuilder::new(reqwest_client).build();

        Ok(Self {
            http,
            http_once,
            config,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Perform a GET request and deserialize the response.
    pub async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.send(Method::GET, path, Option::<()>::None).await?;
        Self::parse(&body)
    }

    /// Perform a POST request and deserialize the response.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let body = self.send(Method::POST, path, Some(body)).await?;
        Self::parse(&body)
    }

    /// Perform a request whose response body is ignored.
    pub async fn execute<B: serde::Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<()> {
        self.send(method, path, body).await?;
        Ok(())
    }

    fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|e| {
            ClientError::InvalidResponse(format!(
                "Failed to parse response: {} (body: {})",
                e,
                String::from_utf8_lossy(body)
            ))
        })
    }

    /// Perform an HTTP request with optional body and return the raw success body.
    async fn send<B: serde::Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let start = std::time::Instant::now();

        tracing::debug!(
            method = %method,
            path = %path,
            "Sending request"
        );

        let http = if method == Method::POST {
            &self.http_once
        } else {
            &self.http
        };

        let request = if let Some(ref b) = body {
            let json_body = serde_json::to_vec(b)?;
            http.request(method.clone(), &url).body(json_body)
        } else {
            http.request(method.clone(), &url)
        };

        let response = request.send().await?;
        let status = response.status();
        let duration = start.elapsed();

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        tracing::debug!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            request_id = ?request_id,
            "Received response"
        );

        if status.is_success() {
            return Ok(response.bytes().await?.to_vec());
        }

        let retry_after = Self::parse_retry_after(response.headers());
        let error_body = response.bytes().await.ok();
        let api_error: Option<ApiError> = error_body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok());

        let request_id = api_error
            .as_ref()
            .and_then(|e| e.request_id.clone())
            .or(request_id);

        let err = match api_error {
            Some(api) if !api.code.is_empty() && status != StatusCode::TOO_MANY_REQUESTS => {
                ClientError::Api {
                    status: status.as_u16(),
                    code: api.code,
                    description: api.description,
                    cause: api.cause,
                    request_id,
                }
            }
            _ => {
                let message = error_body
                    .map(|b| String::from_utf8_lossy(&b).to_string())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| status.to_string());
                Self::status_to_error(status, message, request_id, retry_after)
            }
        };

        tracing::warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            request_id = ?err.request_id(),
            error = %err,
            "Request failed"
        );

        Err(err)
    }

    /// Convert HTTP status to appropriate error type.
    fn status_to_error(
        status: StatusCode,
        message: String,
        request_id: Option<String>,
        retry_after: Option<std::time::Duration>,
    ) -> ClientError {
        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
            StatusCode::FORBIDDEN => ClientError::Forbidden(message),
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited {
                retry_after,
                request_id,
            },
            _ => ClientError::ServerError {
                status: status.as_u16(),
                message,
                request_id,
            },
        }
    }

    /// Parse the Retry-After header value into a Duration.
    ///
    /// Supports both formats per RFC 7231:
    /// - Seconds: "120" -> Duration::from_secs(120)
    /// - HTTP-date: "Fri, 31 Dec 2024 23:59:59 GMT" -> Duration until that time
    fn parse_retry_after(headers: &HeaderMap) -> Option<std::time::Duration> {
        let header_value = headers.get("retry-after")?.to_str().ok()?;

        if let Ok(seconds) = header_value.parse::<u64>() {
            return Some(std::time::Duration::from_secs(seconds));
        }

        if let Ok(date) = httpdate::parse_http_date(header_value) {
            let now = std::time::SystemTime::now();
            if let Ok(duration) = date.duration_since(now) {
                return Some(duration);
            }
            return Some(std::time::Duration::ZERO);
        }

        None
    }
}

/// Retry strategy for idempotent requests.
///
/// Retries on:
/// - Transient network errors
/// - 5xx server errors
/// - 429 rate limiting
///
/// Does NOT retry:
/// - 4xx client errors (except 429)
struct TransientRetryStrategy;

impl RetryableStrategy for TransientRetryStrategy {
    fn handle(&self, res: &reqwest_middleware::Result<reqwest::Response>) -> Option<Retryable> {
        match res {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Some(Retryable::Transient)
                } else if status.is_success() {
                    None
                } else {
                    Some(Retryable::Fatal)
                }
            }
            Err(error) => {
                if error.is_timeout() || error.is_connect() {
                    Some(Retryable::Transient)
                } else {
                    Some(Retryable::Fatal)
                }
            }
        }
    }
}

/// Arc-wrapped client for shared ownership.
pub type SharedClient = Arc<ServiceClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_client_rejects_invalid_config() {
        let config = ClientConfig {
            base_url: String::new(),
            ..Default::default()
        };
        assert!(ServiceClient::new(config).is_err());
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(
            ServiceClient::parse_retry_after(&headers),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_parse_retry_after_missing_or_invalid() {
        let headers = HeaderMap::new();
        assert_eq!(ServiceClient::parse_retry_after(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("not-a-number"));
        assert_eq!(ServiceClient::parse_retry_after(&headers), None);
    }

    #[test]
    fn test_status_to_error() {
        let err = ServiceClient::status_to_error(
            StatusCode::BAD_GATEWAY,
            "upstream".into(),
            Some("req-1".into()),
            None,
        );
        assert!(err.is_retryable());
        assert_eq!(err.request_id(), Some("req-1"));

        let err =
            ServiceClient::status_to_error(StatusCode::NOT_FOUND, "missing".into(), None, None);
        assert!(matches!(err, ClientError::NotFound(_)));
    }
}
