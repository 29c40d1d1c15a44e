//! Error types for the collaborator service clients.

use std::time::Duration;
use viewsync_catalog_core::GatewayError;

/// Errors that can occur when calling a collaborator service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request was built incorrectly
    #[error("HTTP request error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// The service rejected the request with a structured error body
    #[error("{code}: {description} (HTTP {status})")]
    Api {
        /// HTTP status code
        status: u16,
        /// Machine-readable error code from the service
        code: String,
        /// Human-readable message from the service
        description: String,
        /// Underlying detail from the service
        cause: String,
        /// Request ID for tracking
        request_id: Option<String>,
    },

    /// Resource not found (404) without a structured body
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication failed (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Permission denied (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Rate limited (429)
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Optional retry-after duration from server
        retry_after: Option<Duration>,
        /// Request ID for tracking
        request_id: Option<String>,
    },

    /// Server error (5xx)
    #[error("Server error ({status}): {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Error message from server
        message: String,
        /// Request ID for tracking
        request_id: Option<String>,
    },

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } => true,
            ClientError::ServerError { status, .. } => *status >= 500,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientError::RateLimited { request_id, .. } => request_id.as_deref(),
            ClientError::ServerError { request_id, .. } => request_id.as_deref(),
            ClientError::Api { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Stable code used when the error is surfaced as a [`GatewayError`].
    pub fn code(&self) -> &str {
        match self {
            ClientError::Http(_) | ClientError::HttpMiddleware(_) => "Transport",
            ClientError::Api { code, .. } => code,
            ClientError::NotFound(_) => "NotFound",
            ClientError::Unauthorized(_) => "Unauthorized",
            ClientError::Forbidden(_) => "Forbidden",
            ClientError::RateLimited { .. } => "RateLimited",
            ClientError::ServerError { .. } => "ServerError",
            ClientError::InvalidResponse(_) | ClientError::Serialization(_) => "InvalidResponse",
            ClientError::Config(_) => "Config",
        }
    }
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api {
                code,
                description,
                cause,
                ..
            } => GatewayError {
                code,
                description,
                cause,
            },
            other => GatewayError::new(other.code().to_string(), other.to_string()),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
