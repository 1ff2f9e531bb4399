//! Error types for the proxy.
//!
//! Every failure that crosses the HTTP boundary is rendered as the
//! OpenAI-style envelope `{"error": {"code", "type", "message"}}`.

use axum::{
    Json,
    extract::rejection::BytesRejection,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use qrelay_oauth::OAuthError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `type` field of every error body.
pub const ERROR_TYPE: &str = "invalid_request_error";

/// Failure while handling a proxied request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No bearer token presented by the caller.
    #[error("missing access token")]
    MissingApiKey,

    /// Bearer token did not match the configured key.
    #[error("invalid access token or token expired")]
    InvalidApiKey,

    /// The request body could not be parsed far enough to route it.
    #[error("{0}")]
    MalformedRequest(String),

    /// The request body could not be read (over the size limit, or the
    /// connection failed mid-body).
    #[error("{0}")]
    BodyRejected(#[from] BytesRejection),

    /// No usable upstream credential (absent, or its refresh failed).
    #[error("upstream credential unavailable: {0}")]
    CredentialUnavailable(#[from] OAuthError),

    /// The upstream could not be reached at all.
    #[error("{0}")]
    UpstreamUnreachable(String),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

/// Server lifecycle error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code for programmatic handling.
    pub code: String,
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                error_type: ERROR_TYPE.to_string(),
                message: message.into(),
            },
        }
    }
}

impl ProxyError {
    /// HTTP status and machine code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ProxyError::MissingApiKey => (StatusCode::UNAUTHORIZED, "missing_api_key"),
            ProxyError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            ProxyError::MalformedRequest(_) => (StatusCode::BAD_REQUEST, "internal_server_error"),
            ProxyError::BodyRejected(rejection) => (rejection.status(), "internal_server_error"),
            ProxyError::CredentialUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error")
            }
            ProxyError::UpstreamUnreachable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "internal_server_error")
            }
            ProxyError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error"),
        }
    }

    /// Message placed in the response body.
    fn public_message(&self) -> String {
        match self {
            ProxyError::CredentialUnavailable(OAuthError::NoCredential) => {
                "no upstream credential available; re-authorize with 'qrelay auth login'"
                    .to_string()
            }
            ProxyError::CredentialUnavailable(OAuthError::RefreshFailed(_)) => {
                "upstream credential refresh failed; re-authorization required".to_string()
            }
            ProxyError::CredentialUnavailable(_) => "internal server error".to_string(),
            ProxyError::BodyRejected(rejection) => rejection.body_text(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let detail = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %detail, "Proxy error");
        } else {
            tracing::warn!(status = %status, code, error = %detail, "Client error");
        }

        let body = ErrorEnvelope::new(code, self.public_message());
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: ProxyError) -> (StatusCode, Option<HeaderValue>, ErrorEnvelope) {
        let response = err.into_response();
        let status = response.status();
        let challenge = response.headers().get(WWW_AUTHENTICATE).cloned();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, challenge, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_missing_api_key_envelope() {
        let (status, challenge, body) = render(ProxyError::MissingApiKey).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.unwrap(), "Bearer");
        assert_eq!(
            body,
            ErrorEnvelope::new("missing_api_key", "missing access token")
        );
        assert_eq!(body.error.error_type, "invalid_request_error");
    }

    #[tokio::test]
    async fn test_credential_errors_are_generic() {
        let (status, challenge, body) = render(ProxyError::CredentialUnavailable(
            OAuthError::RefreshFailed("code: invalid_grant".to_string()),
        ))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(challenge.is_none());
        assert_eq!(body.error.code, "internal_server_error");
        assert!(!body.error.message.contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_unreachable_passes_message_through() {
        let (status, _, body) =
            render(ProxyError::UpstreamUnreachable("connection refused".to_string())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error.message, "connection refused");
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ErrorEnvelope::new("invalid_api_key", "nope")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "error": {"code": "invalid_api_key", "type": "invalid_request_error", "message": "nope"}
            })
        );
    }
}
