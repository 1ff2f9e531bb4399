//! Caller authentication.
//!
//! Every `/v1` request must carry `Authorization: Bearer <api_key>`. The key
//! is compared in constant time.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ProxyError;
use crate::state::AppState;

const BEARER_PREFIX: &str = "Bearer ";

/// Compare two strings in constant time.
///
/// A length mismatch still performs a comparison of equal cost before
/// returning false.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

/// Authentication middleware.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ProxyError> {
    validate_request(&request, &state.config().api_key)?;
    Ok(next.run(request).await)
}

/// Check the caller's bearer token against `expected`.
fn validate_request(request: &Request<Body>, expected: &str) -> Result<(), ProxyError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .ok_or(ProxyError::MissingApiKey)?;

    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ProxyError::InvalidApiKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        Router,
        http::{StatusCode, header::WWW_AUTHENTICATE},
        middleware,
        routing::get,
    };
    use qrelay_oauth::{DeviceAuthenticator, MemoryCredentialStore, OAuthConfig, TokenManager};
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::error::ErrorEnvelope;

    fn test_router(api_key: &str) -> Router {
        let tokens = Arc::new(TokenManager::new(
            Arc::new(MemoryCredentialStore::new()),
            DeviceAuthenticator::new(OAuthConfig::default()),
        ));
        let state = AppState::new(ServerConfig::new(api_key), tokens);

        Router::new()
            .route("/v1/protected", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    async fn call(router: Router, auth: Option<&str>) -> (StatusCode, Option<String>, Vec<u8>) {
        let mut builder = Request::builder().uri("/v1/protected");
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, challenge, body.to_vec())
    }

    fn code(body: &[u8]) -> String {
        serde_json::from_slice::<ErrorEnvelope>(body).unwrap().error.code
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("hello", "hell"));
        assert!(constant_time_eq("", ""));
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let (status, challenge, body) = call(test_router("secret"), Some("Bearer secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(challenge.is_none());
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_missing_header() {
        let (status, challenge, body) = call(test_router("secret"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.as_deref(), Some("Bearer"));
        assert_eq!(code(&body), "missing_api_key");
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_missing() {
        let (status, _, body) = call(test_router("secret"), Some("Basic c2VjcmV0")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code(&body), "missing_api_key");
    }

    #[tokio::test]
    async fn test_wrong_token() {
        let (status, challenge, body) = call(test_router("secret"), Some("Bearer nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.as_deref(), Some("Bearer"));
        assert_eq!(code(&body), "invalid_api_key");
    }
}
