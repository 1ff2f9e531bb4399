//! Forwarding engine.
//!
//! Maps an inbound request onto the credential's upstream, injects the
//! upstream bearer token and relays the answer. An upstream 401 triggers one
//! forced refresh and exactly one retry.

use axum::{
    body::{Body, Bytes},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT},
    },
    response::Response,
};
use qrelay_oauth::{Credential, SharedTokenManager};
use reqwest::Client;

use crate::config::ForwardConfig;
use crate::error::ProxyError;
use crate::relay::relay_lines;

const EVENT_STREAM: &str = "text/event-stream";

/// Headers that describe a single connection and are never copied.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The parts of a caller's request that are sent upstream.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path plus optional `?query`, exactly as received.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Result of one upstream attempt.
#[derive(Debug)]
pub enum UpstreamOutcome {
    /// Any status other than 401; relayed as-is.
    Success(reqwest::Response),
    /// The upstream rejected the bearer token.
    AuthRejected(reqwest::Response),
    /// No response at all.
    Failed(String),
}

impl UpstreamOutcome {
    /// Classify the result of sending a request.
    pub fn classify(result: Result<reqwest::Response, reqwest::Error>) -> Self {
        match result {
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                UpstreamOutcome::AuthRejected(response)
            }
            Ok(response) => UpstreamOutcome::Success(response),
            Err(e) => UpstreamOutcome::Failed(e.to_string()),
        }
    }
}

/// Sends caller requests upstream with the managed credential.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    tokens: SharedTokenManager,
    config: ForwardConfig,
}

impl Forwarder {
    pub fn new(tokens: SharedTokenManager, config: ForwardConfig) -> Self {
        Self {
            client: Client::new(),
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    /// Forward `request` and build the caller's response.
    ///
    /// `streaming` routes are sent without a timeout; others use the
    /// configured bound.
    pub async fn forward(
        &self,
        request: InboundRequest,
        streaming: bool,
    ) -> Result<Response, ProxyError> {
        let credential = self.tokens.get_credential().await?;

        let rejected = match self.send(&request, &credential, streaming, 1).await? {
            UpstreamOutcome::Success(response) => return Ok(self.relay(response)),
            UpstreamOutcome::Failed(detail) => return Err(ProxyError::UpstreamUnreachable(detail)),
            UpstreamOutcome::AuthRejected(response) => response,
        };
        drop(rejected);

        let refreshed = self.tokens.refresh(&credential).await?;

        match self.send(&request, &refreshed, streaming, 2).await? {
            UpstreamOutcome::Success(response) => Ok(self.relay(response)),
            UpstreamOutcome::AuthRejected(response) => {
                tracing::warn!("Upstream rejected refreshed credential, giving up");
                Ok(self.relay(response))
            }
            UpstreamOutcome::Failed(detail) => Err(ProxyError::UpstreamUnreachable(detail)),
        }
    }

    async fn send(
        &self,
        request: &InboundRequest,
        credential: &Credential,
        streaming: bool,
        attempt: u32,
    ) -> Result<UpstreamOutcome, ProxyError> {
        let url = upstream_url(credential, &request.path_and_query);
        let headers = self.upstream_headers(&request.headers, credential)?;

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .body(request.body.clone());
        if !streaming {
            builder = builder.timeout(self.config.upstream_timeout);
        }

        let outcome = UpstreamOutcome::classify(builder.send().await);
        match &outcome {
            UpstreamOutcome::Success(r) | UpstreamOutcome::AuthRejected(r) => {
                tracing::info!(method = %request.method, url = %url, status = %r.status(), attempt, "Forwarded request");
            }
            UpstreamOutcome::Failed(detail) => {
                tracing::warn!(method = %request.method, url = %url, attempt, error = %detail, "Upstream unreachable");
            }
        }
        Ok(outcome)
    }

    /// Caller headers with identification and authorization overridden.
    fn upstream_headers(
        &self,
        inbound: &HeaderMap,
        credential: &Credential,
    ) -> Result<HeaderMap, ProxyError> {
        let mut headers = HeaderMap::new();
        copy_headers(inbound, &mut headers);

        let user_agent = HeaderValue::from_str(&self.config.user_agent)
            .map_err(|e| ProxyError::Internal(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, user_agent);

        let mut bearer = HeaderValue::from_str(&credential.bearer())
            .map_err(|_| ProxyError::Internal("credential is not a valid header value".into()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        Ok(headers)
    }

    /// Turn the upstream response into the caller's response.
    fn relay(&self, upstream: reqwest::Response) -> Response {
        let status = upstream.status();
        let line_relay = is_event_stream(upstream.headers());

        let mut headers = HeaderMap::new();
        copy_headers(upstream.headers(), &mut headers);

        let body = if line_relay {
            Body::from_stream(relay_lines(
                upstream.bytes_stream(),
                self.config.dedupe_stream_lines,
            ))
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Upstream URL for a credential and the caller's path and query.
pub fn upstream_url(credential: &Credential, path_and_query: &str) -> String {
    format!("{}{}", credential.base_url(), path_and_query)
}

/// Copy every header except hop-by-hop ones, `host` and `content-length`.
pub fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if is_connection_header(name) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

fn is_connection_header(name: &HeaderName) -> bool {
    *name == HOST || *name == CONTENT_LENGTH || HOP_BY_HOP.contains(&name.as_str())
}

/// An unencoded `text/event-stream` body.
fn is_event_stream(headers: &HeaderMap) -> bool {
    let event_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with(EVENT_STREAM));
    let encoded = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"));
    event_stream && !encoded
}
