//! Proxied endpoints.

use axum::{
    body::Bytes,
    extract::{OriginalUri, State, rejection::BytesRejection},
    http::{HeaderMap, Method, Uri},
    response::Response,
};

use crate::content_router::{RouteDecision, route_request};
use crate::error::ProxyError;
use crate::forward::InboundRequest;
use crate::state::AppState;

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// `POST /v1/chat/completions`: route on content, then forward.
pub async fn chat_completions_handler(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ProxyError> {
    let config = state.config();
    let routed = route_request(body?, &config.vision_model)?;

    if let RouteDecision::Rerouted { from } = &routed.decision {
        tracing::info!(
            from = from.as_deref().unwrap_or("<none>"),
            to = %config.vision_model,
            "Image content detected, rerouting to vision model"
        );
    }

    let request = InboundRequest {
        method,
        path_and_query: path_and_query(&uri),
        headers,
        body: routed.body,
    };
    state
        .forwarder
        .forward(request, config.chat_streaming)
        .await
}

/// `ANY /v1/{*path}`: forward without content routing.
pub async fn forward_handler(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ProxyError> {
    let request = InboundRequest {
        method,
        path_and_query: path_and_query(&uri),
        headers,
        body: body?,
    };
    state.forwarder.forward(request, false).await
}
