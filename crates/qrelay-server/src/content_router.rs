//! Content-based model routing for chat completions.
//!
//! A chat request whose messages carry an `image_url` part is redirected to the
//! vision model. Only the `model` field is touched; everything else, including
//! fields this proxy knows nothing about, survives in its original order.

use axum::body::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::error::ProxyError;

/// Content part type that marks a request as needing the vision model.
pub const IMAGE_PART_TYPE: &str = "image_url";

/// Why a chat payload could not be routed.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid request body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid request body: expected a JSON object")]
    NotAnObject,

    #[error("invalid request body: 'messages' must be an array")]
    MessagesNotArray,
}

impl From<RouteError> for ProxyError {
    fn from(err: RouteError) -> Self {
        ProxyError::MalformedRequest(err.to_string())
    }
}

/// What the router did to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Unchanged,
    /// `model` was replaced; `from` is the caller's original value, if any.
    Rerouted { from: Option<String> },
}

/// A payload ready to be forwarded.
#[derive(Debug, Clone)]
pub struct RoutedRequest {
    pub body: Bytes,
    pub decision: RouteDecision,
}

/// Inspect a chat payload and rewrite `model` if it carries an image.
///
/// When nothing changes, the original bytes are returned untouched.
pub fn route_request(body: Bytes, vision_model: &str) -> Result<RoutedRequest, RouteError> {
    let mut payload: Value = serde_json::from_slice(&body)?;
    let object = payload.as_object_mut().ok_or(RouteError::NotAnObject)?;

    let needs_vision = match object.get("messages") {
        None | Some(Value::Null) => false,
        Some(Value::Array(messages)) => has_image(messages),
        Some(_) => return Err(RouteError::MessagesNotArray),
    };

    let current = object.get("model").and_then(Value::as_str);
    if !needs_vision || current == Some(vision_model) {
        return Ok(RoutedRequest {
            body,
            decision: RouteDecision::Unchanged,
        });
    }

    let from = current.map(str::to_string);
    object.insert("model".to_string(), Value::String(vision_model.to_string()));

    Ok(RoutedRequest {
        body: Bytes::from(serde_json::to_vec(&payload)?),
        decision: RouteDecision::Rerouted { from },
    })
}

/// Whether any message has an array `content` holding an image part.
pub fn has_image(messages: &[Value]) -> bool {
    messages
        .iter()
        .filter_map(|m| m.get("content").and_then(Value::as_array))
        .flatten()
        .any(|part| part.get("type").and_then(Value::as_str) == Some(IMAGE_PART_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(value: Value) -> RoutedRequest {
        route_request(Bytes::from(value.to_string()), "vision-model").unwrap()
    }

    #[test]
    fn test_text_only_is_unchanged_byte_for_byte() {
        let raw = Bytes::from_static(
            br#"{"model": "coder-model",  "messages": [{"role":"user","content":"hi"}]}"#,
        );
        let routed = route_request(raw.clone(), "vision-model").unwrap();
        assert_eq!(routed.decision, RouteDecision::Unchanged);
        assert_eq!(routed.body, raw);
    }

    #[test]
    fn test_image_part_rewrites_model_and_keeps_fields() {
        let routed = route(json!({
            "model": "coder-model",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]
            }],
            "temperature": 0.2,
            "stream": true,
            "x_vendor_extension": {"nested": [1, 2, 3]}
        }));

        assert_eq!(
            routed.decision,
            RouteDecision::Rerouted {
                from: Some("coder-model".to_string())
            }
        );

        let out: Value = serde_json::from_slice(&routed.body).unwrap();
        assert_eq!(out["model"], "vision-model");
        assert_eq!(out["temperature"], 0.2);
        assert_eq!(out["stream"], true);
        assert_eq!(out["x_vendor_extension"], json!({"nested": [1, 2, 3]}));
        assert_eq!(
            out["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );

        // Field order is preserved.
        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            ["model", "messages", "temperature", "stream", "x_vendor_extension"]
        );
    }

    #[test]
    fn test_already_vision_model_is_unchanged() {
        let routed = route(json!({
            "model": "vision-model",
            "messages": [{"role": "user", "content": [{"type": "image_url", "image_url": {"url": "x"}}]}]
        }));
        assert_eq!(routed.decision, RouteDecision::Unchanged);
    }

    #[test]
    fn test_missing_model_gets_vision_model() {
        let routed = route(json!({
            "messages": [{"role": "user", "content": [{"type": "image_url", "image_url": {"url": "x"}}]}]
        }));
        assert_eq!(routed.decision, RouteDecision::Rerouted { from: None });
        let out: Value = serde_json::from_slice(&routed.body).unwrap();
        assert_eq!(out["model"], "vision-model");
    }

    #[test]
    fn test_unknown_part_types_are_ignored() {
        let routed = route(json!({
            "model": "coder-model",
            "messages": [{"role": "user", "content": [{"type": "input_audio"}, {"text": "no type"}]}]
        }));
        assert_eq!(routed.decision, RouteDecision::Unchanged);
    }

    #[test]
    fn test_image_in_later_message() {
        let routed = route(json!({
            "model": "coder-model",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "assistant", "content": null},
                {"role": "user", "content": [{"type": "image_url", "image_url": {"url": "x"}}]}
            ]
        }));
        assert!(matches!(routed.decision, RouteDecision::Rerouted { .. }));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            route_request(Bytes::from_static(b"{not json"), "vision-model"),
            Err(RouteError::InvalidJson(_))
        ));
        assert!(matches!(
            route_request(Bytes::from_static(b"[1,2]"), "vision-model"),
            Err(RouteError::NotAnObject)
        ));
        assert!(matches!(
            route_request(
                Bytes::from_static(br#"{"messages": "hello"}"#),
                "vision-model"
            ),
            Err(RouteError::MessagesNotArray)
        ));
    }

    #[test]
    fn test_route_error_maps_to_malformed_request() {
        let err: ProxyError = RouteError::NotAnObject.into();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }
}
