//! `POST /message`: accept a JSON-RPC message and answer on the event stream.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{sse::Event, IntoResponse, Response},
    Json,
};
use opentelemetry::trace::TraceContextExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

use super::RelayState;
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse, RequestId};

#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Error body for requests rejected at the HTTP layer.
#[derive(serde::Serialize)]
struct ErrorResponse {
    jsonrpc: &'static str,
    id: Value,
    error: ErrorData,
}

fn reject(status: StatusCode, error: ErrorData) -> Response {
    let body = ErrorResponse {
        jsonrpc: "2.0",
        id: Value::Null,
        error,
    };
    (status, Json(body)).into_response()
}

/// Requests are dispatched on their own task and the POST returns `202`
/// straight away, so a slow tool never holds up the next request. Results go
/// back on the event stream tagged with the request id, in completion order.
#[tracing::instrument(skip(state, headers, body), fields(session_id = %params.session_id))]
pub async fn message_handler(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<MessageParams>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if state.sessions.get(&params.session_id).is_none() {
        return reject(StatusCode::NOT_FOUND, ErrorData::invalid_request("Session not found"));
    }
    state.sessions.touch(&params.session_id);

    if body.get("method").is_none() && (body.get("result").is_some() || body.get("error").is_some()) {
        tracing::debug!("Rejecting client response; this server issues no requests");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let request_id = RequestId::recover(&body);
    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => {
            let error = ErrorData::invalid_request(format!("Invalid JSON-RPC: {}", e));
            return match request_id {
                Some(id) => {
                    tracing::warn!(request_id = %id, error = %error, "Malformed request");
                    let response = serde_json::to_value(JsonRpcErrorResponse::new(id, error))
                        .unwrap_or_default();
                    deliver(&state, &params.session_id, response).await;
                    StatusCode::ACCEPTED.into_response()
                }
                None => reject(StatusCode::BAD_REQUEST, error),
            };
        }
    };

    tracing::info!(
        method = %message.method,
        request_id = ?message.id,
        "Processing message"
    );

    let parent = extract_parent_context(&headers);

    let Some(id) = message.id.clone() else {
        let _ = crate::protocol::dispatch(&state, &params.session_id, &message, parent).await;
        return StatusCode::ACCEPTED.into_response();
    };

    let session_id = params.session_id;
    tokio::spawn(
        async move {
            let result = crate::protocol::dispatch(&state, &session_id, &message, parent).await;
            let response = match result {
                Ok(value) => serde_json::to_value(JsonRpcResponse::success(id, value)),
                Err(error) => serde_json::to_value(JsonRpcErrorResponse::new(id, error)),
            };
            match response {
                Ok(response) => deliver(&state, &session_id, response).await,
                Err(e) => tracing::error!(error = %e, "Failed to encode response"),
            }
        }
        .in_current_span(),
    );

    StatusCode::ACCEPTED.into_response()
}

/// Send a response down the session's event stream, if it still has one.
async fn deliver(state: &RelayState, session_id: &str, response: Value) {
    let Some(tx) = state.sessions.sender(session_id) else {
        tracing::debug!(session_id = %session_id, "Session closed, discarding result");
        return;
    };
    let event = Event::default().event("message").data(response.to_string());
    if tx.send(Ok(event)).await.is_err() {
        tracing::debug!(session_id = %session_id, "Event stream gone, discarding result");
    }
}

/// W3C trace context from the request headers, when it names a real span.
pub fn extract_parent_context(headers: &HeaderMap) -> Option<opentelemetry::Context> {
    let cx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&opentelemetry_http::HeaderExtractor(headers))
    });
    let valid = cx.span().span_context().is_valid();
    valid.then_some(cx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use opentelemetry_sdk::propagation::TraceContextPropagator;

    #[test]
    fn test_traceparent_is_honoured() {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        );
        let cx = extract_parent_context(&headers).expect("valid parent");
        assert_eq!(
            cx.span().span_context().trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );

        assert!(extract_parent_context(&HeaderMap::new()).is_none());
    }
}
