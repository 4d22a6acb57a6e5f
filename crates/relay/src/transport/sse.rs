//! `GET /sse`: open (or resume) a session and stream its events.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::RelayState;
use crate::session::SessionStore;
use crate::types::jsonrpc::JsonRpcMessage;

const CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct SseParams {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Marks the session `Closed` when the response stream is dropped.
struct ConnectionGuard {
    sessions: Arc<dyn SessionStore>,
    session_id: String,
    generation: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.sessions.close_channel(&self.session_id, self.generation);
    }
}

/// Handshake: `endpoint` event with the POST path, then the tool listing as a
/// `notifications/tools/listing` message. Keep-alive comments every 30s.
#[tracing::instrument(skip(state, headers), fields(session_id = tracing::field::Empty))]
pub async fn sse_handler(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<SseParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id_hint = params.session_id.or_else(|| {
        headers
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    let session_id = state.sessions.get_or_create(session_id_hint.as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());

    let (tx, rx) = mpsc::channel::<Result<Event, axum::Error>>(CHANNEL_CAPACITY);
    // get_or_create just ran, so the session exists unless the reaper raced us.
    let generation = state.sessions.open_channel(&session_id, tx.clone()).unwrap_or(0);

    let endpoint = serde_json::json!({
        "uri": format!("{}?sessionId={}", state.message_path, session_id)
    });
    if tx
        .send(Ok(Event::default().event("endpoint").data(endpoint.to_string())))
        .await
        .is_err()
    {
        tracing::warn!("Failed to send endpoint event");
    }

    let listing = JsonRpcMessage::notification(
        "notifications/tools/listing",
        serde_json::json!({ "tools": state.tool_listing() }),
    );
    match serde_json::to_string(&listing) {
        Ok(data) => {
            let _ = tx.send(Ok(Event::default().event("message").data(data))).await;
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode tool listing"),
    }

    // Only the session keeps a sender; the stream ends when the session drops it.
    drop(tx);

    tracing::info!(session_id = %session_id, tools = state.registry.len(), "SSE connection established");

    let guard = ConnectionGuard {
        sessions: Arc::clone(&state.sessions),
        session_id,
        generation,
    };

    let stream = ReceiverStream::new(rx).map(move |result| {
        let _held = &guard;
        match result {
            Ok(event) => Ok(event),
            Err(_) => Ok(Event::default().data("error")),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}
