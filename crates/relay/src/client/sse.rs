//! Reconnecting SSE client.
//!
//! One event stream carries every response; requests go up as POSTs. Each
//! request gets a fresh correlation id and a slot in the pending map, and the
//! background listener resolves slots as `message` events arrive, in whatever
//! order the server finishes them.
//!
//! Connection status moves `Disconnected → Connecting → Ready`. If the stream
//! drops while `Ready`, every pending request fails with `ConnectionLost`, the
//! status becomes `Degraded`, and a background task reconnects with
//! exponential backoff. Callers that arrive meanwhile wait (bounded) for the
//! outcome.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::Instrument;

use super::{current_traceparent, ClientError, ClientOptions, ConnectionStatus, RemoteTools};
use crate::transport::frame::SseDecoder;
use crate::types::descriptor::ToolDescriptor;
use crate::types::invocation::{FailureKind, ToolInvocationRequest, ToolInvocationResult};
use crate::types::jsonrpc::{IncomingMessage, JsonRpcMessage, JsonRpcRequest, RequestId};
use crate::types::protocol::{Implementation, InitializeParams, InitializeResult};
use crate::types::tool::{CallToolResult, ListToolsResult, Tool};

type PendingSender = oneshot::Sender<Result<IncomingMessage, ClientError>>;

struct ConnectionState {
    session_id: Option<String>,
    pending: HashMap<u64, PendingSender>,
    /// Bumped on every (re)connect and teardown. A listener only acts on its
    /// own generation.
    generation: u64,
    last_activity: Option<Instant>,
    advertised: Option<Vec<ToolDescriptor>>,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    base_url: String,
    http: reqwest::Client,
    options: ClientOptions,
    state: Mutex<ConnectionState>,
    status: watch::Sender<ConnectionStatus>,
    next_id: AtomicU64,
    waiting: AtomicUsize,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    // Never held across an await.
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(endpoint = %self.base_url, from = ?previous, to = ?status, "connection status changed");
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn touch(&self) {
        self.lock().last_activity = Some(Instant::now());
    }

    /// Forget the current connection: stop its listener and fail whatever was
    /// waiting on it.
    fn teardown(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.session_id = None;
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
        fail_pending(&mut state);
    }

    fn handle_message(&self, data: &str) {
        let message: IncomingMessage = match serde_json::from_str(data) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable message");
                return;
            }
        };

        if message.is_response() {
            let Some(id) = message.id.as_ref().and_then(RequestId::as_correlation) else {
                tracing::warn!(id = ?message.id, "Response carries an id this client never issued");
                return;
            };
            let waiter = self.lock().pending.remove(&id);
            match waiter {
                Some(tx) => {
                    if tx.send(Ok(message)).is_err() {
                        tracing::debug!(request_id = id, "Caller went away before its result arrived");
                    }
                }
                None => {
                    tracing::debug!(request_id = id, "Dropping result for unknown or abandoned request")
                }
            }
            return;
        }

        match message.method.as_deref() {
            Some("notifications/tools/listing") => {
                let tools = message
                    .params
                    .as_ref()
                    .and_then(|p| p.get("tools"))
                    .cloned()
                    .and_then(|t| serde_json::from_value::<Vec<Tool>>(t).ok());
                match tools {
                    Some(tools) => {
                        let descriptors: Vec<ToolDescriptor> =
                            tools.into_iter().map(ToolDescriptor::from_tool).collect();
                        tracing::debug!(count = descriptors.len(), "Received tool listing");
                        self.lock().advertised = Some(descriptors);
                    }
                    None => tracing::warn!("Malformed tool listing"),
                }
            }
            Some(other) => tracing::debug!(method = %other, "Ignoring notification"),
            None => tracing::debug!("Ignoring message without id or method"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
    }
}

fn fail_pending(state: &mut ConnectionState) -> usize {
    let failed = state.pending.len();
    for (_, waiter) in state.pending.drain() {
        let _ = waiter.send(Err(ClientError::ConnectionLost));
    }
    failed
}

/// Removes a pending entry when its caller stops waiting, whether it got an
/// answer, timed out, or was cancelled.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.lock().pending.remove(&self.id).is_some() {
            tracing::debug!(request_id = self.id, "Abandoned pending request");
        }
    }
}

/// One place in the queue of callers waiting for a connection.
struct WaitSlot<'a>(&'a AtomicUsize);

impl<'a> WaitSlot<'a> {
    fn acquire(counter: &'a AtomicUsize, limit: usize) -> Option<Self> {
        if counter.fetch_add(1, Ordering::AcqRel) >= limit {
            counter.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self(counter))
    }
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Resets `Connecting` if the caller driving a connect is cancelled midway.
struct ConnectAttempt<'a> {
    inner: &'a Inner,
    settled: bool,
}

impl ConnectAttempt<'_> {
    fn settle(mut self, connected: bool) {
        self.settled = true;
        if !connected {
            self.inner.set_status(ConnectionStatus::Disconnected);
        }
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.teardown();
            self.inner.set_status(ConnectionStatus::Disconnected);
        }
    }
}

/// A logical connection to one remote tool service. Cheap to clone; clones
/// share the connection.
#[derive(Clone)]
pub struct SseClient {
    inner: Arc<Inner>,
}

impl SseClient {
    /// Create a client without connecting. The first call connects.
    pub fn new(base_url: impl Into<String>, options: ClientOptions) -> Self {
        let base_url: String = base_url.into();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
                options,
                state: Mutex::new(ConnectionState {
                    session_id: None,
                    pending: HashMap::new(),
                    generation: 0,
                    last_activity: None,
                    advertised: None,
                    listener: None,
                }),
                status,
                next_id: AtomicU64::new(1),
                waiting: AtomicUsize::new(0),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create a client and connect eagerly.
    pub async fn connect(base_url: &str) -> Result<Self, ClientError> {
        Self::connect_with_options(base_url, ClientOptions::default()).await
    }

    pub async fn connect_with_options(
        base_url: &str,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Self::new(base_url, options);
        client.ensure_ready().await?;
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    /// When the event stream last delivered anything.
    pub fn last_activity(&self) -> Option<Instant> {
        self.inner.lock().last_activity
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// The listing the server pushed during the most recent handshake.
    pub fn advertised_tools(&self) -> Option<Vec<ToolDescriptor>> {
        self.inner.lock().advertised.clone()
    }

    /// Drop the connection. The next call reconnects.
    pub fn close(&self) {
        self.inner.teardown();
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.ensure_ready().await?;

        let id = self.inner.next_id();
        let request = JsonRpcRequest::with_params(id, "tools/list", json!({}));
        let reply = tokio::time::timeout(self.inner.options.request_timeout, self.roundtrip(id, &request))
            .await
            .map_err(|_| ClientError::Timeout("tools/list response".into()))??;

        let listing: ListToolsResult = serde_json::from_value(reply.into_result()?)
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        Ok(listing.tools.into_iter().map(ToolDescriptor::from_tool).collect())
    }

    /// Invoke a remote tool. Always resolves: connection trouble, timeouts,
    /// and remote errors all come back as `Failure`.
    pub async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> ToolInvocationResult {
        let span = tracing::info_span!(
            "relay.client.call",
            relay.tool.name = %name,
            relay.endpoint = %self.inner.base_url,
            rpc.jsonrpc.request_id = tracing::field::Empty,
        );

        async move {
            if let Err(e) = self.ensure_ready().await {
                tracing::warn!(error = %e, "Remote tool service unavailable");
                return ToolInvocationResult::failure(
                    FailureKind::ConnectionUnavailable,
                    format!("{} is unavailable: {}", self.inner.base_url, e),
                );
            }

            let request = ToolInvocationRequest::new(self.inner.next_id(), name, arguments);
            tracing::Span::current().record("rpc.jsonrpc.request_id", request.id);

            match tokio::time::timeout(timeout, self.roundtrip(request.id, &request.to_jsonrpc())).await {
                Err(_) => {
                    tracing::warn!(request_id = request.id, ?timeout, "Tool call timed out, abandoning request");
                    ToolInvocationResult::failure(
                        FailureKind::Timeout,
                        format!("no result from '{}' within {:?}", name, timeout),
                    )
                }
                Ok(Err(e)) => {
                    tracing::warn!(request_id = request.id, error = %e, "Tool call failed");
                    ToolInvocationResult::failure(e.failure_kind(), e.to_string())
                }
                Ok(Ok(message)) => decode_call_response(message),
            }
        }
        .instrument(span)
        .await
    }

    async fn ensure_ready(&self) -> Result<(), ClientError> {
        if self.inner.status() == ConnectionStatus::Ready {
            return Ok(());
        }

        let _slot = WaitSlot::acquire(&self.inner.waiting, self.inner.options.max_queued_calls)
            .ok_or_else(|| ClientError::Unavailable("too many calls waiting for the connection".into()))?;

        match self.inner.status() {
            ConnectionStatus::Ready => Ok(()),
            ConnectionStatus::Degraded => self.wait_for_recovery().await,
            ConnectionStatus::Disconnected | ConnectionStatus::Connecting => {
                let connect_timeout = self.inner.options.connect_timeout;
                let deadline = tokio::time::Instant::now() + connect_timeout;

                // Whoever gets the lock first connects; the rest find it Ready.
                let guard = timeout_at(deadline, self.inner.connect_lock.lock())
                    .await
                    .map_err(|_| {
                        ClientError::Unavailable(format!("no connection within {:?}", connect_timeout))
                    })?;

                match self.inner.status() {
                    ConnectionStatus::Ready => return Ok(()),
                    ConnectionStatus::Degraded => {
                        drop(guard);
                        return self.wait_for_recovery().await;
                    }
                    ConnectionStatus::Disconnected | ConnectionStatus::Connecting => {}
                }

                self.inner.set_status(ConnectionStatus::Connecting);
                let attempt = ConnectAttempt {
                    inner: &self.inner,
                    settled: false,
                };
                let result = self.establish(deadline).await;
                attempt.settle(result.is_ok());
                drop(guard);

                result.map_err(|e| ClientError::Unavailable(e.to_string()))
            }
        }
    }

    async fn wait_for_recovery(&self) -> Result<(), ClientError> {
        let max_wait = self.inner.options.max_queue_wait;
        let mut status = self.inner.status.subscribe();
        let settled = tokio::time::timeout(
            max_wait,
            status.wait_for(|s| matches!(s, ConnectionStatus::Ready | ConnectionStatus::Disconnected)),
        )
        .await;

        match settled {
            Ok(Ok(s)) if *s == ConnectionStatus::Ready => Ok(()),
            Ok(Ok(_)) => Err(ClientError::Unavailable("reconnection failed".into())),
            Ok(Err(_)) => Err(ClientError::Unavailable("client closed".into())),
            Err(_) => Err(ClientError::Unavailable(format!(
                "connection did not recover within {:?}",
                max_wait
            ))),
        }
    }

    /// Open the stream and run the handshake, all before `deadline`.
    /// The caller holds `connect_lock`.
    async fn establish(&self, deadline: tokio::time::Instant) -> Result<(), ClientError> {
        let result = self.try_establish(deadline).await;
        if result.is_err() {
            self.inner.teardown();
        }
        result
    }

    async fn try_establish(&self, deadline: tokio::time::Instant) -> Result<(), ClientError> {
        let sse_url = format!("{}/sse", self.inner.base_url);

        let response = timeout_at(
            deadline,
            self.inner
                .http
                .get(&sse_url)
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| ClientError::Timeout("event stream".into()))?
        .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Http {
                status: response.status().as_u16(),
                body: "event stream request rejected".into(),
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            state.generation += 1;
            if let Some(old) = state.listener.take() {
                old.abort();
            }
            state.session_id = None;
            state.advertised = None;
            state.listener = Some(tokio::spawn(listen(
                Arc::downgrade(&self.inner),
                state.generation,
                response.bytes_stream(),
                endpoint_tx,
            )));
        }

        let session_id = timeout_at(deadline, endpoint_rx)
            .await
            .map_err(|_| ClientError::Timeout("endpoint event".into()))?
            .map_err(|_| ClientError::Protocol("event stream closed before the endpoint event".into()))?;
        self.inner.lock().session_id = Some(session_id.clone());

        let params = InitializeParams::new(Implementation::new(
            &self.inner.options.client_name,
            &self.inner.options.client_version,
        ));
        let id = self.inner.next_id();
        let request = JsonRpcRequest::with_params(
            id,
            "initialize",
            serde_json::to_value(&params).map_err(|e| ClientError::Protocol(e.to_string()))?,
        );
        let reply = timeout_at(deadline, self.roundtrip(id, &request))
            .await
            .map_err(|_| ClientError::Timeout("initialize response".into()))??;
        let server: InitializeResult = serde_json::from_value(reply.into_result()?)
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let initialized = JsonRpcMessage::notification("notifications/initialized", json!({}));
        timeout_at(deadline, self.post(&initialized))
            .await
            .map_err(|_| ClientError::Timeout("initialized notification".into()))??;

        tracing::info!(
            endpoint = %self.inner.base_url,
            session_id = %session_id,
            server = %server.server_info.name,
            server_version = %server.server_info.version,
            "Connected to remote tool service"
        );
        self.inner.touch();
        self.inner.set_status(ConnectionStatus::Ready);
        Ok(())
    }

    /// Register a pending slot, send, and wait for the matching response.
    /// Callers bound this with their own timeout.
    async fn roundtrip<T: Serialize>(&self, id: u64, body: &T) -> Result<IncomingMessage, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().pending.insert(id, tx);
        let _pending = PendingGuard {
            inner: &self.inner,
            id,
        };

        self.post(body).await?;
        rx.await.map_err(|_| ClientError::ConnectionLost)?
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<(), ClientError> {
        let session_id = self
            .inner
            .lock()
            .session_id
            .clone()
            .ok_or_else(|| ClientError::Unavailable("no active session".into()))?;
        let url = format!("{}/message?sessionId={}", self.inner.base_url, session_id);

        let mut request = self.inner.http.post(&url).json(body);
        if let Some(traceparent) = current_traceparent() {
            request = request.header("traceparent", traceparent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED && !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Called by the listener when its stream ends.
    fn connection_dropped(self, generation: u64, reason: &str) {
        let (failed, degraded) = {
            let mut state = self.inner.lock();
            if state.generation != generation {
                return;
            }
            state.session_id = None;
            state.listener = None;
            // Waiters woken below must not observe Ready.
            let degraded = self.inner.status.send_if_modified(|status| {
                if *status == ConnectionStatus::Ready {
                    *status = ConnectionStatus::Degraded;
                    true
                } else {
                    false
                }
            });
            (fail_pending(&mut state), degraded)
        };

        if !degraded {
            tracing::debug!(reason, "Event stream closed during connection setup");
            return;
        }

        tracing::warn!(
            endpoint = %self.inner.base_url,
            reason,
            failed_requests = failed,
            "Lost connection to remote tool service, reconnecting"
        );
        tokio::spawn(self.reconnect());
    }

    async fn reconnect(self) {
        let options = &self.inner.options;
        let mut backoff = options.initial_backoff;

        for attempt in 1..=options.max_reconnect_attempts {
            tokio::time::sleep(backoff).await;
            if self.inner.status() != ConnectionStatus::Degraded {
                return;
            }

            let result = {
                let _guard = self.inner.connect_lock.lock().await;
                self.establish(tokio::time::Instant::now() + options.connect_timeout)
                    .await
            };
            match result {
                Ok(()) => {
                    tracing::info!(endpoint = %self.inner.base_url, attempt, "Reconnected");
                    return;
                }
                Err(e) => tracing::warn!(
                    endpoint = %self.inner.base_url,
                    attempt,
                    max_attempts = options.max_reconnect_attempts,
                    error = %e,
                    "Reconnect attempt failed"
                ),
            }
            backoff = (backoff * 2).min(options.max_backoff);
        }

        tracing::error!(endpoint = %self.inner.base_url, "Giving up on reconnection");
        self.inner.set_status(ConnectionStatus::Disconnected);
    }
}

impl std::fmt::Debug for SseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClient")
            .field("base_url", &self.inner.base_url)
            .field("status", &self.inner.status())
            .finish()
    }
}

#[async_trait::async_trait]
impl RemoteTools for SseClient {
    fn endpoint(&self) -> &str {
        self.base_url()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        SseClient::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> ToolInvocationResult {
        SseClient::call_tool(self, name, arguments, timeout).await
    }
}

fn decode_call_response(message: IncomingMessage) -> ToolInvocationResult {
    match message.into_result() {
        Err(error) => ToolInvocationResult::failure(error.failure_kind(), error.message),
        Ok(result) => match serde_json::from_value::<CallToolResult>(result) {
            Ok(result) => result.into_invocation(),
            Err(e) => ToolInvocationResult::failure(
                FailureKind::Internal,
                format!("malformed tool result: {}", e),
            ),
        },
    }
}

/// Background task: decode the event stream and route what arrives.
async fn listen<S>(
    inner: Weak<Inner>,
    generation: u64,
    stream: S,
    endpoint_tx: oneshot::Sender<String>,
) where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let mut stream = Box::pin(stream);
    let mut decoder = SseDecoder::new();
    let mut endpoint_tx = Some(endpoint_tx);

    let reason = loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                decoder.push(&chunk);
                let Some(strong) = inner.upgrade() else {
                    return;
                };
                while let Some(event) = decoder.next_event() {
                    strong.touch();
                    match event.event_type() {
                        "endpoint" => match (endpoint_tx.take(), extract_session_id(&event.data)) {
                            (Some(tx), Some(session_id)) => {
                                let _ = tx.send(session_id);
                            }
                            (tx, None) => {
                                tracing::warn!(data = %event.data, "Endpoint event without a session id");
                                endpoint_tx = tx;
                            }
                            (None, Some(_)) => tracing::debug!("Ignoring repeated endpoint event"),
                        },
                        "message" => strong.handle_message(&event.data),
                        other => tracing::debug!(event = %other, "Ignoring event"),
                    }
                }
            }
            Some(Err(e)) => break e.to_string(),
            None => break "event stream ended".to_string(),
        }
    };

    if let Some(inner) = inner.upgrade() {
        SseClient { inner }.connection_dropped(generation, &reason);
    }
}

/// The endpoint event carries `{"uri": "/message?sessionId=…"}` or the bare
/// path.
fn extract_session_id(data: &str) -> Option<String> {
    let uri = match serde_json::from_str::<Value>(data) {
        Ok(parsed) => parsed.get("uri").and_then(Value::as_str)?.to_string(),
        Err(_) => data.trim().to_string(),
    };
    let start = uri.find("sessionId=")? + "sessionId=".len();
    let session_id = uri[start..].split('&').next()?;
    (!session_id.is_empty()).then(|| session_id.to_string())
}
