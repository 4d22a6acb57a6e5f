//! Client and server talking over a real socket.

use futures::StreamExt;
use relay::client::{ClientOptions, ConnectionStatus, RemoteTools, SseClient};
use relay::transport::SseDecoder;
use relay::{
    handler_fn, FailureKind, Implementation, ParamType, RelayState, ToolDescriptor, ToolError,
    ToolParam, ToolRegistry,
};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn registry() -> ToolRegistry {
    ToolRegistry::builder()
        .tool(
            ToolDescriptor::new("echo", "Echo the text back")
                .with_param(ToolParam::required("text", ParamType::String)),
            handler_fn(|args| async move { Ok(json!({ "text": args["text"] })) }),
        )
        .tool(
            ToolDescriptor::new("echo_after", "Echo after a delay")
                .with_param(ToolParam::required("text", ParamType::String))
                .with_param(ToolParam::required("delay_ms", ParamType::Integer)),
            handler_fn(|args| async move {
                let delay = args["delay_ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(json!({ "text": args["text"] }))
            }),
        )
        .tool(
            ToolDescriptor::new("slow", "Takes a while"),
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!({ "done": true }))
            }),
        )
        .tool(
            ToolDescriptor::new("broken", "Upstream always fails"),
            handler_fn(|_| async { Err(ToolError::upstream("provider returned 503")) }),
        )
        .build()
        .unwrap()
}

async fn spawn_server() -> (String, Arc<RelayState>) {
    let (url, state, _power) = spawn_switchable_server().await;
    (url, state)
}

/// Whether the test server answers. While off, every request gets a 503.
#[derive(Clone, Default)]
struct Power(Arc<AtomicBool>);

impl Power {
    fn is_on(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, on: bool) {
        self.0.store(on, Ordering::Release);
    }
}

async fn spawn_switchable_server() -> (String, Arc<RelayState>, Power) {
    let state = Arc::new(RelayState::new(registry(), Implementation::new("test-relay", "0.1.0")));
    let power = Power::default();
    power.set(true);

    let gate = power.clone();
    let app = relay::router(Arc::clone(&state)).layer(middleware::from_fn(
        move |request: Request, next: Next| {
            let gate = gate.clone();
            async move {
                if !gate.is_on() {
                    return StatusCode::SERVICE_UNAVAILABLE.into_response();
                }
                next.run(request).await
            }
        },
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state, power)
}

/// Take the server down under a Ready client. Open event streams outlive the
/// gate, so the client's session is ended as well.
fn stop_server(client: &SseClient, state: &RelayState, power: &Power) {
    let session_id = client.session_id().unwrap();
    power.set(false);
    state.sessions.remove(&session_id);
}

async fn wait_for_status(client: &SseClient, wanted: ConnectionStatus, within: Duration) {
    let mut status = client.watch_status();
    tokio::time::timeout(within, status.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("status never became {:?}", wanted))
        .unwrap();
}

fn options() -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_secs(2),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        ..ClientOptions::with_name("bridge-test", "0.0.1")
    }
}

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_list_and_call() {
    let (url, _state) = spawn_server().await;
    let client = SseClient::connect_with_options(&url, options()).await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Ready);
    assert!(client.session_id().is_some());

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "echo_after", "slow", "broken"]);
    assert_eq!(client.advertised_tools().unwrap().len(), 4);

    let result = client.call_tool("echo", json!({ "text": "hi" }), CALL_TIMEOUT).await;
    assert_eq!(result.payload(), Some(&json!({ "text": "hi" })));

    let failed = client.call_tool("broken", json!({}), CALL_TIMEOUT).await;
    assert_eq!(failed.failure_kind(), Some(FailureKind::UpstreamError));
}

#[tokio::test]
async fn test_lazy_connect_on_first_call() {
    let (url, _state) = spawn_server().await;
    let client = SseClient::new(&url, options());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    let result = client.call_tool("echo", json!({ "text": "lazy" }), CALL_TIMEOUT).await;
    assert!(result.is_success());
    assert_eq!(client.status(), ConnectionStatus::Ready);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_to_their_own_results() {
    let (url, _state) = spawn_server().await;
    let client = SseClient::connect_with_options(&url, options()).await.unwrap();

    // Later calls finish first.
    let calls = (0..10u64).map(|i| {
        let client = client.clone();
        async move {
            let text = format!("call-{}", i);
            let args = json!({ "text": text, "delay_ms": (10 - i) * 20 });
            let result = client.call_tool("echo_after", args, CALL_TIMEOUT).await;
            (text, result)
        }
    });

    for (text, result) in futures::future::join_all(calls).await {
        assert_eq!(result.payload(), Some(&json!({ "text": text })));
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_timeout_abandons_request() {
    let (url, _state) = spawn_server().await;
    let client = SseClient::connect_with_options(&url, options()).await.unwrap();

    let result = client.call_tool("slow", json!({}), Duration::from_millis(50)).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(client.pending_count(), 0);

    // The late result arrives and is dropped without disturbing later calls.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let next = client.call_tool("echo", json!({ "text": "after" }), CALL_TIMEOUT).await;
    assert_eq!(next.payload(), Some(&json!({ "text": "after" })));
}

#[tokio::test]
async fn test_connection_loss_fails_pending_then_recovers() {
    let (url, state) = spawn_server().await;
    let client = SseClient::connect_with_options(&url, options()).await.unwrap();
    let session_id = client.session_id().unwrap();

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("slow", json!({}), CALL_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    state.sessions.remove(&session_id);

    let lost = slow.await.unwrap();
    assert_eq!(lost.failure_kind(), Some(FailureKind::ConnectionLost));

    let result = client.call_tool("echo", json!({ "text": "back" }), CALL_TIMEOUT).await;
    assert_eq!(result.payload(), Some(&json!({ "text": "back" })));
    assert_eq!(client.status(), ConnectionStatus::Ready);
    assert_ne!(client.session_id().unwrap(), session_id);
}

#[tokio::test]
async fn test_caller_during_outage_gives_up_after_queue_wait() {
    let (url, state, power) = spawn_switchable_server().await;
    let client = SseClient::connect_with_options(
        &url,
        ClientOptions {
            max_reconnect_attempts: 100,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(100),
            max_queue_wait: Duration::from_millis(400),
            ..options()
        },
    )
    .await
    .unwrap();

    stop_server(&client, &state, &power);
    wait_for_status(&client, ConnectionStatus::Degraded, Duration::from_secs(2)).await;

    let started = Instant::now();
    let result = client.call_tool("echo", json!({ "text": "x" }), CALL_TIMEOUT).await;
    let elapsed = started.elapsed();
    assert_eq!(result.failure_kind(), Some(FailureKind::ConnectionUnavailable));
    assert!(elapsed >= Duration::from_millis(400), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "waited {:?}", elapsed);
    // Still retrying in the background.
    assert_eq!(client.status(), ConnectionStatus::Degraded);
}

#[tokio::test]
async fn test_exhausted_reconnects_end_disconnected_then_connect_afresh() {
    let (url, state, power) = spawn_switchable_server().await;
    let client = SseClient::connect_with_options(
        &url,
        ClientOptions {
            max_reconnect_attempts: 2,
            max_queue_wait: Duration::from_secs(5),
            ..options()
        },
    )
    .await
    .unwrap();
    let first_session = client.session_id().unwrap();

    stop_server(&client, &state, &power);
    // Two attempts at 50ms and 100ms backoff.
    wait_for_status(&client, ConnectionStatus::Disconnected, Duration::from_secs(2)).await;

    // A new call connects itself rather than waiting out max_queue_wait.
    let started = Instant::now();
    let down = client.call_tool("echo", json!({ "text": "x" }), CALL_TIMEOUT).await;
    assert_eq!(down.failure_kind(), Some(FailureKind::ConnectionUnavailable));
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    power.set(true);

    let result = client.call_tool("echo", json!({ "text": "again" }), CALL_TIMEOUT).await;
    assert_eq!(result.payload(), Some(&json!({ "text": "again" })));
    assert_eq!(client.status(), ConnectionStatus::Ready);
    assert_ne!(client.session_id().unwrap(), first_session);
}

#[tokio::test]
async fn test_waiting_queue_overflow_fails_immediately() {
    let (url, state, power) = spawn_switchable_server().await;
    let client = SseClient::connect_with_options(
        &url,
        ClientOptions {
            max_reconnect_attempts: 100,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(100),
            max_queued_calls: 2,
            max_queue_wait: Duration::from_millis(500),
            ..options()
        },
    )
    .await
    .unwrap();

    stop_server(&client, &state, &power);
    wait_for_status(&client, ConnectionStatus::Degraded, Duration::from_secs(2)).await;

    let started = Instant::now();
    let calls = (0..5).map(|i| {
        let client = client.clone();
        async move {
            let result = client
                .call_tool("echo", json!({ "text": format!("call-{}", i) }), CALL_TIMEOUT)
                .await;
            (result.failure_kind(), started.elapsed())
        }
    });
    let outcomes = futures::future::join_all(calls).await;

    for (kind, _) in &outcomes {
        assert_eq!(*kind, Some(FailureKind::ConnectionUnavailable));
    }
    let queued = outcomes
        .iter()
        .filter(|(_, elapsed)| *elapsed >= Duration::from_millis(500))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|(_, elapsed)| *elapsed < Duration::from_millis(200))
        .count();
    assert_eq!(queued, 2, "outcomes: {:?}", outcomes);
    assert_eq!(rejected, 3, "outcomes: {:?}", outcomes);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_unreachable_service_fails_fast() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = SseClient::new(
        format!("http://127.0.0.1:{}", port),
        ClientOptions {
            connect_timeout: Duration::from_millis(500),
            ..options()
        },
    );

    let started = Instant::now();
    let result = client.call_tool("echo", json!({ "text": "x" }), CALL_TIMEOUT).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::ConnectionUnavailable));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_unknown_tool_and_bad_arguments() {
    let (url, _state) = spawn_server().await;
    let client = SseClient::connect_with_options(&url, options()).await.unwrap();

    let unknown = client.call_tool("nope", json!({}), CALL_TIMEOUT).await;
    assert_eq!(unknown.failure_kind(), Some(FailureKind::UnknownTool));

    let missing = client.call_tool("echo", json!({}), CALL_TIMEOUT).await;
    assert_eq!(missing.failure_kind(), Some(FailureKind::SchemaMismatch));

    let wrong_type = client.call_tool("echo", json!({ "text": 5 }), CALL_TIMEOUT).await;
    assert_eq!(wrong_type.failure_kind(), Some(FailureKind::SchemaMismatch));
}

#[tokio::test]
async fn test_trait_object_dispatch() {
    let (url, _state) = spawn_server().await;
    let remote: Arc<dyn RemoteTools> = Arc::new(relay::client::ClientPool::new(&url, 2, options()));

    assert_eq!(remote.endpoint(), url);
    for i in 0..4 {
        let result = remote.call_tool("echo", json!({ "text": i.to_string() }), CALL_TIMEOUT).await;
        assert_eq!(result.payload(), Some(&json!({ "text": i.to_string() })));
    }
}

/// Read events off a raw stream until one satisfies `want`.
async fn next_matching<S>(stream: &mut S, decoder: &mut SseDecoder, want: impl Fn(&relay::transport::SseEvent) -> bool) -> relay::transport::SseEvent
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    loop {
        while let Some(event) = decoder.next_event() {
            if want(&event) {
                return event;
            }
        }
        let chunk = stream.next().await.expect("stream ended").unwrap();
        decoder.push(&chunk);
    }
}

#[tokio::test]
async fn test_malformed_request_answered_with_its_id() {
    let (url, _state) = spawn_server().await;
    let http = reqwest::Client::new();

    let response = http.get(format!("{}/sse", url)).send().await.unwrap();
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    let endpoint = next_matching(&mut stream, &mut decoder, |e| e.event_type() == "endpoint").await;
    let uri: Value = serde_json::from_str(&endpoint.data).unwrap();
    let post_url = format!("{}{}", url, uri["uri"].as_str().unwrap());

    let status = http
        .post(&post_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 7, "params": { "arguments": {} } }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let reply = next_matching(&mut stream, &mut decoder, |e| {
        serde_json::from_str::<Value>(&e.data).map(|v| v.get("id").is_some()).unwrap_or(false)
    })
    .await;
    let reply: Value = serde_json::from_str(&reply.data).unwrap();
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32600);

    // No id to answer to: rejected on the POST itself.
    let status = http
        .post(&post_url)
        .json(&json!({ "jsonrpc": "2.0", "params": {} }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_to_unknown_session() {
    let (url, _state) = spawn_server().await;
    let status = reqwest::Client::new()
        .post(format!("{}/message?sessionId=does-not-exist", url))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}
