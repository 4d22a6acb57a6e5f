#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use concierge::oracle::{Oracle, OracleError, OracleReply, OracleRequest};
use relay::client::{ClientError, ClientOptions, RemoteTools, SseClient};
use relay::{
    handler_fn, Implementation, ParamType, RelayState, ToolDescriptor, ToolError,
    ToolInvocationResult, ToolParam, ToolRegistry,
};
use serde_json::{json, Value};

/// What the engine showed the oracle on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub utterance: String,
    pub hints: Vec<String>,
    pub tools: Vec<String>,
    pub history: usize,
}

impl SeenRequest {
    fn from(request: &OracleRequest<'_>) -> Self {
        Self {
            utterance: request.utterance.to_string(),
            hints: request.hints.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            history: request.history.len(),
        }
    }
}

/// Replies in order; runs out into an error.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply, OracleError>>>,
    seen: Mutex<Vec<SeenRequest>>,
    delay: Duration,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<Result<OracleReply, OracleError>>) -> Arc<Self> {
        Self::with_delay(replies, Duration::ZERO)
    }

    pub fn with_delay(replies: Vec<Result<OracleReply, OracleError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decide(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        self.seen.lock().unwrap().push(SeenRequest::from(&request));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(OracleError::Api("script exhausted".to_string())))
    }
}

/// Proposes the current weather for the last word of the utterance.
pub struct CityOracle;

#[async_trait]
impl Oracle for CityOracle {
    async fn decide(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        let city = request.utterance.split_whitespace().last().unwrap_or_default();
        Ok(OracleReply::propose("query_current_weather", json!({ "city": city })))
    }
}

pub fn weather_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("query_current_weather", "Current weather for a city")
        .with_title("weather lookup")
        .with_param(ToolParam::required("city", ParamType::String))
}

/// Weather tools with canned answers. Cities starting with "Slow" take a
/// second.
pub fn weather_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .tool(
            weather_descriptor(),
            handler_fn(|args| async move {
                let city = args["city"].as_str().unwrap_or_default().to_string();
                if city.starts_with("Slow") {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                if city == "Atlantis" {
                    return Err(ToolError::upstream("no district found"));
                }
                Ok(json!({
                    "success": true,
                    "type": "current",
                    "city": city,
                    "weather": "Sunny",
                    "temperature": "21",
                    "winddirection": "NE",
                    "windpower": "3",
                    "humidity": "30",
                    "reporttime": "2025-06-01 10:00:00"
                }))
            }),
        )
        .build()
        .unwrap()
}

pub async fn spawn_relay(registry: ToolRegistry) -> String {
    let state = Arc::new(RelayState::new(registry, Implementation::new("test-weather", "0.1.0")));
    let app = relay::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A localhost URL nothing is listening on.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("http://127.0.0.1:{}", port)
}

pub fn client_options() -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_millis(500),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        ..ClientOptions::with_name("concierge-test", "0.0.1")
    }
}

/// A remote whose listing is fixed, as if discovered earlier, while calls go
/// to a real client.
pub struct KnownRemote {
    pub tools: Vec<ToolDescriptor>,
    pub client: SseClient,
}

#[async_trait]
impl RemoteTools for KnownRemote {
    fn endpoint(&self) -> &str {
        self.client.base_url()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> ToolInvocationResult {
        self.client.call_tool(name, arguments, timeout).await
    }
}
