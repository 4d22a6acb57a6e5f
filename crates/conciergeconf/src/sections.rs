//! Config sections. Every field has a default so partial files are fine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Logging and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Traces are only exported when this is set.
    pub otlp_endpoint: Option<String>,

    /// `EnvFilter` directive (trace, debug, info, warn, error, or a full filter).
    /// Default: info
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// The chat model that picks tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub api_key: Option<String>,

    /// OpenAI-compatible API base.
    /// Default: https://api.deepseek.com/v1
    pub base_url: String,

    /// Default: deepseek-chat
    pub model: String,

    pub temperature: f32,

    /// Bound on one oracle round trip.
    pub timeout_ms: u64,

    /// Replaces the built-in system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            timeout_ms: 60_000,
            system_prompt: None,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-turn limits for the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bound on a single tool call, local or remote.
    pub tool_timeout_ms: u64,

    /// Turns of history handed to the oracle.
    pub history_turns: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 30_000,
            history_turns: 20,
        }
    }
}

impl DispatchConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Connection behaviour for every remote tool client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_queued_calls: usize,
    pub max_queue_wait_ms: u64,
    /// Physical connections per remote service.
    pub pool_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            max_queued_calls: 64,
            max_queue_wait_ms: 10_000,
            pool_size: 1,
        }
    }
}

/// One remote tool service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
    /// Overrides `bridge.pool_size` for this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    /// Tools the service is expected to offer. They are routable before the
    /// service has answered a listing, so a call made while it is down fails
    /// as unavailable instead of unknown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<DeclaredTool>,
}

/// A remote tool known from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclaredTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<DeclaredParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclaredParam {
    pub name: String,
    /// JSON Schema type name. Default: string
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// Type names a declared parameter may use.
pub const PARAM_TYPES: [&str; 6] = ["string", "number", "integer", "boolean", "array", "object"];

impl DeclaredParam {
    fn new(name: &str, required: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: default_param_type(),
            required,
            description: Some(description.to_string()),
        }
    }
}

fn weather_tools() -> Vec<DeclaredTool> {
    let city = DeclaredParam::new("city", true, "City name, e.g. \"Beijing\" or \"Shanghai\"");
    vec![
        DeclaredTool {
            name: "query_current_weather".to_string(),
            title: Some("weather lookup".to_string()),
            description: "Current weather for a city: conditions, temperature, wind and humidity."
                .to_string(),
            params: vec![city.clone()],
        },
        DeclaredTool {
            name: "query_weather_forecast".to_string(),
            title: Some("weather forecast".to_string()),
            description: "Multi-day weather forecast for a city. Use filter_indices to keep only the days the user asked about.".to_string(),
            params: vec![
                city,
                DeclaredParam::new(
                    "filter_indices",
                    false,
                    "Comma-separated day indices to keep, counting today as 0",
                ),
            ],
        },
    ]
}

pub(crate) fn default_remotes() -> Vec<RemoteConfig> {
    vec![RemoteConfig {
        name: "weather".to_string(),
        url: "http://127.0.0.1:8001".to_string(),
        pool_size: None,
        tools: weather_tools(),
    }]
}

/// Text-to-image provider. The tool is only offered when `api_key` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub api_key: Option<String>,

    /// Default: https://dashscope.aliyuncs.com/api/v1
    pub base_url: String,

    pub model: String,
    pub width: u32,
    pub height: u32,
    pub num_images: u32,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub save_dir: PathBuf,
    pub save_format: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            model: "wanx-v1".to_string(),
            width: 1024,
            height: 1024,
            num_images: 1,
            poll_interval_ms: 2_000,
            max_polls: 30,
            save_dir: PathBuf::from("./generated_images"),
            save_format: "png".to_string(),
        }
    }
}

impl ImageConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest a task may spend being polled before it is given up on.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval() * self.max_polls
    }

    /// Provider size string, `W*H`.
    pub fn size(&self) -> String {
        format!("{}*{}", self.width, self.height)
    }
}

/// The weather service and its upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,

    /// Default: https://restapi.amap.com
    pub base_url: String,

    pub bind: String,
    pub port: u16,

    pub request_timeout_ms: u64,

    /// Sessions idle longer than this are reaped.
    pub session_idle_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://restapi.amap.com".to_string(),
            bind: "127.0.0.1".to_string(),
            port: 8001,
            request_timeout_ms: 10_000,
            session_idle_secs: 1_800,
        }
    }
}

impl WeatherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}
