//! Remote tool services built from `[bridge]` and `[[remote]]`.

use std::sync::Arc;
use std::time::Duration;

use conciergeconf::{BridgeConfig, ConciergeConfig, DeclaredTool};
use relay::client::{ClientOptions, ClientPool, RemoteTools, SseClient};
use relay::{ParamType, ToolDescriptor, ToolParam};

use crate::dispatch::RemoteService;

pub fn client_options(bridge: &BridgeConfig) -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_millis(bridge.connect_timeout_ms),
        request_timeout: Duration::from_millis(bridge.request_timeout_ms),
        max_reconnect_attempts: bridge.max_reconnect_attempts,
        initial_backoff: Duration::from_millis(bridge.initial_backoff_ms),
        max_backoff: Duration::from_millis(bridge.max_backoff_ms),
        max_queued_calls: bridge.max_queued_calls,
        max_queue_wait: Duration::from_millis(bridge.max_queue_wait_ms),
        ..ClientOptions::with_name("concierge", env!("CARGO_PKG_VERSION"))
    }
}

/// Descriptor for a tool declared in config. Unknown type names fall back to
/// string; config validation rejects them before this point.
pub fn declared_descriptor(tool: &DeclaredTool) -> ToolDescriptor {
    let mut descriptor = ToolDescriptor::new(&tool.name, &tool.description);
    if let Some(title) = &tool.title {
        descriptor = descriptor.with_title(title);
    }
    descriptor.with_params(tool.params.iter().map(|p| {
        let param_type = ParamType::from_schema_type(&p.param_type).unwrap_or(ParamType::String);
        let param = if p.required {
            ToolParam::required(&p.name, param_type)
        } else {
            ToolParam::optional(&p.name, param_type)
        };
        match &p.description {
            Some(description) => param.with_description(description),
            None => param,
        }
    }))
}

/// One service per configured remote. Nothing connects until first use.
pub fn remote_services(config: &ConciergeConfig) -> Vec<RemoteService> {
    let options = client_options(&config.bridge);
    config
        .remote
        .iter()
        .map(|remote| {
            let size = remote.pool_size.unwrap_or(config.bridge.pool_size);
            tracing::debug!(
                name = %remote.name,
                url = %remote.url,
                pool = size,
                declared = remote.tools.len(),
                "remote service"
            );
            let client: Arc<dyn RemoteTools> = if size > 1 {
                Arc::new(ClientPool::new(&remote.url, size, options.clone()))
            } else {
                Arc::new(SseClient::new(&remote.url, options.clone()))
            };
            RemoteService::new(client).with_declared(remote.tools.iter().map(declared_descriptor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conciergeconf::{DeclaredParam, RemoteConfig};
    use serde_json::json;

    #[test]
    fn test_options_follow_bridge_config() {
        let bridge = BridgeConfig {
            connect_timeout_ms: 1_500,
            max_queued_calls: 3,
            ..Default::default()
        };
        let options = client_options(&bridge);
        assert_eq!(options.connect_timeout, Duration::from_millis(1_500));
        assert_eq!(options.max_queued_calls, 3);
        assert_eq!(options.client_name, "concierge");
    }

    #[test]
    fn test_one_service_per_remote() {
        let mut config = ConciergeConfig::default();
        config.remote.push(RemoteConfig {
            name: "maps".to_string(),
            url: "http://127.0.0.1:9002/".to_string(),
            pool_size: Some(3),
            tools: Vec::new(),
        });
        let services = remote_services(&config);
        let endpoints: Vec<_> = services.iter().map(|s| s.client.endpoint().to_string()).collect();
        assert_eq!(endpoints, vec!["http://127.0.0.1:8001", "http://127.0.0.1:9002"]);
        assert!(services[1].declared.is_empty());
    }

    #[test]
    fn test_default_weather_remote_declares_its_tools() {
        let services = remote_services(&ConciergeConfig::default());
        let current = &services[0].declared[0];
        assert_eq!(current.name, "query_current_weather");
        assert_eq!(current.label(), "weather lookup");
        assert!(current.validate(&json!({ "city": "Beijing" })).is_ok());
        assert!(current.validate(&json!({})).is_err());

        let forecast = &services[0].declared[1];
        assert!(forecast.param("filter_indices").is_some_and(|p| !p.required));
    }

    #[test]
    fn test_declared_param_types() {
        let tool = DeclaredTool {
            name: "route_plan".to_string(),
            title: None,
            description: "Driving route".to_string(),
            params: vec![DeclaredParam {
                name: "avoid_tolls".to_string(),
                param_type: "boolean".to_string(),
                required: false,
                description: None,
            }],
        };
        let descriptor = declared_descriptor(&tool);
        assert_eq!(descriptor.label(), "route_plan");
        assert_eq!(descriptor.params[0].param_type, ParamType::Boolean);
        assert!(descriptor.validate(&json!({ "avoid_tolls": "yes" })).is_err());
    }
}
