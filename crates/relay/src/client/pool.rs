use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ClientError, ClientOptions, ConnectionStatus, RemoteTools, SseClient};
use crate::types::descriptor::ToolDescriptor;
use crate::types::invocation::ToolInvocationResult;

/// Several connections to the same service, used round-robin.
#[derive(Debug)]
pub struct ClientPool {
    endpoint: String,
    clients: Vec<SseClient>,
    next: AtomicUsize,
}

impl ClientPool {
    /// `size` is clamped to at least one connection.
    pub fn new(base_url: impl Into<String>, size: usize, options: ClientOptions) -> Self {
        let endpoint: String = base_url.into();
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let clients = (0..size.max(1))
            .map(|_| SseClient::new(endpoint.clone(), options.clone()))
            .collect();
        Self {
            endpoint,
            clients,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.clients.iter().map(SseClient::status).collect()
    }

    fn pick(&self) -> &SseClient {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[index]
    }
}

#[async_trait]
impl RemoteTools for ClientPool {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.pick().list_tools().await
    }

    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> ToolInvocationResult {
        self.pick().call_tool(name, arguments, timeout).await
    }
}
