//! In-process tools.
//!
//! Local tools share the registry machinery of remote services, so a local
//! call gets the same validation and panic isolation as a remote one.

mod image;
mod schedule;

pub use image::{ImageArgs, ImageGenerator};
pub use schedule::{ScheduleArgs, ScheduleLookup};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conciergeconf::ConciergeConfig;
use relay::{RegistryError, ToolDescriptor, ToolError, ToolHandler, ToolInvocationResult, ToolRegistry};
use serde_json::Value;

#[async_trait]
pub trait LocalTool: Send + Sync + 'static {
    fn descriptor(&self) -> ToolDescriptor;

    /// Own bound on one call, for tools that legitimately outlast the
    /// dispatch-wide tool timeout. The longer of the two applies.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

struct LocalHandler<T>(Arc<T>);

#[async_trait]
impl<T: LocalTool> ToolHandler for LocalHandler<T> {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        self.0.call(arguments).await
    }
}

#[derive(Debug, Default)]
pub struct LocalToolSet {
    registry: ToolRegistry,
    timeouts: HashMap<String, Duration>,
}

impl LocalToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The schedule lookup always; image generation only with an API key.
    pub fn from_config(config: &ConciergeConfig) -> Result<Self, RegistryError> {
        let mut tools = Self::new().with_tool(ScheduleLookup::new())?;
        if config.image.enabled() {
            tools = tools.with_tool(ImageGenerator::new(config.image.clone()))?;
        } else {
            tracing::info!("image generation disabled: no image.api_key");
        }
        Ok(tools)
    }

    pub fn with_tool<T: LocalTool>(mut self, tool: T) -> Result<Self, RegistryError> {
        let tool = Arc::new(tool);
        let descriptor = tool.descriptor();
        let name = descriptor.name.clone();
        self.registry
            .register(descriptor, LocalHandler(Arc::clone(&tool)))?;
        if let Some(timeout) = tool.timeout() {
            self.timeouts.insert(name, timeout);
        }
        Ok(self)
    }

    /// The tool's own timeout, if it declared one.
    pub fn timeout_for(&self, name: &str) -> Option<Duration> {
        self.timeouts.get(name).copied()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.list()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.descriptor(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolInvocationResult {
        self.registry.invoke(name, arguments).await
    }
}
