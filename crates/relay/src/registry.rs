//! Service-side tool catalogue.
//!
//! A [`ToolRegistry`] maps tool names to a descriptor and a handler. It is
//! built once at startup and then shared read-only by every connection.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::descriptor::ToolDescriptor;
use crate::types::invocation::{FailureKind, ToolError, ToolInvocationResult};

/// Runs one tool. Arguments have already been validated against the
/// descriptor the handler was registered with.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Handler over a closure taking raw JSON arguments.
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.f)(arguments).await
    }
}

/// Handler over a closure taking a typed argument struct.
pub struct TypedHandler<A, F> {
    f: F,
    _args: PhantomData<fn() -> A>,
}

pub fn typed<A, F, Fut>(f: F) -> TypedHandler<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    TypedHandler {
        f,
        _args: PhantomData,
    }
}

#[async_trait]
impl<A, F, Fut> ToolHandler for TypedHandler<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let args: A = serde_json::from_value(arguments)
            .map_err(|e| ToolError::schema_mismatch(format!("invalid arguments: {}", e)))?;
        (self.f)(args).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}

#[derive(Clone)]
struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler,
    ) -> Result<(), RegistryError> {
        self.register_arc(descriptor, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, "registered tool");
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.get(name).map(|t| &t.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Validate and run a tool. Never panics; a panicking handler becomes
    /// `Failure{Internal}`.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolInvocationResult {
        let Some(tool) = self.get(name) else {
            return ToolInvocationResult::failure(
                FailureKind::UnknownTool,
                format!("unknown tool '{}'", name),
            );
        };

        if let Err(violation) = tool.descriptor.validate(&arguments) {
            return ToolInvocationResult::failure(FailureKind::SchemaMismatch, violation.to_string());
        }

        let handler = Arc::clone(&tool.handler);
        match AssertUnwindSafe(handler.call(arguments)).catch_unwind().await {
            Ok(outcome) => outcome.into(),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(tool = %name, panic = %detail, "tool handler panicked");
                ToolInvocationResult::failure(FailureKind::Internal, "tool handler failed")
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| &t.descriptor.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Collects registrations; the first duplicate aborts the build.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
    error: Option<RegistryError>,
}

impl ToolRegistryBuilder {
    pub fn tool(mut self, descriptor: ToolDescriptor, handler: impl ToolHandler) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.registry.register(descriptor, handler) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.registry),
        }
    }
}
