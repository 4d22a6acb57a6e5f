//! Merged view of local and remote tools.

use std::collections::HashMap;
use std::sync::Arc;

use relay::client::RemoteTools;
use relay::ToolDescriptor;
use tokio::sync::RwLock;

use crate::tools::LocalToolSet;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("tool '{name}' is offered by both {first} and {second}")]
    DuplicateTool {
        name: String,
        first: String,
        second: String,
    },
}

/// Where a tool call goes.
#[derive(Clone)]
pub enum Route {
    Local,
    Remote(Arc<dyn RemoteTools>),
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Local => f.write_str("Local"),
            Route::Remote(remote) => f.debug_tuple("Remote").field(&remote.endpoint()).finish(),
        }
    }
}

/// A remote tool service plus the tools it is expected to offer. Declared
/// tools are routable until the service answers a listing, which then
/// replaces them.
#[derive(Clone)]
pub struct RemoteService {
    pub client: Arc<dyn RemoteTools>,
    pub declared: Vec<ToolDescriptor>,
}

impl RemoteService {
    pub fn new(client: Arc<dyn RemoteTools>) -> Self {
        Self {
            client,
            declared: Vec::new(),
        }
    }

    pub fn with_declared(mut self, tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        self.declared.extend(tools);
        self
    }
}

impl From<Arc<dyn RemoteTools>> for RemoteService {
    fn from(client: Arc<dyn RemoteTools>) -> Self {
        Self::new(client)
    }
}

impl std::fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("endpoint", &self.client.endpoint())
            .field("declared", &self.declared.iter().map(|d| &d.name).collect::<Vec<_>>())
            .finish()
    }
}

struct RemoteEntry {
    client: Arc<dyn RemoteTools>,
    declared: Vec<ToolDescriptor>,
    /// `None` until the service has answered `tools/list` once.
    discovered: RwLock<Option<Vec<ToolDescriptor>>>,
}

impl RemoteEntry {
    /// The listing once known, the declared tools until then.
    async fn tools(&self) -> Vec<ToolDescriptor> {
        match self.discovered.read().await.as_ref() {
            Some(tools) => tools.clone(),
            None => self.declared.clone(),
        }
    }

    async fn offers(&self, name: &str) -> bool {
        match self.discovered.read().await.as_ref() {
            Some(tools) => tools.iter().any(|d| d.name == name),
            None => self.declared.iter().any(|d| d.name == name),
        }
    }

    fn warn_missing_declared(&self, listing: &[ToolDescriptor]) {
        for declared in &self.declared {
            if !listing.iter().any(|d| d.name == declared.name) {
                tracing::warn!(
                    tool = %declared.name,
                    endpoint = %self.client.endpoint(),
                    "declared tool is not offered by the service"
                );
            }
        }
    }
}

pub struct Catalog {
    local: Arc<LocalToolSet>,
    remotes: Vec<RemoteEntry>,
}

impl Catalog {
    /// Discover every remote. Unreachable services are retried later and
    /// keep their declared tools meanwhile; a name clash between any two
    /// sources is an error.
    pub async fn build(
        local: Arc<LocalToolSet>,
        remotes: Vec<RemoteService>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self {
            local,
            remotes: remotes
                .into_iter()
                .map(|service| RemoteEntry {
                    client: service.client,
                    declared: service.declared,
                    discovered: RwLock::new(None),
                })
                .collect(),
        };

        let mut owners: HashMap<String, String> = catalog
            .local
            .descriptors()
            .into_iter()
            .map(|d| (d.name, "local tools".to_string()))
            .collect();

        for entry in &catalog.remotes {
            let discovered = discover(entry.client.as_ref()).await;
            let tools = discovered.as_deref().unwrap_or(&entry.declared);
            for tool in tools {
                if let Some(first) = owners.get(&tool.name) {
                    return Err(CatalogError::DuplicateTool {
                        name: tool.name.clone(),
                        first: first.clone(),
                        second: entry.client.endpoint().to_string(),
                    });
                }
                owners.insert(tool.name.clone(), entry.client.endpoint().to_string());
            }
            if let Some(tools) = discovered {
                entry.warn_missing_declared(&tools);
                *entry.discovered.write().await = Some(tools);
            }
        }

        Ok(catalog)
    }

    /// Retry discovery for services that have never answered. Known
    /// listings are left alone.
    pub async fn refresh_missing(&self) {
        for (index, entry) in self.remotes.iter().enumerate() {
            if entry.discovered.read().await.is_some() {
                continue;
            }
            let Some(tools) = discover(entry.client.as_ref()).await else {
                continue;
            };
            entry.warn_missing_declared(&tools);

            let mut known = self.local.descriptors();
            for (other_index, other) in self.remotes.iter().enumerate() {
                if other_index != index {
                    known.extend(other.tools().await);
                }
            }
            let (accepted, clashing): (Vec<_>, Vec<_>) = tools
                .into_iter()
                .partition(|tool| !known.iter().any(|k| k.name == tool.name));
            for tool in &clashing {
                tracing::error!(
                    tool = %tool.name,
                    endpoint = %entry.client.endpoint(),
                    "remote tool name already taken; ignoring it"
                );
            }

            let mut slot = entry.discovered.write().await;
            if slot.is_none() {
                tracing::info!(
                    endpoint = %entry.client.endpoint(),
                    tools = accepted.len(),
                    "discovered remote tools"
                );
                *slot = Some(accepted);
            }
        }
    }

    /// Local tools first, then each remote in configuration order.
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut all = self.local.descriptors();
        for entry in &self.remotes {
            all.extend(entry.tools().await);
        }
        all
    }

    pub async fn route(&self, name: &str) -> Option<Route> {
        if self.local.contains(name) {
            return Some(Route::Local);
        }
        for entry in &self.remotes {
            if entry.offers(name).await {
                return Some(Route::Remote(Arc::clone(&entry.client)));
            }
        }
        None
    }

    pub fn local(&self) -> &LocalToolSet {
        &self.local
    }

    /// Remote services that have not answered a listing yet.
    pub async fn undiscovered(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for entry in &self.remotes {
            if entry.discovered.read().await.is_none() {
                missing.push(entry.client.endpoint().to_string());
            }
        }
        missing
    }
}

async fn discover(client: &dyn RemoteTools) -> Option<Vec<ToolDescriptor>> {
    match client.list_tools().await {
        Ok(tools) => {
            tracing::info!(endpoint = %client.endpoint(), tools = tools.len(), "remote tools listed");
            Some(tools)
        }
        Err(e) => {
            tracing::warn!(endpoint = %client.endpoint(), error = %e, "remote tool discovery failed");
            None
        }
    }
}
