/// MCP Tools Implementation
///
/// Tools are registered once at startup as [`ToolDescriptor`]s (name, declarative
/// input schema, handler). After startup the [`ToolRegistry`] is shared behind an
/// `Arc` and only read, so lookups need no locking.
pub mod browser;
pub mod geo;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::gateway::{ExternalDependencyError, GeoProvider};
use crate::mcp::dispatcher::DispatchError;
use crate::mcp::schema::{ToolArgs, ToolSchema};
use crate::mcp::session::SessionContext;
use crate::mcp::types::ToolDefinition;

pub use browser::{BrowserExecutor, RemoteBrowserExecutor};
pub use geo::QueryRegeoTool;

/// Failure raised by a tool handler.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    External(#[from] ExternalDependencyError),

    /// Input passed schema validation but is semantically unusable.
    #[error("invalid parameter '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("internal tool failure: {0}")]
    Internal(String),
}

/// Trait for MCP tool handlers
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool. `args` has already passed schema validation.
    async fn call(&self, ctx: &SessionContext, args: ToolArgs) -> Result<Value, ToolError>;
}

/// Notified when a session ends, so tools can release per-session resources.
#[async_trait::async_trait]
pub trait SessionHook: Send + Sync {
    async fn session_closed(&self, ctx: &SessionContext);
}

/// A registered tool.
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.json_schema(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("params", &self.schema.params.len())
            .finish()
    }
}

/// Name-keyed tool table. Registration order is preserved for `tools/list`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), DispatchError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(DispatchError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, "registered tool");
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ToolDescriptor>, DispatchError> {
        self.index
            .get(name)
            .map(|&slot| self.tools[slot].clone())
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))
    }

    /// Get all available tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    pub fn register_session_hook(&mut self, hook: Arc<dyn SessionHook>) {
        self.hooks.push(hook);
    }

    pub fn session_hooks(&self) -> &[Arc<dyn SessionHook>] {
        &self.hooks
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registry with the full shipped catalogue: browser tools plus `query_regeo`.
pub fn default_registry(
    executor: Arc<dyn BrowserExecutor>,
    geo: Arc<dyn GeoProvider>,
) -> Result<ToolRegistry, DispatchError> {
    let mut registry = ToolRegistry::new();
    browser::register_browser_tools(&mut registry, executor)?;
    geo::register_geo_tools(&mut registry, geo)?;
    Ok(registry)
}
