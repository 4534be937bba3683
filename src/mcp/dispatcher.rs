//! Tool Dispatcher
//!
//! Resolves a tool, validates its arguments, runs the handler and classifies
//! the outcome. A handler that fails or panics produces a [`DispatchError`];
//! nothing escapes to the session worker.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use jsonrpc_core::Error as RpcError;
use serde_json::{json, Value};

use crate::gateway::ExternalDependencyError;
use crate::mcp::schema::{validate, ValidationError};
use crate::mcp::session::SessionContext;
use crate::mcp::tools::{ToolError, ToolRegistry};
use crate::mcp::types::{error_codes, rpc_error, CallToolResult, ToolDefinition};

/// Caller-facing message for downstream failures. Details stay in the logs.
pub const EXTERNAL_ERROR_MESSAGE: &str = "third-party service error";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("missing required parameter '{field}'")]
    MissingParameter { field: String },

    #[error("invalid parameter '{field}': {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error(transparent)]
    ExternalDependency(#[from] ExternalDependencyError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// JSON-RPC error code reported to the client.
    pub fn code(&self) -> i64 {
        match self {
            DispatchError::UnknownTool(_) => error_codes::METHOD_NOT_FOUND,
            DispatchError::MissingParameter { .. } | DispatchError::InvalidParameter { .. } => {
                error_codes::INVALID_PARAMS
            }
            DispatchError::ExternalDependency(_) => error_codes::EXTERNAL_DEPENDENCY,
            DispatchError::DuplicateTool(_) | DispatchError::Internal(_) => {
                error_codes::INTERNAL_ERROR
            }
        }
    }

    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            DispatchError::UnknownTool(name) => {
                rpc_error(self.code(), format!("Unknown tool: {name}"))
            }
            DispatchError::MissingParameter { field }
            | DispatchError::InvalidParameter { field, .. } => {
                let mut error = rpc_error(self.code(), self.to_string());
                error.data = Some(json!({ "field": field }));
                error
            }
            DispatchError::ExternalDependency(_) => rpc_error(self.code(), EXTERNAL_ERROR_MESSAGE),
            DispatchError::DuplicateTool(_) | DispatchError::Internal(_) => {
                rpc_error(self.code(), "Internal error")
            }
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MissingParameter { field } => DispatchError::MissingParameter { field },
            ValidationError::InvalidParameter { field, reason } => {
                DispatchError::InvalidParameter { field, reason }
            }
        }
    }
}

impl From<ToolError> for DispatchError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::External(err) => DispatchError::ExternalDependency(err),
            ToolError::InvalidInput { field, reason } => {
                DispatchError::InvalidParameter { field, reason }
            }
            ToolError::Internal(message) => DispatchError::Internal(message),
        }
    }
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Run one tool call on behalf of a session.
    pub async fn dispatch(
        &self,
        tool: &str,
        raw_args: &Value,
        ctx: &SessionContext,
    ) -> Result<CallToolResult, DispatchError> {
        let started = Instant::now();
        let outcome = self.run(tool, raw_args, ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => tracing::debug!(session_id = %ctx.id, tool, elapsed_ms, "tool call succeeded"),
            Err(DispatchError::Internal(message)) => tracing::error!(
                session_id = %ctx.id,
                tool,
                elapsed_ms,
                error = %message,
                "tool call failed internally"
            ),
            Err(err) => tracing::warn!(
                session_id = %ctx.id,
                tool,
                elapsed_ms,
                code = err.code(),
                error = %err,
                "tool call failed"
            ),
        }
        outcome
    }

    async fn run(
        &self,
        tool: &str,
        raw_args: &Value,
        ctx: &SessionContext,
    ) -> Result<CallToolResult, DispatchError> {
        let descriptor = self.registry.resolve(tool)?;
        let args = validate(&descriptor.schema, raw_args)?;

        match AssertUnwindSafe(descriptor.handler.call(ctx, args))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(CallToolResult::from_value(&value)),
            Ok(Err(err)) => Err(err.into()),
            Err(panic) => Err(DispatchError::Internal(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Run the registered session hooks for a session that has ended.
    pub async fn session_closed(&self, ctx: &SessionContext) {
        for hook in self.registry.session_hooks() {
            hook.session_closed(ctx).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
