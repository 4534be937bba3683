/// Model Context Protocol (MCP) tool-dispatch layer.
///
/// Session-multiplexed JSON-RPC over HTTP: the transport router binds each
/// request to a session, the session's worker hands tool calls to the
/// dispatcher, and the dispatcher validates and runs registered tools.
pub mod dispatcher;
pub mod schema;
pub mod server;
pub mod session;
pub mod streamable_http;
pub mod tools;
pub mod types;

pub use dispatcher::{DispatchError, ToolDispatcher};
pub use schema::{validate, ParamSpec, ParamType, ToolArgs, ToolSchema, ValidationError};
pub use server::McpServer;
pub use session::{
    spawn_idle_sweeper, ResponseMode, Session, SessionContext, SessionError, SessionRegistry,
};
pub use streamable_http::{create_streamable_http_router, McpHttpError, StreamableHttpState};
pub use tools::{default_registry, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
pub use types::*;
