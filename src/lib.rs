// ShopMCP - Session-multiplexed MCP tool server
// Root library module

pub mod config;
pub mod gateway;
pub mod http_server;
pub mod mcp;
pub mod observability;
pub mod valuation;

// Re-export key types
pub use config::ServerConfig;
pub use observability::{init_logging_with_level, with_trace_id};

pub use gateway::{DependencyFailure, ExternalDependencyError, ExternalGateway};

pub use http_server::{create_app, start_server, ApiEnvelope, ApiError, AppServices};

pub use mcp::{
    DispatchError, McpServer, SessionRegistry, ToolDispatcher, ToolRegistry, MCP_SESSION_ID_HEADER,
};

pub use valuation::coordinate::{Coordinate, CoordinateError};
pub use valuation::{ValuationOptions, ValuationRecord, ValuationService};
