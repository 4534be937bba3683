// ShopMCP server - MCP tool dispatch and shop valuation over HTTP
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use shopmcp::{init_logging_with_level, start_server, AppServices, ServerConfig};
use tracing::info;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "ShopMCP - browser automation tools and shop site valuation over MCP",
    long_about = None,
    after_help = "ENVIRONMENT:
  PORT, HOST                          listen address
  AMAP_HTTP_KEY, AMAP_HTTP_TIMEOUT    map provider key and timeout (ms)
  LLM_API_KEY / MOONSHOT_API_KEY      language model credentials
  BROWSER_BASE_URL                    browser automation backend
  LOG_LEVEL, RUST_LOG                 log filtering

EXAMPLES:
  shopmcp-server --port 3000
  shopmcp-server --config shopmcp.toml -v"
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host, overrides config and HOST
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides config and PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;

    init_logging_with_level(&config.logging.level, cli.verbose, cli.quiet)?;
    info!(
        name = %config.mcp.server_name,
        version = %config.mcp.server_version,
        "starting shopmcp server"
    );

    let services = AppServices::from_config(&config)?;
    start_server(config, services).await
}
