// HTTP Server
// REST valuation endpoints, health, and composition with the MCP transport

use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderName, Method, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::gateway::amap::AmapClient;
use crate::gateway::llm::OpenAiCompatibleClient;
use crate::gateway::{ExternalDependencyError, ExternalGateway};
use crate::mcp::dispatcher::EXTERNAL_ERROR_MESSAGE;
use crate::mcp::tools::browser::RemoteBrowserExecutor;
use crate::mcp::{
    create_streamable_http_router, default_registry, spawn_idle_sweeper, McpHttpError, McpServer,
    ServerInfo, SessionRegistry, StreamableHttpState, ToolDispatcher, MCP_SESSION_ID_HEADER,
};
use crate::observability::with_trace_id;
use crate::valuation::coordinate::{Coordinate, CoordinateError};
use crate::valuation::{ValuationOptions, ValuationRecord, ValuationService};

/// Frames buffered between the completion stream and a slow client.
const STREAM_BUFFER: usize = 16;

/// Everything the HTTP surface serves from.
#[derive(Clone)]
pub struct AppServices {
    pub server: Arc<McpServer>,
    pub sessions: Arc<SessionRegistry>,
    pub valuation: Arc<ValuationService>,
}

impl AppServices {
    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let gateway = ExternalGateway::new()?;

        let geo = Arc::new(AmapClient::new(
            gateway.clone(),
            config.amap.base_url.clone(),
            config.amap.key.clone(),
            config.amap.timeout,
        ));
        let llm = Arc::new(OpenAiCompatibleClient::new(
            gateway.clone(),
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
            config.llm.timeout,
        ));
        let executor = Arc::new(RemoteBrowserExecutor::new(
            gateway,
            config.browser.base_url.clone(),
            config.browser.timeout,
        ));

        let registry = default_registry(executor, geo.clone())
            .context("failed to register the tool catalogue")?;
        info!(tools = registry.len(), "tool registry ready");

        let server = Arc::new(McpServer::new(
            ToolDispatcher::new(Arc::new(registry)),
            ServerInfo {
                name: config.mcp.server_name.clone(),
                version: config.mcp.server_version.clone(),
                protocol_version: config.mcp.protocol_version.clone(),
            },
        ));
        let valuation = Arc::new(ValuationService::new(
            geo,
            llm,
            ValuationOptions {
                lookup_nearby_services: config.valuation.lookup_nearby_services,
                nearby_radius_m: config.valuation.nearby_radius_m,
            },
        ));

        Ok(Self {
            server,
            sessions: Arc::new(SessionRegistry::new(config.sessions.max_sessions)),
            valuation,
        })
    }
}

#[derive(Clone)]
struct AppState {
    valuation: Arc<ValuationService>,
    sessions: Arc<SessionRegistry>,
    started: Instant,
}

/// Normalized success envelope: `{code:0, message:"", ret:{data}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i32,
    pub message: String,
    pub ret: ApiData<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiData<T> {
    pub data: T,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            message: String::new(),
            ret: ApiData { data },
        }
    }
}

/// Narrative report payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct NarrativeReport {
    pub valuation: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    active_sessions: usize,
}

/// REST boundary failure.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid parameter: {0}")]
    BadRequest(String),

    #[error(transparent)]
    ExternalDependency(#[from] ExternalDependencyError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoordinateError> for ApiError {
    fn from(err: CoordinateError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ExternalDependency(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Downstream detail stays in the logs.
        let message = match &self {
            ApiError::BadRequest(_) => self.to_string(),
            ApiError::ExternalDependency(_) => EXTERNAL_ERROR_MESSAGE.to_string(),
            ApiError::Internal(_) => "internal server error".to_string(),
        };
        (
            status,
            Json(ErrorBody {
                code: status.as_u16(),
                message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub location: Option<String>,
}

/// Missing and empty `location` are both rejected before parsing.
fn parse_location(query: LocationQuery) -> Result<Coordinate, ApiError> {
    let raw = query.location.unwrap_or_default();
    Ok(Coordinate::parse(raw.trim())?)
}

/// Build the application router: REST endpoints plus the MCP transport.
pub fn create_app(services: AppServices, config: &ServerConfig) -> Router {
    let state = AppState {
        valuation: services.valuation,
        sessions: services.sessions.clone(),
        started: Instant::now(),
    };

    let mcp = create_streamable_http_router(StreamableHttpState::new(
        services.server,
        services.sessions,
        config.mcp.json_response,
    ));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/shop/valuation", get(shop_valuation))
        .route("/api/v1/shop/valuationByAI", get(shop_valuation_narrative))
        .route(
            "/api/v1/shop/valuationByAI/stream",
            get(shop_valuation_narrative_stream),
        )
        .with_state(state)
        .merge(mcp)
        .layer(DefaultBodyLimit::max(config.server.max_request_size));

    let app = if config.server.enable_cors {
        app.layer(cors_layer())
    } else {
        app
    };

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(handle_panic)),
    )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allow_headers(cors::Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID_HEADER)])
}

/// Last resort: a panicking handler still answers with the internal-error envelope.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "request handler panicked");
    McpHttpError::internal_error().into_response()
}

/// Bind, serve until interrupted, then close every live session.
pub async fn start_server(config: ServerConfig, services: AppServices) -> Result<()> {
    let sessions = services.sessions.clone();
    let sweeper = spawn_idle_sweeper(
        sessions.clone(),
        config.sessions.idle_timeout,
        config.sessions.sweep_interval,
    );

    let app = create_app(services, &config);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("shopmcp HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    sessions.close_all().await;
    info!("shopmcp HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started.elapsed().as_secs(),
        active_sessions: state.sessions.len(),
    })
}

async fn shop_valuation(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<ApiEnvelope<ValuationRecord>>, ApiError> {
    let location = parse_location(query)?;
    let record = with_trace_id("shop_valuation", state.valuation.assess(location)).await?;
    Ok(Json(ApiEnvelope::ok(record)))
}

async fn shop_valuation_narrative(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<ApiEnvelope<NarrativeReport>>, ApiError> {
    let location = parse_location(query)?;
    let valuation =
        with_trace_id("shop_valuation_narrative", state.valuation.narrative(location)).await?;
    Ok(Json(ApiEnvelope::ok(NarrativeReport { valuation })))
}

/// Stream the narrative as `data: {"delta": ..}` frames closed by one `data: [DONE]`.
///
/// Failures before the first delta are ordinary 502 responses. Once frames
/// flow, a failure becomes a single error frame ahead of `[DONE]`.
async fn shop_valuation_narrative_stream(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Response, ApiError> {
    let location = parse_location(query)?;
    let mut deltas = with_trace_id(
        "shop_valuation_narrative_stream",
        state.valuation.narrative_stream(location),
    )
    .await?;

    let first = deltas.next().await;
    if let Some(Err(err)) = first {
        warn!(error = %err, "narrative stream failed before the first frame");
        return Err(err.into());
    }
    let mut deltas = futures::stream::iter(first).chain(deltas);

    let (tx, rx) = mpsc::channel::<Event>(STREAM_BUFFER);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("client disconnected; dropping narrative stream");
                    return;
                }
                next = deltas.next() => match next {
                    Some(Ok(delta)) => {
                        if tx.send(delta_event(&delta)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "narrative stream failed mid-flight");
                        let _ = tx.send(error_event()).await;
                        break;
                    }
                    None => break,
                },
            }
        }
        let _ = tx.send(Event::default().data("[DONE]")).await;
    });

    let frames = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(frames).into_response())
}

fn delta_event(delta: &str) -> Event {
    Event::default().data(serde_json::json!({ "delta": delta }).to_string())
}

fn error_event() -> Event {
    Event::default().data(serde_json::json!({ "error": EXTERNAL_ERROR_MESSAGE }).to_string())
}
