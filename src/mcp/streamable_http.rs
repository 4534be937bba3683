//! Streamable HTTP transport for the MCP server.
//!
//! `POST /mcp` carries a JSON-RPC envelope or batch. Each request is
//! classified before any session lookup: an `initialize` without a session
//! header opens a new session, a known `mcp-session-id` reuses that session's
//! channel, and everything else is rejected with `-32000`. Responses are one
//! JSON body or, for sessions that negotiated streaming, a short SSE stream
//! of `message` events. `DELETE /mcp` ends a session.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use jsonrpc_core::types::request::Call;
use jsonrpc_core::types::response::Output;
use jsonrpc_core::{Error as RpcError, Id, Value};

use crate::mcp::server::McpServer;
use crate::mcp::session::{ResponseMode, Session, SessionRegistry};
use crate::mcp::types::{error_codes, failure_output, rpc_error, MCP_SESSION_ID_HEADER};

/// Router builder for the Streamable HTTP transport.
pub fn create_streamable_http_router(state: StreamableHttpState) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(handle_streamable_post).delete(handle_streamable_delete),
        )
        .with_state(state)
}

/// Shared state for the Streamable HTTP transport.
#[derive(Clone)]
pub struct StreamableHttpState {
    server: Arc<McpServer>,
    sessions: Arc<SessionRegistry>,
    json_response: bool,
}

impl StreamableHttpState {
    /// With `json_response` set, every session answers with plain JSON bodies.
    pub fn new(server: Arc<McpServer>, sessions: Arc<SessionRegistry>, json_response: bool) -> Self {
        Self {
            server,
            sessions,
            json_response,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn negotiate_mode(&self, headers: &HeaderMap) -> ResponseMode {
        if self.json_response {
            return ResponseMode::Json;
        }
        let accepts_sse = headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|accept| accept_contains(accept, "text/event-stream"));
        if accepts_sse {
            ResponseMode::Stream
        } else {
            ResponseMode::Json
        }
    }

    /// Create a session, connect it to the server and bind its channel.
    async fn open_session(&self, headers: &HeaderMap) -> Result<Arc<Session>, McpHttpError> {
        let session = self.sessions.create(self.negotiate_mode(headers)).await;
        let channel = self.server.connect(session.context().clone());
        self.sessions.bind(session.id(), channel).map_err(|err| {
            tracing::error!(session_id = %session.id(), error = %err, "failed to bind new session");
            McpHttpError::internal_error()
        })?;
        Ok(session)
    }
}

/// Where an inbound request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route<'a> {
    Initialize,
    Existing(&'a str),
    Reject,
}

/// Decide the route from the header and body alone, before touching sessions.
fn classify<'a>(session_id: Option<&'a str>, payload: &Value) -> Route<'a> {
    match session_id {
        Some(id) => Route::Existing(id),
        None if is_initialize_request(payload) => Route::Initialize,
        None => Route::Reject,
    }
}

/// True for an `initialize` envelope, or a batch containing one.
pub fn is_initialize_request(payload: &Value) -> bool {
    let is_initialize =
        |message: &Value| message.get("method").and_then(Value::as_str) == Some("initialize");
    match payload {
        Value::Array(batch) => batch.iter().any(is_initialize),
        message => is_initialize(message),
    }
}

/// Handle POST /mcp requests.
async fn handle_streamable_post(
    State(state): State<StreamableHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, McpHttpError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        tracing::warn!(error = %err, "failed to parse JSON-RPC payload");
        McpHttpError::parse_error()
    })?;
    let session_header = session_header(&headers)?;

    let route = classify(session_header, &payload);
    if route == Route::Reject {
        tracing::warn!("rejected request without a valid session");
        return Err(McpHttpError::invalid_session());
    }

    let (calls, is_batch) = parse_calls(payload)?;

    let (session, created) = match route {
        Route::Existing(id) => {
            let session = state.sessions.lookup(id).map_err(|_| {
                tracing::warn!(session_id = %id, "rejected request for unknown session");
                McpHttpError::invalid_session()
            })?;
            (session, false)
        }
        Route::Initialize => (state.open_session(&headers).await?, true),
        Route::Reject => return Err(McpHttpError::invalid_session()),
    };

    let outputs = match session.submit(calls).await {
        Ok(outputs) => outputs,
        Err(err) => {
            tracing::error!(session_id = %session.id(), error = %err, "session failed to process request");
            if created {
                if let Err(err) = state.sessions.evict(session.id()).await {
                    tracing::debug!(session_id = %session.id(), error = %err, "failed to evict unusable session");
                }
            }
            return Err(McpHttpError::internal_error());
        }
    };

    let mut response = if outputs.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else {
        match session.mode() {
            ResponseMode::Json => json_response(outputs, is_batch)?,
            ResponseMode::Stream => sse_response(outputs),
        }
    };

    if created {
        let value = HeaderValue::from_str(session.id()).map_err(|_| McpHttpError::internal_error())?;
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    Ok(response)
}

/// Handle DELETE /mcp: terminate the session named by the header.
async fn handle_streamable_delete(
    State(state): State<StreamableHttpState>,
    headers: HeaderMap,
) -> Result<Response, McpHttpError> {
    let id = session_header(&headers)?.ok_or_else(McpHttpError::invalid_session)?;
    state
        .sessions
        .evict(id)
        .await
        .map_err(|_| McpHttpError::invalid_session())?;
    Ok(StatusCode::OK.into_response())
}

fn session_header(headers: &HeaderMap) -> Result<Option<&str>, McpHttpError> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .map(|value| value.to_str().map_err(|_| McpHttpError::invalid_session()))
        .transpose()
}

fn parse_calls(payload: Value) -> Result<(Vec<Call>, bool), McpHttpError> {
    let request: jsonrpc_core::Request = serde_json::from_value(payload).map_err(|err| {
        tracing::warn!(error = %err, "body is not a JSON-RPC request");
        McpHttpError::invalid_request()
    })?;
    match request {
        jsonrpc_core::Request::Single(call) => Ok((vec![call], false)),
        jsonrpc_core::Request::Batch(calls) if calls.is_empty() => {
            Err(McpHttpError::invalid_request())
        }
        jsonrpc_core::Request::Batch(calls) => Ok((calls, true)),
    }
}

fn json_response(outputs: Vec<Output>, is_batch: bool) -> Result<Response, McpHttpError> {
    let body = if is_batch {
        serde_json::to_vec(&outputs)
    } else {
        serde_json::to_vec(&outputs[0])
    }
    .map_err(|_| McpHttpError::internal_error())?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(Body::from(body))
        .map_err(|_| McpHttpError::internal_error())
}

/// One `message` event per response; the stream ends after the last one.
fn sse_response(outputs: Vec<Output>) -> Response {
    let events = outputs.into_iter().map(|output| {
        let data = serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(Event::default().event("message").data(data))
    });
    Sse::new(futures::stream::iter(events)).into_response()
}

fn accept_contains(accept: &str, needle: &str) -> bool {
    accept
        .split(',')
        .any(|part| part.trim().starts_with(needle))
}

/// Transport-level failure, rendered as a JSON-RPC error envelope with a null id.
#[derive(Debug)]
pub struct McpHttpError {
    status: StatusCode,
    error: RpcError,
}

impl McpHttpError {
    pub fn invalid_session() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: rpc_error(
                error_codes::INVALID_SESSION,
                "Bad Request: No valid session ID provided",
            ),
        }
    }

    pub fn parse_error() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: rpc_error(error_codes::PARSE_ERROR, "Parse error"),
        }
    }

    pub fn invalid_request() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: rpc_error(error_codes::INVALID_REQUEST, "Invalid Request"),
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: rpc_error(error_codes::INTERNAL_ERROR, "Internal server error"),
        }
    }
}

impl IntoResponse for McpHttpError {
    fn into_response(self) -> Response {
        (self.status, Json(failure_output(Id::Null, self.error))).into_response()
    }
}
