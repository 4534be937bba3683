// Shared fixtures for integration tests: fake collaborators and a live server
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use shopmcp::gateway::{
    ChatPrompt, CompletionProvider, CompletionStream, DependencyFailure, ExternalDependencyError,
    GeoProvider, PlaceQuery, Poi,
};
use shopmcp::mcp::tools::BrowserExecutor;
use shopmcp::mcp::{
    default_registry, McpServer, ServerInfo, SessionContext, SessionRegistry, ToolArgs,
    ToolDescriptor, ToolDispatcher, ToolError, ToolHandler, ToolSchema,
};
use shopmcp::{create_app, AppServices, Coordinate, ServerConfig, ValuationOptions, ValuationService};
use tokio::net::TcpListener;

pub const TEST_ADDRESS: &str = "1 Test Road, Xihu District, Hangzhou";

/// One executed browser action.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub session_id: String,
    pub tool: String,
    pub args: Map<String, Value>,
    pub started: Instant,
    pub finished: Instant,
}

/// Browser executor that echoes its arguments after an optional delay.
///
/// `playwright_evaluate` always fails with a downstream error whose detail
/// must never reach the client.
#[derive(Default)]
pub struct RecordingExecutor {
    pub delay: Duration,
    pub calls: Mutex<Vec<Invocation>>,
    pub released: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls_for(&self, session_id: &str) -> Vec<Invocation> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl BrowserExecutor for RecordingExecutor {
    async fn execute(
        &self,
        ctx: &SessionContext,
        tool: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ExternalDependencyError> {
        if tool == "playwright_evaluate" {
            return Err(ExternalDependencyError::new(
                "browser.execute",
                DependencyFailure::Status("HTTP 500: page crashed at 0xdeadbeef".into()),
            )
            .with_status(500));
        }
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().push(Invocation {
            session_id: ctx.id.clone(),
            tool: tool.to_string(),
            args: args.clone(),
            started,
            finished: Instant::now(),
        });
        Ok(json!({ "tool": tool, "args": args }))
    }

    async fn release(&self, ctx: &SessionContext) -> Result<(), ExternalDependencyError> {
        self.released.lock().push(ctx.id.clone());
        Ok(())
    }
}

/// Tool whose handler panics.
pub struct ExplodingTool;

#[async_trait::async_trait]
impl ToolHandler for ExplodingTool {
    async fn call(&self, _ctx: &SessionContext, _args: ToolArgs) -> Result<Value, ToolError> {
        panic!("handler exploded");
    }
}

/// Map provider with fixed answers.
#[derive(Default)]
pub struct FakeGeo {
    pub failing: bool,
}

#[async_trait::async_trait]
impl GeoProvider for FakeGeo {
    async fn place_around(&self, query: PlaceQuery) -> Result<Vec<Poi>, ExternalDependencyError> {
        if self.failing {
            return Err(unreachable_provider("amap.place_around"));
        }
        let poi = |name: &str, distance: &str| Poi {
            name: name.to_string(),
            distance: distance.to_string(),
        };
        Ok(match query.keywords.as_deref() {
            Some("公交站") => vec![poi("Wensan Road Bus Stop", "420"), poi("Xueyuan Bus Stop", "610")],
            Some("地铁站") => vec![poi("Gudang Station", "180")],
            _ => Vec::new(),
        })
    }

    async fn reverse_geocode(&self, _location: Coordinate) -> Result<String, ExternalDependencyError> {
        if self.failing {
            return Err(unreachable_provider("amap.regeo"));
        }
        Ok(TEST_ADDRESS.to_string())
    }
}

/// How the fake language model behaves.
#[derive(Debug, Clone, Default)]
pub enum LlmBehavior {
    /// Emit the chunks, then finish.
    #[default]
    Chunks,
    /// Refuse before producing anything.
    FailUpfront,
    /// Emit the chunks, then fail.
    FailMidStream,
    /// Emit deltas forever, reporting progress and teardown to the tracker.
    Endless(StreamTracker),
}

/// Observes an endless fake completion stream from the outside.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    pub polled: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicBool>,
}

impl StreamTracker {
    pub fn polled(&self) -> usize {
        self.polled.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Flags the tracker when the stream holding it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct FakeLlm {
    pub chunks: Vec<String>,
    pub behavior: LlmBehavior,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self {
            chunks: vec![
                "The site ".to_string(),
                "looks ".to_string(),
                "promising.".to_string(),
            ],
            behavior: LlmBehavior::Chunks,
        }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for FakeLlm {
    async fn complete(&self, _prompt: &ChatPrompt) -> Result<String, ExternalDependencyError> {
        match self.behavior {
            LlmBehavior::FailUpfront => Err(unreachable_provider("llm.complete")),
            _ => Ok(self.chunks.concat()),
        }
    }

    async fn stream(&self, _prompt: &ChatPrompt) -> Result<CompletionStream, ExternalDependencyError> {
        let mut items: Vec<Result<String, ExternalDependencyError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        match self.behavior {
            LlmBehavior::FailUpfront => return Err(unreachable_provider("llm.stream")),
            LlmBehavior::FailMidStream => items.push(Err(unreachable_provider("llm.stream"))),
            LlmBehavior::Chunks => {}
            LlmBehavior::Endless(ref tracker) => {
                let state = (DropFlag(tracker.dropped.clone()), tracker.polled.clone());
                let endless = futures::stream::unfold(state, |(flag, polled)| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    polled.fetch_add(1, Ordering::SeqCst);
                    Some((Ok("more ".to_string()), (flag, polled)))
                });
                return Ok(endless.boxed());
            }
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

fn unreachable_provider(operation: &str) -> ExternalDependencyError {
    ExternalDependencyError::new(
        operation,
        DependencyFailure::Network("dns error: secret-upstream.internal".into()),
    )
}

/// Collaborators for one test server.
pub struct Fakes {
    pub executor: Arc<RecordingExecutor>,
    pub geo: FakeGeo,
    pub llm: FakeLlm,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            executor: Arc::new(RecordingExecutor::default()),
            geo: FakeGeo::default(),
            llm: FakeLlm::default(),
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub sessions: Arc<SessionRegistry>,
    pub executor: Arc<RecordingExecutor>,
    pub task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start_test_server(config: ServerConfig, fakes: Fakes) -> Result<TestServer> {
    let geo = Arc::new(fakes.geo);
    let mut registry = default_registry(fakes.executor.clone(), geo.clone())?;
    registry.register(ToolDescriptor::new(
        "explode",
        "Always panics",
        ToolSchema::empty(),
        Arc::new(ExplodingTool),
    ))?;

    let server = Arc::new(McpServer::new(
        ToolDispatcher::new(Arc::new(registry)),
        ServerInfo {
            name: config.mcp.server_name.clone(),
            version: config.mcp.server_version.clone(),
            protocol_version: config.mcp.protocol_version.clone(),
        },
    ));
    let sessions = Arc::new(SessionRegistry::new(config.sessions.max_sessions));
    let valuation = Arc::new(
        ValuationService::new(geo, Arc::new(fakes.llm), ValuationOptions::default()).with_seed(7),
    );

    let app = create_app(
        AppServices {
            server,
            sessions: sessions.clone(),
            valuation,
        },
        &config,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("Test server terminated unexpectedly: {}", err);
        }
    });

    // Give the server a brief moment to start accepting connections
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(TestServer {
        addr,
        sessions,
        executor: fakes.executor,
        task,
    })
}

pub async fn start_default_server() -> Result<TestServer> {
    start_test_server(ServerConfig::default(), Fakes::default()).await
}

pub fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

pub fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    rpc(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// POST an initialize and return the new session id.
pub async fn initialize(client: &reqwest::Client, server: &TestServer) -> Result<String> {
    let resp = client
        .post(server.url("/mcp"))
        .json(&rpc(0, "initialize", json!({})))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "initialize failed: {}", resp.status());
    let session_id = resp
        .headers()
        .get("mcp-session-id")
        .ok_or_else(|| anyhow::anyhow!("initialize response carries no session id"))?
        .to_str()?
        .to_string();
    Ok(session_id)
}

/// POST a body on an existing session and decode the JSON answer.
pub async fn post_on_session(
    client: &reqwest::Client,
    server: &TestServer,
    session_id: &str,
    body: &Value,
) -> Result<(reqwest::StatusCode, Value)> {
    let resp = client
        .post(server.url("/mcp"))
        .header("mcp-session-id", session_id)
        .json(body)
        .send()
        .await?;
    let status = resp.status();
    let body = resp.json().await?;
    Ok((status, body))
}

/// Payloads of the `data:` lines of an SSE body.
pub fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .collect()
}
