use std::sync::Arc;

use jsonrpc_core::types::request::{Call, MethodCall, Notification};
use jsonrpc_core::types::response::Output;
use jsonrpc_core::{Error as RpcError, Id, Params, Value};
use tokio::sync::mpsc;

use crate::mcp::dispatcher::ToolDispatcher;
use crate::mcp::session::{SessionChannel, SessionContext, SessionJob};
use crate::mcp::types::{error_codes, failure_output, rpc_error, success_output, ServerInfo};

/// Jobs that may wait behind a running one before senders back off.
const JOB_QUEUE_DEPTH: usize = 32;

/// MCP method handling shared by all sessions.
pub struct McpServer {
    dispatcher: ToolDispatcher,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(dispatcher: ToolDispatcher, info: ServerInfo) -> Self {
        Self { dispatcher, info }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Spawn the worker serving one session and return the channel into it.
    ///
    /// The worker handles one job at a time in queue order. When every sender
    /// is gone it runs the session-closed hooks and exits.
    pub fn connect(self: &Arc<Self>, ctx: SessionContext) -> SessionChannel {
        let (jobs, mut queue) = mpsc::channel::<SessionJob>(JOB_QUEUE_DEPTH);
        let server = Arc::clone(self);

        let worker = tokio::spawn(async move {
            let mut initialized = false;
            while let Some(SessionJob { calls, reply }) = queue.recv().await {
                let mut outputs = Vec::with_capacity(calls.len());
                for call in calls {
                    if let Some(output) = server.handle_call(&ctx, call, &mut initialized).await {
                        outputs.push(output);
                    }
                }
                if reply.send(outputs).is_err() {
                    tracing::debug!(session_id = %ctx.id, "client went away before response");
                }
            }
            server.dispatcher.session_closed(&ctx).await;
            tracing::debug!(session_id = %ctx.id, "session worker stopped");
        });

        SessionChannel::new(jobs, worker)
    }

    async fn handle_call(
        &self,
        ctx: &SessionContext,
        call: Call,
        initialized: &mut bool,
    ) -> Option<Output> {
        match call {
            Call::MethodCall(call) => Some(self.handle_method(ctx, call, initialized).await),
            Call::Notification(Notification { method, .. }) => {
                tracing::debug!(session_id = %ctx.id, %method, "notification received");
                None
            }
            Call::Invalid { id } => Some(failure_output(
                id,
                rpc_error(error_codes::INVALID_REQUEST, "Invalid request"),
            )),
        }
    }

    async fn handle_method(
        &self,
        ctx: &SessionContext,
        call: MethodCall,
        initialized: &mut bool,
    ) -> Output {
        let MethodCall {
            method, params, id, ..
        } = call;

        let result = match method.as_str() {
            "initialize" => self.initialize(ctx, initialized),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => {
                let tools = self.dispatcher.list_tools();
                tracing::debug!(session_id = %ctx.id, count = tools.len(), "listed tools");
                Ok(serde_json::json!({ "tools": tools }))
            }
            "tools/call" => self.call_tool(ctx, params).await,
            other => Err(rpc_error(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        respond(id, result)
    }

    fn initialize(&self, ctx: &SessionContext, initialized: &mut bool) -> Result<Value, RpcError> {
        if *initialized {
            return Err(rpc_error(
                error_codes::INVALID_REQUEST,
                "Invalid Request: Server already initialized",
            ));
        }
        *initialized = true;
        tracing::info!(session_id = %ctx.id, "MCP session initialized");

        Ok(serde_json::json!({
            "protocolVersion": self.info.protocol_version,
            "capabilities": {
                "tools": { "listChanged": false },
                "logging": {}
            },
            "serverInfo": self.info,
        }))
    }

    async fn call_tool(&self, ctx: &SessionContext, params: Params) -> Result<Value, RpcError> {
        let params = match params {
            Params::Map(map) => map,
            _ => {
                return Err(rpc_error(
                    error_codes::INVALID_PARAMS,
                    "tools/call requires named parameters",
                ))
            }
        };
        let name = params.get("name").and_then(Value::as_str).ok_or_else(|| {
            rpc_error(error_codes::INVALID_PARAMS, "tools/call requires a 'name' field")
        })?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = self
            .dispatcher
            .dispatch(name, &arguments, ctx)
            .await
            .map_err(|err| err.to_rpc_error())?;
        serde_json::to_value(result)
            .map_err(|_| rpc_error(error_codes::INTERNAL_ERROR, "Internal error"))
    }
}

fn respond(id: Id, result: Result<Value, RpcError>) -> Output {
    match result {
        Ok(value) => success_output(id, value),
        Err(error) => failure_output(id, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::session::{ResponseMode, SessionRegistry};
    use crate::mcp::tools::ToolRegistry;
    use jsonrpc_core::Version;
    use serde_json::json;

    fn server() -> Arc<McpServer> {
        Arc::new(McpServer::new(
            ToolDispatcher::new(Arc::new(ToolRegistry::new())),
            ServerInfo {
                name: "shopmcp".into(),
                version: "1.0.3".into(),
                protocol_version: "2025-03-26".into(),
            },
        ))
    }

    fn call(id: u64, method: &str, params: Value) -> Call {
        serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": id, "method": method, "params": params
        }))
        .unwrap()
    }

    fn to_json(output: &Output) -> Value {
        serde_json::to_value(output).unwrap()
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let server = server();
        let ctx = SessionContext::new("s");
        let mut initialized = false;

        let first = server
            .handle_call(&ctx, call(1, "initialize", json!({})), &mut initialized)
            .await
            .unwrap();
        let first = to_json(&first);
        assert_eq!(first["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(first["result"]["serverInfo"]["name"], "shopmcp");
        assert_eq!(first["result"]["capabilities"]["tools"]["listChanged"], false);

        let second = server
            .handle_call(&ctx, call(2, "initialize", json!({})), &mut initialized)
            .await
            .unwrap();
        assert_eq!(to_json(&second)["error"]["code"], error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn notifications_produce_no_output() {
        let server = server();
        let notification = Call::Notification(Notification {
            jsonrpc: Some(Version::V2),
            method: "notifications/initialized".into(),
            params: Params::None,
        });
        let mut initialized = true;
        let output = server
            .handle_call(&SessionContext::new("s"), notification, &mut initialized)
            .await;
        assert!(output.is_none());
    }

    #[tokio::test]
    async fn tools_call_requires_a_name() {
        let server = server();
        let mut initialized = true;
        let output = server
            .handle_call(
                &SessionContext::new("s"),
                call(3, "tools/call", json!({"arguments": {}})),
                &mut initialized,
            )
            .await
            .unwrap();
        assert_eq!(to_json(&output)["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let server = server();
        let mut initialized = true;
        let output = server
            .handle_call(
                &SessionContext::new("s"),
                call(4, "resources/list", json!({})),
                &mut initialized,
            )
            .await
            .unwrap();
        assert_eq!(to_json(&output)["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn worker_answers_jobs_in_order() {
        let server = server();
        let registry = SessionRegistry::new(4);
        let session = registry.create(ResponseMode::Json).await;
        session
            .bind(server.connect(session.context().clone()))
            .unwrap();

        let outputs = session
            .submit(vec![call(1, "initialize", json!({})), call(2, "ping", json!({}))])
            .await
            .unwrap();
        let ids: Vec<Value> = outputs.iter().map(|o| to_json(o)["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }
}
