//! Browser automation tools.
//!
//! The tool catalogue is a declarative table; every entry shares one handler
//! that forwards `(session, tool, validated args)` to a [`BrowserExecutor`].
//! Browser state lives in the executor, keyed by session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::{SessionHook, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
use crate::gateway::{ExternalDependencyError, ExternalGateway};
use crate::mcp::dispatcher::DispatchError;
use crate::mcp::schema::{ParamSpec, ToolArgs, ToolSchema};
use crate::mcp::session::SessionContext;

/// Opaque tool executor for browser actions.
#[async_trait::async_trait]
pub trait BrowserExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &SessionContext,
        tool: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ExternalDependencyError>;

    /// Drop any browser state held for the session.
    async fn release(&self, ctx: &SessionContext) -> Result<(), ExternalDependencyError>;
}

/// Handler shared by all browser tools.
struct BrowserTool {
    name: &'static str,
    executor: Arc<dyn BrowserExecutor>,
}

#[async_trait::async_trait]
impl ToolHandler for BrowserTool {
    async fn call(&self, ctx: &SessionContext, args: ToolArgs) -> Result<Value, ToolError> {
        Ok(self.executor.execute(ctx, self.name, args.as_map()).await?)
    }
}

struct ExecutorHook(Arc<dyn BrowserExecutor>);

#[async_trait::async_trait]
impl SessionHook for ExecutorHook {
    async fn session_closed(&self, ctx: &SessionContext) {
        if let Err(err) = self.0.release(ctx).await {
            tracing::warn!(session_id = %ctx.id, error = %err, "failed to release browser session");
        }
    }
}

/// (name, description, parameters) for each browser tool.
fn catalogue() -> Vec<(&'static str, &'static str, Vec<ParamSpec>)> {
    vec![
        (
            "playwright_navigate",
            "Navigate to a URL",
            vec![
                ParamSpec::string("url", "URL to navigate to the website specified"),
                ParamSpec::one_of(
                    "browserType",
                    &["chromium", "firefox", "webkit"],
                    "Browser type to use (chromium, firefox, webkit). Defaults to chromium",
                )
                .with_default(json!("chromium")),
                ParamSpec::number("width", "Viewport width in pixels (default: 1280)")
                    .with_default(json!(1280)),
                ParamSpec::number("height", "Viewport height in pixels (default: 720)")
                    .with_default(json!(720)),
                ParamSpec::number("timeout", "Navigation timeout in milliseconds")
                    .with_default(json!(30000)),
                ParamSpec::string("waitUntil", "Navigation wait condition")
                    .with_default(json!("load")),
                ParamSpec::boolean("headless", "Run browser in headless mode (default: false)")
                    .with_default(json!(false)),
            ],
        ),
        (
            "playwright_screenshot",
            "Take a screenshot of the current page or a specific element",
            vec![
                ParamSpec::string("name", "Name for the screenshot"),
                ParamSpec::string("selector", "CSS selector for element to screenshot"),
                ParamSpec::number("width", "Width in pixels (default: 800)")
                    .with_default(json!(800)),
                ParamSpec::number("height", "Height in pixels (default: 600)")
                    .with_default(json!(600)),
                ParamSpec::boolean("storeBase64", "Store screenshot in base64 format (default: true)")
                    .with_default(json!(true)),
                ParamSpec::boolean("fullPage", "Store screenshot of the entire page (default: false)")
                    .with_default(json!(false)),
                ParamSpec::boolean("savePng", "Save screenshot as PNG file (default: false)")
                    .with_default(json!(false)),
                ParamSpec::string(
                    "downloadsDir",
                    "Custom downloads directory path (default: user's Downloads folder)",
                )
                .with_default(json!("")),
            ],
        ),
        (
            "playwright_click",
            "Click an element on the page",
            vec![ParamSpec::string("selector", "CSS selector for the element to click")],
        ),
        (
            "playwright_video_record",
            "Record a video of the page",
            vec![ParamSpec::string("filename", "Record video filename to saved")],
        ),
        (
            "playwright_iframe_click",
            "Click an element in an iframe on the page",
            vec![
                ParamSpec::string(
                    "iframeSelector",
                    "CSS selector for the iframe containing the element to click",
                ),
                ParamSpec::string("selector", "CSS selector for the element to click"),
            ],
        ),
        (
            "playwright_fill",
            "fill out an input field",
            vec![
                ParamSpec::string("selector", "CSS selector for input field"),
                ParamSpec::string("value", "Value to fill"),
            ],
        ),
        (
            "playwright_select",
            "Select an element on the page with Select tag",
            vec![
                ParamSpec::string("selector", "CSS Selector for element to select"),
                ParamSpec::string("value", "Value to select"),
            ],
        ),
        (
            "playwright_hover",
            "Hover an element on the page",
            vec![ParamSpec::string("selector", "CSS selector for element to hover")],
        ),
        (
            "playwright_evaluate",
            "Execute JavaScript in the browser console",
            vec![ParamSpec::string("script", "JavaScript code to execute")],
        ),
        (
            "playwright_console_logs",
            "Retrieve console logs from the browser with filtering options",
            vec![
                ParamSpec::one_of(
                    "type",
                    &["all", "error", "warning", "log", "info", "debug"],
                    "Type of logs to retrieve (all, error, warning, log, info, debug)",
                ),
                ParamSpec::string(
                    "search",
                    "Text to search for in logs (handles text with square brackets)",
                ),
                ParamSpec::number("limit", "Maximum number of logs to return"),
                ParamSpec::boolean("clear", "Whether to clear logs after retrieval (default: false)")
                    .with_default(json!(false)),
            ],
        ),
        (
            "playwright_close",
            "Close the browser and release all resources",
            Vec::new(),
        ),
        (
            "playwright_custom_user_agent",
            "Set a custom User Agent for the Playwright browser instance",
            vec![ParamSpec::string(
                "userAgent",
                "Custom User Agent for the Playwright browser instance",
            )],
        ),
        (
            "playwright_get_visible_text",
            "Get the visible text content of the current page",
            Vec::new(),
        ),
        (
            "playwright_get_visible_html",
            "Get the HTML content of the current page",
            Vec::new(),
        ),
        (
            "playwright_go_back",
            "Navigate back in browser history",
            Vec::new(),
        ),
        (
            "playwright_go_forward",
            "Navigate forward in browser history",
            Vec::new(),
        ),
        // Misspelt name is what existing clients call.
        (
            "playwrite_drag",
            "Drag an element to a target location",
            vec![
                ParamSpec::string("sourceSelector", "CSS selector for the element to drag"),
                ParamSpec::string("targetSelector", "CSS selector for the target location"),
            ],
        ),
        (
            "playwright_press_key",
            "Press a keyboard key",
            vec![
                ParamSpec::string("key", "Key to press (e.g. 'Enter', 'ArrowDown', 'a')"),
                ParamSpec::string("selector", "Optional CSS selector to focus before pressing key"),
            ],
        ),
        (
            "playwright_save_as_pdf",
            "Save the current page as a PDF file",
            vec![
                ParamSpec::string("outputPath", "Directory path where PDF will be saved"),
                ParamSpec::string("filename", "Name of the PDF file (default: page.pdf)"),
                ParamSpec::string("format", "Page format (e.g. 'A4', 'Letter')"),
                ParamSpec::boolean("printBackground", "Whether to print background graphics"),
                ParamSpec::object(
                    "margin",
                    vec![
                        ParamSpec::string("top", "Top margin"),
                        ParamSpec::string("right", "Right margin"),
                        ParamSpec::string("bottom", "Bottom margin"),
                        ParamSpec::string("left", "Left margin"),
                    ],
                    "Page margins",
                ),
            ],
        ),
    ]
}

/// Register every browser tool plus the hook that releases browser state.
pub fn register_browser_tools(
    registry: &mut ToolRegistry,
    executor: Arc<dyn BrowserExecutor>,
) -> Result<(), DispatchError> {
    for (name, description, params) in catalogue() {
        let handler = Arc::new(BrowserTool {
            name,
            executor: executor.clone(),
        });
        registry.register(ToolDescriptor::new(
            name,
            description,
            ToolSchema::new(params),
            handler,
        ))?;
    }
    registry.register_session_hook(Arc::new(ExecutorHook(executor)));
    Ok(())
}

/// Executor backed by a remote automation service over HTTP.
///
/// `POST {base}/sessions/{id}/tools/{tool}` runs a tool with the arguments as
/// the JSON body; `DELETE {base}/sessions/{id}` drops the session's browser.
#[derive(Debug, Clone)]
pub struct RemoteBrowserExecutor {
    gateway: ExternalGateway,
    base_url: String,
    timeout: Duration,
}

impl RemoteBrowserExecutor {
    pub fn new(gateway: ExternalGateway, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl BrowserExecutor for RemoteBrowserExecutor {
    async fn execute(
        &self,
        ctx: &SessionContext,
        tool: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ExternalDependencyError> {
        let request = self
            .gateway
            .client()
            .post(format!("{}/sessions/{}/tools/{}", self.base_url, ctx.id, tool))
            .json(args);
        self.gateway.call("browser.execute", request, self.timeout).await
    }

    async fn release(&self, ctx: &SessionContext) -> Result<(), ExternalDependencyError> {
        let request = self
            .gateway
            .client()
            .delete(format!("{}/sessions/{}", self.base_url, ctx.id));
        self.gateway.send("browser.release", request, self.timeout).await
    }
}
