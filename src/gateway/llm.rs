//! Language-model completion provider (OpenAI-compatible chat completions).

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ExternalDependencyError, ExternalGateway};

/// Incremental completion text.
pub type CompletionStream = BoxStream<'static, Result<String, ExternalDependencyError>>;

/// A two-part chat prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run a completion to the end and return the full text.
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ExternalDependencyError>;

    /// Start a streaming completion. Errors that occur before the first chunk
    /// are returned directly; later errors arrive as stream items.
    async fn stream(&self, prompt: &ChatPrompt) -> Result<CompletionStream, ExternalDependencyError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any provider exposing `/chat/completions` (Moonshot, OpenAI, ...).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    gateway: ExternalGateway,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(
        gateway: ExternalGateway,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            timeout,
        }
    }

    fn request(&self, prompt: &ChatPrompt, stream: bool) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            stream,
        };
        self.gateway
            .client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
    }
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ExternalDependencyError> {
        const OPERATION: &str = "llm.complete";

        let response: ChatResponse = self
            .gateway
            .call(OPERATION, self.request(prompt, false), self.timeout)
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExternalDependencyError::payload(OPERATION, "completion has no content"))
    }

    async fn stream(&self, prompt: &ChatPrompt) -> Result<CompletionStream, ExternalDependencyError> {
        const OPERATION: &str = "llm.stream";

        let body = self
            .gateway
            .open_stream(OPERATION, self.request(prompt, true), self.timeout)
            .await?;
        Ok(parse_completion_stream(OPERATION, body).boxed())
    }
}

/// Decode an OpenAI-style SSE body into content deltas.
///
/// Lines are reassembled across chunk boundaries on raw bytes so multi-byte
/// characters split between chunks survive. An unterminated last line is
/// still decoded when the body ends. The stream ends at `data: [DONE]` or at
/// the first error.
pub(crate) fn parse_completion_stream<S>(
    operation: &'static str,
    body: S,
) -> impl Stream<Item = Result<String, ExternalDependencyError>> + Send
where
    S: Stream<Item = Result<Bytes, ExternalDependencyError>> + Send + 'static,
{
    // `None` marks the end of the body.
    body.map(Some)
        .chain(stream::once(futures::future::ready(None)))
        .scan((Vec::<u8>::new(), false), move |(buffer, finished), chunk| {
            if *finished {
                return futures::future::ready(None);
            }
            let mut items = Vec::new();
            match chunk {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline).collect();
                        if !push_line(operation, &line, &mut items) {
                            *finished = true;
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    *finished = true;
                    items.push(Err(err));
                }
                None => {
                    *finished = true;
                    let rest = std::mem::take(buffer);
                    push_line(operation, &rest, &mut items);
                }
            }
            futures::future::ready(Some(items))
        })
        .flat_map(stream::iter)
}

/// Decode one line into `items`. Returns false once the stream is over.
fn push_line(
    operation: &str,
    line: &[u8],
    items: &mut Vec<Result<String, ExternalDependencyError>>,
) -> bool {
    let line = String::from_utf8_lossy(line);
    match parse_sse_line(operation, line.trim()) {
        SseLine::Skip => true,
        SseLine::Done => false,
        SseLine::Item(item) => {
            let failed = item.is_err();
            items.push(item);
            !failed
        }
    }
}

enum SseLine {
    Skip,
    Done,
    Item(Result<String, ExternalDependencyError>),
}

fn parse_sse_line(operation: &str, line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments and `event:` lines carry no content.
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    let event: Value = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(err) => {
            return SseLine::Item(Err(ExternalDependencyError::payload(
                operation,
                err.to_string(),
            )))
        }
    };

    if let Some(error) = event.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return SseLine::Item(Err(ExternalDependencyError::rejected(operation, message)));
    }

    match event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(content) if !content.is_empty() => SseLine::Item(Ok(content.to_string())),
        _ => SseLine::Skip,
    }
}
