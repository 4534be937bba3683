//! External Gateway Adapter
//!
//! Every outbound call to a downstream collaborator (map provider, language
//! model provider, browser automation backend) goes through [`ExternalGateway`],
//! which bounds it with a timeout and folds transport failures, non-success
//! statuses and timeouts into a single [`ExternalDependencyError`]. Calls are
//! never retried here; callers decide what a failure means for them.

pub mod amap;
pub mod llm;

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;

pub use amap::{AmapClient, GeoProvider, PlaceQuery, Poi};
pub use llm::{ChatPrompt, CompletionProvider, CompletionStream, OpenAiCompatibleClient};

/// Longest downstream body excerpt kept for logs.
const MAX_BODY_EXCERPT: usize = 512;

/// Why a downstream call failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DependencyFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network failure: {0}")]
    Network(String),

    #[error("non-success response: {0}")]
    Status(String),

    #[error("request rejected by provider: {0}")]
    Rejected(String),

    #[error("malformed response payload: {0}")]
    Payload(String),
}

/// Failure of a downstream collaborator, as seen by the rest of the system.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operation} failed: {cause}")]
pub struct ExternalDependencyError {
    pub operation: String,
    pub cause: DependencyFailure,
    pub downstream_status: Option<u16>,
}

impl ExternalDependencyError {
    pub fn new(operation: impl Into<String>, cause: DependencyFailure) -> Self {
        Self {
            operation: operation.into(),
            cause,
            downstream_status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.downstream_status = Some(status);
        self
    }

    pub fn rejected(operation: impl Into<String>, info: impl Into<String>) -> Self {
        Self::new(operation, DependencyFailure::Rejected(info.into()))
    }

    pub fn payload(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(operation, DependencyFailure::Payload(detail.into()))
    }

    fn from_reqwest(operation: &str, err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let cause = if err.is_decode() {
            DependencyFailure::Payload(err.to_string())
        } else {
            DependencyFailure::Network(err.to_string())
        };
        Self {
            operation: operation.to_string(),
            cause,
            downstream_status: status,
        }
    }
}

/// Stream of raw body chunks from a downstream response.
pub type ByteStream = BoxStream<'static, Result<Bytes, ExternalDependencyError>>;

/// Shared HTTP client wrapper used by all downstream clients.
#[derive(Debug, Clone)]
pub struct ExternalGateway {
    client: reqwest::Client,
}

impl ExternalGateway {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shopmcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Underlying client, used by callers to build requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request and decode its JSON body, bounded by `timeout` end to end.
    pub async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T, ExternalDependencyError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, async {
            let response = send_checked(operation, request).await?;
            response
                .json::<T>()
                .await
                .map_err(|err| ExternalDependencyError::from_reqwest(operation, err))
        })
        .await
        .unwrap_or_else(|_| {
            Err(ExternalDependencyError::new(
                operation,
                DependencyFailure::Timeout(timeout),
            ))
        });

        log_outcome(operation, started, outcome.as_ref().err());
        outcome
    }

    /// Send a request whose response body is of no interest.
    pub async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<(), ExternalDependencyError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, send_checked(operation, request))
            .await
            .unwrap_or_else(|_| {
                Err(ExternalDependencyError::new(
                    operation,
                    DependencyFailure::Timeout(timeout),
                ))
            })
            .map(|_| ());

        log_outcome(operation, started, outcome.as_ref().err());
        outcome
    }

    /// Send a request and hand back its body as a chunk stream.
    ///
    /// `timeout` bounds the wait for response headers and, separately, the
    /// gap between consecutive chunks.
    pub async fn open_stream(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<ByteStream, ExternalDependencyError> {
        let started = Instant::now();
        let response = tokio::time::timeout(timeout, send_checked(operation, request))
            .await
            .unwrap_or_else(|_| {
                Err(ExternalDependencyError::new(
                    operation,
                    DependencyFailure::Timeout(timeout),
                ))
            });
        log_outcome(operation, started, response.as_ref().err());
        let response = response?;

        let operation = operation.to_string();
        let body = response.bytes_stream().boxed();
        let chunks = stream::unfold(Some(body), move |state| {
            let operation = operation.clone();
            async move {
                let mut body = state?;
                match tokio::time::timeout(timeout, body.next()).await {
                    Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
                    Ok(Some(Err(err))) => Some((
                        Err(ExternalDependencyError::from_reqwest(&operation, err)),
                        None,
                    )),
                    Ok(None) => None,
                    Err(_) => Some((
                        Err(ExternalDependencyError::new(
                            operation,
                            DependencyFailure::Timeout(timeout),
                        )),
                        None,
                    )),
                }
            }
        });
        Ok(chunks.boxed())
    }
}

async fn send_checked(
    operation: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ExternalDependencyError> {
    let response = request
        .send()
        .await
        .map_err(|err| ExternalDependencyError::from_reqwest(operation, err))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(MAX_BODY_EXCERPT).collect();
    Err(
        ExternalDependencyError::new(operation, DependencyFailure::Status(excerpt))
            .with_status(status.as_u16()),
    )
}

fn log_outcome(operation: &str, started: Instant, error: Option<&ExternalDependencyError>) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match error {
        None => tracing::debug!(operation, elapsed_ms, "downstream call succeeded"),
        Some(err) => tracing::warn!(
            operation,
            elapsed_ms,
            downstream_status = ?err.downstream_status,
            error = %err.cause,
            "downstream call failed"
        ),
    }
}
