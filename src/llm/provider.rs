use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, StreamChunk};
use crate::utils::{with_retry, RetryPolicy};

pub type ChunkStream = BoxStream<'static, AppResult<StreamChunk>>;

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    /// Short provider id used in logs and errors
    fn provider_name(&self) -> &'static str;

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;

    /// Incremental completion. Adapters without native streaming answer in one piece.
    async fn create_chat_completion_stream(&self, request: &LLMRequest) -> AppResult<ChunkStream> {
        let response = self.create_chat_completion(request).await?;
        let mut chunks = Vec::new();
        if !response.content.is_empty() {
            chunks.push(Ok(StreamChunk::Content(response.content)));
        }
        chunks.extend(response.tool_calls.into_iter().map(|c| Ok(StreamChunk::ToolCall(c))));
        Ok(Box::pin(stream::iter(chunks)))
    }

    /// Cheap authenticated call proving the credentials and endpoint work
    async fn check_connection(&self) -> AppResult<String>;
}

/// A failed upstream call and whether repeating it could help
#[derive(Debug)]
pub struct UpstreamError {
    pub message: String,
    pub retryable: bool,
    pub status: Option<StatusCode>,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<UpstreamError> for AppError {
    fn from(e: UpstreamError) -> Self {
        match e.status {
            // a rejected key is an operator problem, not a provider outage
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => AppError::Configuration(e.message),
            _ => AppError::LLMApi(e.message),
        }
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide HTTP settings handed to every adapter.
///
/// The client keeps one connection pool for all providers. Plain calls are
/// bounded by `timeout` end to end; streams only by the per-read timeout, so a
/// long answer that keeps producing tokens is never cut off.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub client: Client,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl HttpOptions {
    pub fn new(timeout: Duration, max_retries: u32) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .read_timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }
}

/// Shared reqwest client plus the retry policy for one provider
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
    provider: &'static str,
}

impl HttpTransport {
    pub fn new(provider: &'static str, http: &HttpOptions) -> Self {
        Self {
            client: http.client.clone(),
            timeout: http.timeout,
            retry: RetryPolicy::new(http.max_retries),
            provider,
        }
    }

    #[cfg(test)]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send the request built by `build`, retrying transient failures.
    ///
    /// Only 2xx responses are returned. A rejected credential (401/403) becomes
    /// `AppError::Configuration`, anything else `AppError::LLMApi`, carrying the
    /// provider's own error message when one can be parsed.
    pub async fn send<F>(&self, build: F) -> AppResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let timeout = self.timeout;
        self.dispatch(|client| build(client).timeout(timeout)).await
    }

    /// Like [`send`](Self::send) but without the end-to-end deadline, for
    /// responses read incrementally. Stalls are still caught by the read timeout.
    pub async fn send_stream<F>(&self, build: F) -> AppResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.dispatch(build).await
    }

    async fn dispatch<F>(&self, build: F) -> AppResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let provider = self.provider;
        let response = with_retry(
            &self.retry,
            || {
                let request = build(&self.client);
                async move {
                    let response = request.send().await.map_err(|e| UpstreamError {
                        retryable: e.is_timeout() || e.is_connect(),
                        message: format!("{} request failed: {}", provider, e),
                        status: None,
                    })?;

                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    Err(UpstreamError {
                        retryable: is_retryable_status(status),
                        status: Some(status),
                        message: format!(
                            "{} API error ({}): {}",
                            provider,
                            status,
                            extract_error_message(&body)
                        ),
                    })
                }
            },
            |e: &UpstreamError| e.retryable,
        )
        .await?;
        Ok(response)
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Pull the human-readable message out of a provider error body.
///
/// Handles `{"error": {"message": ...}}` (OpenAI, Gemini) and
/// `{"error": "..."}` (Ollama); anything else is returned as-is.
pub fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match &value["error"] {
            serde_json::Value::String(message) => message.clone(),
            serde_json::Value::Object(error) => error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            _ => body.to_string(),
        },
        Err(_) => body.trim().to_string(),
    }
}
