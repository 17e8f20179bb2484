//! OpenAI-compatible streaming chat client (OpenRouter by default) with retry
//! on the initial request.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, LlmError, RetryConfig};
use super::{ChatMessage, ChatOptions, LlmClient, TextStream};

/// Streaming chat-completions client.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    api_url: String,
    retry_config: RetryConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String, api_url: String) -> Self {
        Self::with_retry_config(api_key, api_url, RetryConfig::default())
    }

    pub fn with_retry_config(api_key: String, api_url: String, retry_config: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_url,
            retry_config,
        }
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Send the request once. Success means the provider accepted it and the
    /// body is ready to be streamed.
    async fn send_once(&self, request: &CompletionRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .header("X-Title", "ide-agent")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Network(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    LlmError::Network(format!("Connection failed: {}", e))
                } else {
                    LlmError::Network(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_http_status(status.as_u16(), body, retry_after))
    }

    /// Send with retry. Only the initial request is retried; once bytes start
    /// flowing, failures surface as stream errors.
    async fn send_with_retry(
        &self,
        request: &CompletionRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            let error = match self.send_once(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            if !self.retry_config.should_retry(&error, attempt) {
                if attempt > 0 {
                    tracing::error!(
                        "Request failed after {} retries (total time: {:?}): {}",
                        attempt,
                        start.elapsed(),
                        error
                    );
                } else {
                    tracing::error!("Request failed (non-retryable): {}", error);
                }
                return Err(error);
            }

            let remaining = self
                .retry_config
                .max_retry_duration
                .saturating_sub(start.elapsed());
            let delay = error.suggested_delay(attempt).min(remaining);
            if delay.is_zero() {
                tracing::warn!(
                    "Retry attempt {} failed, no time remaining: {}",
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            tracing::warn!(
                "Retry attempt {} failed, retrying in {:?}: {}",
                attempt + 1,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn stream_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<TextStream, LlmError> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        tracing::debug!(model = %model, messages = messages.len(), "Starting streaming completion");

        let response = self.send_with_retry(&request).await?;
        let mut bytes = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut buf: Vec<u8> = Vec::new();
            'read: loop {
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        SseLine::Delta(text) => yield Ok(text),
                        SseLine::Done => break 'read,
                        SseLine::Error(message) => {
                            yield Err(LlmError::Stream(message));
                            break 'read;
                        }
                        SseLine::Skip => {}
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        yield Err(LlmError::Stream(e.to_string()));
                        break;
                    }
                    None => {
                        // Flush a final line without trailing newline
                        if !buf.is_empty() {
                            let rest = std::mem::take(&mut buf);
                            match parse_sse_line(&String::from_utf8_lossy(&rest)) {
                                SseLine::Delta(text) => yield Ok(text),
                                SseLine::Error(message) => yield Err(LlmError::Stream(message)),
                                SseLine::Done | SseLine::Skip => {}
                            }
                        }
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// One decoded server-sent-events line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Error(String),
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let Some(payload) = line.strip_prefix("data:") else {
        // comments (": keep-alive"), event names, blank separators
        return SseLine::Skip;
    };
    let payload = payload.trim_start();

    if payload == "[DONE]" {
        return SseLine::Done;
    }

    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Skipping undecodable stream chunk: {}", e);
            return SseLine::Skip;
        }
    };

    if let Some(error) = chunk.error {
        return SseLine::Error(error.message.unwrap_or_else(|| "unknown provider error".to_string()));
    }

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map(SseLine::Delta)
        .unwrap_or(SseLine::Skip)
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: Option<String>,
}
