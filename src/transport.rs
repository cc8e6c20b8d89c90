use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;

use crate::error::{AssistantError, Result};
use crate::models::{CompletionRequest, CompletionResponse, StreamChunk, TextFragment};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Lazy, single-pass sequence of completion fragments. Dropping it
/// releases the underlying connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<TextFragment>> + Send>>;

/// Completion endpoint seam. Implementations perform exactly one request
/// per call; retry lives with the callers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn chat(&self, req: &CompletionRequest) -> Result<CompletionResponse>;
    async fn chat_stream(&self, req: &CompletionRequest) -> Result<FragmentStream>;
}

pub struct GroqTransport {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GroqTransport {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GROQ_API_URL.to_string(),
        }
    }

    async fn post(&self, req: &CompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AssistantError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for GroqTransport {
    async fn chat(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.post(req).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(&self, req: &CompletionRequest) -> Result<FragmentStream> {
        let mut req = req.clone();
        req.stream = Some(true);
        let response = self.post(&req).await?;
        Ok(sse_fragments(response))
    }
}

/// Outcome of parsing a single SSE line.
enum SseLine {
    Fragment(TextFragment),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() {
        return SseLine::Skip;
    }
    if line == "data: [DONE]" {
        return SseLine::Done;
    }
    let Some(json_str) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    let chunk: StreamChunk = match serde_json::from_str(json_str) {
        Ok(chunk) => chunk,
        // Keep-alive comments and unrecognized event shapes are ignored.
        Err(_) => return SseLine::Skip,
    };
    let content = chunk
        .choices
        .into_iter()
        .find_map(|choice| choice.delta.content);
    match content {
        Some(text) if !text.is_empty() => SseLine::Fragment(TextFragment(text)),
        _ => SseLine::Skip,
    }
}

/// Turn the raw SSE byte stream into normalized text fragments. The
/// stream is pull-based: no bytes are read until the consumer asks.
fn sse_fragments(response: reqwest::Response) -> FragmentStream {
    let body = response.bytes_stream();
    let stream = futures::stream::try_unfold(
        (Box::pin(body), String::new(), false),
        |(mut body, mut buf, mut ended)| async move {
            loop {
                while let Some(pos) = buf.find('\n') {
                    let raw: String = buf.drain(..=pos).collect();
                    match parse_sse_line(&raw) {
                        SseLine::Fragment(fragment) => {
                            return Ok(Some((fragment, (body, buf, ended))));
                        }
                        SseLine::Done => return Ok(None),
                        SseLine::Skip => {}
                    }
                }
                if ended {
                    return Ok(None);
                }
                match body.next().await {
                    Some(Ok(bytes)) => buf.push_str(&String::from_utf8_lossy(&bytes)),
                    Some(Err(e)) => return Err(AssistantError::Stream(e.to_string())),
                    None => ended = true,
                }
            }
        },
    );
    Box::pin(stream)
}
