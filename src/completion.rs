use std::sync::Arc;

use crate::error::Result;
use crate::models::{ChatMessage, CompletionRequest, Role};
use crate::retry::RetryPolicy;
use crate::transport::{FragmentStream, Transport};

/// Persona and formatting contract sent when the caller supplies no
/// system message of its own. The think-marker and references wording is
/// a wire-level contract with the model; the splitter and the footer
/// synthesis both depend on it.
pub const SYSTEM_PERSONA: &str = "You are a careful research assistant. \
Think through the question first inside a single <think>...</think> block, \
then give your final answer after the closing tag. When you cite sources, \
use bracketed indices like [1] and end with a line starting with \
`References:` followed by one `[i] url` entry per line.";

/// Returned when the provider stays unreachable through every retry.
pub const DEGRADED_SERVICE_MESSAGE: &str = "I'm having trouble reaching the \
language model right now. Please try again in a moment.";

/// Returned when the provider answers with an empty choice list.
pub const EMPTY_RESPONSE_MESSAGE: &str = "I couldn't come up with a response \
just now. Please try rephrasing your question.";

/// Whether `text` is one of the canned degraded replies. A degraded
/// turn is delivered as-is; nothing downstream should decorate it.
pub fn is_degraded(text: &str) -> bool {
    text == DEGRADED_SERVICE_MESSAGE || text == EMPTY_RESPONSE_MESSAGE
}

/// Sampling knobs passed through to the provider unchanged.
#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 0.95,
        }
    }
}

/// Client over the completion endpoint: owns the system preamble, the
/// retry policy, and the degraded-response strings. Batch completion
/// never errors; the UI layer needs no exception handling for model
/// unavailability.
pub struct CompletionClient {
    tx: Arc<dyn Transport>,
    model: String,
    params: CompletionParams,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(
        tx: Arc<dyn Transport>,
        model: String,
        params: CompletionParams,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tx,
            model,
            params,
            retry,
        }
    }

    fn build_request(&self, messages: &[ChatMessage], stream: bool) -> CompletionRequest {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !messages.iter().any(|m| m.role == Role::System) {
            wire.push(ChatMessage {
                role: Role::System,
                content: SYSTEM_PERSONA.to_string(),
            });
        }
        wire.extend_from_slice(messages);

        CompletionRequest {
            model: self.model.clone(),
            messages: wire,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            top_p: self.params.top_p,
            stream: stream.then_some(true),
            response_format: None,
        }
    }

    /// Batch completion. Always returns user-facing text: a canned
    /// apology on an empty choice list, the degraded-service string once
    /// every retry is spent.
    pub async fn complete(&self, messages: &[ChatMessage]) -> String {
        if messages.is_empty() {
            tracing::warn!("Completion requested with no messages");
            return EMPTY_RESPONSE_MESSAGE.to_string();
        }
        let request = self.build_request(messages, false);

        match self.retry.run(|| self.tx.chat(&request)).await {
            Ok(response) => match response.choices.into_iter().next() {
                Some(choice) => choice.message.content,
                None => {
                    tracing::warn!("Provider returned an empty choice list");
                    EMPTY_RESPONSE_MESSAGE.to_string()
                }
            },
            Err(e) => {
                tracing::error!("Completion failed after retries: {e}");
                DEGRADED_SERVICE_MESSAGE.to_string()
            }
        }
    }

    /// Streamed completion. Retry covers initiation only; a stream that
    /// fails mid-flight surfaces the error as an item and is not
    /// resumed; the caller discards partial output and reissues the
    /// whole call if it wants another attempt.
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        if messages.is_empty() {
            return Err(crate::error::AssistantError::EmptyMessages);
        }
        let request = self.build_request(messages, true);
        self.retry.run(|| self.tx.chat_stream(&request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::models::{Choice, CompletionResponse};
    use crate::retry::Backoff;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every request; replays canned results newest-last.
    struct MockTransport {
        requests: Mutex<Vec<CompletionRequest>>,
        results: Mutex<Vec<Result<CompletionResponse>>>,
    }

    impl MockTransport {
        fn new(mut results: Vec<Result<CompletionResponse>>) -> Self {
            results.reverse();
            Self {
                requests: Mutex::new(Vec::new()),
                results: Mutex::new(results),
            }
        }

        fn request_count(&self) -> usize {
            self.requests
                .lock()
                .expect("Mock transport mutex should not be poisoned")
                .len()
        }

        fn last_request(&self) -> CompletionRequest {
            self.requests
                .lock()
                .expect("Mock transport mutex should not be poisoned")
                .last()
                .cloned()
                .expect("At least one request should have been made")
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn chat(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
            self.requests
                .lock()
                .expect("Mock transport mutex should not be poisoned")
                .push(req.clone());
            self.results
                .lock()
                .expect("Mock transport mutex should not be poisoned")
                .pop()
                .unwrap_or_else(|| {
                    Err(AssistantError::Api {
                        status: 503,
                        message: "unavailable".to_string(),
                    })
                })
        }

        async fn chat_stream(&self, _req: &CompletionRequest) -> Result<FragmentStream> {
            Err(AssistantError::Internal(
                "Streaming not supported by this mock".to_string(),
            ))
        }
    }

    fn client(tx: Arc<MockTransport>) -> CompletionClient {
        CompletionClient::new(
            tx,
            "test-model".to_string(),
            CompletionParams::default(),
            RetryPolicy::new(
                3,
                Backoff::Linear {
                    base: Duration::from_millis(1),
                },
            ),
        )
    }

    fn ok_response(content: &str) -> Result<CompletionResponse> {
        Ok(CompletionResponse {
            choices: vec![Choice {
                message: ChatMessage {
                    role: Role::Assistant,
                    content: content.to_string(),
                },
            }],
        })
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let tx = Arc::new(MockTransport::new(vec![ok_response("Paris.")]));
        let text = client(Arc::clone(&tx)).complete(&[user("capital?")]).await;
        assert_eq!(text, "Paris.");
        assert_eq!(tx.request_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_prepends_system_persona() {
        let tx = Arc::new(MockTransport::new(vec![ok_response("hi")]));
        client(Arc::clone(&tx)).complete(&[user("hello")]).await;

        let request = tx.last_request();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, SYSTEM_PERSONA);
    }

    #[tokio::test]
    async fn test_complete_keeps_caller_system_message() {
        let tx = Arc::new(MockTransport::new(vec![ok_response("hi")]));
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: "custom instructions".to_string(),
            },
            user("hello"),
        ];
        client(Arc::clone(&tx)).complete(&messages).await;

        let request = tx.last_request();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, "custom instructions");
    }

    #[tokio::test]
    async fn test_complete_retries_to_bound_then_degrades() {
        let tx = Arc::new(MockTransport::new(vec![]));
        let text = client(Arc::clone(&tx)).complete(&[user("hello")]).await;
        assert_eq!(text, DEGRADED_SERVICE_MESSAGE);
        assert_eq!(tx.request_count(), 3);
    }

    #[tokio::test]
    async fn test_complete_recovers_on_later_attempt() {
        let tx = Arc::new(MockTransport::new(vec![
            Err(AssistantError::Api {
                status: 429,
                message: "rate limit".to_string(),
            }),
            ok_response("recovered"),
        ]));
        let text = client(Arc::clone(&tx)).complete(&[user("hello")]).await;
        assert_eq!(text, "recovered");
        assert_eq!(tx.request_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_choices_yields_apology_without_retry() {
        let tx = Arc::new(MockTransport::new(vec![Ok(CompletionResponse {
            choices: vec![],
        })]));
        let text = client(Arc::clone(&tx)).complete(&[user("hello")]).await;
        assert_eq!(text, EMPTY_RESPONSE_MESSAGE);
        assert_eq!(tx.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_messages_handled_locally() {
        let tx = Arc::new(MockTransport::new(vec![]));
        let text = client(Arc::clone(&tx)).complete(&[]).await;
        assert_eq!(text, EMPTY_RESPONSE_MESSAGE);
        assert_eq!(tx.request_count(), 0);
    }
}
