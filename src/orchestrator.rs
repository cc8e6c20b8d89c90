use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::classifier::Classifier;
use crate::completion::{self, CompletionClient, DEGRADED_SERVICE_MESSAGE, SYSTEM_PERSONA};
use crate::models::{
    ChatMessage, ChatOutcome, EvidenceItem, History, Message, Role, StreamUpdate, TextFragment,
};
use crate::search::SearchProvider;
use crate::splitter::{self, StreamSplitter};

/// Returned without any API call when the user submits a blank query.
pub const EMPTY_QUERY_MESSAGE: &str =
    "Please type a question and I'll do my best to help.";

pub const REFERENCES_LABEL: &str = "References:";

/// Coordinates one user query end to end: decide on search, assemble the
/// evidence-augmented prompt, generate, split reasoning from answer, and
/// attach references. Every terminal outcome is a well-formed assistant
/// message; no stage failure propagates to the caller.
pub struct Orchestrator {
    classifier: Arc<dyn Classifier>,
    search: SearchProvider,
    completion: CompletionClient,
    max_results: u32,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        search: SearchProvider,
        completion: CompletionClient,
        max_results: u32,
    ) -> Self {
        Self {
            classifier,
            search,
            completion,
            max_results,
        }
    }

    /// Batch mode: one blocking round trip, full outcome at the end.
    pub async fn respond(
        &self,
        query: &str,
        history: &History,
        search_enabled: bool,
    ) -> ChatOutcome {
        if query.trim().is_empty() {
            return canned_outcome(EMPTY_QUERY_MESSAGE);
        }

        let evidence = self.gather_evidence(query, search_enabled).await;
        let messages = build_messages(query, history, &evidence);

        let raw = self.completion.complete(&messages).await;
        if completion::is_degraded(&raw) {
            // The canned reply stands alone, matching the streaming
            // path; the evidence footer would imply sources it cites.
            return ChatOutcome {
                message: Message::format(Role::Assistant, raw),
                reasoning: None,
                evidence,
            };
        }
        let (reasoning, answer) = splitter::split(&raw);
        let (content, _) = finalize_answer(answer, &evidence);

        ChatOutcome {
            message: Message::format(Role::Assistant, content),
            reasoning,
            evidence,
        }
    }

    /// Streaming mode: incremental updates are pushed through `tx` as
    /// fragments arrive; the returned outcome carries the canonical
    /// final content (trimmed, references attached). A stream that dies
    /// mid-flight degrades: partial deltas already sent are to be
    /// discarded by the consumer.
    pub async fn respond_streaming(
        &self,
        query: &str,
        history: &History,
        search_enabled: bool,
        tx: mpsc::Sender<StreamUpdate>,
    ) -> ChatOutcome {
        if query.trim().is_empty() {
            let outcome = canned_outcome(EMPTY_QUERY_MESSAGE);
            send_final(&tx, Some(EMPTY_QUERY_MESSAGE.to_string())).await;
            return outcome;
        }

        let evidence = self.gather_evidence(query, search_enabled).await;
        let messages = build_messages(query, history, &evidence);

        let mut fragments = match self.completion.stream(&messages).await {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::error!("Failed to start completion stream: {e}");
                send_final(&tx, Some(DEGRADED_SERVICE_MESSAGE.to_string())).await;
                return ChatOutcome {
                    message: Message::format(Role::Assistant, DEGRADED_SERVICE_MESSAGE),
                    reasoning: None,
                    evidence,
                };
            }
        };

        let mut split = StreamSplitter::new();
        while let Some(item) = fragments.next().await {
            match item {
                Ok(TextFragment(text)) => {
                    let delta = split.push(&text);
                    if !delta.is_empty() {
                        let update = StreamUpdate {
                            reasoning_delta: delta.reasoning_delta,
                            answer_delta: delta.answer_delta,
                            done: false,
                        };
                        if tx.send(update).await.is_err() {
                            // Consumer went away; stop pulling so the
                            // connection is released promptly.
                            tracing::debug!("Stream consumer dropped, abandoning completion");
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Completion stream failed mid-flight: {e}");
                    send_final(&tx, Some(DEGRADED_SERVICE_MESSAGE.to_string())).await;
                    return ChatOutcome {
                        message: Message::format(Role::Assistant, DEGRADED_SERVICE_MESSAGE),
                        reasoning: None,
                        evidence,
                    };
                }
            }
        }

        let (reasoning, answer) = split.finish();
        // The references footer is synthesized after the stream ends, so
        // it goes out as one last answer delta.
        let (content, footer_delta) = finalize_answer(answer, &evidence);
        send_final(&tx, footer_delta).await;

        ChatOutcome {
            message: Message::format(Role::Assistant, content),
            reasoning,
            evidence,
        }
    }

    /// Classification and search both degrade silently; a search-layer
    /// failure must never block generation.
    async fn gather_evidence(&self, query: &str, search_enabled: bool) -> Vec<EvidenceItem> {
        if !search_enabled {
            return Vec::new();
        }
        let decision = self.classifier.classify(query).await;
        self.search
            .search(
                query,
                self.max_results,
                decision.topic,
                decision.recency_window_days,
            )
            .await
    }
}

fn canned_outcome(content: &str) -> ChatOutcome {
    ChatOutcome {
        message: Message::format(Role::Assistant, content),
        reasoning: None,
        evidence: Vec::new(),
    }
}

async fn send_final(tx: &mpsc::Sender<StreamUpdate>, answer_delta: Option<String>) {
    let _ = tx
        .send(StreamUpdate {
            reasoning_delta: None,
            answer_delta,
            done: true,
        })
        .await;
}

/// Assemble the prompt: persona + formatting contract, the indexed
/// evidence block when search ran, prior turns, then the query.
fn build_messages(query: &str, history: &History, evidence: &[EvidenceItem]) -> Vec<ChatMessage> {
    let mut system = SYSTEM_PERSONA.to_string();
    if !evidence.is_empty() {
        system.push_str("\n\nWeb search evidence (cite by bracketed index):\n");
        for (i, item) in evidence.iter().enumerate() {
            system.push_str(&format!(
                "[{}] {} - {}\n    {}\n",
                i + 1,
                item.title,
                item.url,
                item.excerpt
            ));
        }
        system.push_str(
            "Ground your answer in this evidence where it is relevant and cite entries by index.",
        );
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: Role::System,
        content: system,
    });
    messages.extend(history.to_wire());
    messages.push(ChatMessage {
        role: Role::User,
        content: query.to_string(),
    });
    messages
}

/// Append a references footer listing evidence URLs in original order,
/// unless the model already produced one. Returns the final content and
/// the footer that was added, if any, so a streaming caller can forward
/// it as a trailing delta.
fn finalize_answer(answer: String, evidence: &[EvidenceItem]) -> (String, Option<String>) {
    if evidence.is_empty() || answer.contains(REFERENCES_LABEL) {
        return (answer, None);
    }
    let mut footer = format!("\n\n{REFERENCES_LABEL}");
    for (i, item) in evidence.iter().enumerate() {
        footer.push_str(&format!("\n[{}] {}", i + 1, item.url));
    }
    let content = format!("{answer}{footer}");
    (content, Some(footer))
}
