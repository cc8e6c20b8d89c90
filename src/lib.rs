pub mod classifier;
pub mod completion;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod search;
pub mod splitter;
pub mod transport;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::classifier::GroqClassifier;
use crate::completion::{CompletionClient, CompletionParams};
use crate::config::Config;
use crate::error::Result;
use crate::models::{ChatMessage, ChatOutcome, History, Message, Role, StreamUpdate};
use crate::orchestrator::Orchestrator;
use crate::retry::{Backoff, RetryPolicy};
use crate::search::{RateGate, SearchProvider, TavilyClient};
use crate::transport::{GroqTransport, Transport};

const HISTORY_SUMMARY_INSTRUCTION: &str = "You are helping to search through chat \
history. Analyze the provided context and answer the query concisely.";

/// Result of a transcript search: the matching turns plus, when any
/// exist, a model-written summary of them.
#[derive(Debug, Clone)]
pub struct TranscriptSearch {
    pub matches: Vec<Message>,
    pub summary: Option<String>,
}

/// Top-level facade wiring the transport, search stack, and
/// orchestrator together from a validated config. One instance serves
/// one conversation session; the caller owns the history.
pub struct AssistantService {
    orchestrator: Orchestrator,
    summarizer: CompletionClient,
    history_cap: usize,
}

impl AssistantService {
    pub fn new(cfg: &Config) -> Result<Self> {
        cfg.validate()?;

        let transport: Arc<dyn Transport> = Arc::new(GroqTransport::new(cfg.groq.api_key.clone()));

        let completion_retry = RetryPolicy::new(
            cfg.retry.max_attempts,
            Backoff::Linear {
                base: cfg.completion_base_delay(),
            },
        );

        let classifier = Arc::new(GroqClassifier::new(
            Arc::clone(&transport),
            cfg.groq.classifier_model.clone(),
            completion_retry.clone(),
        ));

        let search = SearchProvider::new(
            Arc::new(TavilyClient::new(cfg.tavily.api_key.clone())),
            RateGate::new(cfg.min_search_interval()),
            RetryPolicy::new(
                cfg.retry.max_attempts,
                Backoff::Exponential {
                    base: cfg.search_base_delay(),
                },
            ),
        );

        let params = CompletionParams {
            temperature: cfg.groq.temperature,
            max_tokens: cfg.groq.max_tokens,
            top_p: cfg.groq.top_p,
        };
        let completion = CompletionClient::new(
            Arc::clone(&transport),
            cfg.groq.chat_model.clone(),
            params,
            completion_retry.clone(),
        );
        let summarizer = CompletionClient::new(
            Arc::clone(&transport),
            cfg.groq.chat_model.clone(),
            params,
            completion_retry,
        );

        Ok(Self {
            orchestrator: Orchestrator::new(
                classifier,
                search,
                completion,
                cfg.tavily.max_results,
            ),
            summarizer,
            history_cap: cfg.history.max_messages,
        })
    }

    pub fn empty_history(&self) -> History {
        History::new(self.history_cap)
    }

    /// One batch turn: returns the updated history and the outcome.
    pub async fn chat(
        &self,
        query: &str,
        history: &History,
        search_enabled: bool,
    ) -> (History, ChatOutcome) {
        let outcome = self.orchestrator.respond(query, history, search_enabled).await;
        (self.record_turn(query, history, &outcome), outcome)
    }

    /// One streamed turn: incremental updates go through `tx` while the
    /// call is in flight; the return value is the settled transcript.
    pub async fn chat_streaming(
        &self,
        query: &str,
        history: &History,
        search_enabled: bool,
        tx: mpsc::Sender<StreamUpdate>,
    ) -> (History, ChatOutcome) {
        let outcome = self
            .orchestrator
            .respond_streaming(query, history, search_enabled, tx)
            .await;
        (self.record_turn(query, history, &outcome), outcome)
    }

    /// Search the transcript for turns mentioning `query` and, when any
    /// match, summarize them with one non-streamed completion. The
    /// summary degrades the same way chat does; it never errors.
    pub async fn search_history(&self, query: &str, history: &History) -> TranscriptSearch {
        let matches: Vec<Message> = history.search(query).into_iter().cloned().collect();
        if matches.is_empty() {
            return TranscriptSearch {
                matches,
                summary: None,
            };
        }

        let context = matches
            .iter()
            .map(|m| format!("[{}] {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: HISTORY_SUMMARY_INSTRUCTION.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: format!("Query: {query}\nContext: {context}"),
            },
        ];
        let summary = self.summarizer.complete(&messages).await;

        TranscriptSearch {
            matches,
            summary: Some(summary),
        }
    }

    /// Blank queries produce a canned prompt-again outcome and are not
    /// recorded as user turns.
    fn record_turn(&self, query: &str, history: &History, outcome: &ChatOutcome) -> History {
        let history = if query.trim().is_empty() {
            history.clone()
        } else {
            history.append(Message::format(Role::User, query))
        };
        history.append(outcome.message.clone())
    }
}
