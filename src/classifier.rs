use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ChatMessage, CompletionRequest, Role, SearchDecision};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

const CLASSIFIER_INSTRUCTION: &str = r#"You are a search-topic classifier. Given a user's question, decide what kind of web search would best ground the answer and return a JSON object with this structure:
{
    "topic": "general" | "news",
    "recency_window_days": 3,  // optional int, only for news-style queries that care about recent events
    "rationale": "string"      // one short sentence explaining the choice
}

Use "news" only when the question is about current events, breaking developments, or anything where freshness matters. Omit "recency_window_days" unless a recent window clearly applies.

Examples:
User: "latest AI news"
Output:
{
    "topic": "news",
    "recency_window_days": 3,
    "rationale": "Asks for recent developments."
}

User: "What is the capital of France?"
Output:
{
    "topic": "general",
    "rationale": "Stable factual question."
}
"#;

/// Search-decision seam over one JSON-mode completion call.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, query: &str) -> SearchDecision;
}

pub struct GroqClassifier {
    tx: Arc<dyn Transport>,
    model: String,
    retry: RetryPolicy,
}

impl GroqClassifier {
    pub fn new(tx: Arc<dyn Transport>, model: String, retry: RetryPolicy) -> Self {
        Self { tx, model, retry }
    }
}

#[async_trait]
impl Classifier for GroqClassifier {
    /// Classification is only an optimization over search parameters, so
    /// every failure mode falls back to a general-topic decision.
    async fn classify(&self, query: &str) -> SearchDecision {
        tracing::info!("Classifying search topic for query: {}", query);

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: CLASSIFIER_INSTRUCTION.to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: format!("User question: {query}"),
                },
            ],
            // Low temperature for consistent JSON output.
            temperature: 0.0,
            max_tokens: 300,
            top_p: 1.0,
            stream: None,
            response_format: Some(serde_json::json!({"type": "json_object"})),
        };

        // Same retry treatment as any other completion; only once the
        // attempt budget is spent does the fallback take over.
        let response = match self.retry.run(|| self.tx.chat(&request)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Topic classification failed after retries, using fallback: {e}");
                return SearchDecision::fallback();
            }
        };

        let Some(choice) = response.choices.first() else {
            tracing::warn!("Classifier returned no choices, using fallback");
            return SearchDecision::fallback();
        };

        match serde_json::from_str::<SearchDecision>(&choice.message.content) {
            Ok(decision) => {
                tracing::info!(
                    "Search decision: topic={}, recency={:?}",
                    decision.topic.as_str(),
                    decision.recency_window_days
                );
                decision
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse classifier JSON ({e}), using fallback. Raw: {}",
                    choice.message.content
                );
                SearchDecision::fallback()
            }
        }
    }
}
