use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation role. Closed set; the wire format is the lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One conversation turn. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn format(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Bounded conversation transcript. Appending past the cap evicts the
/// oldest entries, so the retained tail is always the most recent turns
/// in original order.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    cap: usize,
}

pub const DEFAULT_HISTORY_CAP: usize = 50;

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap,
        }
    }

    /// Pure append: returns a new history containing the most recent
    /// `cap` messages. The receiver is not mutated.
    #[must_use]
    pub fn append(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        if messages.len() > self.cap {
            let excess = messages.len() - self.cap;
            messages.drain(..excess);
        }
        Self {
            messages,
            cap: self.cap,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Case-insensitive substring scan over message contents.
    pub fn search(&self, query: &str) -> Vec<&Message> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        self.messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn to_wire(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(Message::to_wire).collect()
    }
}

/// One web-search result snippet used to ground an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

/// Search topic scope for the search provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    General,
    News,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::General => "general",
            Topic::News => "news",
        }
    }
}

/// Structured classifier output steering search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDecision {
    pub topic: Topic,
    #[serde(default)]
    pub recency_window_days: Option<u32>,
    #[serde(default)]
    pub rationale: String,
}

impl SearchDecision {
    /// Fallback used when classification fails for any reason.
    pub fn fallback() -> Self {
        Self {
            topic: Topic::General,
            recency_window_days: None,
            rationale: "classification failed".to_string(),
        }
    }
}

/// Wire-format chat message for the completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Request body for the chat completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

/// One SSE chunk from a streamed completion. Provider-specific nesting
/// stays confined to the transport; everything downstream sees
/// `TextFragment` only.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Normalized incremental completion output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment(pub String);

/// One incremental update delivered to the presentation layer while a
/// response streams in.
#[derive(Debug, Clone, Default)]
pub struct StreamUpdate {
    pub reasoning_delta: Option<String>,
    pub answer_delta: Option<String>,
    pub done: bool,
}

/// Terminal result of one orchestrated query.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Assistant message to append to the transcript (answer plus any
    /// references footer).
    pub message: Message,
    /// Reasoning trace, for presentational use only.
    pub reasoning: Option<String>,
    /// Evidence consulted for this answer, in citation order.
    pub evidence: Vec<EvidenceItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_append_respects_cap() {
        let mut history = History::new(3);
        for i in 0..10 {
            history = history.append(Message::format(Role::User, format!("turn {i}")));
            assert!(history.len() <= 3);
        }
        let retained: Vec<_> = history
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(retained, vec!["turn 7", "turn 8", "turn 9"]);
    }

    #[test]
    fn test_history_append_is_pure() {
        let history = History::new(5);
        let appended = history.append(Message::format(Role::User, "hello"));
        assert!(history.is_empty());
        assert_eq!(appended.len(), 1);
    }

    #[test]
    fn test_history_search_matches_case_insensitively() {
        let history = History::default()
            .append(Message::format(Role::User, "Tell me about Rust"))
            .append(Message::format(Role::Assistant, "Rust is a systems language."))
            .append(Message::format(Role::User, "And Python?"));

        let hits = history.search("rust");
        assert_eq!(hits.len(), 2);
        assert!(history.search("   ").is_empty());
        assert!(history.search("golang").is_empty());
    }

    #[test]
    fn test_role_wire_format_is_lowercase() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn test_search_decision_deserializes_with_optional_fields() {
        let decision: SearchDecision =
            serde_json::from_str(r#"{"topic": "news", "recency_window_days": 3}"#)
                .expect("deserialize");
        assert_eq!(decision.topic, Topic::News);
        assert_eq!(decision.recency_window_days, Some(3));
        assert!(decision.rationale.is_empty());
    }
}
