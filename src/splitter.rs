use regex::Regex;
use std::sync::OnceLock;

pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";

fn think_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("static pattern compiles"))
}

/// Split a complete completion into (reasoning, answer).
///
/// The first non-greedy `<think>...</think>` span wins; its interior,
/// trimmed, is the reasoning, and the text with the whole span removed,
/// trimmed, is the answer. No start marker means no reasoning.
pub fn split(text: &str) -> (Option<String>, String) {
    match think_span().captures(text) {
        Some(caps) => {
            let span = caps.get(0).expect("capture 0 always present");
            let reasoning = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let mut answer = String::with_capacity(text.len());
            answer.push_str(&text[..span.start()]);
            answer.push_str(&text[span.end()..]);
            (Some(reasoning), answer.trim().to_string())
        }
        None => (None, text.trim().to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Scanning,
    InReasoning,
    InAnswer,
}

/// Per-fragment deltas produced while a completion streams in. A
/// presentation layer appends each delta to its growing view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDelta {
    pub reasoning_delta: Option<String>,
    pub answer_delta: Option<String>,
}

impl SplitDelta {
    pub fn is_empty(&self) -> bool {
        self.reasoning_delta.is_none() && self.answer_delta.is_none()
    }
}

/// Incremental reasoning/answer splitter over a fragment stream.
///
/// Marker text is never emitted on either channel, even when a marker
/// arrives split across fragment boundaries: up to marker-length - 1
/// trailing bytes are held back until the next fragment settles whether
/// they open (or close) a reasoning span.
pub struct StreamSplitter {
    mode: Mode,
    pending: String,
    reasoning: String,
    answer: String,
}

impl Default for StreamSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSplitter {
    pub fn new() -> Self {
        Self {
            mode: Mode::Scanning,
            pending: String::new(),
            reasoning: String::new(),
            answer: String::new(),
        }
    }

    /// Reasoning accumulated so far (markers stripped, untrimmed).
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Answer accumulated so far (untrimmed).
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Consume one fragment, returning whatever can be safely emitted.
    pub fn push(&mut self, fragment: &str) -> SplitDelta {
        self.pending.push_str(fragment);
        let mut delta = SplitDelta::default();

        loop {
            match self.mode {
                Mode::Scanning => {
                    if let Some(idx) = self.pending.find(THINK_START) {
                        let pre: String = self.pending.drain(..idx).collect();
                        self.pending.drain(..THINK_START.len());
                        self.emit_answer(&pre, &mut delta);
                        self.mode = Mode::InReasoning;
                    } else {
                        let text = self.drain_except_marker_prefix(THINK_START);
                        self.emit_answer(&text, &mut delta);
                        break;
                    }
                }
                Mode::InReasoning => {
                    if let Some(idx) = self.pending.find(THINK_END) {
                        let interior: String = self.pending.drain(..idx).collect();
                        self.pending.drain(..THINK_END.len());
                        self.emit_reasoning(&interior, &mut delta);
                        self.mode = Mode::InAnswer;
                    } else {
                        let text = self.drain_except_marker_prefix(THINK_END);
                        self.emit_reasoning(&text, &mut delta);
                        break;
                    }
                }
                Mode::InAnswer => {
                    let text = std::mem::take(&mut self.pending);
                    self.emit_answer(&text, &mut delta);
                    break;
                }
            }
        }

        delta
    }

    /// Finalize the stream: flush any held-back text and return the
    /// trimmed (reasoning, answer) pair. A stream that ended while still
    /// scanning has no reasoning.
    pub fn finish(mut self) -> (Option<String>, String) {
        let tail = std::mem::take(&mut self.pending);
        match self.mode {
            Mode::Scanning | Mode::InAnswer => self.answer.push_str(&tail),
            Mode::InReasoning => self.reasoning.push_str(&tail),
        }

        let answer = self.answer.trim().to_string();
        match self.mode {
            Mode::Scanning => (None, answer),
            _ => (Some(self.reasoning.trim().to_string()), answer),
        }
    }

    /// Drain pending text, holding back the longest trailing run that
    /// could still turn out to be the start of `marker`.
    fn drain_except_marker_prefix(&mut self, marker: &str) -> String {
        let hold = longest_partial_marker(&self.pending, marker);
        let emit_len = self.pending.len() - hold;
        self.pending.drain(..emit_len).collect()
    }

    fn emit_answer(&mut self, text: &str, delta: &mut SplitDelta) {
        if text.is_empty() {
            return;
        }
        self.answer.push_str(text);
        delta
            .answer_delta
            .get_or_insert_with(String::new)
            .push_str(text);
    }

    fn emit_reasoning(&mut self, text: &str, delta: &mut SplitDelta) {
        if text.is_empty() {
            return;
        }
        self.reasoning.push_str(text);
        delta
            .reasoning_delta
            .get_or_insert_with(String::new)
            .push_str(text);
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of
/// `marker`. Markers are ASCII, so the returned length always falls on a
/// char boundary of `text`.
fn longest_partial_marker(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        if text.ends_with(&marker[..len]) {
            return len;
        }
    }
    0
}
