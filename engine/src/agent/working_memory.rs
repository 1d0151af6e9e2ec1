//! Conversation transcript for the decision loop
//!
//! Keeps every turn sent to the model in order. The first messages (system
//! prompt, task text, start-up hints) are pinned and never trimmed; the rest
//! are dropped oldest-first once the estimated token count passes the
//! context limit. The per-step context message is not stored: it is appended
//! to a copy of the transcript for a single model call.

use crate::llm::Message;

/// Default context limit in tokens
const DEFAULT_CONTEXT_LIMIT: usize = 32_000;

/// Average characters per token (rough estimate)
const CHARS_PER_TOKEN: usize = 4;

/// Messages never trimmed from the tail end, besides the pinned prefix
const MIN_RECENT: usize = 2;

#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,

    /// Number of leading messages that survive trimming
    pinned: usize,

    context_limit: usize,

    token_count: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_CONTEXT_LIMIT)
    }

    pub fn with_limit(context_limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            pinned: 0,
            context_limit,
            token_count: 0,
        }
    }

    /// Add a message to the pinned prefix.
    ///
    /// Only valid before the first unpinned message; later calls behave
    /// like [`Transcript::push`].
    pub fn pin(&mut self, message: Message) {
        let extends_prefix = self.pinned == self.messages.len();
        self.push(message);
        if extends_prefix {
            self.pinned = self.messages.len();
        }
    }

    /// Append a turn, trimming old unpinned turns when over the limit
    pub fn push(&mut self, message: Message) {
        self.token_count += Self::estimate_tokens(&message);
        self.messages.push(message);

        if self.token_count > self.context_limit {
            self.trim_messages();
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The transcript plus a one-off trailing message
    pub fn with_context(&self, context: Message) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages);
        messages.push(context);
        messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pinned(&self) -> usize {
        self.pinned
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn trim_messages(&mut self) {
        while self.token_count > self.context_limit
            && self.messages.len() > self.pinned + MIN_RECENT
        {
            let removed = self.messages.remove(self.pinned);
            self.token_count = self
                .token_count
                .saturating_sub(Self::estimate_tokens(&removed));
        }
    }

    fn estimate_tokens(message: &Message) -> usize {
        let tool_call_chars = message.tool_call_id.as_ref().map_or(0, String::len);
        let overhead = 10;
        (message.content.len() + tool_call_chars).div_ceil(CHARS_PER_TOKEN) + overhead
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}
