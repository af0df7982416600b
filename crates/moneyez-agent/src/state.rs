//! Conversation state threaded through the graph, and the deltas nodes return.

use moneyez_ai::Message;
use serde::{Deserialize, Serialize};

use crate::retriever::Document;

/// State of one invocation. Messages are seeded from history and grow append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Ordered conversation turns
    pub messages: Vec<Message>,
    /// Retrieval queries generated for the latest user turn
    #[serde(default)]
    pub queries: Vec<String>,
    /// Whether retrieval was judged useful for this invocation
    #[serde(default)]
    pub need_rag: bool,
    /// Flattened text of `retrieved_docs`, same order
    #[serde(default)]
    pub rag_context: Vec<String>,
    /// Deduplicated, ranked documents attached ahead of the model call
    #[serde(default)]
    pub retrieved_docs: Vec<Document>,
}

impl ConversationState {
    /// Start a fresh state from prior turns
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// The most recent turn, if any
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the latest turn when that turn is from the user
    pub fn latest_user_text(&self) -> Option<String> {
        self.last_message()
            .filter(|m| m.is_user())
            .map(Message::text)
    }

    /// The last assistant turn's text, if the conversation ends with one
    pub fn final_answer(&self) -> Option<String> {
        match self.last_message() {
            Some(m @ Message::Assistant { .. }) if !m.has_tool_calls() => Some(m.text()),
            _ => None,
        }
    }

    /// Merge a node's delta into the state
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(queries) = update.queries {
            self.queries = queries;
        }
        if let Some(need_rag) = update.need_rag {
            self.need_rag = need_rag;
        }
        if let Some(rag_context) = update.rag_context {
            self.rag_context = rag_context;
        }
        if let Some(docs) = update.retrieved_docs {
            self.retrieved_docs = docs;
        }
    }
}

/// Delta returned by a node. Messages are appended; other set fields replace.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub queries: Option<Vec<String>>,
    pub need_rag: Option<bool>,
    pub rag_context: Option<Vec<String>>,
    pub retrieved_docs: Option<Vec<Document>>,
}

impl StateUpdate {
    /// Delta that appends turns
    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Delta that replaces the query list
    pub fn queries(queries: Vec<String>) -> Self {
        Self {
            queries: Some(queries),
            ..Default::default()
        }
    }

    /// Delta that replaces retrieval results
    pub fn retrieved(docs: Vec<Document>) -> Self {
        Self {
            rag_context: Some(docs.iter().map(|d| d.content.clone()).collect()),
            retrieved_docs: Some(docs),
            ..Default::default()
        }
    }
}
