//! Message domain types.
//!
//! These are the value objects that flow through the loop:
//! User task → Conversation Store → Provider decides → Tools run → results appended.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCallRequest, ToolCallResult};

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single entry in a conversation.
///
/// Tool calls and their results are batches: one model round that requests
/// three calls produces one `ToolCalls` entry, and exactly one `ToolResults`
/// entry answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    ToolCalls { calls: Vec<ToolCallRequest> },
    ToolResults { results: Vec<ToolCallResult> },
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create a new assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Create an assistant message carrying a batch of tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::ToolCalls { calls }
    }

    /// Create a message carrying the results of a tool-call batch.
    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self::ToolResults { results }
    }

    /// Short name of the variant, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolCalls { .. } => "tool_calls",
            Message::ToolResults { .. } => "tool_results",
        }
    }

    /// The text payload, for the text-only variants.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content } => Some(content),
            Message::ToolCalls { .. } | Message::ToolResults { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.kind(), "user");
        assert_eq!(msg.text(), Some("Hello, agent!"));
    }

    #[test]
    fn tool_batches_carry_no_text() {
        let calls = Message::tool_calls(vec![ToolCallRequest::new("c1", "search", "{}")]);
        assert_eq!(calls.kind(), "tool_calls");
        assert!(calls.text().is_none());

        let results = Message::tool_results(vec![ToolCallResult::success(
            "c1", "search", "found",
        )]);
        assert_eq!(results.kind(), "tool_results");
        assert!(results.text().is_none());
    }

    #[test]
    fn message_serializes_with_kind_tag() {
        let msg = Message::tool_calls(vec![ToolCallRequest::new("c1", "search", r#"{"q":"X"}"#)]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "tool_calls");
        assert_eq!(json["calls"][0]["id"], "c1");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
