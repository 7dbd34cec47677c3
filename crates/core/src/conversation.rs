//! The Conversation Store: append-only history with a bounded view.
//!
//! The store owns the full history of one conversation but only ever shows the
//! model the most recent `window` entries. Two rules are enforced on append:
//!
//! 1. a call batch must be answered by a result batch with the same
//!    correlation ids, in the same order, before anything else is appended;
//! 2. every call and result entry carries a correlation id.
//!
//! The window never separates a result batch from its call batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::message::{ConversationId, Message};
use crate::tool::ToolCallRequest;

/// Default number of entries shown to the model.
pub const DEFAULT_WINDOW: usize = 10;

/// Ordered history for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStore {
    id: ConversationId,
    messages: Vec<Message>,
    window: usize,
    /// Correlation ids of the call batch still waiting for results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending: Option<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationStore {
    /// Create an empty store with a fresh id.
    pub fn new(window: usize) -> Self {
        Self::with_id(ConversationId::new(), window)
    }

    /// Create an empty store with a known id.
    pub fn with_id(id: ConversationId, window: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            window: window.max(1),
            pending: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// The full, unwindowed history.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether a call batch is still waiting for its results.
    pub fn has_pending_calls(&self) -> bool {
        self.pending.is_some()
    }

    /// Correlation ids of the unresolved call batch, if any.
    pub fn pending_call_ids(&self) -> Option<&[String]> {
        self.pending.as_deref()
    }

    /// Append one message to the end of the history.
    pub fn append(&mut self, message: Message) -> Result<(), ProtocolError> {
        match &message {
            Message::ToolCalls { calls } => {
                if let Some(pending) = &self.pending {
                    return Err(ProtocolError::UnresolvedCalls(pending.clone()));
                }
                self.pending = Some(Self::validate_calls(calls)?);
            }
            Message::ToolResults { results } => {
                if results.is_empty() {
                    return Err(ProtocolError::EmptyBatch {
                        kind: "tool_results",
                    });
                }
                if results.iter().any(|r| r.call_id.trim().is_empty()) {
                    return Err(ProtocolError::MissingCorrelationId {
                        kind: "tool_results",
                    });
                }
                let expected = self.pending.as_ref().ok_or(ProtocolError::OrphanResults)?;
                let got: Vec<String> = results.iter().map(|r| r.call_id.clone()).collect();
                if &got != expected {
                    return Err(ProtocolError::MismatchedResults {
                        expected: expected.clone(),
                        got,
                    });
                }
                self.pending = None;
            }
            _ => {
                if let Some(pending) = &self.pending {
                    return Err(ProtocolError::UnresolvedCalls(pending.clone()));
                }
            }
        }

        debug!(conversation_id = %self.id, kind = message.kind(), "Appending message");
        self.updated_at = Utc::now();
        self.messages.push(message);
        Ok(())
    }

    fn validate_calls(calls: &[ToolCallRequest]) -> Result<Vec<String>, ProtocolError> {
        if calls.is_empty() {
            return Err(ProtocolError::EmptyBatch { kind: "tool_calls" });
        }
        let mut seen = HashSet::new();
        for call in calls {
            if call.id.trim().is_empty() {
                return Err(ProtocolError::MissingCorrelationId { kind: "tool_calls" });
            }
            if !seen.insert(call.id.as_str()) {
                return Err(ProtocolError::DuplicateCorrelationId(call.id.clone()));
            }
        }
        Ok(calls.iter().map(|c| c.id.clone()).collect())
    }

    /// `preamble` followed by the windowed history.
    ///
    /// When the cut would land on a result batch, its call batch is included
    /// as well, so the view may exceed the window by one entry.
    pub fn snapshot(&self, preamble: &[Message]) -> Vec<Message> {
        let start = self.window_start();
        preamble
            .iter()
            .cloned()
            .chain(self.messages[start..].iter().cloned())
            .collect()
    }

    fn window_start(&self) -> usize {
        let len = self.messages.len();
        let start = len.saturating_sub(self.window);
        if start > 0 && matches!(self.messages[start], Message::ToolResults { .. }) {
            start - 1
        } else {
            start
        }
    }

    /// Drop a trailing call batch that never received results.
    ///
    /// Returns the discarded calls. Used when a cycle is cancelled or fails
    /// between appending a call batch and appending its results.
    pub fn discard_pending_calls(&mut self) -> Option<Vec<ToolCallRequest>> {
        self.pending.as_ref()?;
        match self.messages.pop() {
            Some(Message::ToolCalls { calls }) => {
                self.pending = None;
                self.updated_at = Utc::now();
                warn!(
                    conversation_id = %self.id,
                    calls = calls.len(),
                    "Discarded unresolved tool-call batch"
                );
                Some(calls)
            }
            Some(other) => {
                // pending is only ever set by a trailing call batch
                self.messages.push(other);
                None
            }
            None => None,
        }
    }

    /// Remove all history.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending = None;
        self.updated_at = Utc::now();
    }
}
