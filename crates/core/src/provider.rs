//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation snapshot plus a tool catalog to
//! an LLM and get the model's next step back. The raw [`ProviderResponse`] is
//! turned into a [`Decision`] by the loop; a response that carries neither
//! text nor tool calls is an inference error, not something to paper over.
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, OpenRouter, Ollama, …).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::{ToolCallRequest, ToolDescriptor};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// System preamble followed by the windowed history
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model can call this round
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a provider, in wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Requested tool calls, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The model's per-round output. Never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    FinalText(String),
    ToolCalls(Vec<ToolCallRequest>),
}

impl ProviderResponse {
    /// A response carrying final text.
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: None,
            model: model.into(),
        }
    }

    /// A response requesting tool calls.
    pub fn calls(model: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
            usage: None,
            model: model.into(),
        }
    }

    /// Classify the response as exactly one kind of decision.
    ///
    /// Tool calls take precedence over any text sent alongside them.
    pub fn into_decision(self) -> Result<Decision, ProviderError> {
        if !self.tool_calls.is_empty() {
            let mut seen = HashSet::new();
            for call in &self.tool_calls {
                if call.id.trim().is_empty() {
                    return Err(ProviderError::MalformedDecision(format!(
                        "tool call '{}' has no id",
                        call.name
                    )));
                }
                if call.name.trim().is_empty() {
                    return Err(ProviderError::MalformedDecision(format!(
                        "tool call '{}' has no name",
                        call.id
                    )));
                }
                if !seen.insert(call.id.as_str()) {
                    return Err(ProviderError::MalformedDecision(format!(
                        "tool call id '{}' used twice",
                        call.id
                    )));
                }
            }
            return Ok(Decision::ToolCalls(self.tool_calls));
        }

        match self.content {
            Some(text) if !text.trim().is_empty() => Ok(Decision::FinalText(text)),
            _ => Err(ProviderError::EmptyDecision),
        }
    }
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` without knowing which backend is used.
/// Providers hold no conversation state: everything they need is in the request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_response_becomes_final_text() {
        let decision = ProviderResponse::text("m", "4").into_decision().unwrap();
        assert_eq!(decision, Decision::FinalText("4".into()));
    }

    #[test]
    fn tool_calls_win_over_text() {
        let mut response = ProviderResponse::calls(
            "m",
            vec![ToolCallRequest::new("1", "search", r#"{"q":"X"}"#)],
        );
        response.content = Some("Let me look that up".into());
        match response.into_decision().unwrap() {
            Decision::ToolCalls(calls) => assert_eq!(calls[0].id, "1"),
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn empty_response_is_an_error() {
        let response = ProviderResponse {
            content: None,
            tool_calls: vec![],
            usage: None,
            model: "m".into(),
        };
        assert!(matches!(
            response.into_decision(),
            Err(ProviderError::EmptyDecision)
        ));

        let blank = ProviderResponse::text("m", "   ");
        assert!(matches!(
            blank.into_decision(),
            Err(ProviderError::EmptyDecision)
        ));
    }

    #[test]
    fn duplicate_call_ids_are_malformed() {
        let response = ProviderResponse::calls(
            "m",
            vec![
                ToolCallRequest::new("1", "a", "{}"),
                ToolCallRequest::new("1", "b", "{}"),
            ],
        );
        assert!(matches!(
            response.into_decision(),
            Err(ProviderError::MalformedDecision(_))
        ));
    }

    #[test]
    fn call_without_id_is_malformed() {
        let response = ProviderResponse::calls("m", vec![ToolCallRequest::new("", "a", "{}")]);
        assert!(matches!(
            response.into_decision(),
            Err(ProviderError::MalformedDecision(_))
        ));
    }

    #[test]
    fn tool_descriptor_serialization() {
        let tool = ToolDescriptor {
            name: "search".into(),
            description: "Search the web".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "q": { "type": "string", "description": "The query" }
                },
                "required": ["q"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("search"));
        assert!(json.contains("query"));
    }
}
