//! Tool traits: the abstraction over the tool backend.
//!
//! [`ToolCatalog`] is what the agent loop talks to: it lists the currently
//! invocable tools and executes one call by name. A catalog can be remote (an
//! MCP server) or the in-process [`ToolRegistry`] of [`Tool`] objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::ToolError;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name, unique within a catalog
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments exactly as the model produced them (JSON text)
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decode the argument text into a JSON object.
    ///
    /// Empty text and `null` decode to `{}`; anything that is not an object is
    /// rejected since tool parameters are always named.
    pub fn parse_arguments(&self) -> Result<serde_json::Value, ToolError> {
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Ok(serde_json::json!({}));
        }

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
                tool_name: self.name.clone(),
                reason: format!("arguments are not valid JSON: {e}"),
            })?;

        match value {
            serde_json::Value::Null => Ok(serde_json::json!({})),
            serde_json::Value::Object(_) => Ok(value),
            other => Err(ToolError::InvalidArguments {
                tool_name: self.name.clone(),
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }
}

/// The outcome of one tool call, paired with its request by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The call id this result answers
    pub call_id: String,

    /// Name of the tool that was requested
    pub name: String,

    /// Text shown to the model
    pub content: String,

    /// Whether the call failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Fold a tool failure into a result the model can read.
    pub fn from_error(call: &ToolCallRequest, err: &ToolError) -> Self {
        Self::error(&call.id, &call.name, format!("Error: {err}"))
    }
}

/// What a backend returns for a call it managed to run.
///
/// `is_error` is set when the tool itself reports failure (e.g. MCP `isError`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// The tool backend as seen by the agent loop.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// The tools currently available. Called once per model round.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// Execute one call with already-decoded arguments.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;

    /// Decode, execute and normalize one model-requested call.
    ///
    /// Never fails: every problem becomes a result with `is_error` set.
    async fn invoke(&self, call: &ToolCallRequest) -> ToolCallResult {
        let arguments = match call.parse_arguments() {
            Ok(arguments) => arguments,
            Err(e) => {
                debug!(tool = %call.name, call_id = %call.id, error = %e, "Rejected tool arguments");
                return ToolCallResult::from_error(call, &e);
            }
        };

        match self.call_tool(&call.name, arguments).await {
            Ok(output) => ToolCallResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: output.content,
                is_error: output.is_error,
            },
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                ToolCallResult::from_error(call, &e)
            }
        }
    }
}

/// An in-process tool.
///
/// Tools are registered in a [`ToolRegistry`], which exposes them to the loop
/// as a [`ToolCatalog`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "http_fetch").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a descriptor for sending to the LLM.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of in-process tools, ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get all tool descriptors (for sending to the LLM).
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.descriptors())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}
