//! Shared test doubles for the agent loop.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use taskloop_core::error::{ProviderError, ToolError};
use taskloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use taskloop_core::tool::{ToolCallRequest, ToolCatalog, ToolDescriptor, ToolOutput};

pub fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

/// A provider that replays a script of responses and records every request.
///
/// With [`ScriptedProvider::repeating`] the single response is returned
/// forever; otherwise running past the end of the script is an API error.
pub struct ScriptedProvider {
    script: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    repeat: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let next = self.script.lock().unwrap().pop();
        let mut response = match (next, &self.repeat) {
            (Some(step), _) => step?,
            (None, Some(response)) => response.clone(),
            (None, None) => {
                return Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                });
            }
        };
        response.usage.get_or_insert(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        Ok(response)
    }
}

/// A catalog with a fixed set of tools.
///
/// - `search` answers `result-for-{q}`
/// - `broken` always fails
/// - `slow` finishes after 50ms, `fast` immediately
/// - `hang` never finishes
pub struct ScriptedCatalog {
    tools: Vec<ToolDescriptor>,
    list_count: AtomicUsize,
    executed: Mutex<Vec<String>>,
    fail_listing: bool,
}

impl ScriptedCatalog {
    pub fn new() -> Self {
        let tools = ["search", "broken", "slow", "fast", "hang"]
            .into_iter()
            .map(|name| ToolDescriptor {
                name: name.into(),
                description: format!("The {name} tool"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect();
        Self {
            tools,
            list_count: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            fail_listing: false,
        }
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn list_count(&self) -> usize {
        self.list_count.load(Ordering::SeqCst)
    }

    /// Tool names in completion order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolCatalog for ScriptedCatalog {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        self.list_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(ToolError::Transport("connection refused".into()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let output = match name {
            "search" => Ok(ToolOutput::text(format!(
                "result-for-{}",
                arguments["q"].as_str().unwrap_or("")
            ))),
            "broken" => Err(ToolError::ExecutionFailed {
                tool_name: name.into(),
                reason: "backend exploded".into(),
            }),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(ToolOutput::text("slow done"))
            }
            "fast" => Ok(ToolOutput::text("fast done")),
            "hang" => std::future::pending().await,
            other => Err(ToolError::NotFound(other.into())),
        };
        self.executed.lock().unwrap().push(name.to_string());
        output
    }
}
