//! Test doubles shared by the dispatcher and HTTP tests.

use std::sync::Arc;

use async_trait::async_trait;
use taskloop_agent::AgentLoop;
use taskloop_core::error::{ProviderError, ToolError};
use taskloop_core::event::EventBus;
use taskloop_core::message::Message;
use taskloop_core::provider::{Provider, ProviderRequest, ProviderResponse};
use taskloop_core::tool::{Tool, ToolCatalog, ToolOutput, ToolRegistry};
use tokio::sync::{Mutex, Notify, mpsc};

/// Answers every task with `answer to: {task}`.
pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let task = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { content } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(ProviderResponse::text("echo-model", format!("answer to: {task}")))
    }
}

/// Always fails like an unreachable inference service.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Holds every query until [`BlockingProvider::release`] is called.
pub struct BlockingProvider {
    entered_tx: mpsc::UnboundedSender<()>,
    entered_rx: Mutex<mpsc::UnboundedReceiver<()>>,
    gate: Notify,
}

impl BlockingProvider {
    pub fn new() -> Self {
        let (entered_tx, entered_rx) = mpsc::unbounded_channel();
        Self {
            entered_tx,
            entered_rx: Mutex::new(entered_rx),
            gate: Notify::new(),
        }
    }

    /// Wait until a query is in flight.
    pub async fn wait_entered(&self) {
        self.entered_rx.lock().await.recv().await;
    }

    /// Let one waiting query answer.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Provider for BlockingProvider {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let _ = self.entered_tx.send(());
        self.gate.notified().await;
        Ok(ProviderResponse::text("blocking-model", "released"))
    }
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(arguments["text"].as_str().unwrap_or("")))
    }
}

pub fn agent_with(provider: Arc<dyn Provider>) -> (Arc<AgentLoop>, Arc<dyn ToolCatalog>) {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    let catalog: Arc<dyn ToolCatalog> = Arc::new(registry);
    let agent = AgentLoop::new(
        provider,
        catalog.clone(),
        "test-model",
        Arc::new(EventBus::default()),
    );
    (Arc::new(agent), catalog)
}
