//! The agent reasoning loop implementation.
//!
//! One call to [`AgentLoop::run`] is one cycle: the task is appended to the
//! conversation and the loop alternates between asking the model for a
//! decision and executing the tool calls it asks for, until the model answers
//! in text or the cycle fails.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use taskloop_core::conversation::ConversationStore;
use taskloop_core::error::{Error, ProtocolError, Result, ToolError};
use taskloop_core::event::{DomainEvent, EventBus};
use taskloop_core::message::Message;
use taskloop_core::provider::{Decision, Provider, ProviderRequest};
use taskloop_core::tool::{ToolCallRequest, ToolCallResult, ToolCatalog};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a cycle currently is.
#[derive(Debug)]
enum LoopState {
    /// Next step is a model query
    AwaitingDecision,
    /// A call batch has been appended and must be answered
    ExecutingTools {
        calls: Vec<ToolCallRequest>,
        /// Tool names the model was offered this round
        available: HashSet<String>,
    },
    Done(String),
    Failed(Error),
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Where tools are listed and executed
    catalog: Arc<dyn ToolCatalog>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Preamble placed before the history on every query (skipped when empty)
    system_prompt: String,

    /// Maximum model queries per cycle
    max_iterations: u32,

    /// Per tool call limit
    tool_timeout: Option<Duration>,

    /// Run the calls of a batch concurrently
    parallel_tools: bool,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: Arc<dyn ToolCatalog>,
        model: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            catalog,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: String::new(),
            max_iterations: 25,
            tool_timeout: None,
            parallel_tools: true,
            event_bus,
        }
    }

    /// Set the maximum number of model queries per cycle.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Bound every tool call; `None` lets calls run as long as they need.
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Choose between concurrent and one-at-a-time execution of a batch.
    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    /// Run one cycle for `task` on `store`.
    ///
    /// Returns the model's final text, or the structural error that ended the
    /// cycle. On any failure a trailing unanswered call batch is removed, so
    /// the conversation can be resumed.
    pub async fn run(
        &self,
        store: &mut ConversationStore,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let conversation_id = store.id().to_string();
        info!(
            conversation_id = %conversation_id,
            history = store.len(),
            "Processing task"
        );

        if let Some(stale) = store.discard_pending_calls() {
            warn!(
                conversation_id = %conversation_id,
                calls = stale.len(),
                "Dropped unanswered tool calls from an interrupted cycle"
            );
        }

        self.event_bus.publish(DomainEvent::RequestReceived {
            conversation_id: conversation_id.clone(),
            content_preview: task.chars().take(80).collect(),
            timestamp: Utc::now(),
        });

        let mut rounds = 0;
        let mut state = match store.append(Message::user(task)) {
            Ok(()) => LoopState::AwaitingDecision,
            Err(e) => LoopState::Failed(e.into()),
        };

        let outcome = loop {
            state = match state {
                LoopState::AwaitingDecision => self
                    .decide(store, &mut rounds, cancel)
                    .await
                    .unwrap_or_else(LoopState::Failed),
                LoopState::ExecutingTools { calls, available } => self
                    .execute_tools(store, &calls, &available, cancel)
                    .await
                    .unwrap_or_else(LoopState::Failed),
                LoopState::Done(text) => break Ok(text),
                LoopState::Failed(err) => break Err(err),
            };
        };

        match &outcome {
            Ok(_) => info!(conversation_id = %conversation_id, rounds, "Task complete"),
            Err(e) => {
                store.discard_pending_calls();
                warn!(conversation_id = %conversation_id, rounds, error = %e, "Task failed");
            }
        }

        self.event_bus.publish(DomainEvent::LoopFinished {
            conversation_id,
            rounds,
            outcome: match &outcome {
                Ok(_) => "done".into(),
                Err(e) => e.kind().into(),
            },
            timestamp: Utc::now(),
        });

        outcome
    }

    /// One model round: list tools, query, record the decision.
    async fn decide(
        &self,
        store: &mut ConversationStore,
        rounds: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<LoopState> {
        if *rounds >= self.max_iterations {
            return Err(Error::MaxIterations {
                max_iterations: self.max_iterations,
            });
        }
        if let Some(pending) = store.pending_call_ids() {
            return Err(ProtocolError::UnresolvedCalls(pending.to_vec()).into());
        }
        *rounds += 1;

        let tools = cancellable(cancel, self.catalog.list_tools()).await??;

        debug!(
            conversation_id = %store.id(),
            round = *rounds,
            tools = tools.len(),
            "Agent loop iteration"
        );
        self.event_bus.publish(DomainEvent::RoundStarted {
            conversation_id: store.id().to_string(),
            round: *rounds,
            tools_available: tools.len(),
            timestamp: Utc::now(),
        });

        let available: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: store.snapshot(&self.preamble()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        };

        let response = cancellable(cancel, self.provider.complete(request)).await??;
        let model = response.model.clone();
        let tokens_used = response.usage.as_ref().map_or(0, |u| u.total_tokens);
        let decision = response.into_decision()?;

        let (kind, tool_calls) = match &decision {
            Decision::FinalText(_) => ("final_text", 0),
            Decision::ToolCalls(calls) => ("tool_calls", calls.len()),
        };
        debug!(
            conversation_id = %store.id(),
            round = *rounds,
            decision = kind,
            tool_calls,
            tokens_used,
            "Model decided"
        );
        self.event_bus.publish(DomainEvent::DecisionMade {
            conversation_id: store.id().to_string(),
            model,
            decision: kind.into(),
            tool_calls,
            tokens_used,
            timestamp: Utc::now(),
        });

        match decision {
            Decision::FinalText(text) => {
                store.append(Message::assistant(text.clone()))?;
                Ok(LoopState::Done(text))
            }
            Decision::ToolCalls(calls) => {
                store.append(Message::tool_calls(calls.clone()))?;
                Ok(LoopState::ExecutingTools { calls, available })
            }
        }
    }

    /// Execute a call batch and append its results in call order.
    async fn execute_tools(
        &self,
        store: &mut ConversationStore,
        calls: &[ToolCallRequest],
        available: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<LoopState> {
        let conversation_id = store.id().to_string();
        debug!(
            conversation_id = %conversation_id,
            tool_count = calls.len(),
            parallel = self.parallel_tools,
            "Executing tool calls"
        );

        let results = if self.parallel_tools {
            let batch = calls
                .iter()
                .map(|call| self.execute_one(&conversation_id, call, available));
            cancellable(cancel, join_all(batch)).await?
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(
                    cancellable(cancel, self.execute_one(&conversation_id, call, available))
                        .await?,
                );
            }
            results
        };

        store.append(Message::tool_results(results))?;
        Ok(LoopState::AwaitingDecision)
    }

    /// Run one call. Never fails; problems become error results.
    async fn execute_one(
        &self,
        conversation_id: &str,
        call: &ToolCallRequest,
        available: &HashSet<String>,
    ) -> ToolCallResult {
        let start = Instant::now();

        let result = if !available.contains(&call.name) {
            warn!(tool = %call.name, call_id = %call.id, "Model called a tool it was not offered");
            ToolCallResult::from_error(call, &ToolError::NotFound(call.name.clone()))
        } else {
            match self.tool_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.catalog.invoke(call)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(tool = %call.name, call_id = %call.id, "Tool call timed out");
                        ToolCallResult::from_error(
                            call,
                            &ToolError::Timeout {
                                tool_name: call.name.clone(),
                                timeout_secs: limit.as_secs(),
                            },
                        )
                    }
                },
                None => self.catalog.invoke(call).await,
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            tool = %call.name,
            call_id = %call.id,
            success = !result.is_error,
            duration_ms,
            "Tool executed"
        );
        self.event_bus.publish(DomainEvent::ToolExecuted {
            conversation_id: conversation_id.to_string(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: !result.is_error,
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    fn preamble(&self) -> Vec<Message> {
        if self.system_prompt.trim().is_empty() {
            Vec::new()
        } else {
            vec![Message::system(self.system_prompt.clone())]
        }
    }
}

/// Race `fut` against cancellation.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = fut => Ok(output),
    }
}
