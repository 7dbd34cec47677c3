//! Request dispatch and the HTTP gateway for taskloop.
//!
//! [`Dispatcher`] is the boundary every caller goes through (CLI or HTTP):
//! it maps a request to a conversation, serializes cycles per conversation and
//! applies the request timeout. [`http::router`] exposes it over Axum.

pub mod dispatcher;
pub mod http;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use taskloop_agent::AgentLoop;
use taskloop_config::AppConfig;
use taskloop_core::error::Error;
use taskloop_core::event::EventBus;
use taskloop_core::provider::Provider;
use taskloop_core::tool::ToolCatalog;
use tracing::info;

pub use dispatcher::{Dispatcher, LoopRequest, LoopResponse, SHARED_CONVERSATION};

/// Build the agent loop from configuration and already-built backends.
pub fn build_agent(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    catalog: Arc<dyn ToolCatalog>,
    event_bus: Arc<EventBus>,
) -> AgentLoop {
    let agent = AgentLoop::new(provider, catalog, &config.model, event_bus)
        .with_temperature(config.temperature)
        .with_system_prompt(&config.system_prompt)
        .with_max_iterations(config.agent.max_iterations)
        .with_tool_timeout(config.agent.tool_timeout())
        .with_parallel_tools(config.agent.parallel_tool_calls);

    match config.max_tokens {
        Some(max) => agent.with_max_tokens(max),
        None => agent,
    }
}

/// Build a dispatcher around already-built backends.
pub fn dispatcher_with(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    catalog: Arc<dyn ToolCatalog>,
    event_bus: Arc<EventBus>,
) -> Dispatcher {
    let agent = build_agent(config, provider, catalog.clone(), event_bus);
    Dispatcher::new(Arc::new(agent), catalog)
        .with_scope(config.conversation.scope)
        .with_busy_policy(config.conversation.busy_policy)
        .with_history_window(config.agent.history_window)
        .with_max_conversations(config.conversation.max_conversations)
        .with_request_timeout(config.agent.request_timeout())
}

/// Connect the configured provider and tool backend and build a dispatcher.
pub async fn build_dispatcher(config: &AppConfig) -> Result<Dispatcher, Error> {
    let provider = taskloop_providers::build_from_config(config).map_err(|e| Error::Config {
        message: e.to_string(),
    })?;
    let catalog = taskloop_tools::build_catalog(config).await?;

    info!(
        provider = provider.name(),
        model = %config.model,
        backend = ?config.tools.backend,
        "Dispatcher ready"
    );
    Ok(dispatcher_with(
        config,
        provider,
        catalog,
        Arc::new(EventBus::default()),
    ))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let dispatcher = Arc::new(build_dispatcher(&config).await?);
    let app = http::router(dispatcher);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
