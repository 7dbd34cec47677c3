//! Tool backends for taskloop.
//!
//! The agent loop only sees a [`ToolCatalog`]. Two backends are provided:
//! an MCP server reached over HTTP + SSE ([`McpWorkbench`]) and an in-process
//! registry of built-in tools.

pub mod http_fetch;
pub mod mcp;
pub mod sse;

use std::sync::Arc;

use taskloop_config::{AppConfig, ToolBackend};
use taskloop_core::error::ToolError;
use taskloop_core::tool::{ToolCatalog, ToolRegistry};

pub use mcp::McpWorkbench;

/// Registry with every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(http_fetch::HttpFetchTool::new()));
    registry
}

/// Build the tool catalog selected by `tools.backend`.
pub async fn build_catalog(config: &AppConfig) -> Result<Arc<dyn ToolCatalog>, ToolError> {
    match config.tools.backend {
        ToolBackend::Mcp => Ok(Arc::new(McpWorkbench::connect(&config.tools.mcp).await?)),
        ToolBackend::Builtin => Ok(Arc::new(builtin_registry())),
    }
}
