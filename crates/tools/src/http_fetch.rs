//! HTTP fetch tool: GET a URL and return the status plus a truncated body.

use async_trait::async_trait;
use std::time::Duration;
use taskloop_core::error::ToolError;
use taskloop_core::tool::{Tool, ToolOutput};
use tracing::debug;

const DEFAULT_MAX_CHARS: usize = 8_000;

pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("taskloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page or API response with an HTTP GET request. \
         Returns the status code and the (possibly truncated) response body."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http:// or https:// URL to fetch"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum number of body characters to return (default 8000)",
                    "default": DEFAULT_MAX_CHARS
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| invalid("Missing 'url' argument"))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(invalid("URL must start with http:// or https://"));
        }

        let max_chars = arguments["max_chars"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        debug!(url, "Fetching");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "http_fetch".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "http_fetch".into(),
                reason: format!("failed to read body: {e}"),
            })?;

        let content = format!("HTTP {}\n\n{}", status.as_u16(), truncate(&body, max_chars));
        if status.is_client_error() || status.is_server_error() {
            Ok(ToolOutput::error(content))
        } else {
            Ok(ToolOutput::text(content))
        }
    }
}

fn invalid(reason: &str) -> ToolError {
    ToolError::InvalidArguments {
        tool_name: "http_fetch".into(),
        reason: reason.into(),
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!(
            "{}\n...[truncated, {} more bytes]",
            &text[..byte_idx],
            text.len() - byte_idx
        ),
        None => text.to_string(),
    }
}
