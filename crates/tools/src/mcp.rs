//! MCP client over the HTTP + SSE transport.
//!
//! `GET {url}` opens an event stream. The server's first `endpoint` event
//! names the URL to POST JSON-RPC messages to; responses come back on the
//! stream as `message` events and are matched to the waiting request by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde_json::{Value, json};
use taskloop_config::McpConfig;
use taskloop_core::error::ToolError;
use taskloop_core::tool::{ToolCatalog, ToolDescriptor, ToolOutput};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::sse::{SseDecoder, SseEvent};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Requests waiting for a response, and whether the event stream is gone.
#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<Value>>,
    closed: bool,
}

type PendingMap = Arc<Mutex<Pending>>;

/// A connected MCP server exposed as a [`ToolCatalog`].
pub struct McpWorkbench {
    client: reqwest::Client,
    endpoint: Url,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    server_name: String,
    reader: JoinHandle<()>,
}

impl McpWorkbench {
    /// Open the event stream, wait for the endpoint and run the handshake.
    pub async fn connect(config: &McpConfig) -> Result<Self, ToolError> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        let sse_url = Url::parse(&config.url)
            .map_err(|e| ToolError::Transport(format!("invalid MCP url '{}': {e}", config.url)))?;

        info!(url = %sse_url, "Connecting to MCP server");

        let response = tokio::time::timeout(
            connect_timeout,
            client
                .get(sse_url.clone())
                .header("Accept", "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| ToolError::Transport(format!("timed out connecting to {sse_url}")))?
        .map_err(|e| ToolError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "MCP server returned {} for {sse_url}",
                response.status()
            )));
        }

        let pending: PendingMap = Arc::new(Mutex::new(Pending::default()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(response, endpoint_tx, pending.clone()));

        let endpoint = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(path)) => match sse_url.join(&path) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    reader.abort();
                    return Err(ToolError::Transport(format!(
                        "invalid endpoint '{path}': {e}"
                    )));
                }
            },
            Ok(Err(_)) => {
                return Err(ToolError::Transport(
                    "event stream closed before the endpoint event".into(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(ToolError::Transport(
                    "no endpoint event received from MCP server".into(),
                ));
            }
        };

        debug!(endpoint = %endpoint, "MCP message endpoint resolved");

        let mut workbench = Self {
            client,
            endpoint,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            server_name: String::new(),
            reader,
        };
        workbench.initialize().await?;

        info!(server = %workbench.server_name, "MCP server connected");
        Ok(workbench)
    }

    async fn initialize(&mut self) -> Result<(), ToolError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "taskloop",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;

        self.server_name = result["serverInfo"]["name"]
            .as_str()
            .unwrap_or("mcp")
            .to_string();
        if let Some(version) = result["protocolVersion"].as_str()
            && version != PROTOCOL_VERSION
        {
            warn!(server = %self.server_name, version, "MCP server negotiated a different protocol version");
        }

        self.notify("notifications/initialized", json!({})).await
    }

    /// Send a JSON-RPC request and wait for its response on the event stream.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(ToolError::Transport("MCP event stream closed".into()));
            }
            pending.waiters.insert(id, tx);
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(id, method, "MCP request");

        if let Err(e) = self.post(&body).await {
            self.pending.lock().await.waiters.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ToolError::Transport("MCP event stream closed".into()));
            }
            Err(_) => {
                self.pending.lock().await.waiters.remove(&id);
                return Err(ToolError::Timeout {
                    tool_name: method.to_string(),
                    timeout_secs: self.request_timeout.as_secs(),
                });
            }
        };

        if let Some(error) = response.get("error") {
            return Err(ToolError::Protocol {
                code: error["code"].as_i64().unwrap_or(-32603),
                message: error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolError> {
        self.post(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    async fn post(&self, body: &Value) -> Result<(), ToolError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Transport(format!(
                "MCP server rejected message ({status}): {text}"
            )));
        }
        Ok(())
    }
}

impl Drop for McpWorkbench {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ToolCatalog for McpWorkbench {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;

            if let Some(page) = result["tools"].as_array() {
                tools.extend(page.iter().filter_map(parse_descriptor));
            }

            match result["nextCursor"].as_str() {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(server = %self.server_name, tools = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };

        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        Ok(ToolOutput {
            content: flatten_content(&result),
            is_error: result["isError"].as_bool().unwrap_or(false),
        })
    }
}

/// Background task: decode the event stream and route responses.
async fn read_events(
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    pending: PendingMap,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "MCP event stream failed");
                break;
            }
        };

        for SseEvent { event, data } in decoder.feed(&bytes) {
            match event.as_str() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(data.trim().to_string());
                    }
                    None => debug!(endpoint = %data, "Ignoring repeated endpoint event"),
                },
                "message" => route_message(&data, &pending).await,
                other => trace!(event = other, "Ignoring SSE event"),
            }
        }
    }

    // Dropping the senders wakes every waiting request with a closed-stream error
    let mut pending = pending.lock().await;
    pending.closed = true;
    pending.waiters.clear();
    debug!("MCP event stream ended");
}

async fn route_message(data: &str, pending: &PendingMap) {
    let message: Value = match serde_json::from_str(data) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Undecodable MCP message");
            return;
        }
    };

    // Server-initiated requests and notifications carry a method
    if message.get("method").is_some() {
        trace!(method = %message["method"], "Ignoring server message");
        return;
    }

    let Some(id) = response_id(&message["id"]) else {
        warn!(message = %data, "MCP response without a usable id");
        return;
    };

    match pending.lock().await.waiters.remove(&id) {
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => debug!(id, "No request waiting for MCP response"),
    }
}

fn response_id(id: &Value) -> Option<u64> {
    id.as_u64().or_else(|| id.as_str()?.parse().ok())
}

fn parse_descriptor(tool: &Value) -> Option<ToolDescriptor> {
    let name = tool["name"].as_str()?.to_string();
    Some(ToolDescriptor {
        name,
        description: tool["description"].as_str().unwrap_or("").to_string(),
        parameters: tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object" })),
    })
}

/// Flatten a `tools/call` result into text.
///
/// Text blocks and embedded text resources are kept verbatim; anything else
/// becomes a bracketed placeholder.
pub fn flatten_content(result: &Value) -> String {
    let Some(blocks) = result["content"].as_array() else {
        return match result {
            Value::Null => String::new(),
            other => other.to_string(),
        };
    };

    blocks
        .iter()
        .map(|block| match block["type"].as_str().unwrap_or("") {
            "text" => block["text"].as_str().unwrap_or("").to_string(),
            "resource" => {
                let resource = &block["resource"];
                match resource["text"].as_str() {
                    Some(text) => text.to_string(),
                    None => format!("[resource: {}]", resource["uri"].as_str().unwrap_or("?")),
                }
            }
            "image" | "audio" => format!(
                "[{}: {}]",
                block["type"].as_str().unwrap_or(""),
                block["mimeType"].as_str().unwrap_or("unknown")
            ),
            other => format!("[{other} content]"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_text_blocks() {
        let result = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ]
        });
        assert_eq!(flatten_content(&result), "first\nsecond");
    }

    #[test]
    fn flatten_mixed_blocks() {
        let result = json!({
            "content": [
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///a.txt", "text": "inline"}},
                {"type": "resource", "resource": {"uri": "file:///b.bin", "blob": "..."}}
            ]
        });
        assert_eq!(
            flatten_content(&result),
            "[image: image/png]\ninline\n[resource: file:///b.bin]"
        );
    }

    #[test]
    fn flatten_without_content_array() {
        assert_eq!(flatten_content(&Value::Null), "");
        assert_eq!(flatten_content(&json!({"value": 3})), r#"{"value":3}"#);
    }

    #[test]
    fn descriptor_defaults_schema() {
        let d = parse_descriptor(&json!({"name": "browser_snapshot"})).unwrap();
        assert_eq!(d.parameters, json!({"type": "object"}));
        assert_eq!(d.description, "");
        assert!(parse_descriptor(&json!({"description": "nameless"})).is_none());
    }

    #[test]
    fn numeric_and_string_ids() {
        assert_eq!(response_id(&json!(7)), Some(7));
        assert_eq!(response_id(&json!("7")), Some(7));
        assert_eq!(response_id(&json!(null)), None);
    }
}
