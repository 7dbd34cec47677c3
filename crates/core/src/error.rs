//! Error types for the taskloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is what a caller of
//! the loop ultimately sees.
//!
//! Tool-level failures ([`ToolError`]) are conversational: they are folded into
//! tool results and shown to the model. Everything else terminates the cycle.

use thiserror::Error;

/// The top-level error type for all taskloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Structural failures of a loop cycle ---
    #[error("Inference error: {0}")]
    Inference(#[from] ProviderError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Tool catalog unavailable: {0}")]
    Catalog(#[from] ToolError),

    #[error("No final answer after {max_iterations} model rounds")]
    MaxIterations { max_iterations: u32 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Conversation {0} is already processing a request")]
    Busy(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A short, stable name for the error kind (used by the HTTP surface).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Inference(_) => "inference",
            Error::Protocol(_) => "protocol_violation",
            Error::Catalog(_) => "tool_catalog",
            Error::MaxIterations { .. } => "max_iterations",
            Error::Cancelled => "cancelled",
            Error::Timeout { .. } => "timeout",
            Error::Busy(_) => "busy",
            Error::Config { .. } => "config",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model returned neither text nor tool calls")]
    EmptyDecision,

    #[error("Model returned a malformed decision: {0}")]
    MalformedDecision(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool backend unreachable: {0}")]
    Transport(String),

    #[error("Tool server protocol error {code}: {message}")]
    Protocol { code: i64, message: String },
}

/// Violations of the conversation contract.
///
/// These indicate a bug in whatever drives the store, never a model mistake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{kind} entry is missing a correlation id")]
    MissingCorrelationId { kind: &'static str },

    #[error("{kind} batch is empty")]
    EmptyBatch { kind: &'static str },

    #[error("duplicate correlation id in call batch: {0}")]
    DuplicateCorrelationId(String),

    #[error("tool results appended without a pending call batch")]
    OrphanResults,

    #[error("tool results {got:?} do not match pending calls {expected:?}")]
    MismatchedResults {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("call batch {0:?} is still waiting for results")]
    UnresolvedCalls(Vec<String>),
}
