//! # taskloop Core
//!
//! Domain types, traits, and error definitions for the taskloop agent.
//! This crate has **zero framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators of the loop are traits here:
//! - [`Provider`]: the inference service, asked for the next [`Decision`]
//! - [`ToolCatalog`]: the tool backend, listed and invoked by name
//!
//! Implementations live in their respective crates, so the loop can be driven
//! by real backends in production and by scripted substitutes in tests.

pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use conversation::ConversationStore;
pub use error::{Error, ProtocolError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationId, Message};
pub use provider::{Decision, Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{
    Tool, ToolCallRequest, ToolCallResult, ToolCatalog, ToolDescriptor, ToolOutput, ToolRegistry,
};
