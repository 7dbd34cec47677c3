//! Inference adapters for taskloop.
//!
//! All providers implement the `taskloop_core::Provider` trait.
//! The router builds the configured provider.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;
