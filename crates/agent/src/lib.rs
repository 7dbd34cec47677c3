//! The core agent loop.
//!
//! The agent follows a **Decide → Act → Observe** cycle:
//!
//! 1. **Receive** a task and append it to the conversation
//! 2. **Decide**: send the system prompt, the windowed history and the current
//!    tool catalog to the model
//! 3. **If tool calls**: execute them, append the results, go back to step 2
//! 4. **If text**: record it and return it to the caller
//!
//! The loop ends with the model's text, or with a typed error when the model
//! misbehaves, the round cap is reached, or the request is cancelled.

pub mod loop_runner;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::AgentLoop;
