//! Chat-completion client for the relay.
//!
//! Pure HTTP client speaking the OpenAI-compatible `/chat/completions` wire
//! format, which both OpenAI and DeepSeek expose.

mod client;
mod error;
mod openai;
mod types;

pub use client::{LlmClient, Provider};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
