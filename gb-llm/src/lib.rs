//! OpenAI-compatible chat-completions client for grumpybot.
//!
//! Pure HTTP client, no chat-platform dependency.

mod client;
mod error;
mod openai;
mod types;

pub use client::LlmClient;
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
