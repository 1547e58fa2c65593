//! OpenAI-compatible provider
//!
//! Works against any endpoint speaking the chat-completions protocol
//! (OpenAI, DashScope compatible mode, vLLM, and similar).

pub mod client;
pub mod generator;
pub mod types;

pub use client::{OpenAIClient, RequestBudget};
pub use generator::OpenAIGenerator;
