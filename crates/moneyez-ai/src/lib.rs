//! moneyez-ai: language model and embedding provider layer
//!
//! This crate provides the message types shared by the assistant, a streaming
//! Gemini chat provider, and a Gemini embedding client used by the knowledge base.

pub mod embeddings;
pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use embeddings::{Embedder, GoogleEmbedder};
pub use error::{Error, Result};
pub use providers::{GoogleProvider, LlmProvider};
pub use stream::{MessageEvent, MessageEventStream, collect_message};
pub use types::*;
