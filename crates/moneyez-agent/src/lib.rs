//! moneyez-agent: conversation graph for the MoneyEZ assistant
//!
//! Routes each user turn through an optional retrieval pipeline, then runs the
//! model and any requested tools until a final answer or a frontend interrupt.

pub mod checkpoint;
pub mod error;
pub mod events;
pub mod graph;
pub mod rag;
pub mod retriever;
pub mod state;
pub mod tool;
pub mod transport;

pub use checkpoint::{Checkpointer, FileCheckpointer, InFlight, MemoryCheckpointer};
pub use error::{Error, Result};
pub use events::GraphEvent;
pub use graph::{
    ConversationGraph, DEFAULT_SYSTEM_PROMPT, GraphConfig, GraphInput, GraphNode, GraphOutcome,
    RunConfig,
};
pub use retriever::{Document, KnowledgeStore, Retriever};
pub use state::{ConversationState, StateUpdate};
pub use tool::{
    BoxedTool, FrontendInterrupt, FrontendTool, Tool, ToolContext, ToolOutcome, ToolRegistry,
    ToolResult,
};
pub use transport::{ProviderTransport, RetryConfig, Transport};
