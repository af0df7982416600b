//! Graph event types

use serde::{Deserialize, Serialize};

use crate::graph::GraphNode;

/// Events emitted while a conversation graph runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// Invocation started
    GraphStart { thread_id: String },

    /// A node is about to run
    NodeStart { thread_id: String, node: GraphNode },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// A frontend tool call paused the invocation
    Interrupted {
        thread_id: String,
        tool_call_id: String,
        tool_name: String,
    },

    /// Invocation reached a final answer
    GraphEnd {
        thread_id: String,
        tool_iterations: usize,
    },

    /// Invocation failed
    Error { thread_id: String, message: String },
}

impl GraphEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GraphEvent::GraphEnd { .. } | GraphEvent::Interrupted { .. } | GraphEvent::Error { .. }
        )
    }
}
