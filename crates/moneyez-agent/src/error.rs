//! Error types for moneyez-agent

use std::time::Duration;
use thiserror::Error;

/// Result type alias using moneyez-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate a graph invocation or a collaborator call
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model provider layer
    #[error(transparent)]
    Ai(#[from] moneyez_ai::Error),

    /// The model did not answer within the configured bound
    #[error("Model call timed out after {0:?}")]
    ModelTimeout(Duration),

    /// The model answered with no content at all
    #[error("Model returned an empty response")]
    EmptyResponse,

    /// The agent/tools loop ran past its configured depth
    #[error("tool loop limit exceeded ({limit} iterations)")]
    ToolLoopLimit { limit: usize },

    /// Another invocation for the same conversation is still running
    #[error("Conversation {0} is already being processed")]
    ConversationBusy(String),

    /// Reading or writing a checkpoint failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The knowledge store failed a search or write
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for reporting failures to callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::ToolLoopLimit { .. } => "TOOL_LOOP_LIMIT",
            Error::ConversationBusy(_) => "CONVERSATION_BUSY",
            Error::Checkpoint(_) => "CHECKPOINT_ERROR",
            Error::Retrieval(_) => "RETRIEVAL_ERROR",
            Error::Ai(_) | Error::ModelTimeout(_) | Error::EmptyResponse | Error::Other(_) => {
                "MODEL_ERROR"
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Checkpoint(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Checkpoint(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_limit_message() {
        let e = Error::ToolLoopLimit { limit: 10 };
        assert!(e.to_string().contains("tool loop limit exceeded"));
        assert_eq!(e.code(), "TOOL_LOOP_LIMIT");
    }

    #[test]
    fn test_model_failures_share_code() {
        assert_eq!(Error::EmptyResponse.code(), "MODEL_ERROR");
        assert_eq!(
            Error::ModelTimeout(Duration::from_secs(60)).code(),
            "MODEL_ERROR"
        );
        assert_eq!(Error::Ai(moneyez_ai::Error::Aborted).code(), "MODEL_ERROR");
    }
}
