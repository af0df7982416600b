//! Knowledge base: document extraction, chunking, embedding storage and search

pub mod chunker;
pub mod loader;
pub mod store;

pub use chunker::Chunker;
pub use store::SqliteKnowledgeStore;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Document contains no text")]
    EmptyDocument,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] moneyez_ai::Error),

    #[error("Invalid stored data: {0}")]
    Corrupt(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;

/// A registered source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub name: String,
    pub size: u64,
    pub created_at: String,
    pub content_type: String,
    pub chunk_count: usize,
}
