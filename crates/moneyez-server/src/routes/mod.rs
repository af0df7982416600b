//! HTTP routes.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | POST | `/api/receive_message` | [`chat::receive_message`] |
//! | POST | `/api/knowledge/upload` | [`knowledge::upload`] |
//! | DELETE | `/api/knowledge/delete/{document_id}` | [`knowledge::delete`] |
//! | GET | `/api/knowledge/documents` | [`knowledge::list`] |
//! | POST | `/api/suggestion` | [`suggestion::suggest`] |
//! | GET | `/health` | [`health::health`] |

pub mod chat;
pub mod health;
pub mod knowledge;
pub mod suggestion;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use moneyez_agent::ConversationGraph;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::knowledge::{Chunker, SqliteKnowledgeStore};
use crate::suggestion::SuggestionService;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<ConversationGraph>,
    /// `None` when the store failed to open; knowledge routes answer 503
    pub knowledge: Option<Arc<SqliteKnowledgeStore>>,
    pub chunker: Chunker,
    pub suggestion: Arc<SuggestionService>,
    pub external_secret: Arc<str>,
}

/// Request bodies that carry their payload as a JSON string in `data`
#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope {
    pub data: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/receive_message", post(chat::receive_message))
        .route(
            "/api/knowledge/upload",
            post(knowledge::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/knowledge/delete/{document_id}",
            delete(knowledge::delete),
        )
        .route("/api/knowledge/documents", get(knowledge::list))
        .route("/api/suggestion", post(suggestion::suggest))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
