//! Knowledge-base document management

use axum::extract::{Multipart, Path, State};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;
use crate::error::{AppError, BaseResponse};
use crate::knowledge::{DocumentInfo, KnowledgeError, SqliteKnowledgeStore, loader};

#[derive(Debug, Serialize)]
pub struct UploadedDocument {
    pub document_id: String,
    pub name: String,
    pub size: u64,
    pub created_at: String,
    pub content_type: String,
}

impl From<DocumentInfo> for UploadedDocument {
    fn from(info: DocumentInfo) -> Self {
        Self {
            document_id: info.document_id,
            name: info.name,
            size: info.size,
            created_at: info.created_at,
            content_type: info.content_type,
        }
    }
}

/// Entry of the document list, in the backend's field naming
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListItem {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub created_date: String,
    pub content_type: String,
}

impl From<DocumentInfo> for DocumentListItem {
    fn from(info: DocumentInfo) -> Self {
        Self {
            id: info.document_id,
            name: info.name,
            size: info.size,
            created_date: info.created_at,
            content_type: info.content_type,
        }
    }
}

fn store(state: &AppState) -> Result<Arc<SqliteKnowledgeStore>, AppError> {
    state
        .knowledge
        .clone()
        .ok_or_else(|| AppError::unavailable("Knowledge base is not available"))
}

/// Content type from the file extension, for uploads sent as octet-stream
fn guess_content_type(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "pdf" => loader::MIME_PDF,
        "docx" => loader::MIME_DOCX,
        "doc" => loader::MIME_MSWORD,
        "txt" => loader::MIME_TEXT,
        "md" | "markdown" => loader::MIME_MARKDOWN,
        "html" | "htm" => loader::MIME_HTML,
        _ => return None,
    })
}

/// `POST /api/knowledge/upload`, multipart field `file`
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<BaseResponse<UploadedDocument>, AppError> {
    let store = store(&state)?;
    let processing = |e: &dyn std::fmt::Display| {
        AppError::internal(
            "DOCUMENT_PROCESSING_ERROR",
            format!("Error processing document: {}", e),
        )
    };

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::bad_request("INVALID_REQUEST", format!("Invalid multipart body: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("unnamed").to_string();
        let declared = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let content_type = if loader::is_supported(&declared) {
            declared
        } else {
            guess_content_type(&filename)
                .map(str::to_string)
                .unwrap_or(declared)
        };
        let bytes = field.bytes().await.map_err(|e| processing(&e))?;
        tracing::info!(filename = %filename, content_type = %content_type, size = bytes.len(), "document upload");

        return match store
            .ingest(bytes.to_vec(), &filename, &content_type, state.chunker)
            .await
        {
            Ok(info) => Ok(BaseResponse::ok(
                "Document uploaded successfully",
                UploadedDocument::from(info),
            )),
            Err(KnowledgeError::UnsupportedType(t)) => Err(AppError::bad_request(
                "UNSUPPORTED_FILE_TYPE",
                format!("Unsupported file type: {}", t),
            )),
            Err(e) => Err(processing(&e)),
        };
    }

    Err(AppError::bad_request(
        "INVALID_REQUEST",
        "Missing multipart field 'file'",
    ))
}

/// `DELETE /api/knowledge/delete/{document_id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<BaseResponse, AppError> {
    let store = store(&state)?;
    match store.delete_document(&document_id).await {
        Ok(true) => Ok(BaseResponse::with_status(
            axum::http::StatusCode::OK,
            format!("Document {} deleted successfully", document_id),
            None,
        )),
        Ok(false) => Err(AppError::not_found(
            "DOCUMENT_NOT_FOUND",
            format!("Document {} not found", document_id),
        )),
        Err(e) => Err(AppError::internal(
            "DOCUMENT_DELETE_ERROR",
            format!("Error deleting document: {}", e),
        )),
    }
}

/// `GET /api/knowledge/documents`
pub async fn list(
    State(state): State<AppState>,
) -> Result<BaseResponse<Vec<DocumentListItem>>, AppError> {
    let store = store(&state)?;
    let documents = store.list_documents().await.map_err(|e| {
        AppError::internal(
            "DOCUMENT_LIST_ERROR",
            format!("Error getting document list: {}", e),
        )
    })?;
    Ok(BaseResponse::ok(
        "Document list retrieved successfully",
        documents.into_iter().map(DocumentListItem::from).collect(),
    ))
}
