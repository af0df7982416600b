//! `POST /api/suggestion`

use axum::body::Bytes;
use axum::extract::State;

use super::{AppState, DataEnvelope};
use crate::error::{AppError, BaseResponse};
use crate::suggestion::{SuggestionError, SuggestionResponse, parse_qa_pairs};

pub async fn suggest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<BaseResponse<SuggestionResponse>, AppError> {
    let envelope: DataEnvelope = serde_json::from_slice(&body).map_err(|e| {
        AppError::bad_request("INVALID_REQUEST", format!("Invalid request format: {}", e))
    })?;

    let pairs = parse_qa_pairs(&envelope.data).map_err(|e| match e {
        SuggestionError::InvalidJson(_) => AppError::bad_request("INVALID_JSON", e.to_string()),
        other => AppError::bad_request("INVALID_REQUEST", other.to_string()),
    })?;
    tracing::info!(pairs = pairs.len(), "suggestion requested");

    let response = state.suggestion.suggest(&pairs).await.map_err(|e| {
        AppError::internal(
            "SUGGESTION_ERROR",
            format!("Error generating spending model suggestion: {}", e),
        )
    })?;
    tracing::info!(model = %response.recommended_model.name, "suggestion generated");
    Ok(BaseResponse::ok(
        "Spending model suggestion generated successfully",
        response,
    ))
}
