//! `POST /api/receive_message`: one chat turn from the finance backend

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use moneyez_agent::{GraphInput, GraphOutcome, RunConfig};
use moneyez_ai::Message;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AppState, DataEnvelope};
use crate::error::{AppError, BaseResponse};
use crate::finance::SECRET_HEADER;
use crate::utils::truncate_chars;

/// Payload carried as a JSON string in the request's `data` field
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChatPayload {
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    message: String,
    conversation_id: String,
    #[serde(default)]
    previous_messages: Option<Vec<PreviousMessage>>,
    /// Tools the caller resolves itself
    #[serde(default)]
    tools: Vec<moneyez_ai::Tool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PreviousMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub status: &'static str,
    pub conversation_id: String,
    pub message: serde_json::Value,
}

fn check_secret(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let Some(value) = headers.get(SECRET_HEADER) else {
        return Err(AppError::forbidden(format!("Missing {} header", SECRET_HEADER)));
    };
    if value.as_bytes() != expected.as_bytes() {
        return Err(AppError::forbidden(format!("Invalid {} header", SECRET_HEADER)));
    }
    Ok(())
}

fn parse_payload(body: &[u8]) -> Result<ChatPayload, serde_json::Error> {
    let envelope: DataEnvelope = serde_json::from_slice(body)?;
    serde_json::from_str(&envelope.data)
}

/// Backend history → conversation turns; unknown roles are dropped
fn history_to_messages(history: &[PreviousMessage]) -> Vec<Message> {
    history
        .iter()
        .filter_map(|m| match m.role.to_uppercase().as_str() {
            "USER" => Some(Message::user(&m.content)),
            "BOT" | "ASSISTANT" => Some(Message::assistant(&m.content)),
            "SYSTEM" => Some(Message::system(&m.content)),
            other => {
                tracing::debug!(role = other, "skipping history turn with unknown role");
                None
            }
        })
        .collect()
}

fn user_id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn receive_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<BaseResponse<ChatResponse>, AppError> {
    check_secret(&headers, &state.external_secret)?;

    let payload = parse_payload(&body).map_err(|e| {
        AppError::bad_request("INVALID_REQUEST", format!("Invalid request format: {}", e))
    })?;
    let history = history_to_messages(payload.previous_messages.as_deref().unwrap_or_default());
    let conversation_id = payload.conversation_id;

    tracing::info!(
        conversation_id = %conversation_id,
        history = history.len(),
        message = %truncate_chars(&payload.message, 100),
        "chat message received"
    );

    let mut run = RunConfig::new(&conversation_id);
    run.user_id = payload.user_id.as_ref().and_then(user_id_string);
    run.frontend_tools = payload.tools;

    let outcome = state
        .graph
        .invoke(GraphInput::new(history, Message::user(payload.message)), run)
        .await?;

    match outcome {
        GraphOutcome::Completed(final_state) => {
            let reply = final_state
                .messages
                .iter()
                .rev()
                .find(|m| matches!(m, Message::Assistant { .. }));
            let Some(reply) = reply else {
                return Ok(BaseResponse::with_status(
                    StatusCode::BAD_REQUEST,
                    "No assistant message found in response",
                    Some(ChatResponse {
                        status: "error",
                        conversation_id,
                        message: json!("No response generated"),
                    }),
                ));
            };
            Ok(BaseResponse::ok(
                "Response generated successfully",
                ChatResponse {
                    status: "success",
                    conversation_id,
                    message: json!({
                        "role": "assistant",
                        "content": [{"type": "text", "text": reply.text()}],
                    }),
                },
            ))
        }
        GraphOutcome::Interrupted { interrupt, .. } => Ok(BaseResponse::ok(
            "Action required from the client",
            ChatResponse {
                status: "requires_action",
                conversation_id,
                message: json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool-call",
                        "toolCallId": interrupt.tool_call_id,
                        "toolName": interrupt.tool_name,
                        "args": interrupt.arguments,
                    }],
                }),
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::testing::{CannedTransport, app_state, read_json};
    use axum::body::Body;
    use axum::http::Request;
    use moneyez_ai::{AssistantMetadata, Content};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn chat_request(secret: Option<&str>, payload: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post("/api/receive_message").header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        let body = json!({"data": payload.to_string()});
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn payload(message: &str) -> serde_json::Value {
        json!({
            "UserId": "u-42",
            "Message": message,
            "ConversationId": "conv-1",
            "PreviousMessages": [
                {"ConversationId": "conv-1", "Content": "Chào bạn", "Role": "user", "Timestamp": "2024-05-01T10:00:00"},
                {"ConversationId": "conv-1", "Content": "Xin chào!", "Role": "BOT", "Timestamp": "2024-05-01T10:00:01"},
                {"ConversationId": "conv-1", "Content": "??", "Role": "MODERATOR", "Timestamp": null}
            ]
        })
    }

    #[tokio::test]
    async fn test_reply_success() {
        let transport = Arc::new(CannedTransport::replying(&["Bạn nên để dành 20% thu nhập."]));
        let app = router(app_state(transport.clone(), None));

        let response = app
            .oneshot(chat_request(Some("test-secret"), payload("Tôi nên tiết kiệm bao nhiêu?")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["status"], 200);
        assert_eq!(body["data"]["status"], "success");
        assert_eq!(body["data"]["conversation_id"], "conv-1");
        assert_eq!(body["data"]["message"]["role"], "assistant");
        assert_eq!(
            body["data"]["message"]["content"][0],
            json!({"type": "text", "text": "Bạn nên để dành 20% thu nhập."})
        );
        assert_eq!(transport.prompts.lock()[0], "Tôi nên tiết kiệm bao nhiêu?");
    }

    #[tokio::test]
    async fn test_secret_required() {
        let app = router(app_state(Arc::new(CannedTransport::default()), None));
        let response = app
            .clone()
            .oneshot(chat_request(None, payload("hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(read_json(response).await["error_code"], "UNAUTHORIZED");

        let response = app
            .oneshot(chat_request(Some("wrong"), payload("hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let app = router(app_state(Arc::new(CannedTransport::default()), None));
        let request = Request::post("/api/receive_message")
            .header(SECRET_HEADER, "test-secret")
            .body(Body::from(r#"{"data": "{not json"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error_code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_model_failure_is_500() {
        let app = router(app_state(Arc::new(CannedTransport::default()), None));
        let response = app
            .oneshot(chat_request(Some("test-secret"), payload("hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read_json(response).await["error_code"], "MODEL_ERROR");
    }

    #[tokio::test]
    async fn test_frontend_tool_requires_action() {
        let call = Message::Assistant {
            content: vec![Content::tool_call("call-1", "show_chart", json!({"month": "05/2024"}))],
            metadata: AssistantMetadata::default(),
        };
        let app = router(app_state(Arc::new(CannedTransport::with_replies(vec![Ok(call)])), None));

        let mut body = payload("Vẽ biểu đồ chi tiêu");
        body["Tools"] = json!([{
            "name": "show_chart",
            "description": "Hiển thị biểu đồ",
            "parameters": {"type": "object", "properties": {"month": {"type": "string"}}}
        }]);
        let response = app
            .oneshot(chat_request(Some("test-secret"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["data"]["status"], "requires_action");
        let part = &body["data"]["message"]["content"][0];
        assert_eq!(part["type"], "tool-call");
        assert_eq!(part["toolCallId"], "call-1");
        assert_eq!(part["args"]["month"], "05/2024");
    }

    #[test]
    fn test_history_roles() {
        let history = vec![
            PreviousMessage { content: "a".into(), role: "User".into() },
            PreviousMessage { content: "b".into(), role: "assistant".into() },
            PreviousMessage { content: "c".into(), role: "system".into() },
            PreviousMessage { content: "d".into(), role: "tool".into() },
        ];
        let messages = history_to_messages(&history);
        let roles: Vec<_> = messages.iter().map(Message::role).collect();
        assert_eq!(roles, vec!["user", "assistant", "system"]);
    }

    #[test]
    fn test_numeric_user_id() {
        assert_eq!(user_id_string(&json!(17)), Some("17".to_string()));
        assert_eq!(user_id_string(&json!("")), None);
        assert_eq!(user_id_string(&serde_json::Value::Null), None);
    }
}
