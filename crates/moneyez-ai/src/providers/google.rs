//! Google Generative AI (Gemini) API provider

use crate::{
    error::{Error, Result},
    providers::LlmProvider,
    stream::{MessageEvent, MessageEventStream},
    types::{AssistantMetadata, Content, Context, Message, Model, StopReason, Usage},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// Google Generative AI client
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    /// Create a new Google provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from `GOOGLE_API_KEY` or `GEMINI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = super::get_api_key(None, &["GOOGLE_API_KEY", "GEMINI_API_KEY"])?;
        Ok(Self::new(api_key))
    }

    fn build_request(&self, model: &Model, context: &Context) -> GeminiRequest {
        let mut contents = Vec::new();
        let mut system_parts: Vec<String> = context.system_prompt.iter().cloned().collect();

        for msg in &context.messages {
            if let Message::System { content } = msg {
                system_parts.push(content.clone());
                continue;
            }
            if let Some(content) = convert_message(msg) {
                contents.push(content);
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text {
                    text: system_parts.join("\n\n"),
                }],
            })
        };

        let tools = if context.tools.is_empty() {
            None
        } else {
            let function_declarations = context
                .tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: declared_parameters(&t.parameters),
                })
                .collect();
            Some(vec![GeminiTool {
                function_declarations,
            }])
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(model.max_tokens),
                temperature: model.temperature,
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream> {
        let request = self.build_request(model, context);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            model.base_url, model.id, self.api_key
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, val);
            }
        }

        let request_builder = self.client.post(&url).headers(headers).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

/// Gemini rejects object schemas without properties; such tools are declared without parameters.
fn declared_parameters(schema: &serde_json::Value) -> Option<serde_json::Value> {
    match schema.get("properties").and_then(|p| p.as_object()) {
        Some(props) if !props.is_empty() => Some(schema.clone()),
        _ => None,
    }
}

fn convert_message(msg: &Message) -> Option<GeminiContent> {
    match msg {
        Message::System { .. } => None,
        Message::User { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } => Some(GeminiPart::Text { text: text.clone() }),
                    Content::Image { mime_type, data } => Some(GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: mime_type.clone(),
                            data: data.clone(),
                        },
                    }),
                    Content::ToolCall { .. } => None,
                })
                .collect();

            (!parts.is_empty()).then(|| GeminiContent {
                role: Some("user".to_string()),
                parts,
            })
        }
        Message::Assistant { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } if !text.is_empty() => {
                        Some(GeminiPart::Text { text: text.clone() })
                    }
                    Content::ToolCall {
                        name, arguments, ..
                    } => Some(GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: name.clone(),
                            args: arguments.clone(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            (!parts.is_empty()).then(|| GeminiContent {
                role: Some("model".to_string()),
                parts,
            })
        }
        Message::Tool {
            tool_name, content, ..
        } => {
            let response_text = content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("");

            // Gemini pairs responses with calls by name, not id
            Some(GeminiContent {
                role: Some("function".to_string()),
                parts: vec![GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: tool_name.clone(),
                        response: serde_json::json!({ "result": response_text }),
                    },
                }],
            })
        }
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        let start_message = Message::Assistant {
            content: vec![],
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                ..Default::default()
            },
        };
        yield MessageEvent::Start { message: start_message };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.is_empty() || msg.data == "[DONE]" {
                        continue;
                    }

                    let response = match serde_json::from_str::<GeminiStreamResponse>(&msg.data) {
                        Ok(response) => response,
                        Err(e) => {
                            event_source.close();
                            if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(&msg.data) {
                                yield MessageEvent::Error {
                                    message: error_response.error.message,
                                };
                            } else {
                                yield MessageEvent::Error {
                                    message: format!("Failed to parse chunk: {}", e),
                                };
                            }
                            return;
                        }
                    };

                    for candidate in &response.candidates {
                        if let Some(ref content) = candidate.content {
                            for part in &content.parts {
                                match part {
                                    GeminiResponsePart::Text { text } => {
                                        accumulated_text.push_str(text);
                                        yield MessageEvent::TextDelta {
                                            content_index: 0,
                                            delta: text.clone(),
                                        };
                                    }
                                    GeminiResponsePart::FunctionCall { function_call } => {
                                        // Gemini does not assign call ids
                                        let id = format!("call_{}", tool_calls.len());
                                        let index = tool_calls.len() + 1;

                                        yield MessageEvent::ToolCallStart {
                                            content_index: index,
                                            id: id.clone(),
                                            name: function_call.name.clone(),
                                        };
                                        yield MessageEvent::ToolCallDelta {
                                            content_index: index,
                                            delta: function_call.args.to_string(),
                                        };

                                        tool_calls.push((
                                            id,
                                            function_call.name.clone(),
                                            function_call.args.clone(),
                                        ));
                                    }
                                }
                            }
                        }

                        if let Some(ref reason) = candidate.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref meta) = response.usage_metadata {
                        usage.input = meta.prompt_token_count.unwrap_or(0);
                        usage.output = meta.candidates_token_count.unwrap_or(0);
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status, body),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text {
                text: accumulated_text,
            });
        }
        let has_tool_calls = !tool_calls.is_empty();
        for (id, name, arguments) in tool_calls {
            content.push(Content::ToolCall { id, name, arguments });
        }

        let stop_reason = match finish_reason.as_deref() {
            _ if has_tool_calls => StopReason::ToolUse,
            Some("MAX_TOKENS") => StopReason::Length,
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") => StopReason::Safety,
            _ => StopReason::Stop,
        };

        let final_message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

// Request types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiResponsePart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiResponseFunctionCall,
    },
}

#[derive(Debug, Deserialize)]
struct GeminiResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
