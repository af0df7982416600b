//! Tool trait, frontend tool stubs, and the registry that executes calls

use async_trait::async_trait;
use moneyez_ai::{Content, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-request context handed to every tool call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    /// Finance-backend user the request acts for
    pub user_id: Option<String>,
    /// Conversation id of the invocation
    pub thread_id: String,
}

impl ToolContext {
    pub fn new(user_id: Option<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id,
            thread_id: thread_id.into(),
        }
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the LLM
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A call the host UI must resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendInterrupt {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// What a tool call produced
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// Executed locally
    Completed(ToolResult),
    /// Must be delegated to the caller
    Interrupt(FrontendInterrupt),
}

impl From<ToolResult> for ToolOutcome {
    fn from(result: ToolResult) -> Self {
        ToolOutcome::Completed(result)
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> ToolOutcome;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a moneyez_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> moneyez_ai::Tool {
    moneyez_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// Caller-declared tool that only the host UI can run
pub struct FrontendTool {
    name: String,
    description: String,
}

impl FrontendTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
impl Tool for FrontendTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        ToolOutcome::Interrupt(FrontendInterrupt {
            tool_call_id: tool_call_id.to_string(),
            tool_name: self.name.clone(),
            arguments,
        })
    }
}

/// Named tools with cached argument validators
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any existing tool with the same name
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.retain(|t| t.name() != tool.name());
        self.cache_tool_schema(&tool);
        self.tools.push(tool);
    }

    /// Builder-style `register`
    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.register(tool);
        self
    }

    /// This registry plus interrupting stubs for the declared frontend tools.
    ///
    /// A declaration never shadows a backend tool of the same name.
    pub fn with_frontend_tools(&self, declared: &[moneyez_ai::Tool]) -> Self {
        let mut registry = self.clone();
        for decl in declared {
            if registry.get(&decl.name).is_some() {
                tracing::warn!("Frontend tool '{}' shadows a backend tool, ignoring", decl.name);
                continue;
            }
            registry.register(Arc::new(FrontendTool::new(&decl.name, &decl.description)));
        }
        registry
    }

    /// Compile and cache the JSON schema validator for a tool.
    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                self.schema_cache.remove(tool.name());
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions to bind to the model
    pub fn definitions(&self) -> Vec<moneyez_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    /// Execute one call: unknown names and invalid arguments become error results.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> ToolOutcome {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!("Model requested unknown tool '{}'", call.name);
            return ToolResult::error(format!("Tool not found: {}", call.name)).into();
        };

        if let Some(err) = self
            .schema_cache
            .get(call.name.as_str())
            .and_then(|validator| validate_with_validator(&call.arguments, validator))
        {
            return ToolResult::error(err).into();
        }

        let run = tool.execute(&call.id, call.arguments.clone(), ctx, cancel.clone());
        tokio::select! {
            outcome = tokio::time::timeout(timeout, run) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => ToolResult::error(format!(
                    "Tool {} timed out after {}s",
                    call.name,
                    timeout.as_secs()
                ))
                .into(),
            },
            _ = cancel.cancelled() => ToolResult::error("Tool execution cancelled").into(),
        }
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Echoes the `text` argument and the user id it ran for.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            ctx: &ToolContext,
            _cancel: CancellationToken,
        ) -> ToolOutcome {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            ToolResult::text(format!(
                "{}:{}",
                ctx.user_id.as_deref().unwrap_or("-"),
                text
            ))
            .into()
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
            _cancel: CancellationToken,
        ) -> ToolOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ToolResult::text("late").into()
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_0".into(),
            name: name.into(),
            arguments,
        }
    }

    fn completed(outcome: ToolOutcome) -> ToolResult {
        match outcome {
            ToolOutcome::Completed(r) => r,
            ToolOutcome::Interrupt(i) => panic!("unexpected interrupt: {:?}", i),
        }
    }

    #[tokio::test]
    async fn test_context_reaches_tool() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool));
        let ctx = ToolContext::new(Some("user-7".into()), "thread-1");
        let result = completed(
            registry
                .execute(
                    &call("echo", json!({"text": "hi"})),
                    &ctx,
                    CancellationToken::new(),
                    Duration::from_secs(5),
                )
                .await,
        );
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "user-7:hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool));
        let result = completed(
            registry
                .execute(
                    &call("transfer_money", json!({})),
                    &ToolContext::default(),
                    CancellationToken::new(),
                    Duration::from_secs(5),
                )
                .await,
        );
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool not found: transfer_money");
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool));
        let result = completed(
            registry
                .execute(
                    &call("echo", json!({"text": 5})),
                    &ToolContext::default(),
                    CancellationToken::new(),
                    Duration::from_secs(5),
                )
                .await,
        );
        assert!(result.is_error);
        assert!(result.text_content().contains("validation failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout() {
        let registry = ToolRegistry::new().with_tool(Arc::new(SleepyTool));
        let result = completed(
            registry
                .execute(
                    &call("sleepy", json!({})),
                    &ToolContext::default(),
                    CancellationToken::new(),
                    Duration::from_secs(1),
                )
                .await,
        );
        assert!(result.is_error);
        assert!(result.text_content().contains("timed out"));
    }

    #[tokio::test]
    async fn test_frontend_tool_interrupts_with_any_arguments() {
        let declared = vec![moneyez_ai::Tool::new(
            "show_chart",
            "Render a chart",
            json!({"type": "object", "properties": {"kind": {"type": "string"}}}),
        )];
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(EchoTool))
            .with_frontend_tools(&declared);

        assert_eq!(registry.names(), vec!["echo", "show_chart"]);
        let defs = registry.definitions();
        assert_eq!(defs[1].parameters, json!({"type": "object"}));

        let outcome = registry
            .execute(
                &call("show_chart", json!({"kind": 42, "extra": true})),
                &ToolContext::default(),
                CancellationToken::new(),
                Duration::from_secs(5),
            )
            .await;
        match outcome {
            ToolOutcome::Interrupt(i) => {
                assert_eq!(i.tool_name, "show_chart");
                assert_eq!(i.tool_call_id, "call_0");
                assert_eq!(i.arguments["kind"], 42);
            }
            ToolOutcome::Completed(r) => panic!("expected interrupt, got {:?}", r),
        }
    }

    #[test]
    fn test_frontend_declaration_cannot_shadow_backend() {
        let declared = vec![moneyez_ai::Tool::new("echo", "fake", json!({}))];
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(EchoTool))
            .with_frontend_tools(&declared);
        assert_eq!(registry.names(), vec!["echo"]);
        assert_eq!(registry.definitions()[0].description, "Echoes input");
    }

    #[test]
    fn test_validate_invalid_schema_skipped() {
        let bad_schema = json!({"type": "not_a_real_type"});
        assert!(jsonschema::validator_for(&bad_schema).is_err());
    }
}
