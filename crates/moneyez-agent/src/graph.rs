//! Conversation graph: rag decision, query generation, retrieval, model, tools.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use moneyez_ai::{Content, Context, Message};

use crate::{
    checkpoint::{Checkpointer, InFlight},
    error::{Error, Result},
    events::GraphEvent,
    rag,
    retriever::Retriever,
    state::{ConversationState, StateUpdate},
    tool::{FrontendInterrupt, ToolContext, ToolOutcome, ToolRegistry},
    transport::Transport,
};

/// Base instructions for the financial assistant
pub const DEFAULT_SYSTEM_PROMPT: &str = "Bạn là trợ lý tài chính thông minh MoneyEZ, một trợ lý AI được tạo ra để giúp người dùng quản lý tài chính cá nhân.
Nhiệm vụ của bạn:
1. Giúp người dùng theo dõi chi tiêu hàng ngày
2. Phân loại các khoản chi tiêu vào các danh mục phù hợp
3. Cung cấp thông tin và tư vấn tài chính
4. Trả lời mọi câu hỏi liên quan đến tài chính cá nhân một cách chính xác và hữu ích
5. Nếu có bất kỳ thông tin nào không rõ ràng, hãy yêu cầu người dùng cung cấp thêm thông tin.
Trả lời ngắn gọn và rõ ràng, không có markdown hay định dạng phức tạp.";

/// Tool Result recorded for a call the caller never answered
pub const UNANSWERED_TOOL_RESULT: &str = "Frontend action was not completed.";

/// Graph nodes, in the order an invocation can visit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    RagDecision,
    GenerateQuery,
    Retrieve,
    Agent,
    Tools,
}

/// Service-wide graph settings
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Prompt used when a run does not override it
    pub system_prompt: String,
    /// Retrieval default for runs that do not set it
    pub use_rag: bool,
    /// Maximum agent → tools round trips per invocation
    pub max_tool_iterations: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            use_rag: true,
            max_tool_iterations: 10,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
        }
    }
}

/// Per-invocation settings
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Conversation id; checkpoint key
    pub thread_id: String,
    /// Finance-backend user, handed to tools
    pub user_id: Option<String>,
    /// Overrides the base system prompt
    pub system_prompt: Option<String>,
    /// Caller-declared tools resolved by the host UI
    pub frontend_tools: Vec<moneyez_ai::Tool>,
    /// Overrides `GraphConfig::use_rag`
    pub use_rag: Option<bool>,
    pub cancel: CancellationToken,
}

impl RunConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Caller input: prior turns plus the new turns to answer
#[derive(Debug, Clone, Default)]
pub struct GraphInput {
    /// Authoritative when non-empty; otherwise turns resume from the checkpoint
    pub history: Vec<Message>,
    pub messages: Vec<Message>,
}

impl GraphInput {
    pub fn new(history: Vec<Message>, message: Message) -> Self {
        Self {
            history,
            messages: vec![message],
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone)]
pub enum GraphOutcome {
    /// The model produced a reply with no pending tool calls
    Completed(ConversationState),
    /// A frontend tool must be resolved by the caller
    Interrupted {
        interrupt: FrontendInterrupt,
        state: ConversationState,
    },
}

impl GraphOutcome {
    pub fn state(&self) -> &ConversationState {
        match self {
            GraphOutcome::Completed(state) => state,
            GraphOutcome::Interrupted { state, .. } => state,
        }
    }
}

/// Terminal unless the latest turn carries pending tool calls
pub fn should_continue(state: &ConversationState) -> bool {
    state
        .last_message()
        .map(Message::has_tool_calls)
        .unwrap_or(false)
}

/// Effective system prompt: base prompt plus retrieved knowledge, if any
pub fn build_system_prompt(base: &str, state: &ConversationState) -> String {
    let context = if !state.retrieved_docs.is_empty() {
        rag::format_docs(&state.retrieved_docs)
    } else if !state.rag_context.is_empty() {
        state.rag_context.join("\n\n")
    } else {
        return base.to_string();
    };
    format!("{base}\n\nRelevant information from knowledge base:\n{context}")
}

/// The orchestrator shared by all conversations
pub struct ConversationGraph {
    config: GraphConfig,
    transport: Arc<dyn Transport>,
    tools: ToolRegistry,
    retriever: Retriever,
    checkpointer: Arc<dyn Checkpointer>,
    in_flight: InFlight,
    event_tx: broadcast::Sender<GraphEvent>,
}

impl ConversationGraph {
    pub fn new(
        config: GraphConfig,
        transport: Arc<dyn Transport>,
        tools: ToolRegistry,
        retriever: Retriever,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            transport,
            tools,
            retriever,
            checkpointer,
            in_flight: InFlight::new(),
            event_tx,
        }
    }

    /// Subscribe to graph events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Run one invocation to a final answer, an interrupt, or an error.
    ///
    /// At most one invocation per thread id runs at a time; the checkpoint is
    /// written only when the invocation completes or interrupts.
    pub async fn invoke(&self, input: GraphInput, run: RunConfig) -> Result<GraphOutcome> {
        let thread_id = run.thread_id.clone();
        let _guard = self
            .in_flight
            .try_acquire(&thread_id)
            .ok_or_else(|| Error::ConversationBusy(thread_id.clone()))?;

        let result = self.run_graph(input, &run).await;
        if let Err(ref e) = result {
            tracing::error!(thread_id = %thread_id, "Graph invocation failed: {}", e);
            let _ = self.event_tx.send(GraphEvent::Error {
                thread_id: thread_id.clone(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn seed(&self, input: GraphInput, thread_id: &str) -> Result<ConversationState> {
        let mut messages = if input.history.is_empty() {
            self.checkpointer
                .get(thread_id)
                .await?
                .map(|s| s.messages)
                .unwrap_or_default()
        } else {
            input.history
        };
        close_unanswered_calls(&mut messages, &input.messages);
        messages.extend(input.messages);
        Ok(ConversationState::with_messages(messages))
    }

    async fn run_graph(&self, input: GraphInput, run: &RunConfig) -> Result<GraphOutcome> {
        let thread_id = run.thread_id.as_str();
        let mut state = self.seed(input, thread_id).await?;
        let registry = self.tools.with_frontend_tools(&run.frontend_tools);
        let ctx = ToolContext::new(run.user_id.clone(), thread_id);
        let use_rag = run.use_rag.unwrap_or(self.config.use_rag);

        tracing::info!(thread_id, messages = state.messages.len(), "graph start");
        let _ = self.event_tx.send(GraphEvent::GraphStart {
            thread_id: thread_id.to_string(),
        });

        let mut node = GraphNode::RagDecision;
        let mut tool_iterations = 0usize;

        loop {
            tracing::debug!(thread_id, ?node, "node start");
            let _ = self.event_tx.send(GraphEvent::NodeStart {
                thread_id: thread_id.to_string(),
                node,
            });

            node = match node {
                GraphNode::RagDecision => {
                    state.apply(rag::decide_rag(&state, use_rag));
                    if state.need_rag {
                        GraphNode::GenerateQuery
                    } else {
                        GraphNode::Agent
                    }
                }
                GraphNode::GenerateQuery => {
                    state.apply(rag::generate_queries(&state));
                    GraphNode::Retrieve
                }
                GraphNode::Retrieve => {
                    state.apply(rag::retrieve_knowledge(&state, &self.retriever).await);
                    GraphNode::Agent
                }
                GraphNode::Agent => {
                    let update = self.call_model(&state, run, &registry).await?;
                    state.apply(update);
                    if !should_continue(&state) {
                        break;
                    }
                    if tool_iterations >= self.config.max_tool_iterations {
                        return Err(Error::ToolLoopLimit {
                            limit: self.config.max_tool_iterations,
                        });
                    }
                    GraphNode::Tools
                }
                GraphNode::Tools => {
                    tool_iterations += 1;
                    let (update, interrupt) = self.run_tools(&state, &registry, &ctx, run).await;
                    state.apply(update);
                    if let Some(interrupt) = interrupt {
                        self.checkpointer.put(thread_id, &state).await?;
                        tracing::info!(thread_id, tool = %interrupt.tool_name, "graph interrupted");
                        let _ = self.event_tx.send(GraphEvent::Interrupted {
                            thread_id: thread_id.to_string(),
                            tool_call_id: interrupt.tool_call_id.clone(),
                            tool_name: interrupt.tool_name.clone(),
                        });
                        return Ok(GraphOutcome::Interrupted { interrupt, state });
                    }
                    GraphNode::Agent
                }
            };
        }

        self.checkpointer.put(thread_id, &state).await?;
        tracing::info!(thread_id, tool_iterations, "graph end");
        let _ = self.event_tx.send(GraphEvent::GraphEnd {
            thread_id: thread_id.to_string(),
            tool_iterations,
        });
        Ok(GraphOutcome::Completed(state))
    }

    async fn call_model(
        &self,
        state: &ConversationState,
        run: &RunConfig,
        registry: &ToolRegistry,
    ) -> Result<StateUpdate> {
        let base = run
            .system_prompt
            .as_deref()
            .unwrap_or(&self.config.system_prompt);
        let system = build_system_prompt(base, state);

        if state.messages.is_empty() {
            return Ok(StateUpdate::messages(vec![Message::system(system)]));
        }

        let context = Context {
            system_prompt: Some(system),
            messages: state.messages.clone(),
            tools: registry.definitions(),
        };
        tracing::debug!(
            messages = context.messages.len(),
            tools = context.tools.len(),
            "invoking model"
        );

        let reply = tokio::time::timeout(
            self.config.model_timeout,
            self.transport.run(context, run.cancel.clone()),
        )
        .await
        .map_err(|_| Error::ModelTimeout(self.config.model_timeout))??;

        if reply.content().is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(StateUpdate::messages(vec![reply]))
    }

    /// Execute the latest turn's tool calls in request order.
    ///
    /// Stops at the first frontend call; results gathered before it are kept.
    async fn run_tools(
        &self,
        state: &ConversationState,
        registry: &ToolRegistry,
        ctx: &ToolContext,
        run: &RunConfig,
    ) -> (StateUpdate, Option<FrontendInterrupt>) {
        let calls = state
            .last_message()
            .map(Message::tool_calls)
            .unwrap_or_default();
        let mut results = Vec::with_capacity(calls.len());

        for call in &calls {
            let _ = self.event_tx.send(GraphEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let outcome = registry
                .execute(call, ctx, run.cancel.clone(), self.config.tool_timeout)
                .await;

            match outcome {
                ToolOutcome::Completed(result) => {
                    let _ = self.event_tx.send(GraphEvent::ToolExecutionEnd {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        result: result.text_content(),
                        is_error: result.is_error,
                    });
                    results.push(Message::tool_result(
                        &call.id,
                        &call.name,
                        result.content,
                        result.is_error,
                    ));
                }
                ToolOutcome::Interrupt(interrupt) => {
                    return (StateUpdate::messages(results), Some(interrupt));
                }
            }
        }

        (StateUpdate::messages(results), None)
    }
}

/// Give every tool call in `messages` a result.
///
/// A call answered neither in `messages` nor in `incoming` (an interrupted
/// frontend call) gets an error result placed after its turn's other results.
fn close_unanswered_calls(messages: &mut Vec<Message>, incoming: &[Message]) {
    let answered: HashSet<String> = messages
        .iter()
        .chain(incoming)
        .filter_map(|m| match m {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.clone()),
            _ => None,
        })
        .collect();

    let mut i = 0;
    while i < messages.len() {
        let pending: Vec<_> = messages[i]
            .tool_calls()
            .into_iter()
            .filter(|call| !answered.contains(&call.id))
            .collect();
        i += 1;
        if pending.is_empty() {
            continue;
        }
        while i < messages.len() && matches!(messages[i], Message::Tool { .. }) {
            i += 1;
        }
        for call in pending {
            tracing::debug!(tool_call_id = %call.id, tool = %call.name, "closing unanswered tool call");
            messages.insert(
                i,
                Message::tool_result(
                    call.id,
                    call.name,
                    vec![Content::text(UNANSWERED_TOOL_RESULT)],
                    true,
                ),
            );
            i += 1;
        }
    }
}
