//! MoneyEZ assistant service: configuration, HTTP routes, finance tools,
//! knowledge base and spending-model suggestions around the conversation graph.

pub mod config;
pub mod error;
pub mod finance;
pub mod knowledge;
pub mod routes;
pub mod suggestion;
pub mod tools;
pub mod utils;

#[cfg(test)]
mod testing;

use moneyez_agent::{
    Checkpointer, ConversationGraph, FileCheckpointer, GraphConfig, KnowledgeStore,
    MemoryCheckpointer, ProviderTransport, Retriever, Transport,
};
use moneyez_ai::{GoogleEmbedder, GoogleProvider, Model};
use std::sync::Arc;

use config::Config;
use finance::ExternalFinanceClient;
use knowledge::{Chunker, SqliteKnowledgeStore};
use routes::AppState;
use suggestion::SuggestionService;

/// Failures that prevent the service from starting
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Google API key: {0}")]
    ApiKey(#[from] moneyez_ai::Error),

    #[error("Finance client: {0}")]
    Finance(#[from] finance::FinanceError),

    #[error("Checkpoint store: {0}")]
    Checkpoint(#[from] moneyez_agent::Error),
}

fn model(config: &Config, id: &str) -> Model {
    let mut model = Model::gemini(id);
    if let Some(base_url) = &config.model.base_url {
        model.base_url = base_url.clone();
    }
    model.temperature = Some(config.model.temperature);
    model.max_tokens = config.model.max_tokens;
    model
}

/// Wire every service from configuration.
///
/// A knowledge store that fails to open disables retrieval and the knowledge
/// routes instead of aborting start-up.
pub async fn build_state(config: &Config) -> Result<AppState, StartupError> {
    let api_key = config.google_api_key()?;
    let provider = Arc::new(GoogleProvider::new(api_key.clone()));

    let chat: Arc<dyn Transport> = Arc::new(ProviderTransport::new(
        provider.clone(),
        model(config, &config.model.chat_model),
    ));
    let classifier: Arc<dyn Transport> = Arc::new(ProviderTransport::new(
        provider,
        model(config, &config.model.classifier_model),
    ));

    if config.server.external_secret.is_empty() {
        tracing::warn!("server.external_secret is empty; only requests with an empty secret header are accepted");
    }
    let finance = Arc::new(ExternalFinanceClient::new(
        &config.finance.base_url,
        &config.server.external_secret,
        std::time::Duration::from_secs(config.finance.timeout_secs),
    )?);

    let mut embedder = GoogleEmbedder::new(api_key, &config.embedding.model)
        .with_batch_size(config.embedding.batch_size);
    if let Some(base_url) = &config.embedding.base_url {
        embedder = embedder.with_base_url(base_url);
    }
    let knowledge = SqliteKnowledgeStore::open(&config.knowledge.db_path, Arc::new(embedder))
        .await
        .map(Arc::new);
    let retriever = Retriever::from_store(
        knowledge
            .as_ref()
            .map(|store| store.clone() as Arc<dyn KnowledgeStore>),
        config.knowledge.top_k,
    )
    .with_timeout(config.graph.retrieval_timeout());

    let checkpointer: Arc<dyn Checkpointer> = match &config.server.checkpoint_dir {
        Some(dir) => Arc::new(FileCheckpointer::new(dir)?),
        None => Arc::new(MemoryCheckpointer::new()),
    };

    let mut graph_config = GraphConfig {
        use_rag: config.graph.use_rag,
        max_tool_iterations: config.graph.max_tool_iterations,
        model_timeout: config.graph.model_timeout(),
        tool_timeout: config.graph.tool_timeout(),
        ..Default::default()
    };
    if let Some(prompt) = config.system_prompt() {
        graph_config.system_prompt = prompt;
    }

    let graph = ConversationGraph::new(
        graph_config,
        chat,
        tools::backend_tools(finance.clone(), classifier.clone()),
        retriever,
        checkpointer,
    );

    Ok(AppState {
        graph: Arc::new(graph),
        knowledge: knowledge.ok(),
        chunker: Chunker::new(config.knowledge.chunk_size, config.knowledge.chunk_overlap),
        suggestion: Arc::new(SuggestionService::new(finance, classifier)),
        external_secret: Arc::from(config.server.external_secret.as_str()),
    })
}
