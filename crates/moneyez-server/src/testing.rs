//! Fakes shared by unit tests

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use moneyez_agent::{
    ConversationGraph, GraphConfig, MemoryCheckpointer, Retriever, ToolRegistry, Transport,
};
use moneyez_ai::{Context, Message};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::finance::{
    FinanceBackend, FinanceError, NewTransaction, Result, SpendingModel, Subcategory, Transaction,
};
use crate::knowledge::{Chunker, SqliteKnowledgeStore};
use crate::routes::AppState;
use crate::suggestion::SuggestionService;

/// In-memory finance backend recording every write
#[derive(Default)]
pub struct MockFinance {
    pub subcategories: Vec<Subcategory>,
    pub transactions: Vec<Transaction>,
    pub current_model: Option<SpendingModel>,
    pub models: Vec<SpendingModel>,
    pub fail: bool,
    pub created: Mutex<Vec<NewTransaction>>,
    pub ranges: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl MockFinance {
    pub fn with_food() -> Self {
        Self {
            subcategories: vec![Subcategory {
                code: "FOOD".into(),
                name: "Ăn uống".into(),
                description: Some("Chi phí ăn uống".into()),
                category_name: Some("Thiết yếu".into()),
            }],
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            return Err(FinanceError::Status {
                status: 503,
                message: "backend down".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FinanceBackend for MockFinance {
    async fn get_subcategories(&self, _user_id: &str) -> Result<Vec<Subcategory>> {
        self.check()?;
        Ok(self.subcategories.clone())
    }

    async fn create_transaction(&self, transaction: &NewTransaction) -> Result<()> {
        self.check()?;
        self.created.lock().push(transaction.clone());
        Ok(())
    }

    async fn get_transactions(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        self.check()?;
        self.ranges.lock().push((user_id.to_string(), start, end));
        Ok(self.transactions.clone())
    }

    async fn get_current_spending_model(&self, _user_id: &str) -> Result<Option<SpendingModel>> {
        self.check()?;
        Ok(self.current_model.clone())
    }

    async fn get_spending_models(&self) -> Result<Vec<SpendingModel>> {
        self.check()?;
        Ok(self.models.clone())
    }
}

/// Model that answers prompts with queued texts and records the prompts
#[derive(Default)]
pub struct CannedTransport {
    replies: Mutex<Vec<moneyez_ai::Result<Message>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedTransport {
    pub fn replying(texts: &[&str]) -> Self {
        Self {
            replies: Mutex::new(texts.iter().map(|t| Ok(Message::assistant(*t))).collect()),
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn with_replies(replies: Vec<moneyez_ai::Result<Message>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn run(
        &self,
        context: Context,
        _cancel: CancellationToken,
    ) -> moneyez_ai::Result<Message> {
        let prompt = context
            .messages
            .last()
            .map(Message::text)
            .unwrap_or_default();
        self.prompts.lock().push(prompt);

        let mut replies = self.replies.lock();
        if replies.is_empty() {
            return Err(moneyez_ai::Error::api("unavailable", "no reply queued"));
        }
        replies.remove(0)
    }
}

/// Route state over fakes, accepting the secret `test-secret`
pub fn app_state(
    transport: Arc<dyn Transport>,
    knowledge: Option<Arc<SqliteKnowledgeStore>>,
) -> AppState {
    app_state_with_finance(transport, knowledge, Arc::new(MockFinance::default()))
}

pub fn app_state_with_finance(
    transport: Arc<dyn Transport>,
    knowledge: Option<Arc<SqliteKnowledgeStore>>,
    finance: Arc<dyn FinanceBackend>,
) -> AppState {
    let graph = ConversationGraph::new(
        GraphConfig::default(),
        transport.clone(),
        ToolRegistry::new(),
        Retriever::fallback(),
        Arc::new(MemoryCheckpointer::new()),
    );
    AppState {
        graph: Arc::new(graph),
        knowledge,
        chunker: Chunker::default(),
        suggestion: Arc::new(SuggestionService::new(finance, transport)),
        external_secret: Arc::from("test-secret"),
    }
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
