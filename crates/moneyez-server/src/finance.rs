//! Client for the external finance backend

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Path of the backend's command endpoint
const COMMAND_PATH: &str = "/api/v1/external-services";

/// Header carrying the shared secret
pub const SECRET_HEADER: &str = "X-External-Secret";

#[derive(Debug, thiserror::Error)]
pub enum FinanceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("finance backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response from finance backend: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, FinanceError>;

/// A spending subcategory the user can record expenses under
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subcategory {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub category_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transaction {
    pub amount: f64,
    pub description: Option<String>,
    #[serde(alias = "date", alias = "createdAt")]
    pub transaction_date: Option<String>,
    #[serde(alias = "subcategory")]
    pub subcategory_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpendingModel {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Payload of `create_transaction`; field names are the backend's
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    #[serde(rename = "UserId")]
    pub user_id: String,
    #[serde(rename = "Amount")]
    pub amount: i64,
    #[serde(rename = "SubcategoryCode")]
    pub subcategory_code: Option<String>,
    #[serde(rename = "Description")]
    pub description: String,
}

/// The transaction/category store behind the backend tools
#[async_trait]
pub trait FinanceBackend: Send + Sync {
    async fn get_subcategories(&self, user_id: &str) -> Result<Vec<Subcategory>>;

    async fn create_transaction(&self, transaction: &NewTransaction) -> Result<()>;

    async fn get_transactions(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>>;

    async fn get_current_spending_model(&self, user_id: &str) -> Result<Option<SpendingModel>>;

    /// The catalog of spending models
    async fn get_spending_models(&self) -> Result<Vec<SpendingModel>>;
}

/// `{status?, data?, message?}` wrapper around every backend response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    message: Option<String>,
}

/// REST client for the finance backend's command endpoint
pub struct ExternalFinanceClient {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

impl ExternalFinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, COMMAND_PATH)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        command: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let query = query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        tracing::debug!(command, query = %query, "finance request");

        let response = self
            .client
            .get(self.endpoint())
            .header(SECRET_HEADER, &self.secret)
            .query(&[("command", command), ("query", query.as_str())])
            .send()
            .await?;
        Self::read_envelope(command, response).await
    }

    async fn post(&self, command: &str, data: serde_json::Value) -> Result<()> {
        tracing::debug!(command, "finance request");
        let response = self
            .client
            .post(self.endpoint())
            .header(SECRET_HEADER, &self.secret)
            .json(&serde_json::json!({ "command": command, "data": data }))
            .send()
            .await?;
        Self::read_envelope::<serde_json::Value>(command, response)
            .await
            .map(|_| ())
    }

    async fn read_envelope<T: DeserializeOwned>(
        command: &str,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            tracing::warn!(command, status = status.as_u16(), "finance request failed");
            return Err(FinanceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| FinanceError::InvalidResponse(format!("{command}: {e}")))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl FinanceBackend for ExternalFinanceClient {
    async fn get_subcategories(&self, user_id: &str) -> Result<Vec<Subcategory>> {
        let data = self
            .get("get_subcategories", &[("user_id", user_id.to_string())])
            .await?;
        Ok(data.unwrap_or_default())
    }

    async fn create_transaction(&self, transaction: &NewTransaction) -> Result<()> {
        let data = serde_json::to_value(transaction)
            .map_err(|e| FinanceError::InvalidResponse(e.to_string()))?;
        self.post("create_transaction", data).await
    }

    async fn get_transactions(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let data = self
            .get(
                "get_transactions",
                &[
                    ("user_id", user_id.to_string()),
                    ("start_date", start.to_string()),
                    ("end_date", end.to_string()),
                ],
            )
            .await?;
        Ok(data.unwrap_or_default())
    }

    async fn get_current_spending_model(&self, user_id: &str) -> Result<Option<SpendingModel>> {
        self.get(
            "get_current_spending_model",
            &[("user_id", user_id.to_string())],
        )
        .await
    }

    async fn get_spending_models(&self) -> Result<Vec<SpendingModel>> {
        // wire name as the backend spells it
        self.get::<Vec<SpendingModel>>("get_speding_models", &[])
            .await?
            .ok_or_else(|| FinanceError::InvalidResponse("missing 'data' field".into()))
    }
}
