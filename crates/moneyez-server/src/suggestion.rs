//! Spending-model suggestion from a questionnaire

use moneyez_agent::Transport;
use moneyez_ai::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::finance::{FinanceBackend, FinanceError, SpendingModel};
use crate::utils::parse_json_response;

#[derive(Debug, thiserror::Error)]
pub enum SuggestionError {
    #[error("Invalid JSON format in 'data' field: {0}")]
    InvalidJson(String),

    #[error("No valid Q&A pairs found in the data")]
    NoPairs,

    #[error("Could not fetch spending models: {0}")]
    Finance(#[from] FinanceError),

    #[error("No spending models available")]
    EmptyCatalog,

    #[error("Model error: {0}")]
    Model(#[from] moneyez_ai::Error),

    #[error("Could not analyze user profile")]
    UnparsableAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QAPair {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResponse {
    pub recommended_model: SpendingModel,
    pub alternative_models: Vec<SpendingModel>,
    pub reasoning: String,
}

/// Read Q&A pairs from the JSON text of the request's `data` field.
///
/// Entries without both `question` and `answer` are skipped.
pub fn parse_qa_pairs(data: &str) -> Result<Vec<QAPair>, SuggestionError> {
    let parsed: serde_json::Value =
        serde_json::from_str(data).map_err(|e| SuggestionError::InvalidJson(e.to_string()))?;

    let field = |item: &serde_json::Value, key: &str| {
        item.get(key).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    };
    let pairs: Vec<QAPair> = parsed
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(QAPair {
                        question: field(item, "question")?,
                        answer: field(item, "answer")?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if pairs.is_empty() {
        return Err(SuggestionError::NoPairs);
    }
    Ok(pairs)
}

fn user_profile(pairs: &[QAPair]) -> String {
    pairs
        .iter()
        .enumerate()
        .map(|(i, qa)| format!("Q{n}: {}\nA{n}: {}\n\n", qa.question, qa.answer, n = i + 1))
        .collect()
}

fn suggestion_prompt(profile: &str, catalog: &str) -> String {
    format!(
        r#"Bạn là một trợ lý tài chính thông minh. Nhiệm vụ của bạn là phân tích thông tin từ câu trả lời và gợi ý mô hình chi tiêu phù hợp nhất.

Dựa trên thông tin tôi đã trả lời như sau:
{profile}
Và các mô hình chi tiêu có sẵn:
{catalog}

Hãy phân tích và xác định mô hình chi tiêu nào phù hợp nhất với tôi.
Xem xét mức thu nhập, mục tiêu tài chính, thói quen chi tiêu và tình hình tài chính tổng thể của tôi.
Cũng đề xuất một số mô hình thay thế có thể phù hợp.

Trả về kết quả dưới dạng JSON với cấu trúc sau:
{{
    "recommended_model_name": "tên của mô hình phù hợp nhất",
    "alternative_model_names": ["name1", "name2"],
    "reasoning": "giải thích chi tiết tại sao mô hình này được đề xuất"
}}

Chỉ trả về đúng định dạng JSON yêu cầu, không thêm bất kỳ giải thích nào khác."#
    )
}

pub struct SuggestionService {
    finance: Arc<dyn FinanceBackend>,
    model: Arc<dyn Transport>,
}

impl SuggestionService {
    pub fn new(finance: Arc<dyn FinanceBackend>, model: Arc<dyn Transport>) -> Self {
        Self { finance, model }
    }

    pub async fn suggest(&self, pairs: &[QAPair]) -> Result<SuggestionResponse, SuggestionError> {
        let catalog = self.finance.get_spending_models().await?;
        if catalog.is_empty() {
            return Err(SuggestionError::EmptyCatalog);
        }
        tracing::debug!(pairs = pairs.len(), models = catalog.len(), "generating suggestion");

        let catalog_json = serde_json::to_string(&catalog).unwrap_or_default();
        let prompt = suggestion_prompt(&user_profile(pairs), &catalog_json);
        let reply = self
            .model
            .run(Context::from_prompt(prompt), CancellationToken::new())
            .await?
            .text();

        let Some(answer) = parse_json_response(&reply, "recommended_model_name") else {
            tracing::warn!(reply = %reply, "Unparsable suggestion answer");
            return Err(SuggestionError::UnparsableAnswer);
        };
        Ok(pick_models(&catalog, &answer))
    }
}

/// Match the model's answer against the catalog by exact name
fn pick_models(catalog: &[SpendingModel], answer: &serde_json::Value) -> SuggestionResponse {
    let recommended_name = answer["recommended_model_name"].as_str().unwrap_or_default();
    let alternative_names: Vec<&str> = answer["alternative_model_names"]
        .as_array()
        .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
        .unwrap_or_default();

    let mut recommended = None;
    let mut alternatives = Vec::new();
    for model in catalog {
        if recommended.is_none() && model.name == recommended_name {
            recommended = Some(model.clone());
        } else if alternative_names.contains(&model.name.as_str()) {
            alternatives.push(model.clone());
        }
    }

    let recommended_model = match recommended {
        Some(model) => model,
        None => {
            tracing::warn!(
                name = recommended_name,
                "Recommended model not in catalog, using the first entry"
            );
            catalog[0].clone()
        }
    };

    SuggestionResponse {
        recommended_model,
        alternative_models: alternatives,
        reasoning: answer["reasoning"].as_str().unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedTransport, MockFinance};

    fn catalog() -> Vec<SpendingModel> {
        ["50/30/20", "6 hũ", "Tối giản"]
            .iter()
            .enumerate()
            .map(|(i, name)| SpendingModel {
                id: format!("m{i}"),
                name: name.to_string(),
                description: format!("Mô hình {name}"),
            })
            .collect()
    }

    fn service(models: Vec<SpendingModel>, replies: &[&str]) -> (SuggestionService, Arc<CannedTransport>) {
        let model = Arc::new(CannedTransport::replying(replies));
        let finance = Arc::new(MockFinance {
            models,
            ..Default::default()
        });
        (SuggestionService::new(finance, model.clone()), model)
    }

    fn pairs() -> Vec<QAPair> {
        parse_qa_pairs(r#"[{"question":"Thu nhập?","answer":"15 triệu"},{"question":"Mục tiêu?","answer":"Mua nhà"}]"#)
            .unwrap()
    }

    #[test]
    fn test_parse_pairs() {
        let parsed = parse_qa_pairs(
            r#"[{"question":"Tuổi?","answer":30},{"question":"thiếu câu trả lời"},"rác"]"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![QAPair {
                question: "Tuổi?".into(),
                answer: "30".into()
            }]
        );
        assert!(matches!(parse_qa_pairs("not json"), Err(SuggestionError::InvalidJson(_))));
        assert!(matches!(parse_qa_pairs("[]"), Err(SuggestionError::NoPairs)));
        assert!(matches!(parse_qa_pairs(r#"{"question":"a","answer":"b"}"#), Err(SuggestionError::NoPairs)));
    }

    #[tokio::test]
    async fn test_recommendation_with_alternatives() {
        let (service, model) = service(
            catalog(),
            &["```json\n{\"recommended_model_name\": \"6 hũ\", \"alternative_model_names\": [\"Tối giản\", \"Không tồn tại\"], \"reasoning\": \"Thu nhập ổn định\"}\n```"],
        );
        let response = service.suggest(&pairs()).await.unwrap();
        assert_eq!(response.recommended_model.id, "m1");
        assert_eq!(response.alternative_models.len(), 1);
        assert_eq!(response.alternative_models[0].name, "Tối giản");
        assert_eq!(response.reasoning, "Thu nhập ổn định");

        let prompt = model.prompts.lock()[0].clone();
        assert!(prompt.contains("Q1: Thu nhập?\nA1: 15 triệu\n\nQ2: Mục tiêu?\nA2: Mua nhà\n\n"));
        assert!(prompt.contains("\"name\":\"50/30/20\""));
    }

    #[tokio::test]
    async fn test_unknown_recommendation_falls_back_to_first() {
        let (service, _) = service(
            catalog(),
            &[r#"Đây là gợi ý: {"recommended_model_name": "Mô hình lạ", "reasoning": "r"} hết."#],
        );
        let response = service.suggest(&pairs()).await.unwrap();
        assert_eq!(response.recommended_model.name, "50/30/20");
        assert!(response.alternative_models.is_empty());

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("recommendedModel").is_some());
        assert!(json.get("alternativeModels").is_some());
    }

    #[tokio::test]
    async fn test_failures() {
        let (svc, _) = service(vec![], &["{}"]);
        assert!(matches!(svc.suggest(&pairs()).await, Err(SuggestionError::EmptyCatalog)));

        let (svc, _) = service(catalog(), &["tôi không biết"]);
        assert!(matches!(svc.suggest(&pairs()).await, Err(SuggestionError::UnparsableAnswer)));

        let (svc, _) = service(catalog(), &[]);
        assert!(matches!(svc.suggest(&pairs()).await, Err(SuggestionError::Model(_))));

        let failing = SuggestionService::new(
            Arc::new(MockFinance::failing()),
            Arc::new(CannedTransport::default()),
        );
        assert!(matches!(failing.suggest(&pairs()).await, Err(SuggestionError::Finance(_))));
    }
}
