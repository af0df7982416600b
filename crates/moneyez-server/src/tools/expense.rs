//! Expense recording tool

use async_trait::async_trait;
use moneyez_agent::{Tool, ToolContext, ToolOutcome, ToolResult, Transport};
use moneyez_ai::Context;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::finance::{FinanceBackend, NewTransaction, Subcategory};
use crate::utils::{format_vnd, normalize_amount, parse_json_response, parse_vnd_amount};

/// Classifies a free-text expense and records it as a transaction
pub struct ExpenseTool {
    finance: Arc<dyn FinanceBackend>,
    classifier: Arc<dyn Transport>,
}

impl ExpenseTool {
    pub fn new(finance: Arc<dyn FinanceBackend>, classifier: Arc<dyn Transport>) -> Self {
        Self {
            finance,
            classifier,
        }
    }
}

fn describe_subcategories(subcategories: &[Subcategory]) -> String {
    subcategories
        .iter()
        .map(|sc| {
            format!(
                "Là một danh mục con nằm trong danh mục {}, danh mục này có tên là {}, mã danh mục là {}, mô tả là {}",
                sc.category_name.as_deref().unwrap_or(""),
                sc.name,
                sc.code,
                sc.description.as_deref().unwrap_or(""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn classification_prompt(subcategories: &str, user_query: &str) -> String {
    format!(
        r#"Bạn là một trợ lý tài chính thông minh. Nhiệm vụ của bạn là phân tích chi tiêu của người dùng và phân loại vào danh mục thích hợp.

Dưới đây là các danh mục chi tiêu có sẵn:
{subcategories}

Người dùng vừa nhập: "{user_query}"

Hãy phân tích thông tin này và trả về kết quả dưới dạng JSON với cấu trúc sau:
{{
    "amount": [số tiền chi tiêu, chỉ bao gồm con số],
    "subcategory_code": [mã danh mục phù hợp nhất]
}}

Chỉ trả về đúng định dạng JSON yêu cầu, không thêm bất kỳ giải thích nào khác.
Lưu ý các từ ngữ có thể chỉ tiền như k, lít, củ, xị của tiếng Việt, đơn vị là VNĐ, nhỏ nhất là 1000 VNĐ.
Nếu không thể xác định được số tiền hoặc danh mục, hãy gán giá trị null cho trường tương ứng."#
    )
}

/// Model amount as a number or numeric string
fn model_amount(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.replace(['.', ','], "").trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Tool for ExpenseTool {
    fn name(&self) -> &str {
        "user_input_expense"
    }

    fn description(&self) -> &str {
        "Ghi nhận một khoản chi tiêu từ câu nhập của người dùng: xác định số tiền, phân loại vào danh mục phù hợp và lưu giao dịch."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "user_query": {
                    "type": "string",
                    "description": "Câu nhập nguyên văn của người dùng mô tả khoản chi"
                }
            },
            "required": ["user_query"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        let user_id = match super::require_user(ctx) {
            Ok(id) => id,
            Err(result) => return result.into(),
        };
        let user_query = arguments
            .get("user_query")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim();

        let subcategories = match self.finance.get_subcategories(user_id).await {
            Ok(list) => list,
            Err(e) => {
                return ToolResult::error(format!("❌ Không thể tải danh mục chi tiêu: {}", e))
                    .into();
            }
        };
        tracing::debug!(user_id, count = subcategories.len(), "loaded subcategories");

        let prompt = classification_prompt(&describe_subcategories(&subcategories), user_query);
        let reply = match self.classifier.run(Context::from_prompt(prompt), cancel).await {
            Ok(reply) => reply.text(),
            Err(e) => {
                return ToolResult::error(format!("❌ Không thể phân loại chi tiêu: {}", e)).into();
            }
        };
        let parsed = parse_json_response(&reply, "amount");
        if parsed.is_none() {
            tracing::warn!(reply = %reply, "Unparsable expense classification");
        }

        let amount = parse_vnd_amount(user_query).or_else(|| {
            parsed
                .as_ref()
                .and_then(|p| model_amount(&p["amount"]))
                .map(normalize_amount)
        });
        let Some(amount) = amount.filter(|a| *a > 0) else {
            return ToolResult::error(
                "❌ Không xác định được số tiền chi tiêu. Vui lòng nhập rõ số tiền, ví dụ: \"ăn trưa 50k\".",
            )
            .into();
        };

        let subcategory_code = parsed
            .as_ref()
            .and_then(|p| p["subcategory_code"].as_str())
            .map(str::to_string);

        let transaction = NewTransaction {
            user_id: user_id.to_string(),
            amount,
            subcategory_code: subcategory_code.clone(),
            description: user_query.to_string(),
        };
        if let Err(e) = self.finance.create_transaction(&transaction).await {
            return ToolResult::error(format!("❌ Không thể ghi nhận chi tiêu: {}", e)).into();
        }
        tracing::info!(user_id, amount, subcategory = ?subcategory_code, "expense recorded");

        let category = subcategory_code
            .as_deref()
            .and_then(|code| subcategories.iter().find(|sc| sc.code == code))
            .map(|sc| format!(" vào danh mục {}", sc.name))
            .unwrap_or_default();

        ToolResult::text(format!(
            "✅ Đã ghi nhận chi tiêu {}{}: {}",
            format_vnd(amount),
            category,
            user_query
        ))
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedTransport, MockFinance};

    fn ctx() -> ToolContext {
        ToolContext::new(Some("u-1".into()), "conv-1")
    }

    async fn run(
        finance: Arc<MockFinance>,
        classifier: Arc<CannedTransport>,
        query: &str,
        ctx: &ToolContext,
    ) -> ToolResult {
        let tool = ExpenseTool::new(finance, classifier);
        match tool
            .execute("call_0", json!({"user_query": query}), ctx, CancellationToken::new())
            .await
        {
            ToolOutcome::Completed(result) => result,
            ToolOutcome::Interrupt(i) => panic!("unexpected interrupt {:?}", i),
        }
    }

    #[tokio::test]
    async fn test_bare_number_records_thousands() {
        let finance = Arc::new(MockFinance::with_food());
        let classifier = Arc::new(CannedTransport::replying(&[
            "```json\n{\"amount\": 100, \"subcategory_code\": \"FOOD\"}\n```",
        ]));
        let result = run(finance.clone(), classifier.clone(), "100", &ctx()).await;

        assert!(!result.is_error);
        let text = result.text_content();
        assert!(text.contains("✅"));
        assert!(text.contains("100.000 VNĐ"));
        assert!(text.contains("Ăn uống"));

        let created = finance.created.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].amount, 100_000);
        assert_eq!(created[0].user_id, "u-1");
        assert_eq!(created[0].subcategory_code.as_deref(), Some("FOOD"));
        assert!(classifier.prompts.lock()[0].contains("mã danh mục là FOOD"));
    }

    #[tokio::test]
    async fn test_falls_back_to_model_amount() {
        let finance = Arc::new(MockFinance::with_food());
        let classifier = Arc::new(CannedTransport::replying(&[
            "{\"amount\": \"45\", \"subcategory_code\": null}",
        ]));
        let result = run(finance.clone(), classifier, "bữa trưa hôm nay", &ctx()).await;
        assert!(result.text_content().contains("45.000 VNĐ"));
        assert_eq!(finance.created.lock()[0].subcategory_code, None);
    }

    #[tokio::test]
    async fn test_quantity_is_not_the_amount() {
        let finance = Arc::new(MockFinance::with_food());
        let classifier = Arc::new(CannedTransport::replying(&[
            "{\"amount\": 100, \"subcategory_code\": \"FOOD\"}",
        ]));
        let result = run(finance.clone(), classifier, "mua 2 ly cà phê 50k", &ctx()).await;
        assert!(result.text_content().contains("50.000 VNĐ"));
        assert_eq!(finance.created.lock()[0].amount, 50_000);

        let finance = Arc::new(MockFinance::with_food());
        let classifier = Arc::new(CannedTransport::replying(&[
            "{\"amount\": 40, \"subcategory_code\": \"FOOD\"}",
        ]));
        run(finance.clone(), classifier, "ngày 15/3 ăn 2 tô phở 40", &ctx()).await;
        assert_eq!(finance.created.lock()[0].amount, 40_000);
    }

    #[tokio::test]
    async fn test_missing_user_is_error() {
        let finance = Arc::new(MockFinance::with_food());
        let result = run(
            finance.clone(),
            Arc::new(CannedTransport::default()),
            "50k",
            &ToolContext::new(None, "conv-1"),
        )
        .await;
        assert!(result.is_error);
        assert!(finance.created.lock().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_is_error_result() {
        let result = run(
            Arc::new(MockFinance::failing()),
            Arc::new(CannedTransport::default()),
            "50k",
            &ctx(),
        )
        .await;
        assert!(result.is_error);
        assert!(result.text_content().starts_with("❌"));
    }

    #[tokio::test]
    async fn test_no_amount_anywhere() {
        let finance = Arc::new(MockFinance::with_food());
        let classifier = Arc::new(CannedTransport::replying(&["không hiểu"]));
        let result = run(finance.clone(), classifier, "đi chợ", &ctx()).await;
        assert!(result.is_error);
        assert!(finance.created.lock().is_empty());
    }
}
