//! Spending model lookup tool

use async_trait::async_trait;
use moneyez_agent::{Tool, ToolContext, ToolOutcome, ToolResult};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::finance::{FinanceBackend, SpendingModel};

pub struct SpendingModelTool {
    finance: Arc<dyn FinanceBackend>,
}

impl SpendingModelTool {
    pub fn new(finance: Arc<dyn FinanceBackend>) -> Self {
        Self { finance }
    }
}

fn format_models(current: Option<&SpendingModel>, catalog: &[SpendingModel]) -> String {
    let mut out = match current {
        Some(model) => format!(
            "Mô hình chi tiêu hiện tại: {} - {}\n",
            model.name, model.description
        ),
        None => "Bạn chưa chọn mô hình chi tiêu nào.\n".to_string(),
    };
    if catalog.is_empty() {
        out.push_str("Hiện chưa có mô hình chi tiêu nào khả dụng.");
        return out;
    }
    out.push_str("Các mô hình chi tiêu có sẵn:");
    for model in catalog {
        out.push_str(&format!("\n- {}: {}", model.name, model.description));
    }
    out
}

#[async_trait]
impl Tool for SpendingModelTool {
    fn name(&self) -> &str {
        "get_spending_models"
    }

    fn description(&self) -> &str {
        "Xem mô hình chi tiêu hiện tại của người dùng và danh sách các mô hình chi tiêu có sẵn."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let user_id = match super::require_user(ctx) {
            Ok(id) => id,
            Err(result) => return result.into(),
        };

        let current = match self.finance.get_current_spending_model(user_id).await {
            Ok(current) => current,
            Err(e) => {
                return ToolResult::error(format!(
                    "❌ Không thể lấy mô hình chi tiêu hiện tại: {}",
                    e
                ))
                .into();
            }
        };
        let catalog = match self.finance.get_spending_models().await {
            Ok(catalog) => catalog,
            Err(e) => {
                return ToolResult::error(format!(
                    "❌ Không thể lấy danh sách mô hình chi tiêu: {}",
                    e
                ))
                .into();
            }
        };

        ToolResult::text(format_models(current.as_ref(), &catalog)).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFinance;

    fn model(name: &str, description: &str) -> SpendingModel {
        SpendingModel {
            id: name.to_lowercase(),
            name: name.into(),
            description: description.into(),
        }
    }

    #[tokio::test]
    async fn test_current_and_catalog() {
        let finance = Arc::new(MockFinance {
            current_model: Some(model("50/30/20", "Cân bằng")),
            models: vec![model("50/30/20", "Cân bằng"), model("6 hũ", "Chia 6 quỹ")],
            ..Default::default()
        });
        let tool = SpendingModelTool::new(finance);
        let ctx = ToolContext::new(Some("u-1".into()), "c");
        let ToolOutcome::Completed(result) =
            tool.execute("c", json!({}), &ctx, CancellationToken::new()).await
        else {
            panic!("unexpected interrupt");
        };
        assert_eq!(
            result.text_content(),
            "Mô hình chi tiêu hiện tại: 50/30/20 - Cân bằng\nCác mô hình chi tiêu có sẵn:\n- 50/30/20: Cân bằng\n- 6 hũ: Chia 6 quỹ"
        );
    }

    #[test]
    fn test_no_current_no_catalog() {
        assert_eq!(
            format_models(None, &[]),
            "Bạn chưa chọn mô hình chi tiêu nào.\nHiện chưa có mô hình chi tiêu nào khả dụng."
        );
    }

    #[tokio::test]
    async fn test_backend_failure() {
        let tool = SpendingModelTool::new(Arc::new(MockFinance::failing()));
        let ctx = ToolContext::new(Some("u-1".into()), "c");
        let ToolOutcome::Completed(result) =
            tool.execute("c", json!({}), &ctx, CancellationToken::new()).await
        else {
            panic!("unexpected interrupt");
        };
        assert!(result.is_error);
    }
}
