//! Transaction history tool

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use moneyez_agent::{Tool, ToolContext, ToolOutcome, ToolResult};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::finance::{FinanceBackend, Transaction};
use crate::utils::format_vnd;

/// Days covered when no start date is given
const DEFAULT_RANGE_DAYS: u64 = 30;

const DISPLAY_DATE: &str = "%d/%m/%Y";

/// Lists the user's transactions in a date range with their total
pub struct TransactionHistoryTool {
    finance: Arc<dyn FinanceBackend>,
}

impl TransactionHistoryTool {
    pub fn new(finance: Arc<dyn FinanceBackend>) -> Self {
        Self { finance }
    }
}

fn parse_date(arguments: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, String> {
    match arguments.get(key).and_then(|v| v.as_str()) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("❌ Ngày không hợp lệ ({}): {}. Định dạng đúng là YYYY-MM-DD.", key, raw)),
    }
}

/// `[start, end]`, defaulting to the 30 days ending `today`
fn resolve_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), String> {
    let end = end.unwrap_or(today);
    let start = start.unwrap_or_else(|| {
        end.checked_sub_days(Days::new(DEFAULT_RANGE_DAYS))
            .unwrap_or(end)
    });
    if start > end {
        return Err("❌ Ngày bắt đầu phải trước ngày kết thúc.".to_string());
    }
    Ok((start, end))
}

fn display_date(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "--/--/----".to_string();
    };
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(|d| d.format(DISPLAY_DATE).to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn format_history(transactions: &[Transaction], start: NaiveDate, end: NaiveDate) -> String {
    let range = format!(
        "từ {} đến {}",
        start.format(DISPLAY_DATE),
        end.format(DISPLAY_DATE)
    );
    if transactions.is_empty() {
        return format!("Không có giao dịch nào {}.", range);
    }

    let mut out = format!("Lịch sử giao dịch {} ({} giao dịch):\n", range, transactions.len());
    let mut total = 0i64;
    for (i, tx) in transactions.iter().enumerate() {
        let amount = tx.amount.round() as i64;
        total = total.saturating_add(amount);
        out.push_str(&format!(
            "{}. {} - {} - {}",
            i + 1,
            display_date(tx.transaction_date.as_deref()),
            tx.description.as_deref().unwrap_or("(không có mô tả)"),
            format_vnd(amount)
        ));
        if let Some(sub) = &tx.subcategory_name {
            out.push_str(&format!(" ({})", sub));
        }
        out.push('\n');
    }
    out.push_str(&format!("Tổng cộng: {}", format_vnd(total)));
    out
}

#[async_trait]
impl Tool for TransactionHistoryTool {
    fn name(&self) -> &str {
        "get_transaction_history"
    }

    fn description(&self) -> &str {
        "Xem lịch sử giao dịch của người dùng trong một khoảng thời gian. Mặc định là 30 ngày gần nhất."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "start_date": {
                    "type": "string",
                    "description": "Ngày bắt đầu, định dạng YYYY-MM-DD"
                },
                "end_date": {
                    "type": "string",
                    "description": "Ngày kết thúc, định dạng YYYY-MM-DD"
                }
            }
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let user_id = match super::require_user(ctx) {
            Ok(id) => id,
            Err(result) => return result.into(),
        };

        let range = parse_date(&arguments, "start_date").and_then(|start| {
            let end = parse_date(&arguments, "end_date")?;
            resolve_range(start, end, Local::now().date_naive())
        });
        let (start, end) = match range {
            Ok(range) => range,
            Err(message) => return ToolResult::error(message).into(),
        };

        match self.finance.get_transactions(user_id, start, end).await {
            Ok(transactions) => {
                tracing::debug!(user_id, count = transactions.len(), "fetched transactions");
                ToolResult::text(format_history(&transactions, start, end)).into()
            }
            Err(e) => {
                ToolResult::error(format!("❌ Không thể lấy lịch sử giao dịch: {}", e)).into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFinance;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn run(finance: Arc<MockFinance>, args: serde_json::Value) -> ToolResult {
        let tool = TransactionHistoryTool::new(finance);
        let ctx = ToolContext::new(Some("u-1".into()), "conv-1");
        match tool.execute("c", args, &ctx, CancellationToken::new()).await {
            ToolOutcome::Completed(r) => r,
            ToolOutcome::Interrupt(i) => panic!("unexpected interrupt {:?}", i),
        }
    }

    #[test]
    fn test_default_range_is_thirty_days() {
        let (start, end) = resolve_range(None, None, date(2024, 5, 31)).unwrap();
        assert_eq!(start, date(2024, 5, 1));
        assert_eq!(end, date(2024, 5, 31));

        let (start, _) = resolve_range(None, Some(date(2024, 3, 10)), date(2024, 5, 31)).unwrap();
        assert_eq!(start, date(2024, 2, 9));
        assert!(resolve_range(Some(date(2024, 6, 1)), Some(date(2024, 5, 1)), date(2024, 6, 2)).is_err());
    }

    #[tokio::test]
    async fn test_lists_transactions_with_total() {
        let finance = Arc::new(MockFinance {
            transactions: vec![
                Transaction {
                    amount: 50_000.0,
                    description: Some("phở".into()),
                    transaction_date: Some("2024-05-02T08:30:00".into()),
                    subcategory_name: Some("Ăn uống".into()),
                },
                Transaction {
                    amount: 1_200_000.0,
                    description: None,
                    transaction_date: None,
                    subcategory_name: None,
                },
            ],
            ..Default::default()
        });
        let result = run(
            finance.clone(),
            json!({"start_date": "2024-05-01", "end_date": "2024-05-31"}),
        )
        .await;

        let text = result.text_content();
        assert!(text.starts_with("Lịch sử giao dịch từ 01/05/2024 đến 31/05/2024 (2 giao dịch):"));
        assert!(text.contains("1. 02/05/2024 - phở - 50.000 VNĐ (Ăn uống)"));
        assert!(text.ends_with("Tổng cộng: 1.250.000 VNĐ"));
        assert_eq!(
            finance.ranges.lock()[0],
            ("u-1".to_string(), date(2024, 5, 1), date(2024, 5, 31))
        );
    }

    #[test]
    fn test_total_saturates_on_huge_amounts() {
        let huge = Transaction {
            amount: 1e30,
            ..Default::default()
        };
        let text = format_history(&[huge.clone(), huge], date(2024, 5, 1), date(2024, 5, 31));
        assert!(text.ends_with(&format!("Tổng cộng: {}", format_vnd(i64::MAX))));
    }

    #[tokio::test]
    async fn test_empty_history() {
        let result = run(
            Arc::new(MockFinance::default()),
            json!({"start_date": "2024-01-01", "end_date": "2024-01-02"}),
        )
        .await;
        assert_eq!(
            result.text_content(),
            "Không có giao dịch nào từ 01/01/2024 đến 02/01/2024."
        );
    }

    #[tokio::test]
    async fn test_invalid_date_and_backend_failure() {
        let bad = run(Arc::new(MockFinance::default()), json!({"start_date": "01/05/2024"})).await;
        assert!(bad.is_error);

        let down = run(Arc::new(MockFinance::failing()), json!({})).await;
        assert!(down.is_error);
        assert!(down.text_content().starts_with("❌"));
    }
}
