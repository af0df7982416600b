//! Backend tools bound to the conversation graph

mod expense;
mod history;
mod spending_model;

pub use expense::ExpenseTool;
pub use history::TransactionHistoryTool;
pub use spending_model::SpendingModelTool;

use moneyez_agent::{ToolContext, ToolRegistry, ToolResult, Transport};
use std::sync::Arc;

use crate::finance::FinanceBackend;

/// Registry with every finance-backed tool
pub fn backend_tools(
    finance: Arc<dyn FinanceBackend>,
    classifier: Arc<dyn Transport>,
) -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Arc::new(ExpenseTool::new(finance.clone(), classifier)))
        .with_tool(Arc::new(TransactionHistoryTool::new(finance.clone())))
        .with_tool(Arc::new(SpendingModelTool::new(finance)))
}

/// The acting user, or the error result every tool returns without one
fn require_user(ctx: &ToolContext) -> Result<&str, ToolResult> {
    match ctx.user_id.as_deref() {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ToolResult::error(
            "❌ Không xác định được người dùng. Vui lòng đăng nhập lại.",
        )),
    }
}
