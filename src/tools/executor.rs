//! 工具执行器
//!
//! 持有共享的 ToolRegistry，execute(action) 调用 registry.execute 并测量耗时；
//! 每次调用输出结构化审计日志（JSON，参数已脱敏）。不设内部超时，运行的时间预算在步骤边界检查。

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::Action;
use crate::observability::redact_sensitive;
use crate::tools::{ToolError, ToolRegistry};

/// 单次调用结果
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub result: Result<Value, ToolError>,
    pub duration_ms: u64,
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}

/// 工具执行器：对注册表调用加审计日志
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, action: &Action) -> ActionOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&action.args);
        let result = self
            .registry
            .execute(&action.tool, action.args.clone())
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::NotFound(_)) => "not_found",
            Err(ToolError::Disabled(_)) => "disabled",
            Err(ToolError::Failed { .. }) => "error",
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": action.tool,
            "step_id": action.step_id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ActionOutcome {
            result,
            duration_ms,
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = redact_sensitive(args).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
