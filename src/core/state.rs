//! 运行状态：Run 生命周期、终止原因与最终报告
//!
//! Run 由 Orchestrator 独占；终止时生成 RunReport，始终携带已用步数与耗时，
//! 以便调用方区分「预算耗尽」与「执行失败」。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RunConfig;
use crate::core::Plan;

pub type RunId = String;

pub fn new_run_id() -> RunId {
    format!("run_{}", uuid::Uuid::new_v4())
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planning,
    Executing,
    AwaitingApproval,
    Completed,
    /// 步数 / 时间 / 重规划预算耗尽，部分完成
    Exhausted,
    Error,
    Cancelled,
}

/// 终止原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    PlanComplete,
    StepBudgetExhausted { max_steps: u32 },
    TimeBudgetExhausted { max_duration_ms: u64 },
    ReplanBudgetExhausted { max_replans: u32 },
    ApprovalRejected { tool: String },
    Cancelled,
    Failed { message: String },
}

impl StopReason {
    pub fn status(&self) -> RunStatus {
        match self {
            StopReason::PlanComplete => RunStatus::Completed,
            StopReason::StepBudgetExhausted { .. }
            | StopReason::TimeBudgetExhausted { .. }
            | StopReason::ReplanBudgetExhausted { .. } => RunStatus::Exhausted,
            StopReason::ApprovalRejected { .. } | StopReason::Failed { .. } => RunStatus::Error,
            StopReason::Cancelled => RunStatus::Cancelled,
        }
    }

    /// 是否保留文档改动（提交外层事务）；否则回滚
    pub fn keeps_changes(&self) -> bool {
        matches!(self.status(), RunStatus::Completed | RunStatus::Exhausted)
    }
}

/// 一次运行
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub goal: String,
    pub user_id: String,
    pub context: Value,
    pub config: Arc<RunConfig>,
    pub started_at: DateTime<Utc>,
    /// 已执行的尝试次数（成功与失败都计入）
    pub step: u32,
    pub replans: u32,
    pub plan: Option<Plan>,
    pub status: RunStatus,
}

impl Run {
    pub fn new(
        id: RunId,
        goal: impl Into<String>,
        user_id: impl Into<String>,
        context: Value,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            id,
            goal: goal.into(),
            user_id: user_id.into(),
            context,
            config,
            started_at: Utc::now(),
            step: 0,
            replans: 0,
            plan: None,
            status: RunStatus::Planning,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// 终态报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub goal: String,
    pub status: RunStatus,
    pub reason: StopReason,
    pub steps: u32,
    pub replans: u32,
    pub duration_ms: u64,
    pub plan: Option<Plan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_status_mapping() {
        assert_eq!(StopReason::PlanComplete.status(), RunStatus::Completed);
        assert_eq!(
            StopReason::StepBudgetExhausted { max_steps: 3 }.status(),
            RunStatus::Exhausted
        );
        assert_eq!(
            StopReason::ApprovalRejected { tool: "geometry.delete".into() }.status(),
            RunStatus::Error
        );
        assert_eq!(StopReason::Cancelled.status(), RunStatus::Cancelled);
        assert!(StopReason::TimeBudgetExhausted { max_duration_ms: 1000 }.keeps_changes());
        assert!(!StopReason::Failed { message: "boom".into() }.keeps_changes());
    }

    #[test]
    fn test_stop_reason_serialization() {
        let v = serde_json::to_value(StopReason::StepBudgetExhausted { max_steps: 5 }).unwrap();
        assert_eq!(v["kind"], "step_budget_exhausted");
        assert_eq!(v["max_steps"], 5);
        assert_eq!(serde_json::to_value(RunStatus::AwaitingApproval).unwrap(), "awaiting_approval");
    }
}
