//! 运行过程事件：用于流式展示规划、审批、工具调用、观察与结果

use serde::Serialize;
use serde_json::Value;

use crate::core::{Plan, RunStatus, StopReason};
use crate::react::{ConstraintCategory, FailureDetail};

/// 观察预览的最大字符数
pub const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 进入的阶段（进度流中的 phase 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Planning,
    Act,
    Observe,
    Critic,
    Reflect,
    Replan,
}

/// 单条过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        goal: String,
        max_steps: u32,
        max_duration_ms: u64,
    },
    PlanProduced {
        plan: Plan,
    },
    Phase {
        phase: PhaseKind,
        step: u32,
    },
    /// 审批请求（参数已脱敏）
    ApprovalRequested {
        approval_id: String,
        tool: String,
        args: Value,
    },
    /// 调用工具（参数已脱敏）
    ToolCall {
        tool: String,
        step_id: String,
        args: Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        ok: bool,
        preview: String,
        duration_ms: u64,
    },
    Critique {
        tool: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<ConstraintCategory>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Replanned {
        failure: FailureDetail,
        replans: u32,
        steps: usize,
    },
    RunDone {
        status: RunStatus,
        reason: StopReason,
        steps: u32,
        replans: u32,
        duration_ms: u64,
    },
    RunError {
        message: String,
    },
}

/// 截断为预览文本
pub fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags() {
        let ev = RunEvent::Phase {
            phase: PhaseKind::Act,
            step: 1,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "phase");
        assert_eq!(json["phase"], "act");

        let done = RunEvent::RunDone {
            status: RunStatus::Exhausted,
            reason: StopReason::StepBudgetExhausted { max_steps: 3 },
            steps: 3,
            replans: 2,
            duration_ms: 40,
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "run_done");
        assert_eq!(json["status"], "exhausted");
        assert_eq!(json["reason"]["kind"], "step_budget_exhausted");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        let long = preview(&"界".repeat(300));
        assert_eq!(long.chars().count(), OBSERVATION_PREVIEW_CHARS + 3);
    }
}
