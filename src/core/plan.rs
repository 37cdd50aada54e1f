//! 计划与步骤：Planner 产出，Orchestrator 仅推进步骤状态
//!
//! 步骤状态只能前进（pending -> completed / skipped），不会回退。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// 计划中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// 序号（从 1 开始）
    pub number: usize,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(number: usize, title: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("step-{number}"),
            number,
            title: title.into(),
            description: String::new(),
            tool: tool.into(),
            args,
            status: StepStatus::Pending,
            result_summary: None,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 推进状态；已完成 / 已跳过的步骤不会再变化，返回是否实际发生了变化
    pub fn advance(&mut self, status: StepStatus) -> bool {
        if self.status.is_done() || status == StepStatus::Pending {
            return false;
        }
        self.status = status;
        true
    }

    /// 标记完成并记录结果摘要
    pub fn complete(&mut self, summary: impl Into<String>) -> bool {
        if !self.advance(StepStatus::Completed) {
            return false;
        }
        self.result_summary = Some(summary.into());
        self.completed_at = Some(Utc::now());
        true
    }

    fn same_work(&self, other: &Step) -> bool {
        self.title == other.title && self.tool == other.tool && self.args == other.args
    }
}

/// 计划：有序步骤 + 元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub steps: Vec<Step>,
    /// 0.0 - 1.0
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub replan_count: u32,
}

fn default_confidence() -> f64 {
    1.0
}

impl Plan {
    pub fn new(title: impl Into<String>, steps: Vec<Step>) -> Self {
        let mut plan = Self {
            title: title.into(),
            steps,
            confidence: 1.0,
            completed: false,
            replan_count: 0,
        };
        plan.refresh_completion();
        plan
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// 第一个未完成 / 未跳过的步骤
    pub fn next_pending(&self) -> Option<&Step> {
        self.steps.iter().find(|s| !s.status.is_done())
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// 重新计算完成标志：全部步骤已完成或跳过
    pub fn refresh_completion(&mut self) -> bool {
        self.completed = self.steps.iter().all(|s| s.status.is_done());
        self.completed
    }

    /// 新计划替换旧计划时保留旧计划中已完成的状态，保证状态不回退。
    /// 只有 id、标题、工具与参数都相同才视为同一步骤；复用 id 的新步骤仍需执行。
    pub fn carry_forward(&mut self, previous: &Plan) {
        for step in &mut self.steps {
            let same = previous
                .steps
                .iter()
                .find(|s| s.id == step.id && s.same_work(step));
            if let Some(old) = same {
                if old.status.is_done() && !step.status.is_done() {
                    step.status = old.status;
                    step.result_summary = old.result_summary.clone();
                    step.completed_at = old.completed_at;
                }
            }
        }
        self.refresh_completion();
    }
}

/// 一次执行尝试：由步骤投影得到的调用请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    pub args: Value,
    pub step_id: String,
}

impl Action {
    pub fn from_step(step: &Step) -> Self {
        Self {
            tool: step.tool.clone(),
            args: step.args.clone(),
            step_id: step.id.clone(),
        }
    }
}
