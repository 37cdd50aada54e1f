//! Critic：执行结果的规则校验
//!
//! 工具执行失败时直接给出 `execution` 类别的失败结论；否则按工具名查找领域规则，
//! 没有规则的工具视为通过。
//!
//! 通过配置可以仅评估特定工具（其余工具直接通过）。

pub mod rules;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::Action;
use crate::tools::ToolError;

/// 约束类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintCategory {
    Structural,
    BuildingCode,
    Safety,
    Ergonomics,
    Accessibility,
    Practical,
    Geometric,
    Execution,
}

impl ConstraintCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintCategory::Structural => "structural",
            ConstraintCategory::BuildingCode => "building_code",
            ConstraintCategory::Safety => "safety",
            ConstraintCategory::Ergonomics => "ergonomics",
            ConstraintCategory::Accessibility => "accessibility",
            ConstraintCategory::Practical => "practical",
            ConstraintCategory::Geometric => "geometric",
            ConstraintCategory::Execution => "execution",
        }
    }
}

/// 校验结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ConstraintCategory>,
    pub tool: String,
    pub checked_at: DateTime<Utc>,
}

impl Verdict {
    pub fn pass(tool: &str) -> Self {
        Self {
            ok: true,
            reason: None,
            category: None,
            tool: tool.to_string(),
            checked_at: Utc::now(),
        }
    }

    pub fn fail(tool: &str, category: ConstraintCategory, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            category: Some(category),
            tool: tool.to_string(),
            checked_at: Utc::now(),
        }
    }
}

/// 一次校验的输入
#[derive(Debug, Clone, Copy)]
pub struct CriticInput<'a> {
    pub goal: &'a str,
    pub action: &'a Action,
    pub result: &'a Result<Value, ToolError>,
    pub context: &'a Value,
}

/// Critic：评估全部工具，或仅评估给定集合
#[derive(Debug, Clone)]
pub struct Critic {
    evaluate_all_tools: bool,
    evaluate_tools: HashSet<String>,
}

impl Default for Critic {
    fn default() -> Self {
        Self::new()
    }
}

impl Critic {
    pub fn new() -> Self {
        Self {
            evaluate_all_tools: true,
            evaluate_tools: HashSet::new(),
        }
    }

    /// 设置仅评估特定工具
    pub fn with_evaluate_tools(mut self, tools: Vec<String>) -> Self {
        self.evaluate_all_tools = false;
        self.evaluate_tools = tools.into_iter().collect();
        self
    }

    pub fn with_evaluate_all(mut self) -> Self {
        self.evaluate_all_tools = true;
        self
    }

    fn should_evaluate(&self, tool: &str) -> bool {
        self.evaluate_all_tools || self.evaluate_tools.is_empty() || self.evaluate_tools.contains(tool)
    }

    pub fn check(&self, input: &CriticInput<'_>) -> Verdict {
        let tool = input.action.tool.as_str();
        if let Err(e) = input.result {
            return Verdict::fail(tool, ConstraintCategory::Execution, e.to_string());
        }
        if !self.should_evaluate(tool) {
            return Verdict::pass(tool);
        }
        let Some(rule) = rules::rule_for(tool) else {
            return Verdict::pass(tool);
        };
        let empty = Map::new();
        let args = input.action.args.as_object().unwrap_or(&empty);
        match rule(args) {
            Ok(()) => Verdict::pass(tool),
            Err(violation) => {
                tracing::debug!(
                    tool,
                    goal = input.goal,
                    category = violation.category.as_str(),
                    "critic rejected action"
                );
                Verdict::fail(tool, violation.category, violation.reason)
            }
        }
    }
}
