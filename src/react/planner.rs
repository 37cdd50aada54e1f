//! Planner：目标 → 计划，失败后重新规划
//!
//! Planner 是外部协作方（可由文本模型实现）；parse_plan 从模型输出中提取 JSON 计划（支持 ```json 围栏）。
//! KeywordPlanner 为无模型时的启发式实现：按关键词识别构件，从 `<n>m` 中解析尺寸。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::core::{Action, Plan, Step, StepStatus};
use crate::react::ConstraintCategory;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("plan has no usable steps: {0}")]
    InvalidPlan(String),

    #[error("planner failed: {0}")]
    Failed(String),
}

/// 失败来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 工具执行失败（含未注册 / 已禁用 / 不在 allowed_tools 中）
    Tool,
    /// Critic 否决
    Critic,
}

/// 交给 Planner 的失败详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ConstraintCategory>,
    /// 同类别中成功率较高的工具，供重新规划参考
    #[serde(default)]
    pub recommended_tools: Vec<String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate_plan(&self, goal: &str, context: &Value) -> Result<Plan, PlannerError>;

    async fn replan(
        &self,
        goal: &str,
        context: &Value,
        original: &Plan,
        failed: &Action,
        failure: &FailureDetail,
    ) -> Result<Plan, PlannerError>;
}

#[derive(Debug, Deserialize)]
struct PlanDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    steps: Vec<StepDraft>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StepDraft {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    tool: String,
    #[serde(default)]
    args: Value,
}

/// 从模型输出中解析计划：```json 围栏、或首个 `{` 到末个 `}` 之间的内容
pub fn parse_plan(output: &str) -> Result<Plan, PlannerError> {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start > end {
            return Err(PlannerError::JsonParse(trimmed.to_string()));
        }
        &trimmed[start..=end]
    } else {
        return Err(PlannerError::JsonParse(format!("no JSON object in: {trimmed}")));
    };

    let draft: PlanDraft = serde_json::from_str(json_str)
        .map_err(|e| PlannerError::JsonParse(format!("{}: {}", e, json_str)))?;

    let mut steps = Vec::with_capacity(draft.steps.len());
    for (i, s) in draft.steps.into_iter().enumerate() {
        if s.tool.trim().is_empty() {
            return Err(PlannerError::InvalidPlan(format!("step {} has no tool", i + 1)));
        }
        let title = if s.title.is_empty() { s.tool.clone() } else { s.title };
        let args = if s.args.is_null() { json!({}) } else { s.args };
        let mut step = Step::new(i + 1, title, s.tool, args).with_description(s.description);
        if let Some(id) = s.id.filter(|id| !id.is_empty()) {
            step = step.with_id(id);
        }
        steps.push(step);
    }
    let plan = Plan::new(draft.title, steps);
    Ok(match draft.confidence {
        Some(c) => plan.with_confidence(c),
        None => plan,
    })
}

const ACTIONABLE_KEYWORDS: &[&str] = &[
    "create", "build", "add", "draw", "make", "generate", "insert", "room", "wall", "door",
    "window", "column", "beam", "roof", "stair", "slab", "render", "openings", "partition",
];

/// 可识别的构件：关键词、工具名、尺寸键（按 `<n>m` 出现顺序赋值）与默认参数
struct Element {
    keyword: &'static str,
    tool: &'static str,
    dimensions: &'static [&'static str],
    defaults: fn() -> Value,
}

const ELEMENTS: &[Element] = &[
    Element {
        keyword: "wall",
        tool: "geometry.createWall",
        dimensions: &["length", "height", "thickness"],
        defaults: || json!({"length": 4.0, "height": 2.7, "thickness": 0.2}),
    },
    Element {
        keyword: "room",
        tool: "geometry.createRoom",
        dimensions: &["width", "depth", "height"],
        defaults: || json!({"width": 4.0, "depth": 5.0, "height": 2.7}),
    },
    Element {
        keyword: "door",
        tool: "geometry.createDoor",
        dimensions: &["width", "height"],
        defaults: || json!({"width": 0.9, "height": 2.1}),
    },
    Element {
        keyword: "window",
        tool: "geometry.createWindow",
        dimensions: &["width", "sillHeight"],
        defaults: || json!({"width": 1.2, "sillHeight": 0.9}),
    },
    Element {
        keyword: "stair",
        tool: "geometry.createStair",
        dimensions: &["riser", "tread"],
        defaults: || json!({"riser": 0.17, "tread": 0.28}),
    },
    Element {
        keyword: "column",
        tool: "geometry.createColumn",
        dimensions: &["height", "diameter"],
        defaults: || json!({"height": 3.0, "diameter": 0.3}),
    },
    Element {
        keyword: "slab",
        tool: "geometry.createSlab",
        dimensions: &["thickness", "span"],
        defaults: || json!({"thickness": 0.2, "span": 5.0}),
    },
    Element {
        keyword: "roof",
        tool: "geometry.createRoof",
        dimensions: &[],
        defaults: || json!({"pitch": 30.0}),
    },
];

fn dimension_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*m\b").expect("valid dimension regex"))
}

pub fn is_actionable(goal: &str) -> bool {
    let lower = goal.to_lowercase();
    ACTIONABLE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// 启发式 Planner：每个识别到的构件一步；可执行但无构件时退化为默认房间
#[derive(Debug, Default)]
pub struct KeywordPlanner;

impl KeywordPlanner {
    pub fn new() -> Self {
        Self
    }

    fn build_steps(goal: &str) -> Vec<Step> {
        let lower = goal.to_lowercase();
        let mut found: Vec<(usize, &Element)> = ELEMENTS
            .iter()
            .filter_map(|e| lower.find(e.keyword).map(|pos| (pos, e)))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);

        if found.is_empty() {
            let room = &ELEMENTS[1];
            return vec![Step::new(1, "Create room", room.tool, (room.defaults)())];
        }

        found
            .iter()
            .enumerate()
            .map(|(i, (_, element))| {
                // 尺寸取自上一个构件关键词之后、下一个构件关键词之前的文本
                let start = match i {
                    0 => 0,
                    _ => found[i - 1].0 + found[i - 1].1.keyword.len(),
                };
                let end = found.get(i + 1).map(|(next, _)| *next).unwrap_or(lower.len());
                let mut args = (element.defaults)();
                let values = dimension_regex()
                    .captures_iter(&lower[start..end])
                    .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<f64>().ok()));
                for (key, value) in element.dimensions.iter().zip(values) {
                    args[*key] = json!(value);
                }
                Step::new(i + 1, format!("Create {}", element.keyword), element.tool, args)
            })
            .collect()
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn generate_plan(&self, goal: &str, _context: &Value) -> Result<Plan, PlannerError> {
        let title = format!("Plan for: {goal}");
        if !is_actionable(goal) {
            return Ok(Plan::new(title, Vec::new()));
        }
        Ok(Plan::new(title, Self::build_steps(goal)))
    }

    /// 已完成的步骤原样保留；失败步骤改用默认参数，无法修复时标记为 skipped
    async fn replan(
        &self,
        _goal: &str,
        _context: &Value,
        original: &Plan,
        failed: &Action,
        failure: &FailureDetail,
    ) -> Result<Plan, PlannerError> {
        let mut plan = original.clone().with_confidence(original.confidence * 0.8);
        let Some(step) = plan.step_mut(&failed.step_id) else {
            return Err(PlannerError::Failed(format!(
                "failed step {} is not part of the plan",
                failed.step_id
            )));
        };

        let element = ELEMENTS.iter().find(|e| e.tool == failed.tool);
        match (failure.kind, element) {
            (FailureKind::Critic, Some(element)) if step.args != (element.defaults)() => {
                step.args = merge_defaults(&step.args, &(element.defaults)());
            }
            (FailureKind::Tool, _) => {
                match failure.recommended_tools.iter().find(|t| **t != failed.tool) {
                    Some(alternative) => step.tool = alternative.clone(),
                    None => {
                        step.advance(StepStatus::Skipped);
                    }
                }
            }
            _ => {
                step.advance(StepStatus::Skipped);
            }
        }
        plan.refresh_completion();
        Ok(plan)
    }
}

/// 用默认值覆盖参数中的尺寸键，其余键（如 id、wallId）保留
fn merge_defaults(args: &Value, defaults: &Value) -> Value {
    let mut merged: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
    if let Some(defaults) = defaults.as_object() {
        for (k, v) in defaults {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_fenced() {
        let output = r#"Here is the plan:
```json
{"title": "Wall", "confidence": 0.9, "steps": [
  {"title": "Create wall", "tool": "geometry.createWall", "args": {"length": 4}}
]}
```"#;
        let plan = parse_plan(output).unwrap();
        assert_eq!(plan.title, "Wall");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "step-1");
        assert_eq!(plan.steps[0].args["length"], 4);
        assert!((plan.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_plan_bare_and_errors() {
        let plan = parse_plan(r#"{"steps": [{"id": "a", "tool": "geometry.createSlab"}]}"#).unwrap();
        assert_eq!(plan.steps[0].id, "a");
        assert_eq!(plan.steps[0].title, "geometry.createSlab");
        assert_eq!(plan.steps[0].args, json!({}));

        assert!(matches!(parse_plan("no plan here"), Err(PlannerError::JsonParse(_))));
        assert!(matches!(
            parse_plan(r#"{"steps": [{"tool": ""}]}"#),
            Err(PlannerError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_actionable() {
        assert!(is_actionable("Build a 5m wall"));
        assert!(!is_actionable("hello, how are you?"));
    }

    #[tokio::test]
    async fn test_keyword_plan_dimensions() {
        let planner = KeywordPlanner::new();
        let plan = planner
            .generate_plan("create a 6m wall and a door 1.0m wide", &Value::Null)
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].tool, "geometry.createWall");
        assert_eq!(plan.steps[0].args["length"], 6.0);
        assert_eq!(plan.steps[0].args["height"], 2.7);
        assert_eq!(plan.steps[1].tool, "geometry.createDoor");
        assert_eq!(plan.steps[1].args["width"], 1.0);
    }

    #[tokio::test]
    async fn test_keyword_plan_fallbacks() {
        let planner = KeywordPlanner::new();
        let chat = planner.generate_plan("thanks!", &Value::Null).await.unwrap();
        assert!(chat.steps.is_empty());

        let partition = planner.generate_plan("make a partition", &Value::Null).await.unwrap();
        assert_eq!(partition.steps[0].tool, "geometry.createRoom");
        assert_eq!(partition.steps[0].args["depth"], 5.0);
    }

    #[tokio::test]
    async fn test_replan_repairs_critic_failure() {
        let planner = KeywordPlanner::new();
        let plan = planner
            .generate_plan("build a 0.2m wall", &Value::Null)
            .await
            .unwrap();
        let failed = Action::from_step(&plan.steps[0]);
        let failure = FailureDetail {
            kind: FailureKind::Critic,
            message: "wall too short".into(),
            category: Some(ConstraintCategory::Practical),
            recommended_tools: vec![],
        };
        let revised = planner
            .replan("build a 0.2m wall", &Value::Null, &plan, &failed, &failure)
            .await
            .unwrap();
        assert_eq!(revised.steps[0].args["length"], 4.0);
        assert_eq!(revised.steps[0].status, StepStatus::Pending);
        assert!((revised.confidence - 0.8).abs() < 1e-9);

        // 已是默认参数仍被否决：跳过该步
        let again = planner
            .replan("build a wall", &Value::Null, &revised, &Action::from_step(&revised.steps[0]), &failure)
            .await
            .unwrap();
        assert_eq!(again.steps[0].status, StepStatus::Skipped);
        assert!(again.completed);
    }

    #[tokio::test]
    async fn test_replan_tool_failure_uses_recommendation() {
        let planner = KeywordPlanner::new();
        let plan = Plan::new(
            "p",
            vec![Step::new(1, "Place door", "door.insert", json!({"wallId": "wall_1"}))],
        );
        let failure = FailureDetail {
            kind: FailureKind::Tool,
            message: "Tool not found: door.insert".into(),
            category: None,
            recommended_tools: vec!["door.place".into()],
        };
        let revised = planner
            .replan("add a door", &Value::Null, &plan, &Action::from_step(&plan.steps[0]), &failure)
            .await
            .unwrap();
        assert_eq!(revised.steps[0].tool, "door.place");
        assert_eq!(revised.steps[0].args["wallId"], "wall_1");
    }
}
