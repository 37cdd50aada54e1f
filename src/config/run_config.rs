//! 单次运行配置：步数 / 时间预算、审批模式、可用工具、功能开关、历史保留
//!
//! 合并顺序：硬编码基线 -> 用户持久化覆盖 -> 单次运行覆盖；合并结果在创建后不再修改。

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 步数预算下限
pub const MIN_STEPS: u32 = 1;
/// 步数预算上限
pub const MAX_STEPS: u32 = 100;
/// 时间预算下限（毫秒）
pub const MIN_DURATION_MS: u64 = 1_000;
/// 时间预算上限（毫秒）
pub const MAX_DURATION_MS: u64 = 300_000;
/// 重规划次数上限（max_replans 取值范围 [0, 100]）
pub const MAX_REPLANS_LIMIT: u32 = 100;

/// 配置错误：在运行开始前拒绝
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("step budget {0} out of range [1, 100]")]
    StepBudgetOutOfRange(i64),

    #[error("time budget {0}ms out of range [1000, 300000]")]
    TimeBudgetOutOfRange(i64),

    #[error("invalid approval mode '{0}' (expected always, never or destructive)")]
    InvalidApprovalMode(String),

    #[error("replan budget {0} out of range [0, 100]")]
    ReplanBudgetOutOfRange(u32),

    #[error("history retention must keep at least one run")]
    HistoryRetention,

    #[error("malformed overrides: {0}")]
    Malformed(String),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ConfigError>),
}

/// 审批模式：always 每步审批，never 从不审批，destructive 仅破坏性工具审批
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Always,
    Never,
    #[default]
    Destructive,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Always => "always",
            ApprovalMode::Never => "never",
            ApprovalMode::Destructive => "destructive",
        }
    }
}

impl FromStr for ApprovalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(ApprovalMode::Always),
            "never" => Ok(ApprovalMode::Never),
            "destructive" => Ok(ApprovalMode::Destructive),
            other => Err(ConfigError::InvalidApprovalMode(other.to_string())),
        }
    }
}

/// 功能开关
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// 每步执行后调用 Critic
    pub critic: bool,
    /// 以事务包裹整次运行，失败 / 取消时回滚文档
    pub checkpoints: bool,
    /// 工具失败或 Critic 拒绝时请求新计划；关闭时首次失败即终止
    pub replanning: bool,
    /// 运行结束后写入历史
    pub record_history: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            critic: true,
            checkpoints: true,
            replanning: true,
            record_history: true,
        }
    }
}

/// 运行历史保留策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRetention {
    pub max_runs: usize,
    pub max_age_days: u32,
}

impl Default for HistoryRetention {
    fn default() -> Self {
        Self {
            max_runs: 100,
            max_age_days: 30,
        }
    }
}

/// 合并后的运行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_steps: u32,
    pub max_duration_ms: u64,
    pub approval_mode: ApprovalMode,
    /// 为空表示允许全部已注册工具
    pub allowed_tools: Vec<String>,
    /// 独立的重规划上限；None 表示重规划只消耗步数预算
    pub max_replans: Option<u32>,
    pub features: FeatureToggles,
    pub history: HistoryRetention,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_duration_ms: 120_000,
            approval_mode: ApprovalMode::Destructive,
            allowed_tools: Vec::new(),
            max_replans: None,
            features: FeatureToggles::default(),
            history: HistoryRetention::default(),
        }
    }
}

impl RunConfig {
    pub fn is_tool_allowed(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }

    /// 将覆盖叠加到当前配置上，返回新配置（不做范围校验）
    pub fn merged(&self, overrides: &ConfigOverrides) -> Result<RunConfig, ConfigError> {
        let mut cfg = self.clone();
        if let Some(steps) = overrides.max_steps {
            cfg.max_steps =
                u32::try_from(steps).map_err(|_| ConfigError::StepBudgetOutOfRange(steps))?;
        }
        if let Some(ms) = overrides.max_duration_ms {
            cfg.max_duration_ms =
                u64::try_from(ms).map_err(|_| ConfigError::TimeBudgetOutOfRange(ms))?;
        }
        if let Some(mode) = &overrides.approval_mode {
            cfg.approval_mode = mode.parse()?;
        }
        if let Some(tools) = &overrides.allowed_tools {
            cfg.allowed_tools = tools.clone();
        }
        if let Some(replans) = overrides.max_replans {
            cfg.max_replans = Some(replans);
        }
        if let Some(f) = &overrides.features {
            if let Some(v) = f.critic {
                cfg.features.critic = v;
            }
            if let Some(v) = f.checkpoints {
                cfg.features.checkpoints = v;
            }
            if let Some(v) = f.replanning {
                cfg.features.replanning = v;
            }
            if let Some(v) = f.record_history {
                cfg.features.record_history = v;
            }
        }
        if let Some(h) = &overrides.history {
            if let Some(v) = h.max_runs {
                cfg.history.max_runs = v;
            }
            if let Some(v) = h.max_age_days {
                cfg.history.max_age_days = v;
            }
        }
        Ok(cfg)
    }
}

/// 校验硬性边界：步数 [1,100]，时间 [1000,300000] ms，重规划 [0,100]，历史至少保留一条
pub fn validate_config(config: &RunConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    if !(MIN_STEPS..=MAX_STEPS).contains(&config.max_steps) {
        errors.push(ConfigError::StepBudgetOutOfRange(config.max_steps as i64));
    }
    if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&config.max_duration_ms) {
        errors.push(ConfigError::TimeBudgetOutOfRange(
            i64::try_from(config.max_duration_ms).unwrap_or(i64::MAX),
        ));
    }
    if let Some(replans) = config.max_replans {
        if replans > MAX_REPLANS_LIMIT {
            errors.push(ConfigError::ReplanBudgetOutOfRange(replans));
        }
    }
    if config.history.max_runs == 0 {
        errors.push(ConfigError::HistoryRetention);
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ConfigError::Multiple(errors)),
    }
}

/// 覆盖项：全部可选，未设置的字段沿用下层配置
///
/// 数值字段使用有符号类型，以便负数能在校验阶段被明确拒绝，而不是在反序列化时报错。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_replans: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoints: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replanning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_history: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
}

impl ConfigOverrides {
    /// 从调用方传入的 JSON 构造（如 HTTP 请求体中的 overrides）；allowedTools 不是列表等情况返回 Malformed
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self == &ConfigOverrides::default()
    }

    /// 以 `upper` 覆盖 `self` 中对应字段，返回新的覆盖项（用于累积持久化覆盖）
    pub fn layered(&self, upper: &ConfigOverrides) -> ConfigOverrides {
        let features = match (&self.features, &upper.features) {
            (Some(lower), Some(up)) => Some(FeatureOverrides {
                critic: up.critic.or(lower.critic),
                checkpoints: up.checkpoints.or(lower.checkpoints),
                replanning: up.replanning.or(lower.replanning),
                record_history: up.record_history.or(lower.record_history),
            }),
            (lower, up) => up.clone().or_else(|| lower.clone()),
        };
        let history = match (&self.history, &upper.history) {
            (Some(lower), Some(up)) => Some(HistoryOverrides {
                max_runs: up.max_runs.or(lower.max_runs),
                max_age_days: up.max_age_days.or(lower.max_age_days),
            }),
            (lower, up) => up.clone().or_else(|| lower.clone()),
        };
        ConfigOverrides {
            max_steps: upper.max_steps.or(self.max_steps),
            max_duration_ms: upper.max_duration_ms.or(self.max_duration_ms),
            approval_mode: upper.approval_mode.clone().or_else(|| self.approval_mode.clone()),
            allowed_tools: upper.allowed_tools.clone().or_else(|| self.allowed_tools.clone()),
            max_replans: upper.max_replans.or(self.max_replans),
            features,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_steps(steps: u32) -> RunConfig {
        RunConfig {
            max_steps: steps,
            ..RunConfig::default()
        }
    }

    fn with_duration(ms: u64) -> RunConfig {
        RunConfig {
            max_duration_ms: ms,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_step_budget_bounds_inclusive() {
        assert!(validate_config(&with_steps(1)).is_ok());
        assert!(validate_config(&with_steps(50)).is_ok());
        assert!(validate_config(&with_steps(100)).is_ok());
        assert_eq!(
            validate_config(&with_steps(0)),
            Err(ConfigError::StepBudgetOutOfRange(0))
        );
        assert_eq!(
            validate_config(&with_steps(101)),
            Err(ConfigError::StepBudgetOutOfRange(101))
        );
    }

    #[test]
    fn test_time_budget_bounds_inclusive() {
        for ms in [1_000, 60_000, 300_000] {
            assert!(validate_config(&with_duration(ms)).is_ok(), "{ms} should pass");
        }
        for ms in [0, 999, 300_001] {
            assert!(validate_config(&with_duration(ms)).is_err(), "{ms} should fail");
        }
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let cfg = RunConfig {
            max_steps: 0,
            max_duration_ms: 10,
            ..RunConfig::default()
        };
        match validate_config(&cfg) {
            Err(ConfigError::Multiple(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("Expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn test_approval_mode_parse() {
        assert_eq!("always".parse::<ApprovalMode>().unwrap(), ApprovalMode::Always);
        assert_eq!("NEVER".parse::<ApprovalMode>().unwrap(), ApprovalMode::Never);
        assert!(matches!(
            "sometimes".parse::<ApprovalMode>(),
            Err(ConfigError::InvalidApprovalMode(_))
        ));
    }

    #[test]
    fn test_negative_step_override_rejected() {
        let overrides = ConfigOverrides {
            max_steps: Some(-3),
            ..Default::default()
        };
        assert_eq!(
            RunConfig::default().merged(&overrides),
            Err(ConfigError::StepBudgetOutOfRange(-3))
        );
    }

    #[test]
    fn test_allowed_tools_must_be_list() {
        let err = ConfigOverrides::from_value(serde_json::json!({
            "allowed_tools": "geometry.createWall"
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));

        let ok = ConfigOverrides::from_value(serde_json::json!({
            "allowed_tools": ["geometry.createWall"]
        }))
        .unwrap();
        assert_eq!(ok.allowed_tools.unwrap(), vec!["geometry.createWall".to_string()]);
    }

    #[test]
    fn test_layered_keeps_lower_fields() {
        let lower = ConfigOverrides {
            max_steps: Some(20),
            features: Some(FeatureOverrides {
                critic: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let upper = ConfigOverrides {
            approval_mode: Some("never".into()),
            features: Some(FeatureOverrides {
                checkpoints: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = lower.layered(&upper);
        assert_eq!(merged.max_steps, Some(20));
        assert_eq!(merged.approval_mode.as_deref(), Some("never"));
        let features = merged.features.unwrap();
        assert_eq!(features.critic, Some(false));
        assert_eq!(features.checkpoints, Some(false));
    }
}
