//! 引擎错误类型与恢复动作
//!
//! EngineError 只表示运行未能开始或外部操作失败；运行中的失败体现在 RunReport 的 StopReason 中。
//! RecoveryAction 由 RecoveryEngine 给出：工具失败 / Critic 否决 → Replan / Abort / Exhausted。

use thiserror::Error;

use crate::config::{ConfigError, SettingsError};
use crate::core::history::HistoryError;
use crate::core::StopReason;
use crate::tools::SurfaceError;

/// 引擎顶层错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// 配置非法：在运行开始前拒绝
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 用量限制拒绝：运行不会开始
    #[error("Usage limited: {0}")]
    UsageLimited(String),

    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 带失败详情请求 Planner 重新规划
    Replan,
    /// 终止运行（回滚，状态 error）
    Abort(String),
    /// 预算耗尽（提交已有改动，状态 exhausted）
    Exhausted(StopReason),
}
