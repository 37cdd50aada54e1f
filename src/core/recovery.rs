//! 错误恢复引擎
//!
//! 根据失败详情与运行配置返回 RecoveryAction，供运行循环决定是重规划、终止还是按预算耗尽收尾。

use crate::config::RunConfig;
use crate::core::{RecoveryAction, StopReason};
use crate::react::FailureDetail;

/// 重规划策略：replanning 开关 + 可选 max_replans 上限
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `replans_so_far` 为本次运行已完成的重规划次数
    pub fn handle(
        &self,
        failure: &FailureDetail,
        config: &RunConfig,
        replans_so_far: u32,
    ) -> RecoveryAction {
        if !config.features.replanning {
            return RecoveryAction::Abort(failure.message.clone());
        }
        if let Some(max_replans) = config.max_replans {
            if replans_so_far >= max_replans {
                return RecoveryAction::Exhausted(StopReason::ReplanBudgetExhausted { max_replans });
            }
        }
        RecoveryAction::Replan
    }
}
