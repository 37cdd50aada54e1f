//! 进度上报与审批
//!
//! ProgressReporter 接收运行事件，并在需要审批时挂起直到得到决定。
//! - ChannelReporter：事件经 mpsc 发出，审批经按 approval_id 登记的 oneshot 回传
//! - TracingReporter：事件写入日志；无人值守时可配置自动批准

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::ApprovalMode;
use crate::core::RunId;
use crate::react::RunEvent;

fn destructive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^|\.)(delete|remove|clear|reset|purge|destroy)")
            .expect("valid destructive regex")
    })
}

/// 工具名是否属于破坏性操作（如 geometry.delete、selection.clear）
pub fn is_destructive(tool: &str) -> bool {
    destructive_regex().is_match(tool)
}

pub fn requires_approval(mode: ApprovalMode, tool: &str) -> bool {
    match mode {
        ApprovalMode::Always => true,
        ApprovalMode::Never => false,
        ApprovalMode::Destructive => is_destructive(tool),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub step_id: String,
    pub tool: String,
    /// 已脱敏
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    fn emit(&self, run_id: &str, event: RunEvent);

    /// 挂起直到审批有结果
    async fn request_approval(&self, run_id: &str, request: ApprovalRequest) -> ApprovalDecision;
}

type PendingApprovals = Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>;

/// 基于通道的上报器：事件流 + 外部 resolve 审批
pub struct ChannelReporter {
    events_tx: mpsc::UnboundedSender<(RunId, RunEvent)>,
    pending: PendingApprovals,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(RunId, RunEvent)>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                events_tx,
                pending: Mutex::new(HashMap::new()),
            },
            events_rx,
        )
    }

    /// 回传审批结果；approval_id 未知（已处理或已取消）时返回 false
    pub fn resolve(&self, approval_id: &str, decision: ApprovalDecision) -> bool {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(approval_id);
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn pending_approvals(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// 等待被取消（future 被丢弃）时移除登记
struct PendingGuard<'a> {
    pending: &'a PendingApprovals,
    approval_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.approval_id);
    }
}

#[async_trait]
impl ProgressReporter for ChannelReporter {
    fn emit(&self, run_id: &str, event: RunEvent) {
        let _ = self.events_tx.send((run_id.to_string(), event));
    }

    async fn request_approval(&self, _run_id: &str, request: ApprovalRequest) -> ApprovalDecision {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.approval_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            approval_id: request.approval_id,
        };
        // 发送端被丢弃视为拒绝
        rx.await.unwrap_or(ApprovalDecision::Rejected)
    }
}

/// 日志上报器：每个事件一行 JSON
#[derive(Debug, Default)]
pub struct TracingReporter {
    auto_approve: bool,
}

impl TracingReporter {
    pub fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }
}

#[async_trait]
impl ProgressReporter for TracingReporter {
    fn emit(&self, run_id: &str, event: RunEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(run_id, event = %json, "progress"),
            Err(e) => tracing::warn!(run_id, "failed to serialize event: {}", e),
        }
    }

    async fn request_approval(&self, run_id: &str, request: ApprovalRequest) -> ApprovalDecision {
        if self.auto_approve {
            tracing::info!(run_id, tool = %request.tool, "auto-approved");
            ApprovalDecision::Approved
        } else {
            tracing::warn!(run_id, tool = %request.tool, "no approver available, rejecting");
            ApprovalDecision::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            approval_id: id.into(),
            step_id: "step-1".into(),
            tool: "geometry.delete".into(),
            args: json!({"id": "wall_1"}),
        }
    }

    #[test]
    fn test_destructive_names() {
        for tool in ["geometry.delete", "selection.clear", "layers.removeAll", "reset", "scene.PURGE"] {
            assert!(is_destructive(tool), "{tool}");
        }
        for tool in ["geometry.createWall", "transform.move", "door.place", "geometry.undeleted"] {
            assert!(!is_destructive(tool), "{tool}");
        }
    }

    #[test]
    fn test_requires_approval_by_mode() {
        assert!(requires_approval(ApprovalMode::Always, "geometry.createWall"));
        assert!(!requires_approval(ApprovalMode::Never, "geometry.delete"));
        assert!(requires_approval(ApprovalMode::Destructive, "geometry.delete"));
        assert!(!requires_approval(ApprovalMode::Destructive, "geometry.createWall"));
    }

    #[tokio::test]
    async fn test_channel_reporter_resolve() {
        let (reporter, mut rx) = ChannelReporter::new();
        let reporter = Arc::new(reporter);

        reporter.emit("run_1", RunEvent::RunError { message: "x".into() });
        let (run_id, _) = rx.recv().await.unwrap();
        assert_eq!(run_id, "run_1");

        let waiter = {
            let reporter = reporter.clone();
            tokio::spawn(async move { reporter.request_approval("run_1", request("ap_1")).await })
        };
        while reporter.pending_approvals().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(reporter.resolve("ap_1", ApprovalDecision::Approved));
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
        assert!(!reporter.resolve("ap_1", ApprovalDecision::Approved));
    }

    #[tokio::test]
    async fn test_dropped_wait_clears_pending() {
        let (reporter, _rx) = ChannelReporter::new();
        {
            let fut = reporter.request_approval("run_1", request("ap_2"));
            // 未完成即丢弃
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), fut).await;
        }
        assert!(reporter.pending_approvals().is_empty());
    }

    #[tokio::test]
    async fn test_tracing_reporter_auto_approve() {
        assert_eq!(
            TracingReporter::new(true).request_approval("r", request("a")).await,
            ApprovalDecision::Approved
        );
        assert_eq!(
            TracingReporter::new(false).request_approval("r", request("a")).await,
            ApprovalDecision::Rejected
        );
    }
}
