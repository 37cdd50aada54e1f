//! 活跃运行登记表：按 run_id 跟踪并发运行，持有每个运行的取消令牌
//!
//! 每个运行的令牌都是根令牌的子令牌：`cancel(run_id)` 只停止单个运行，`cancel_all` 用于进程退出。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::{RunId, RunStatus};

/// 活跃运行的可观测快照
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub id: RunId,
    pub goal: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub step: u32,
    #[serde(skip)]
    cancel_token: CancellationToken,
}

impl ActiveRun {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[derive(Debug)]
pub struct RunRegistry {
    root: CancellationToken,
    runs: RwLock<HashMap<RunId, ActiveRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// 登记运行并返回它的取消令牌
    pub async fn register(&self, id: &str, goal: &str, user_id: &str) -> CancellationToken {
        let token = self.root.child_token();
        let run = ActiveRun {
            id: id.to_string(),
            goal: goal.to_string(),
            user_id: user_id.to_string(),
            started_at: Utc::now(),
            status: RunStatus::Planning,
            step: 0,
            cancel_token: token.clone(),
        };
        self.runs.write().await.insert(id.to_string(), run);
        token
    }

    pub async fn update(&self, id: &str, status: RunStatus, step: u32) {
        if let Some(run) = self.runs.write().await.get_mut(id) {
            run.status = status;
            run.step = step;
        }
    }

    /// 请求停止运行；运行循环负责回滚并移除登记。未知 id 返回 false。
    pub async fn cancel(&self, id: &str) -> bool {
        match self.runs.read().await.get(id) {
            Some(run) => {
                run.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub async fn remove(&self, id: &str) -> Option<ActiveRun> {
        self.runs.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<ActiveRun> {
        self.runs.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<ActiveRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}
