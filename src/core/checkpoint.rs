//! 检查点管理：对设计文档的嵌套事务（begin / commit / rollback）
//!
//! 每个运行持有自己的 CheckpointManager，不同运行的检查点栈互不影响。
//! - begin：深度 +1，压入快照（文档状态 + 创建时深度）
//! - commit：深度 -1，仅在回到 0 时丢弃全部检查点
//! - rollback：恢复最近一个检查点，清空栈并把深度归零（整棵事务树中止）
//! - 未启用时三者均为空操作并报告成功
//!
//! 快照优先使用执行面的原生状态导出 / 导入，否则拷贝对象列表。

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::tools::{ExecutionSurface, SurfaceError};

pub type TransactionId = String;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("snapshot capture failed: {0}")]
    Capture(#[source] SurfaceError),

    #[error("snapshot restore failed: {0}")]
    Restore(#[source] SurfaceError),
}

#[derive(Debug, Clone)]
enum Snapshot {
    Native(Value),
    Objects(Vec<Value>),
}

#[derive(Debug, Clone)]
struct Checkpoint {
    id: TransactionId,
    depth: u32,
    snapshot: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionStatus {
    pub depth: u32,
    pub checkpoints: usize,
    pub enabled: bool,
}

pub struct CheckpointManager {
    surface: Arc<dyn ExecutionSurface>,
    enabled: bool,
    depth: u32,
    stack: Vec<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(surface: Arc<dyn ExecutionSurface>, enabled: bool) -> Self {
        Self {
            surface,
            enabled,
            depth: 0,
            stack: Vec::new(),
        }
    }

    pub async fn begin_transaction(&mut self) -> Result<TransactionId, CheckpointError> {
        let id = format!("tx_{}", uuid::Uuid::new_v4());
        if !self.enabled {
            return Ok(id);
        }
        let snapshot = self.capture().await.map_err(CheckpointError::Capture)?;
        self.depth += 1;
        self.stack.push(Checkpoint {
            id: id.clone(),
            depth: self.depth,
            snapshot,
        });
        tracing::debug!(tx = %id, depth = self.depth, "begin transaction");
        Ok(id)
    }

    pub fn commit_transaction(&mut self) -> Result<(), CheckpointError> {
        if !self.enabled {
            return Ok(());
        }
        if self.depth == 0 {
            return Err(CheckpointError::NoActiveTransaction);
        }
        self.depth -= 1;
        if self.depth == 0 {
            tracing::debug!(discarded = self.stack.len(), "transaction finalized");
            self.stack.clear();
        }
        Ok(())
    }

    /// 恢复最近的检查点后清空整个栈。恢复失败时栈同样被清空，错误返回给调用方。
    pub async fn rollback_transaction(&mut self) -> Result<(), CheckpointError> {
        if !self.enabled {
            return Ok(());
        }
        let latest = self.stack.pop();
        self.stack.clear();
        self.depth = 0;
        let Some(checkpoint) = latest else {
            return Ok(());
        };
        tracing::info!(tx = %checkpoint.id, depth = checkpoint.depth, "rolling back");
        self.restore(checkpoint.snapshot)
            .await
            .map_err(CheckpointError::Restore)
    }

    pub fn get_transaction_status(&self) -> TransactionStatus {
        TransactionStatus {
            depth: self.depth,
            checkpoints: self.stack.len(),
            enabled: self.enabled,
        }
    }

    async fn capture(&self) -> Result<Snapshot, SurfaceError> {
        if self.surface.supports_native_snapshot() {
            Ok(Snapshot::Native(self.surface.export_state().await?))
        } else {
            Ok(Snapshot::Objects(self.surface.list_objects().await?))
        }
    }

    async fn restore(&self, snapshot: Snapshot) -> Result<(), SurfaceError> {
        match snapshot {
            Snapshot::Native(state) => self.surface.import_state(state).await,
            Snapshot::Objects(objects) => self.surface.restore_objects(objects).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{MemoryDocument, SurfaceResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn manager(doc: &Arc<MemoryDocument>, enabled: bool) -> CheckpointManager {
        CheckpointManager::new(doc.clone(), enabled)
    }

    #[tokio::test]
    async fn test_begin_commit_leaves_state_unchanged() {
        let doc = Arc::new(MemoryDocument::new());
        doc.invoke("geometry.createWall", json!({"length": 4.0})).await;
        let before = doc.objects();

        let mut cp = manager(&doc, true);
        cp.begin_transaction().await.unwrap();
        cp.commit_transaction().unwrap();

        assert_eq!(doc.objects(), before);
        let status = cp.get_transaction_status();
        assert_eq!((status.depth, status.checkpoints), (0, 0));
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let doc = Arc::new(MemoryDocument::new());
        doc.invoke("geometry.createWall", json!({})).await;
        let before = doc.objects();

        let mut cp = manager(&doc, true);
        cp.begin_transaction().await.unwrap();
        doc.invoke("geometry.createRoom", json!({})).await;
        doc.invoke("geometry.createDoor", json!({})).await;
        assert_eq!(doc.len(), 3);

        cp.rollback_transaction().await.unwrap();
        assert_eq!(doc.objects(), before);
        let status = cp.get_transaction_status();
        assert_eq!(status.depth, 0);
        assert_eq!(status.checkpoints, 0);
    }

    #[tokio::test]
    async fn test_nested_finalizes_on_outer_commit() {
        let doc = Arc::new(MemoryDocument::new());
        let mut cp = manager(&doc, true);
        cp.begin_transaction().await.unwrap();
        cp.begin_transaction().await.unwrap();
        assert_eq!(cp.get_transaction_status().checkpoints, 2);

        cp.commit_transaction().unwrap();
        let inner = cp.get_transaction_status();
        assert_eq!((inner.depth, inner.checkpoints), (1, 2));

        cp.commit_transaction().unwrap();
        let outer = cp.get_transaction_status();
        assert_eq!((outer.depth, outer.checkpoints), (0, 0));
    }

    #[tokio::test]
    async fn test_nested_rollback_aborts_whole_tree() {
        let doc = Arc::new(MemoryDocument::new());
        let mut cp = manager(&doc, true);
        cp.begin_transaction().await.unwrap();
        doc.invoke("geometry.createWall", json!({})).await;
        cp.begin_transaction().await.unwrap();
        doc.invoke("geometry.createSlab", json!({})).await;

        cp.rollback_transaction().await.unwrap();
        // 恢复到最近（内层）检查点：外层事务内创建的墙保留
        assert_eq!(doc.len(), 1);
        assert_eq!(cp.get_transaction_status().depth, 0);
    }

    #[tokio::test]
    async fn test_commit_without_begin() {
        let doc = Arc::new(MemoryDocument::new());
        let mut cp = manager(&doc, true);
        assert!(matches!(
            cp.commit_transaction(),
            Err(CheckpointError::NoActiveTransaction)
        ));
        // 空栈回滚为空操作
        cp.rollback_transaction().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let doc = Arc::new(MemoryDocument::new());
        let mut cp = manager(&doc, false);
        cp.begin_transaction().await.unwrap();
        doc.invoke("geometry.createWall", json!({})).await;
        cp.rollback_transaction().await.unwrap();
        cp.commit_transaction().unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(
            cp.get_transaction_status(),
            TransactionStatus {
                depth: 0,
                checkpoints: 0,
                enabled: false
            }
        );
    }

    /// 仅支持原生导出 / 导入的执行面
    struct NativeSurface {
        state: Mutex<Value>,
    }

    #[async_trait]
    impl ExecutionSurface for NativeSurface {
        fn operations(&self) -> Vec<String> {
            vec![]
        }

        async fn invoke(&self, _name: &str, _args: Value) -> SurfaceResult {
            SurfaceResult::failure("E_UNKNOWN_TOOL", "none", None)
        }

        async fn list_objects(&self) -> Result<Vec<Value>, SurfaceError> {
            Err(SurfaceError::Unsupported("list_objects"))
        }

        async fn restore_objects(&self, _objects: Vec<Value>) -> Result<(), SurfaceError> {
            Err(SurfaceError::Unsupported("restore_objects"))
        }

        fn supports_native_snapshot(&self) -> bool {
            true
        }

        async fn export_state(&self) -> Result<Value, SurfaceError> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn import_state(&self, state: Value) -> Result<(), SurfaceError> {
            *self.state.lock().unwrap() = state;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_native_snapshot_path() {
        let surface = Arc::new(NativeSurface {
            state: Mutex::new(json!({"rev": 1})),
        });
        let mut cp = CheckpointManager::new(surface.clone(), true);
        cp.begin_transaction().await.unwrap();
        *surface.state.lock().unwrap() = json!({"rev": 2});
        cp.rollback_transaction().await.unwrap();
        assert_eq!(*surface.state.lock().unwrap(), json!({"rev": 1}));
    }
}
