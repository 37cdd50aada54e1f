//! 核心编排层：计划与运行状态、检查点事务、恢复策略、活跃运行登记、运行历史、编排器

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod plan;
pub mod recovery;
pub mod run_registry;
pub mod state;
pub mod usage;

pub use builder::{build_from_config, surface_from_config, OrchestratorBuilder};
pub use checkpoint::{CheckpointError, CheckpointManager, TransactionId, TransactionStatus};
pub use error::{EngineError, RecoveryAction};
pub use history::{HistoryEntry, HistoryError, RunHistory};
pub use orchestrator::{Orchestrator, RunRequest};
pub use plan::{Action, Plan, Step, StepStatus};
pub use recovery::RecoveryEngine;
pub use run_registry::{ActiveRun, RunRegistry};
pub use state::{new_run_id, Run, RunId, RunReport, RunStatus, StopReason};
pub use usage::{StepQuotaLimiter, Unlimited, UsageLimiter};
