//! 执行层：Planner、Critic、阶段式运行循环、进度事件与审批

pub mod critic;
pub mod events;
pub mod loop_;
pub mod planner;
pub mod reporter;

pub use critic::{ConstraintCategory, Critic, CriticInput, Verdict};
pub use events::{PhaseKind, RunEvent};
pub use loop_::{LoopDeps, RunLoop};
pub use planner::{
    is_actionable, parse_plan, FailureDetail, FailureKind, KeywordPlanner, Planner, PlannerError,
};
pub use reporter::{
    ApprovalDecision, ApprovalRequest, ChannelReporter, ProgressReporter, TracingReporter,
};
