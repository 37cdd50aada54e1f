//! 运行主循环：显式阶段状态机
//!
//! Planning → Selecting → (AwaitingApproval) → Acting → Observing → (Critiquing)
//! → Advancing | Replanning → … → Done(StopReason)
//!
//! - 单个运行内严格串行；挂起点只有 Planner / 工具调用与审批等待，三处都与取消令牌 select
//! - 步数与时间预算在每个步骤边界（Selecting）检查，单次慢调用可超出预算，下一轮即停止
//! - 每次尝试（包括失败后重规划的尝试）都消耗一个步数单位
//! - 结束时：completed / exhausted 提交外层事务，error / cancelled 回滚

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::checkpoint::CheckpointManager;
use crate::core::history::{HistoryEntry, RunHistory};
use crate::core::{Action, Plan, RecoveryAction, RecoveryEngine, Run, RunRegistry, RunReport, RunStatus, StopReason};
use crate::observability::redact_sensitive;
use crate::react::reporter::requires_approval;
use crate::react::{
    events, ApprovalDecision, ApprovalRequest, Critic, CriticInput, FailureDetail, FailureKind,
    PhaseKind, Planner, ProgressReporter, RunEvent,
};
use crate::tools::{category_of, ActionOutcome, ExecutionSurface, ToolError, ToolExecutor};

/// 重规划时推荐工具的最低成功率
const RECOMMEND_MIN_SUCCESS_RATE: f64 = 0.5;

/// 运行循环依赖的协作方（跨运行共享）
#[derive(Clone)]
pub struct LoopDeps {
    pub planner: Arc<dyn Planner>,
    pub executor: ToolExecutor,
    pub critic: Arc<Critic>,
    pub surface: Arc<dyn ExecutionSurface>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub history: Option<Arc<RunHistory>>,
    pub runs: Arc<RunRegistry>,
}

/// 循环阶段
#[derive(Debug)]
enum Phase {
    Planning,
    Selecting,
    AwaitingApproval(Action),
    Acting(Action),
    Observing(Action, ActionOutcome),
    Critiquing(Action, ActionOutcome),
    Advancing(Action, ActionOutcome),
    Replanning(Action, FailureDetail),
    Done(StopReason),
}

pub struct RunLoop {
    deps: LoopDeps,
    run: Run,
    checkpoints: CheckpointManager,
    recovery: RecoveryEngine,
    cancel: CancellationToken,
}

impl RunLoop {
    pub fn new(deps: LoopDeps, run: Run, cancel: CancellationToken) -> Self {
        let checkpoints = CheckpointManager::new(deps.surface.clone(), run.config.features.checkpoints);
        Self {
            deps,
            run,
            checkpoints,
            recovery: RecoveryEngine::new(),
            cancel,
        }
    }

    fn emit(&self, event: RunEvent) {
        self.deps.reporter.emit(&self.run.id, event);
    }

    fn emit_phase(&self, phase: PhaseKind) {
        self.emit(RunEvent::Phase {
            phase,
            step: self.run.step,
        });
    }

    async fn set_status(&mut self, status: RunStatus) {
        self.run.status = status;
        self.deps.runs.update(&self.run.id, status, self.run.step).await;
    }

    /// 驱动状态机直到终态；总是返回报告（错误也体现在报告中）
    pub async fn run(mut self) -> RunReport {
        self.emit(RunEvent::RunStarted {
            goal: self.run.goal.clone(),
            max_steps: self.run.config.max_steps,
            max_duration_ms: self.run.config.max_duration_ms,
        });

        let mut phase = Phase::Planning;
        let reason = loop {
            if self.cancel.is_cancelled() && !matches!(phase, Phase::Done(_)) {
                phase = Phase::Done(StopReason::Cancelled);
            }
            phase = match phase {
                Phase::Planning => self.plan().await,
                Phase::Selecting => self.select(),
                Phase::AwaitingApproval(action) => self.await_approval(action).await,
                Phase::Acting(action) => self.act(action).await,
                Phase::Observing(action, outcome) => self.observe(action, outcome),
                Phase::Critiquing(action, outcome) => self.critique(action, outcome),
                Phase::Advancing(action, outcome) => self.advance(action, outcome),
                Phase::Replanning(action, failure) => self.replan(action, failure).await,
                Phase::Done(reason) => break reason,
            };
        };

        self.finish(reason).await
    }

    async fn plan(&mut self) -> Phase {
        self.emit_phase(PhaseKind::Planning);
        if let Err(e) = self.checkpoints.begin_transaction().await {
            return Phase::Done(StopReason::Failed {
                message: e.to_string(),
            });
        }

        let planner = self.deps.planner.clone();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Phase::Done(StopReason::Cancelled),
            r = planner.generate_plan(&self.run.goal, &self.run.context) => r,
        };
        match result {
            Ok(plan) => {
                tracing::info!(run_id = %self.run.id, steps = plan.steps.len(), "plan produced");
                self.emit(RunEvent::PlanProduced {
                    plan: redacted_plan(&plan),
                });
                self.run.plan = Some(plan);
                self.set_status(RunStatus::Executing).await;
                Phase::Selecting
            }
            Err(e) => Phase::Done(StopReason::Failed {
                message: e.to_string(),
            }),
        }
    }

    fn select(&mut self) -> Phase {
        let next = self
            .run
            .plan
            .as_ref()
            .and_then(|p| p.next_pending())
            .map(Action::from_step);
        let Some(action) = next else {
            return Phase::Done(StopReason::PlanComplete);
        };

        let config = self.run.config.clone();
        if self.run.step >= config.max_steps {
            return Phase::Done(StopReason::StepBudgetExhausted {
                max_steps: config.max_steps,
            });
        }
        if self.run.elapsed_ms() >= config.max_duration_ms {
            return Phase::Done(StopReason::TimeBudgetExhausted {
                max_duration_ms: config.max_duration_ms,
            });
        }

        if config.is_tool_allowed(&action.tool) && requires_approval(config.approval_mode, &action.tool) {
            Phase::AwaitingApproval(action)
        } else {
            Phase::Acting(action)
        }
    }

    async fn await_approval(&mut self, action: Action) -> Phase {
        self.set_status(RunStatus::AwaitingApproval).await;
        let request = ApprovalRequest {
            approval_id: format!("ap_{}", uuid::Uuid::new_v4()),
            step_id: action.step_id.clone(),
            tool: action.tool.clone(),
            args: redact_sensitive(&action.args),
        };
        self.emit(RunEvent::ApprovalRequested {
            approval_id: request.approval_id.clone(),
            tool: request.tool.clone(),
            args: request.args.clone(),
        });

        let reporter = self.deps.reporter.clone();
        let decision = tokio::select! {
            _ = self.cancel.cancelled() => return Phase::Done(StopReason::Cancelled),
            d = reporter.request_approval(&self.run.id, request) => d,
        };
        self.set_status(RunStatus::Executing).await;
        match decision {
            ApprovalDecision::Approved => Phase::Acting(action),
            ApprovalDecision::Rejected => {
                tracing::info!(run_id = %self.run.id, tool = %action.tool, "approval rejected");
                Phase::Done(StopReason::ApprovalRejected { tool: action.tool })
            }
        }
    }

    async fn act(&mut self, action: Action) -> Phase {
        self.run.step += 1;
        self.deps
            .runs
            .update(&self.run.id, self.run.status, self.run.step)
            .await;
        self.emit_phase(PhaseKind::Act);
        self.emit(RunEvent::ToolCall {
            tool: action.tool.clone(),
            step_id: action.step_id.clone(),
            args: redact_sensitive(&action.args),
        });

        if !self.run.config.is_tool_allowed(&action.tool) {
            let outcome = ActionOutcome {
                result: Err(ToolError::Failed {
                    tool: action.tool.clone(),
                    message: "tool is not in the allowed tools list".into(),
                }),
                duration_ms: 0,
            };
            return Phase::Observing(action, outcome);
        }

        let executor = self.deps.executor.clone();
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return Phase::Done(StopReason::Cancelled),
            o = executor.execute(&action) => o,
        };
        Phase::Observing(action, outcome)
    }

    fn observe(&mut self, action: Action, outcome: ActionOutcome) -> Phase {
        self.emit_phase(PhaseKind::Observe);
        let text = match &outcome.result {
            Ok(value) => value.to_string(),
            Err(e) => e.to_string(),
        };
        self.emit(RunEvent::Observation {
            tool: action.tool.clone(),
            ok: outcome.is_ok(),
            preview: events::preview(&text),
            duration_ms: outcome.duration_ms,
        });

        if self.run.config.features.critic {
            return Phase::Critiquing(action, outcome);
        }
        match outcome.error_message() {
            None => Phase::Advancing(action, outcome),
            Some(message) => Phase::Replanning(
                action,
                FailureDetail {
                    kind: FailureKind::Tool,
                    message,
                    category: None,
                    recommended_tools: Vec::new(),
                },
            ),
        }
    }

    fn critique(&mut self, action: Action, outcome: ActionOutcome) -> Phase {
        self.emit_phase(PhaseKind::Critic);
        let verdict = self.deps.critic.check(&CriticInput {
            goal: &self.run.goal,
            action: &action,
            result: &outcome.result,
            context: &self.run.context,
        });
        self.emit(RunEvent::Critique {
            tool: verdict.tool.clone(),
            ok: verdict.ok,
            category: verdict.category,
            reason: verdict.reason.clone(),
        });
        if verdict.ok {
            return Phase::Advancing(action, outcome);
        }
        let kind = if outcome.is_ok() {
            FailureKind::Critic
        } else {
            FailureKind::Tool
        };
        Phase::Replanning(
            action,
            FailureDetail {
                kind,
                message: verdict.reason.unwrap_or_else(|| "rejected by critic".into()),
                category: verdict.category,
                recommended_tools: Vec::new(),
            },
        )
    }

    fn advance(&mut self, action: Action, outcome: ActionOutcome) -> Phase {
        self.emit_phase(PhaseKind::Reflect);
        let summary = match &outcome.result {
            Ok(value) => events::preview(&value.to_string()),
            Err(e) => e.to_string(),
        };
        if let Some(plan) = self.run.plan.as_mut() {
            if let Some(step) = plan.step_mut(&action.step_id) {
                step.complete(summary);
            }
            plan.refresh_completion();
        }
        Phase::Selecting
    }

    async fn replan(&mut self, action: Action, mut failure: FailureDetail) -> Phase {
        tracing::info!(
            run_id = %self.run.id,
            tool = %action.tool,
            kind = ?failure.kind,
            "step failed: {}",
            failure.message
        );
        match self.recovery.handle(&failure, &self.run.config, self.run.replans) {
            RecoveryAction::Replan => {}
            RecoveryAction::Abort(message) => return Phase::Done(StopReason::Failed { message }),
            RecoveryAction::Exhausted(reason) => return Phase::Done(reason),
        }

        self.emit_phase(PhaseKind::Replan);
        failure.recommended_tools = self
            .deps
            .executor
            .registry()
            .get_recommended_tools(Some(category_of(&action.tool)), RECOMMEND_MIN_SUCCESS_RATE)
            .await
            .into_iter()
            .map(|t| t.name)
            .filter(|name| self.run.config.is_tool_allowed(name))
            .collect();

        let Some(original) = self.run.plan.clone() else {
            return Phase::Done(StopReason::Failed {
                message: "no plan to revise".into(),
            });
        };
        let planner = self.deps.planner.clone();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Phase::Done(StopReason::Cancelled),
            r = planner.replan(&self.run.goal, &self.run.context, &original, &action, &failure) => r,
        };
        match result {
            Ok(mut plan) => {
                plan.carry_forward(&original);
                self.run.replans += 1;
                plan.replan_count = self.run.replans;
                self.emit(RunEvent::Replanned {
                    failure,
                    replans: self.run.replans,
                    steps: plan.steps.len(),
                });
                self.emit(RunEvent::PlanProduced {
                    plan: redacted_plan(&plan),
                });
                self.run.plan = Some(plan);
                Phase::Selecting
            }
            Err(e) => Phase::Done(StopReason::Failed {
                message: format!("replanning failed: {e}"),
            }),
        }
    }

    async fn finish(mut self, reason: StopReason) -> RunReport {
        let status = reason.status();
        if reason.keeps_changes() {
            if self.checkpoints.get_transaction_status().depth > 0 {
                if let Err(e) = self.checkpoints.commit_transaction() {
                    tracing::warn!(run_id = %self.run.id, "commit failed: {}", e);
                }
            }
        } else if let Err(e) = self.checkpoints.rollback_transaction().await {
            tracing::warn!(run_id = %self.run.id, "rollback failed: {}", e);
        }
        self.run.status = status;

        let report = RunReport {
            run_id: self.run.id.clone(),
            goal: self.run.goal.clone(),
            status,
            reason: reason.clone(),
            steps: self.run.step,
            replans: self.run.replans,
            duration_ms: self.run.elapsed_ms(),
            plan: self.run.plan.clone(),
        };

        if status == RunStatus::Error {
            let message = match &reason {
                StopReason::Failed { message } => message.clone(),
                StopReason::ApprovalRejected { tool } => format!("approval rejected for {tool}"),
                other => format!("run stopped: {other:?}"),
            };
            self.emit(RunEvent::RunError { message });
        }
        self.emit(RunEvent::RunDone {
            status,
            reason,
            steps: report.steps,
            replans: report.replans,
            duration_ms: report.duration_ms,
        });
        tracing::info!(
            run_id = %self.run.id,
            status = ?status,
            steps = report.steps,
            replans = report.replans,
            duration_ms = report.duration_ms,
            "run finished"
        );

        if self.run.config.features.record_history {
            self.record_history(&report);
        }
        self.deps.runs.remove(&self.run.id).await;
        report
    }

    fn record_history(&self, report: &RunReport) {
        let Some(history) = &self.deps.history else {
            return;
        };
        let entry = HistoryEntry {
            run_id: report.run_id.clone(),
            goal: report.goal.clone(),
            user_id: self.run.user_id.clone(),
            config: (*self.run.config).clone(),
            report: report.clone(),
            completed_at: chrono::Utc::now(),
        };
        let retention = &self.run.config.history;
        let result = history
            .record(&entry)
            .and_then(|_| history.trim_to(retention.max_runs))
            .and_then(|_| history.prune_older_than(chrono::Duration::days(retention.max_age_days as i64)));
        if let Err(e) = result {
            tracing::warn!(run_id = %self.run.id, "failed to record run history: {}", e);
        }
    }
}

/// 进度流中的计划副本：步骤参数已脱敏
fn redacted_plan(plan: &Plan) -> Plan {
    let mut plan = plan.clone();
    for step in &mut plan.steps {
        step.args = redact_sensitive(&step.args);
    }
    plan
}
