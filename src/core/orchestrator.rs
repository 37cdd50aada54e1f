//! 编排器：运行的入口
//!
//! 负责：解析运行配置（拒绝非法配置）、用量预检、登记活跃运行，然后驱动 RunLoop。
//! 多个运行可并发；每个运行拥有独立的计划、检查点栈与取消令牌，工具统计跨运行共享。

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigOverrides, ConfigResolver, RunConfig};
use crate::core::run_registry::ActiveRun;
use crate::core::usage::UsageLimiter;
use crate::core::{new_run_id, EngineError, Run, RunId, RunReport};
use crate::react::{LoopDeps, RunLoop};
use crate::tools::ToolRegistry;

/// 一次运行请求
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub goal: String,
    pub user_id: String,
    pub context: Value,
    pub overrides: ConfigOverrides,
}

impl RunRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            user_id: "local".to_string(),
            context: Value::Object(Default::default()),
            overrides: ConfigOverrides::default(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

pub struct Orchestrator {
    deps: LoopDeps,
    resolver: Arc<ConfigResolver>,
    limiter: Arc<dyn UsageLimiter>,
}

impl Orchestrator {
    pub fn new(deps: LoopDeps, resolver: Arc<ConfigResolver>, limiter: Arc<dyn UsageLimiter>) -> Self {
        Self {
            deps,
            resolver,
            limiter,
        }
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.deps.executor.registry()
    }

    /// 持久化新的默认覆盖；已开始的运行不受影响
    pub fn update_defaults(&self, overrides: &ConfigOverrides) -> Result<Arc<RunConfig>, EngineError> {
        let effective = self.resolver.update_defaults(overrides)?;
        tracing::info!(max_steps = effective.max_steps, "run defaults updated");
        Ok(effective)
    }

    pub fn reset_to_defaults(&self) -> Result<(), EngineError> {
        self.resolver.reset_to_defaults()?;
        Ok(())
    }

    /// 配置解析 + 用量预检 + 登记。失败时运行不会开始，也不会登记。
    async fn prepare(&self, request: RunRequest) -> Result<(Run, CancellationToken), EngineError> {
        let config = self.resolver.with_overrides(&request.overrides)?;
        self.limiter
            .check(&request.user_id, config.max_steps)
            .await
            .map_err(EngineError::UsageLimited)?;

        let id = new_run_id();
        let token = self
            .deps
            .runs
            .register(&id, &request.goal, &request.user_id)
            .await;
        tracing::info!(run_id = %id, user = %request.user_id, "run accepted");
        let run = Run::new(id, request.goal, request.user_id, request.context, config);
        Ok((run, token))
    }

    /// 执行一次运行直到终态。Err 仅表示运行未能开始（配置非法或被用量限制拒绝）。
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, EngineError> {
        let (run, token) = self.prepare(request).await?;
        Ok(RunLoop::new(self.deps.clone(), run, token).run().await)
    }

    /// 在后台任务中执行；返回 run_id 以便取消
    pub async fn spawn(
        &self,
        request: RunRequest,
    ) -> Result<(RunId, JoinHandle<RunReport>), EngineError> {
        let (run, token) = self.prepare(request).await?;
        let id = run.id.clone();
        let run_loop = RunLoop::new(self.deps.clone(), run, token);
        Ok((id, tokio::spawn(run_loop.run())))
    }

    /// 请求停止运行：回滚、发出 cancelled 终态事件并移除登记由运行循环完成
    pub async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        if self.deps.runs.cancel(run_id).await {
            tracing::info!(run_id, "cancel requested");
            Ok(())
        } else {
            Err(EngineError::RunNotFound(run_id.to_string()))
        }
    }

    pub async fn active_runs(&self) -> Vec<ActiveRun> {
        self.deps.runs.list().await
    }

    /// 停止全部运行（进程退出时）
    pub fn shutdown(&self) {
        self.deps.runs.cancel_all();
    }
}
