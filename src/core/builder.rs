//! 编排器构建器：统一的初始化逻辑
//!
//! CLI 与测试共用同一套组装：执行面的全部操作注册为工具，配置解析器监听设置变更。

use std::sync::Arc;

use crate::config::{AppConfig, ConfigResolver, InMemorySettingsStore, SettingsStore, TomlSettingsStore};
use crate::core::history::RunHistory;
use crate::core::usage::{Unlimited, UsageLimiter};
use crate::core::{EngineError, Orchestrator, RunRegistry};
use crate::react::{Critic, KeywordPlanner, LoopDeps, Planner, ProgressReporter, TracingReporter};
use crate::tools::{
    register_surface_tools, ExecutionSurface, HttpSurface, MemoryDocument, ToolExecutor, ToolRegistry,
    STANDARD_OPERATIONS,
};

pub struct OrchestratorBuilder {
    surface: Arc<dyn ExecutionSurface>,
    surface_source: String,
    registry: Arc<ToolRegistry>,
    planner: Arc<dyn Planner>,
    reporter: Arc<dyn ProgressReporter>,
    limiter: Arc<dyn UsageLimiter>,
    settings: Arc<dyn SettingsStore>,
    history: Option<Arc<RunHistory>>,
    critic: Critic,
}

impl OrchestratorBuilder {
    /// 默认：KeywordPlanner、日志上报（不自动批准）、不限用量、内存设置、不记录历史
    pub fn new(surface: Arc<dyn ExecutionSurface>) -> Self {
        Self {
            surface,
            surface_source: "surface".to_string(),
            registry: Arc::new(ToolRegistry::new()),
            planner: Arc::new(KeywordPlanner::new()),
            reporter: Arc::new(TracingReporter::new(false)),
            limiter: Arc::new(Unlimited),
            settings: Arc::new(InMemorySettingsStore::default()),
            history: None,
            critic: Critic::new(),
        }
    }

    pub fn with_surface_source(mut self, source: impl Into<String>) -> Self {
        self.surface_source = source.into();
        self
    }

    /// 共享已有注册表（可预先注册执行面以外的工具）
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn UsageLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_history(mut self, history: Arc<RunHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_critic(mut self, critic: Critic) -> Self {
        self.critic = critic;
        self
    }

    /// 注册执行面工具并启动设置监听；需在 tokio 运行时内调用
    pub async fn build(self) -> Orchestrator {
        let registered =
            register_surface_tools(&self.registry, self.surface.clone(), &self.surface_source).await;
        tracing::info!(tools = registered, source = %self.surface_source, "surface tools registered");

        let resolver = Arc::new(ConfigResolver::new(self.settings));
        resolver.watch_settings();

        let deps = LoopDeps {
            planner: self.planner,
            executor: ToolExecutor::new(self.registry),
            critic: Arc::new(self.critic),
            surface: self.surface,
            reporter: self.reporter,
            history: self.history,
            runs: Arc::new(RunRegistry::new()),
        };
        Orchestrator::new(deps, resolver, self.limiter)
    }
}

/// 按 AppConfig 选择执行面：配置了 base_url 用 HTTP，否则用内存文档
pub fn surface_from_config(cfg: &AppConfig) -> Result<(Arc<dyn ExecutionSurface>, &'static str), EngineError> {
    match &cfg.surface.base_url {
        Some(base_url) => {
            let token = std::env::var(&cfg.surface.token_env).unwrap_or_else(|_| {
                tracing::warn!("{} not set, using empty surface token", cfg.surface.token_env);
                String::new()
            });
            let operations = STANDARD_OPERATIONS.iter().map(|s| s.to_string()).collect();
            let surface = HttpSurface::new(base_url, token, operations, cfg.surface.timeout_secs)?;
            tracing::info!("Using HTTP surface at {}", base_url);
            Ok((Arc::new(surface), "http"))
        }
        None => {
            tracing::info!("No surface base_url configured, using in-memory document");
            Ok((Arc::new(MemoryDocument::new()), "memory"))
        }
    }
}

/// 便捷函数：从 AppConfig 组装完整编排器（TOML 设置、SQLite 历史、日志上报）
pub async fn build_from_config(cfg: &AppConfig) -> Result<Orchestrator, EngineError> {
    let (surface, source) = surface_from_config(cfg)?;
    let history = RunHistory::open(cfg.history_path())?;
    Ok(OrchestratorBuilder::new(surface)
        .with_surface_source(source)
        .with_settings_store(Arc::new(TomlSettingsStore::new(cfg.settings_path())))
        .with_history(Arc::new(history))
        .with_reporter(Arc::new(TracingReporter::new(cfg.reporter.auto_approve)))
        .build()
        .await)
}
