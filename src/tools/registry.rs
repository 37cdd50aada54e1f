//! 工具注册表
//!
//! 按名称（`category.operation`）存储 ToolDescriptor：处理器 + 分类 + 启用标志 + 来源 + 统计。
//! 统计在所有运行之间共享、简单累加；execute 无论成败都记录统计，再把原始错误返回给调用方。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// 平均延迟的指数平滑系数
const LATENCY_SMOOTHING: f64 = 0.2;
/// 成功率相差不超过此值视为持平，按最近使用时间排序
const RATE_TIE_WINDOW: f64 = 0.1;

/// 工具处理器：单一 invoke 方法，参数与结果均为 JSON
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<Value, String>;
}

/// 工具调用错误：未注册 / 已禁用 / 执行失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool disabled: {0}")]
    Disabled(String),

    #[error("Tool {tool} failed: {message}")]
    Failed { tool: String, message: String },
}

/// 注册元数据
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetadata {
    /// 未设置时取名称中 `.` 之前的部分
    pub category: Option<String>,
    pub description: String,
    pub enabled: bool,
    /// 来源（builtin / surface / plugin ...）
    pub source: String,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            category: None,
            description: String::new(),
            enabled: true,
            source: "builtin".to_string(),
        }
    }
}

impl ToolMetadata {
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 工具统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub avg_latency_ms: f64,
}

impl ToolStats {
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// 成功 / 总调用；未使用过为 0
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.success_count as f64 / total as f64,
        }
    }

    fn record(&mut self, ok: bool, latency_ms: f64) {
        if self.total() == 0 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms =
                LATENCY_SMOOTHING * latency_ms + (1.0 - LATENCY_SMOOTHING) * self.avg_latency_ms;
        }
        if ok {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_used = Some(Utc::now());
    }
}

struct ToolDescriptor {
    category: String,
    metadata: ToolMetadata,
    stats: ToolStats,
    handler: Arc<dyn ToolHandler>,
}

/// 对外暴露的工具快照（不含处理器）
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub category: String,
    pub description: String,
    pub enabled: bool,
    pub source: String,
    pub success_rate: f64,
    pub stats: ToolStats,
}

pub fn category_of(name: &str) -> &str {
    name.split_once('.').map(|(c, _)| c).unwrap_or("general")
}

/// 工具注册表：在所有运行之间共享（Arc<ToolRegistry>）
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或替换；替换时保留已有统计
    pub async fn register(&self, name: &str, handler: Arc<dyn ToolHandler>, metadata: ToolMetadata) {
        let category = metadata
            .category
            .clone()
            .unwrap_or_else(|| category_of(name).to_string());
        let mut tools = self.tools.write().await;
        let stats = tools.remove(name).map(|d| d.stats).unwrap_or_default();
        tools.insert(
            name.to_string(),
            ToolDescriptor {
                category,
                metadata,
                stats,
                handler,
            },
        );
        tracing::debug!(tool = name, "tool registered");
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ToolError> {
        let mut tools = self.tools.write().await;
        let descriptor = tools
            .get_mut(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        descriptor.metadata.enabled = enabled;
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// 调用工具：仅已注册且启用的工具会被执行；测量耗时并记录统计，失败原样返回
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let handler = {
            let tools = self.tools.read().await;
            let descriptor = tools
                .get(name)
                .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
            if !descriptor.metadata.enabled {
                return Err(ToolError::Disabled(name.to_string()));
            }
            Arc::clone(&descriptor.handler)
        };

        let start = Instant::now();
        let result = handler.invoke(args).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        if let Some(descriptor) = self.tools.write().await.get_mut(name) {
            descriptor.stats.record(result.is_ok(), latency_ms);
        }

        result.map_err(|message| ToolError::Failed {
            tool: name.to_string(),
            message,
        })
    }

    pub async fn get_success_rate(&self, name: &str) -> f64 {
        self.tools
            .read()
            .await
            .get(name)
            .map(|d| d.stats.success_rate())
            .unwrap_or(0.0)
    }

    pub async fn get_stats(&self, name: &str) -> Option<ToolStats> {
        self.tools.read().await.get(name).map(|d| d.stats.clone())
    }

    /// 推荐工具：启用且成功率 >= 阈值，按成功率降序；
    /// 与组内最高成功率相差不超过 0.1 的工具视为持平，组内按最近使用时间降序。
    pub async fn get_recommended_tools(
        &self,
        category: Option<&str>,
        min_success_rate: f64,
    ) -> Vec<ToolInfo> {
        let mut ranked: Vec<ToolInfo> = self
            .describe()
            .await
            .into_iter()
            .filter(|t| t.enabled)
            .filter(|t| category.map_or(true, |c| t.category == c))
            .filter(|t| t.success_rate >= min_success_rate)
            .collect();
        ranked.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then_with(|| b.stats.last_used.cmp(&a.stats.last_used))
        });

        let mut out = Vec::with_capacity(ranked.len());
        while !ranked.is_empty() {
            let leader = ranked[0].success_rate;
            let end = ranked
                .iter()
                .position(|t| leader - t.success_rate > RATE_TIE_WINDOW + f64::EPSILON)
                .unwrap_or(ranked.len());
            let mut group: Vec<ToolInfo> = ranked.drain(..end).collect();
            group.sort_by(|a, b| b.stats.last_used.cmp(&a.stats.last_used));
            out.extend(group);
        }
        out
    }

    /// 重置超过 `max_age` 未使用的工具统计；返回被重置的数量
    pub async fn cleanup_stale_stats(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut reset = 0;
        for descriptor in self.tools.write().await.values_mut() {
            if matches!(descriptor.stats.last_used, Some(t) if t < cutoff) {
                descriptor.stats = ToolStats::default();
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::info!(reset, "stale tool statistics reset");
        }
        reset
    }

    pub async fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn describe(&self) -> Vec<ToolInfo> {
        let tools = self.tools.read().await;
        let mut infos: Vec<ToolInfo> = tools
            .iter()
            .map(|(name, d)| ToolInfo {
                name: name.clone(),
                category: d.category.clone(),
                description: d.metadata.description.clone(),
                enabled: d.metadata.enabled,
                source: d.metadata.source.clone(),
                success_rate: d.stats.success_rate(),
                stats: d.stats.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
