//! 执行面：设计文档一侧暴露的具名操作 + 对象列表读写（用于快照 / 恢复）
//!
//! 操作返回 `{ ok, error?, ...fields }`；SurfaceTool 把单个操作包装为 ToolHandler 注册进 ToolRegistry。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tools::{ToolHandler, ToolMetadata, ToolRegistry};

/// 执行面错误（快照 / 恢复 / 传输）
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("operation not supported by surface: {0}")]
    Unsupported(&'static str),

    #[error("surface http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("surface returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// 操作结果：`ok` 为 false 时 `error` 给出原因（字符串或 {code, title, hint} 对象）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SurfaceResult {
    pub fn success(fields: Map<String, Value>) -> Self {
        Self {
            ok: true,
            error: None,
            fields,
        }
    }

    pub fn failure(code: &str, title: impl Into<String>, hint: Option<String>) -> Self {
        let mut error = serde_json::json!({ "code": code, "title": title.into() });
        if let Some(hint) = hint {
            error["hint"] = Value::String(hint);
        }
        Self {
            ok: false,
            error: Some(error),
            fields: Map::new(),
        }
    }

    /// 可读的错误描述：`CODE: title (hint)`
    pub fn error_message(&self) -> String {
        match &self.error {
            None => "operation reported failure".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(obj)) => {
                let code = obj.get("code").and_then(Value::as_str).unwrap_or("E_TOOL");
                let title = obj
                    .get("title")
                    .or_else(|| obj.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("operation failed");
                match obj.get("hint").and_then(Value::as_str) {
                    Some(hint) if !hint.is_empty() => format!("{code}: {title} ({hint})"),
                    _ => format!("{code}: {title}"),
                }
            }
            Some(other) => other.to_string(),
        }
    }

    pub fn into_tool_result(self) -> Result<Value, String> {
        if self.ok {
            Ok(Value::Object(self.fields))
        } else {
            Err(self.error_message())
        }
    }
}

/// 设计文档执行面
#[async_trait]
pub trait ExecutionSurface: Send + Sync {
    /// 可调用的操作名（`category.operation`）
    fn operations(&self) -> Vec<String>;

    async fn invoke(&self, name: &str, args: Value) -> SurfaceResult;

    /// 当前文档对象列表
    async fn list_objects(&self) -> Result<Vec<Value>, SurfaceError>;

    /// 以给定对象列表整体替换文档对象
    async fn restore_objects(&self, objects: Vec<Value>) -> Result<(), SurfaceError>;

    /// 是否提供原生状态导出 / 导入；否则快照退化为对象列表拷贝
    fn supports_native_snapshot(&self) -> bool {
        false
    }

    async fn export_state(&self) -> Result<Value, SurfaceError> {
        Err(SurfaceError::Unsupported("export_state"))
    }

    async fn import_state(&self, _state: Value) -> Result<(), SurfaceError> {
        Err(SurfaceError::Unsupported("import_state"))
    }
}

/// 将执行面的单个操作包装为工具
pub struct SurfaceTool {
    surface: Arc<dyn ExecutionSurface>,
    operation: String,
}

impl SurfaceTool {
    pub fn new(surface: Arc<dyn ExecutionSurface>, operation: impl Into<String>) -> Self {
        Self {
            surface,
            operation: operation.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for SurfaceTool {
    async fn invoke(&self, args: Value) -> Result<Value, String> {
        self.surface
            .invoke(&self.operation, args)
            .await
            .into_tool_result()
    }
}

/// 注册执行面的全部操作；返回注册数量
pub async fn register_surface_tools(
    registry: &ToolRegistry,
    surface: Arc<dyn ExecutionSurface>,
    source: &str,
) -> usize {
    let operations = surface.operations();
    for op in &operations {
        registry
            .register(
                op,
                Arc::new(SurfaceTool::new(Arc::clone(&surface), op.clone())),
                ToolMetadata::default().with_source(source),
            )
            .await;
    }
    operations.len()
}
