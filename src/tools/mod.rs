//! 工具层：注册表与统计、执行器（审计日志）、执行面（HTTP / 内存文档）

pub mod document;
pub mod executor;
pub mod http;
pub mod registry;
pub mod surface;

pub use document::{MemoryDocument, STANDARD_OPERATIONS};
pub use executor::{ActionOutcome, ToolExecutor};
pub use http::HttpSurface;
pub use registry::{category_of, ToolError, ToolHandler, ToolInfo, ToolMetadata, ToolRegistry, ToolStats};
pub use surface::{register_surface_tools, ExecutionSurface, SurfaceError, SurfaceResult, SurfaceTool};
