//! Weaver - 面向设计文档的自主执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与单次运行配置解析
//! - **core**: 计划、运行状态、检查点事务、恢复、运行历史、编排器
//! - **observability**: 日志初始化与敏感字段脱敏
//! - **react**: Planner、Critic、阶段式运行循环、进度事件与审批
//! - **tools**: 工具注册表与执行器、执行面（HTTP / 内存文档）

pub mod config;
pub mod core;
pub mod observability;
pub mod react;
pub mod tools;
