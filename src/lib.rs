//! Lexio - RAG 对话编排引擎
//!
//! 模块划分：
//! - **collaborators**: 协作方边界（检索+生成 / 生成 / 检索 / 内容加载）与 Mock 实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 消息历史与工作流模式
//! - **core**: 操作协调、超时监管、流聚合、快照回滚、会话监管
//! - **observability**: tracing 日志初始化
//! - **sources**: 检索来源模型、加载状态机与校验

pub mod collaborators;
pub mod config;
pub mod conversation;
pub mod core;
pub mod observability;
pub mod sources;

pub use crate::collaborators::{Collaborators, MockCollaborator};
pub use crate::core::{Action, EngineError, EngineOptions, EngineState, OperationCoordinator};
