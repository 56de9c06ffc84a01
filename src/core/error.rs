//! 引擎错误类型与错误槽
//!
//! 操作内部产生的任何错误都在 OperationCoordinator 边界被捕获：回滚快照、写入唯一的 ErrorState、清除 loading。

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::collaborators::CollaboratorError;

/// 引擎运行中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("an operation is already in progress")]
    ConcurrentOperation,

    #[error("request timeout exceeded ({timeout_ms} ms)")]
    RequestTimeout { timeout_ms: u64 },

    #[error("stream timeout exceeded: no chunk for more than {idle_ms} ms")]
    StreamTimeout { idle_ms: u64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        EngineError::Collaborator(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ConcurrentOperation => ErrorKind::ConcurrentOperation,
            EngineError::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            EngineError::StreamTimeout { .. } => ErrorKind::StreamTimeout,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Collaborator(_) => ErrorKind::Collaborator,
            EngineError::UnsupportedSourceType(_) => ErrorKind::UnsupportedSourceType,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::RequestTimeout { .. } | EngineError::StreamTimeout { .. }
        )
    }
}

impl From<CollaboratorError> for EngineError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Failed(msg) => EngineError::Collaborator(msg),
            CollaboratorError::UnsupportedSourceType(ty) => EngineError::UnsupportedSourceType(ty),
        }
    }
}

/// 错误分类（UI 按类别展示）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConcurrentOperation,
    RequestTimeout,
    StreamTimeout,
    Validation,
    Collaborator,
    UnsupportedSourceType,
}

impl ErrorKind {
    /// 调用方是否值得原样重新提交（引擎本身从不自动重试）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConcurrentOperation
                | ErrorKind::RequestTimeout
                | ErrorKind::StreamTimeout
                | ErrorKind::Collaborator
        )
    }
}

/// 全局唯一的错误槽：新操作开始时清空，失败时写入
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorState {
    pub message: String,
    pub kind: ErrorKind,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorState {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            occurred_at: Utc::now(),
        }
    }
}
