//! 协作方抽象
//!
//! 引擎不关心检索与生成如何实现，只依赖以下边界：
//! - RetrieveAndGenerate：检索 + 生成一次完成（来源与回答可按任意顺序就绪）
//! - Generate：基于已有来源仅生成
//! - Retrieve：仅检索（SearchSources）
//! - ContentLoader：按需加载引用来源的内容
//!
//! 所有方法都会收到本次操作的 CancellationToken；操作失败或超时后 token 被取消，
//! 实现方应尽快停止工作。
//!
//! 每种返回都可以携带 follow_up：触发它的操作提交并释放锁之后再派发。

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::conversation::Message;
use crate::core::Action;
use crate::sources::{Metadata, Source, SourceContent, SourceType};

/// 协作方返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    UnsupportedSourceType(String),
}

impl CollaboratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        CollaboratorError::Failed(message.into())
    }
}

/// 流式回答中的一段
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn done(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: true,
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, CollaboratorError>> + Send>>;

/// 原始检索结果（JSON 数组），由引擎校验
pub type SourcesFuture = BoxFuture<'static, Result<serde_json::Value, CollaboratorError>>;

/// 回答：一次性完成的文本，或逐段到达的流
pub enum GenerateResponse {
    Text(BoxFuture<'static, Result<String, CollaboratorError>>),
    Stream(ChunkStream),
}

impl GenerateResponse {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        GenerateResponse::Text(Box::pin(async move { Ok::<_, CollaboratorError>(text) }))
    }
}

impl std::fmt::Debug for GenerateResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateResponse::Text(_) => f.write_str("GenerateResponse::Text(..)"),
            GenerateResponse::Stream(_) => f.write_str("GenerateResponse::Stream(..)"),
        }
    }
}

/// Generate 的返回
pub struct Generation {
    pub response: GenerateResponse,
    /// 提交时替换新用户消息的内容
    pub set_user_message: Option<String>,
    /// 提交成功并释放锁之后再派发的后续动作
    pub follow_up: Option<Action>,
}

impl Generation {
    pub fn new(response: GenerateResponse) -> Self {
        Self {
            response,
            set_user_message: None,
            follow_up: None,
        }
    }

    pub fn with_user_message(mut self, text: impl Into<String>) -> Self {
        self.set_user_message = Some(text.into());
        self
    }

    pub fn with_follow_up(mut self, action: Action) -> Self {
        self.follow_up = Some(action);
        self
    }
}

/// RetrieveAndGenerate 的返回
pub struct RetrieveAndGenerateResponse {
    pub sources: Option<SourcesFuture>,
    pub response: GenerateResponse,
    pub set_user_message: Option<String>,
    pub follow_up: Option<Action>,
}

impl RetrieveAndGenerateResponse {
    pub fn new(response: GenerateResponse) -> Self {
        Self {
            sources: None,
            response,
            set_user_message: None,
            follow_up: None,
        }
    }

    pub fn with_user_message(mut self, text: impl Into<String>) -> Self {
        self.set_user_message = Some(text.into());
        self
    }

    pub fn with_sources(mut self, sources: SourcesFuture) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_follow_up(mut self, action: Action) -> Self {
        self.follow_up = Some(action);
        self
    }
}

/// Retrieve 的返回：原始检索结果（JSON 数组）
#[derive(Clone, Debug, PartialEq)]
pub struct Retrieval {
    pub results: serde_json::Value,
    pub follow_up: Option<Action>,
}

impl Retrieval {
    pub fn new(results: serde_json::Value) -> Self {
        Self {
            results,
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, action: Action) -> Self {
        self.follow_up = Some(action);
        self
    }
}

impl From<serde_json::Value> for Retrieval {
    fn from(results: serde_json::Value) -> Self {
        Self::new(results)
    }
}

/// ContentLoader 的返回
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedContent {
    pub content: SourceContent,
    pub follow_up: Option<Action>,
}

impl LoadedContent {
    pub fn new(content: SourceContent) -> Self {
        Self {
            content,
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, action: Action) -> Self {
        self.follow_up = Some(action);
        self
    }
}

impl From<SourceContent> for LoadedContent {
    fn from(content: SourceContent) -> Self {
        Self::new(content)
    }
}

/// 检索 + 生成。同步返回句柄，真正的工作在返回的 future / stream 中进行
pub trait RetrieveAndGenerate: Send + Sync {
    fn retrieve_and_generate(
        &self,
        messages: &[Message],
        metadata: Option<&Metadata>,
        cancel: CancellationToken,
    ) -> Result<RetrieveAndGenerateResponse, CollaboratorError>;
}

/// 基于已有来源生成
pub trait Generate: Send + Sync {
    fn generate(
        &self,
        messages: &[Message],
        sources: &[Source],
        cancel: CancellationToken,
    ) -> Result<Generation, CollaboratorError>;
}

#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        metadata: Option<&Metadata>,
        cancel: CancellationToken,
    ) -> Result<Retrieval, CollaboratorError>;
}

/// 引用来源的内容加载器
#[async_trait]
pub trait ContentLoader: Send + Sync {
    async fn load(
        &self,
        source: &Source,
        cancel: CancellationToken,
    ) -> Result<LoadedContent, CollaboratorError>;

    /// 不支持的类型在加载前即以 UnsupportedSourceType 拒绝
    fn supports(&self, _source_type: SourceType) -> bool {
        true
    }
}

/// onAddMessage 的决策结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRoute {
    /// 复用已有来源
    FollowUp,
    /// 重新检索；preserve_history 为 false 时只发送新消息
    Reretrieve { preserve_history: bool },
}

/// 路由覆盖钩子：(新消息, 已提交历史) -> 路由
pub type OnAddMessage = Arc<dyn Fn(&Message, &[Message]) -> MessageRoute + Send + Sync>;
