//! 对话状态：已提交的消息历史、正在流式生成的消息、当前工作流模式
//!
//! 消息一旦提交即不可变；历史只追加，回滚与 ClearMessages 除外。
//! 只有 OperationCoordinator 的提交 / 回滚路径会写入 ConversationState。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息 ID（UUID v4）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::assistant_with_id(MessageId::new(), content)
    }

    /// 流式生成时整条消息沿用同一个 id（中间快照与最终提交一致）
    pub fn assistant_with_id(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 工作流模式：决定新的用户消息走「检索+生成」还是「仅生成」
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowMode {
    /// 初始状态，尚未检索
    #[default]
    Init,
    /// 复用上次检索到的来源
    FollowUp,
    /// 下一条消息重新检索
    Reretrieve,
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowMode::Init => "init",
            WorkflowMode::FollowUp => "follow-up",
            WorkflowMode::Reretrieve => "reretrieve",
        })
    }
}

/// 对话状态
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversationState {
    /// 已提交的消息
    pub messages: Vec<Message>,
    /// 正在流式生成的助手消息（瞬态，未提交）
    pub current_stream: Option<Message>,
    pub mode: WorkflowMode,
}

impl ConversationState {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 清空历史与流式中的消息（模式不变）
    pub fn clear(&mut self) {
        self.messages.clear();
        self.current_stream = None;
    }
}
