//! 流式回答聚合
//!
//! 按到达顺序累加每段内容，并把累积结果作为「正在生成的消息」发布给观察者（同一个消息 id）。
//! 遇到第一个 done 即停止，之后的项被忽略；流自然结束同样视为完成；空流得到空消息。
//! 本次操作的 token 被取消后不再发布任何内容。

use futures_util::Stream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collaborators::{CollaboratorError, StreamChunk};
use crate::conversation::{Message, MessageId};
use crate::core::state::EngineState;
use crate::core::timeout::StreamIdleGuard;
use crate::core::EngineError;

pub struct StreamAggregator<'a> {
    state: &'a watch::Sender<EngineState>,
    token: CancellationToken,
    idle: StreamIdleGuard,
    message_id: MessageId,
}

impl<'a> StreamAggregator<'a> {
    pub fn new(
        state: &'a watch::Sender<EngineState>,
        token: CancellationToken,
        idle: StreamIdleGuard,
    ) -> Self {
        Self {
            state,
            token,
            idle,
            message_id: MessageId::new(),
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn publish(&self, content: &str) {
        if self.token.is_cancelled() {
            return;
        }
        let message = Message::assistant_with_id(self.message_id, content);
        self.state
            .send_modify(|s| s.conversation.current_stream = Some(message));
    }

    /// 消费整条流，返回最终的助手消息（尚未提交）
    pub async fn consume<S>(mut self, mut stream: S) -> Result<Message, EngineError>
    where
        S: Stream<Item = Result<StreamChunk, CollaboratorError>> + Unpin,
    {
        let mut content = String::new();
        let mut chunks = 0usize;

        while let Some(item) = self.idle.next(&mut stream).await? {
            if self.token.is_cancelled() {
                break;
            }
            let chunk = item?;
            chunks += 1;
            content.push_str(&chunk.content);
            debug!(chunk = chunks, len = content.len(), done = chunk.done, "stream chunk");
            self.publish(&content);
            if chunk.done {
                break;
            }
        }

        Ok(Message::assistant_with_id(self.message_id, content))
    }
}
