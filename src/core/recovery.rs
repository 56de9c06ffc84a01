//! 错误恢复引擎
//!
//! 操作失败时把快照原样写回，清除瞬态字段，并在唯一的错误槽里记录带操作标签的错误。
//! 引擎本身不做自动重试；是否值得重试由 ErrorKind::is_retryable 提示调用方。

use tracing::warn;

use crate::core::state::{EngineState, OperationSnapshot};
use crate::core::{EngineError, ErrorState};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 操作开始：清空错误槽并置 loading
    pub fn begin(&self, state: &mut EngineState) {
        state.error = None;
        state.loading = true;
    }

    /// 回滚到快照并记录错误
    pub fn restore(
        &self,
        state: &mut EngineState,
        snapshot: OperationSnapshot,
        operation: &str,
        err: &EngineError,
    ) {
        warn!(operation, error = %err, "operation failed, rolling back");
        state.conversation.messages = snapshot.messages;
        state.conversation.mode = snapshot.workflow_mode;
        state.conversation.current_stream = None;
        // 加载失败标记不属于快照，回滚后保留
        let failed = std::mem::take(&mut state.sources.failed);
        state.sources = snapshot.sources;
        state.sources.failed = failed;
        state.sources.loading_id = None;
        state.loading = false;
        state.error = Some(Self::record(operation, err));
    }

    pub fn record(operation: &str, err: &EngineError) -> ErrorState {
        ErrorState::new(err.kind(), format!("{operation} failed: {err}"))
    }
}
