//! 引擎状态：观察者看到的完整投影与操作前快照
//!
//! EngineState 存放在 watch 通道中，每次变更都是一次整体发布；
//! loading / current_stream / loading_id 是文档约定的瞬态字段。

use serde::Serialize;

use crate::conversation::{ConversationState, Message, WorkflowMode};
use crate::core::ErrorState;
use crate::sources::{
    Source, SourceContent, SourceFilter, SourceId, SourceLoadState, SourceState,
};

/// 观察者可见的引擎状态
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EngineState {
    pub conversation: ConversationState,
    pub sources: SourceState,
    pub loading: bool,
    pub error: Option<ErrorState>,
}

impl EngineState {
    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn current_stream(&self) -> Option<&Message> {
        self.conversation.current_stream.as_ref()
    }

    pub fn workflow_mode(&self) -> WorkflowMode {
        self.conversation.mode
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources.sources
    }

    pub fn active_sources(&self) -> Vec<Source> {
        self.sources.active_sources()
    }

    pub fn visible_sources(&self) -> Vec<Source> {
        self.sources.visible_sources()
    }

    pub fn source_filter(&self) -> Option<&SourceFilter> {
        self.sources.filter.as_ref()
    }

    pub fn selected_source(&self) -> Option<&Source> {
        self.sources.selected_source()
    }

    pub fn selected_source_content(&self) -> Option<SourceContent> {
        self.sources.selected_content()
    }

    pub fn source_load_state(&self, id: &SourceId) -> SourceLoadState {
        self.sources.load_state(id)
    }

    pub fn loading_source(&self) -> Option<&SourceId> {
        self.sources.loading_id.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&ErrorState> {
        self.error.as_ref()
    }

    pub fn capture(&self) -> OperationSnapshot {
        OperationSnapshot {
            messages: self.conversation.messages.clone(),
            sources: self.sources.clone(),
            workflow_mode: self.conversation.mode,
        }
    }
}

/// 操作开始前捕获的已提交状态，失败时原样写回
#[derive(Clone, Debug, PartialEq)]
pub struct OperationSnapshot {
    pub messages: Vec<Message>,
    /// 来源、激活集合、选中项与内容缓存
    pub sources: SourceState,
    pub workflow_mode: WorkflowMode,
}
