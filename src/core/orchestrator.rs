//! 操作协调器：引擎的唯一入口
//!
//! 负责：同步抢占操作锁、捕获快照、按工作流模式路由到协作方、在超时监管下消费回答，
//! 最后一次性提交或回滚。已提交状态放在 watch 通道里，观察者只会看到完整的状态快照。
//!
//! 后续动作（follow_up）在触发它的操作提交并释放锁之后，经正常的 submit 派发。
//! 成功后的工作流模式只在已提交来源非空时才会是 FollowUp。

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{
    Collaborators, Generate, GenerateResponse, Generation, LoadedContent, MessageRoute,
    Retrieval, RetrieveAndGenerate, RetrieveAndGenerateResponse, SourcesFuture,
};
use crate::conversation::{ConversationState, Message, WorkflowMode};
use crate::core::session_supervisor::{OperationGuard, SessionSupervisor};
use crate::core::state::EngineState;
use crate::core::stream::StreamAggregator;
use crate::core::timeout::{StreamIdleGuard, TimeoutPolicy, TimeoutSupervisor};
use crate::core::{EngineError, RecoveryEngine};
use crate::sources::{
    validate_retrieval_results, validate_source_content, Metadata, Source, SourceFilter,
    SourceId,
};

/// 默认的单条消息最大字符数
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 16_000;

/// 外部可提交的动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// 新的用户消息
    AddUserMessage(String),
    /// 选中来源（引用来源按需加载内容）；None 取消选中
    SelectSource(Option<SourceId>),
    /// 仅检索，替换当前来源
    SearchSources {
        query: String,
        metadata: Option<Metadata>,
    },
    /// 设置交给生成协作方的来源；None 表示全部
    SetActiveSources(Option<Vec<SourceId>>),
    ClearMessages,
    ClearSources,
    /// 丢弃某个来源的缓存内容
    InvalidateSourceContent(SourceId),
    /// 只展示匹配的来源（不影响激活集合）
    SetFilterSources(SourceFilter),
    ResetFilterSources,
}

impl Action {
    /// 错误信息中使用的操作名
    pub fn label(&self) -> &'static str {
        match self {
            Action::AddUserMessage(_) => "Add user message",
            Action::SelectSource(_) => "Select source",
            Action::SearchSources { .. } => "Retrieve sources",
            Action::SetActiveSources(_) => "Set active sources",
            Action::ClearMessages => "Clear messages",
            Action::ClearSources => "Clear sources",
            Action::InvalidateSourceContent(_) => "Invalidate source content",
            Action::SetFilterSources(_) => "Set filter sources",
            Action::ResetFilterSources => "Reset filter sources",
        }
    }
}

/// 引擎参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub timeouts: TimeoutPolicy,
    pub max_message_chars: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
        }
    }
}

/// 用户消息的去向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    /// 检索 + 生成；preserve_history 为 false 时只发送新消息
    RetrieveAndGenerate { preserve_history: bool },
    /// 基于当前激活来源生成
    Generate,
}

/// 路由表：工作流模式 + 已注册能力 + 可选的钩子决策
pub fn plan_route(
    mode: WorkflowMode,
    has_retrieve_and_generate: bool,
    has_generate: bool,
    decision: Option<MessageRoute>,
) -> Result<RouteKind, EngineError> {
    let combined = RouteKind::RetrieveAndGenerate {
        preserve_history: true,
    };
    let fallback = || {
        if has_retrieve_and_generate {
            Ok(combined)
        } else if has_generate {
            Ok(RouteKind::Generate)
        } else {
            Err(EngineError::collaborator("no generation capability available"))
        }
    };

    match decision {
        Some(MessageRoute::Reretrieve { preserve_history }) => {
            if has_retrieve_and_generate {
                Ok(RouteKind::RetrieveAndGenerate { preserve_history })
            } else {
                Err(EngineError::collaborator(
                    "re-retrieval requested but retrieve-and-generate is not available",
                ))
            }
        }
        Some(MessageRoute::FollowUp) => {
            if mode == WorkflowMode::FollowUp && has_generate {
                Ok(RouteKind::Generate)
            } else {
                fallback()
            }
        }
        None => match mode {
            WorkflowMode::Init | WorkflowMode::Reretrieve if has_retrieve_and_generate => {
                Ok(combined)
            }
            WorkflowMode::FollowUp if has_generate => Ok(RouteKind::Generate),
            _ => fallback(),
        },
    }
}

/// 操作结束（含 future 被中途丢弃）时清除瞬态字段
struct LoadingReset<'a>(&'a watch::Sender<EngineState>);

impl Drop for LoadingReset<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|s| {
            let dirty = s.loading
                || s.conversation.current_stream.is_some()
                || s.sources.loading_id.is_some();
            s.loading = false;
            s.conversation.current_stream = None;
            s.sources.loading_id = None;
            dirty
        });
    }
}

/// 一次成功回答的结果
struct Reply {
    history: Vec<Message>,
    /// 协作方要求改写的用户消息
    user_message: Option<String>,
    message: Message,
    sources: Option<Vec<Source>>,
    follow_up: Option<Action>,
}

pub struct OperationCoordinator {
    collaborators: Collaborators,
    options: EngineOptions,
    state: watch::Sender<EngineState>,
    supervisor: SessionSupervisor,
    recovery: RecoveryEngine,
}

impl OperationCoordinator {
    pub fn new(collaborators: Collaborators, options: EngineOptions) -> Self {
        let (state, _) = watch::channel(EngineState::default());
        Self {
            collaborators,
            options,
            state,
            supervisor: SessionSupervisor::new(),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.supervisor.is_busy()
    }

    /// 取消正在执行的操作并拒绝之后的所有操作
    pub fn shutdown(&self) {
        info!("shutting down operation coordinator");
        self.supervisor.shutdown();
    }

    /// 提交动作。锁在返回 future 之前同步抢占：已有操作在执行时，
    /// 返回的 future 立即以 ConcurrentOperation 完成，且不改动任何状态。
    pub fn submit(&self, action: Action) -> BoxFuture<'_, Result<(), EngineError>> {
        let guard = match self.supervisor.try_begin() {
            Ok(guard) => guard,
            Err(err) => {
                warn!(operation = action.label(), error = %err, "operation rejected");
                return Box::pin(future::ready(Err(err)));
            }
        };

        Box::pin(async move {
            let follow_up = self.run(guard, action).await?;
            if let Some(next) = follow_up {
                info!(operation = next.label(), "dispatching follow-up action");
                if let Err(err) = self.submit(next).await {
                    warn!(error = %err, "follow-up action failed");
                }
            }
            Ok(())
        })
    }

    async fn run(&self, guard: OperationGuard, action: Action) -> Result<Option<Action>, EngineError> {
        let label = action.label();
        let token = guard.token();
        let _reset = LoadingReset(&self.state);

        let snapshot = self.state.borrow().capture();
        self.state.send_modify(|s| self.recovery.begin(s));
        debug!(operation = label, "operation started");

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(EngineError::collaborator("operation cancelled")),
            result = self.execute(action, token.clone()) => result,
        };

        match result {
            Ok(follow_up) => {
                debug!(operation = label, "operation committed");
                Ok(follow_up)
            }
            Err(err) => {
                guard.abort();
                self.state
                    .send_modify(|s| self.recovery.restore(s, snapshot, label, &err));
                Err(err)
            }
        }
    }

    async fn execute(&self, action: Action, token: CancellationToken) -> Result<Option<Action>, EngineError> {
        match action {
            Action::AddUserMessage(text) => self.add_user_message(text, token).await,
            Action::SelectSource(id) => self.select_source(id, token).await,
            Action::SearchSources { query, metadata } => {
                self.search_sources(query, metadata, token).await
            }
            Action::SetActiveSources(ids) => self.set_active_sources(ids).map(|_| None),
            Action::ClearMessages => {
                self.commit(|s| s.conversation.clear());
                Ok(None)
            }
            Action::ClearSources => {
                self.commit(|s| {
                    s.sources.clear();
                    s.conversation.mode = if s.conversation.is_empty() {
                        WorkflowMode::Init
                    } else {
                        WorkflowMode::Reretrieve
                    };
                });
                Ok(None)
            }
            Action::InvalidateSourceContent(id) => {
                self.ensure_known(&id)?;
                self.commit(|s| s.sources.invalidate(&id));
                Ok(None)
            }
            Action::SetFilterSources(filter) => {
                match &filter {
                    SourceFilter::Ids(ids) => {
                        for id in ids {
                            self.ensure_known(id)?;
                        }
                    }
                    SourceFilter::Text(text) if text.trim().is_empty() => {
                        return Err(EngineError::validation("filter text must not be empty"));
                    }
                    SourceFilter::Text(_) => {}
                }
                self.commit(|s| s.sources.filter = Some(filter));
                Ok(None)
            }
            Action::ResetFilterSources => {
                self.commit(|s| s.sources.filter = None);
                Ok(None)
            }
        }
    }

    /// 单次发布：应用变更并清除瞬态字段
    fn commit(&self, apply: impl FnOnce(&mut EngineState)) {
        self.state.send_modify(|s| {
            apply(s);
            s.conversation.current_stream = None;
            s.sources.loading_id = None;
            s.loading = false;
        });
    }

    /// 成功回答或检索后的模式；没有来源时不进入 FollowUp
    fn settled_mode(&self, has_sources: bool) -> WorkflowMode {
        if has_sources && self.collaborators.generate.is_some() {
            WorkflowMode::FollowUp
        } else {
            WorkflowMode::Reretrieve
        }
    }

    fn validate_message(&self, text: &str) -> Result<(), EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::validation("message must not be empty"));
        }
        let chars = text.chars().count();
        if chars > self.options.max_message_chars {
            return Err(EngineError::validation(format!(
                "message is {chars} characters long, the limit is {}",
                self.options.max_message_chars
            )));
        }
        Ok(())
    }

    fn ensure_known(&self, id: &SourceId) -> Result<(), EngineError> {
        if self.state.borrow().sources.contains(id) {
            Ok(())
        } else {
            Err(EngineError::validation(format!("unknown source id '{id}'")))
        }
    }

    async fn add_user_message(&self, text: String, token: CancellationToken) -> Result<Option<Action>, EngineError> {
        self.validate_message(&text)?;

        let message = Message::user(text);
        let (conversation, active_sources) = {
            let state = self.state.borrow();
            (state.conversation.clone(), state.sources.active_sources())
        };
        let decision = self
            .collaborators
            .on_add_message
            .as_ref()
            .map(|hook| hook(&message, conversation.messages()));
        let route = plan_route(
            conversation.mode,
            self.collaborators.retrieve_and_generate.is_some(),
            self.collaborators.generate.is_some(),
            decision,
        )?;
        info!(mode = %conversation.mode, ?route, "routing user message");

        let reply = match (route, &self.collaborators) {
            (
                RouteKind::RetrieveAndGenerate { preserve_history },
                Collaborators {
                    retrieve_and_generate: Some(rag),
                    ..
                },
            ) => {
                let history = working_history(&conversation, message, preserve_history);
                self.retrieve_and_generate(rag.clone(), history, token).await?
            }
            (
                RouteKind::Generate,
                Collaborators {
                    generate: Some(generator),
                    ..
                },
            ) => {
                let history = working_history(&conversation, message, true);
                self.generate(generator.clone(), history, active_sources, token)
                    .await?
            }
            _ => return Err(EngineError::collaborator("no generation capability available")),
        };

        let Reply {
            mut history,
            user_message,
            message,
            sources,
            follow_up,
        } = reply;
        if let Some(text) = user_message {
            self.validate_message(&text)?;
            if let Some(pending) = history.last_mut() {
                debug!(message = %pending.id, "user message rewritten by collaborator");
                pending.content = text;
            }
        }
        let has_sources = match &sources {
            Some(sources) => !sources.is_empty(),
            None => !self.state.borrow().sources.sources.is_empty(),
        };
        let mode = self.settled_mode(has_sources);
        info!(
            reply_len = message.content.len(),
            sources = ?sources.as_ref().map(Vec::len),
            %mode,
            "committing reply"
        );
        self.commit(|s| {
            s.conversation.messages = history;
            s.conversation.messages.push(message);
            if let Some(sources) = sources {
                s.sources.replace_sources(sources);
            }
            s.conversation.mode = mode;
        });
        Ok(follow_up)
    }

    async fn retrieve_and_generate(
        &self,
        rag: Arc<dyn RetrieveAndGenerate>,
        history: Vec<Message>,
        token: CancellationToken,
    ) -> Result<Reply, EngineError> {
        TimeoutSupervisor::new(token.clone())
            .run(self.options.timeouts.retrieve_and_generate, async {
                let RetrieveAndGenerateResponse {
                    sources,
                    response,
                    set_user_message,
                    follow_up,
                } = rag.retrieve_and_generate(&history, None, token.clone())?;
                let (sources, message) = future::try_join(
                    resolve_sources(sources),
                    self.consume_response(response, token.clone()),
                )
                .await?;
                Ok::<_, EngineError>(Reply {
                    history,
                    user_message: set_user_message,
                    message,
                    sources,
                    follow_up,
                })
            })
            .await
    }

    async fn generate(
        &self,
        generator: Arc<dyn Generate>,
        history: Vec<Message>,
        sources: Vec<Source>,
        token: CancellationToken,
    ) -> Result<Reply, EngineError> {
        TimeoutSupervisor::new(token.clone())
            .run(self.options.timeouts.request, async {
                let Generation {
                    response,
                    set_user_message,
                    follow_up,
                } = generator.generate(&history, &sources, token.clone())?;
                let message = self.consume_response(response, token.clone()).await?;
                Ok::<_, EngineError>(Reply {
                    history,
                    user_message: set_user_message,
                    message,
                    sources: None,
                    follow_up,
                })
            })
            .await
    }

    async fn consume_response(
        &self,
        response: GenerateResponse,
        token: CancellationToken,
    ) -> Result<Message, EngineError> {
        match response {
            GenerateResponse::Text(text) => Ok(Message::assistant(text.await?)),
            GenerateResponse::Stream(stream) => {
                StreamAggregator::new(
                    &self.state,
                    token,
                    StreamIdleGuard::new(self.options.timeouts.stream),
                )
                .consume(stream)
                .await
            }
        }
    }

    async fn select_source(
        &self,
        id: Option<SourceId>,
        token: CancellationToken,
    ) -> Result<Option<Action>, EngineError> {
        let Some(id) = id else {
            self.commit(|s| s.sources.selected_id = None);
            return Ok(None);
        };

        let (source, resolved) = {
            let state = self.state.borrow();
            let source = state
                .sources
                .get(&id)
                .cloned()
                .ok_or_else(|| EngineError::validation(format!("unknown source id '{id}'")))?;
            (source, state.sources.is_resolved(&id))
        };

        if resolved {
            debug!(source = %id, "source already resolved");
            self.commit(|s| s.sources.selected_id = Some(id));
            return Ok(None);
        }

        let loader = self
            .collaborators
            .content_loader
            .clone()
            .ok_or_else(|| EngineError::collaborator("no content loader available"))?;
        if !loader.supports(source.source_type) {
            return Err(EngineError::UnsupportedSourceType(
                source.source_type.to_string(),
            ));
        }

        self.state
            .send_modify(|s| s.sources.loading_id = Some(id.clone()));
        info!(source = %id, source_type = %source.source_type, "loading source content");

        let loaded = TimeoutSupervisor::new(token.clone())
            .run(self.options.timeouts.request, async {
                let loaded = loader.load(&source, token.clone()).await?;
                validate_source_content(&source, &loaded.content)?;
                Ok::<_, EngineError>(loaded)
            })
            .await;

        match loaded {
            Ok(LoadedContent { content, follow_up }) => {
                self.commit(|s| {
                    s.sources.failed.remove(&id);
                    s.sources.contents.insert(id.clone(), content);
                    s.sources.selected_id = Some(id);
                });
                Ok(follow_up)
            }
            Err(err) => {
                self.state.send_modify(|s| {
                    s.sources.failed.insert(id);
                });
                Err(err)
            }
        }
    }

    async fn search_sources(
        &self,
        query: String,
        metadata: Option<Metadata>,
        token: CancellationToken,
    ) -> Result<Option<Action>, EngineError> {
        let retrieve = self
            .collaborators
            .retrieve
            .clone()
            .ok_or_else(|| EngineError::collaborator("retrieve sources not available"))?;

        let (sources, follow_up) = TimeoutSupervisor::new(token.clone())
            .run(self.options.timeouts.request, async {
                let Retrieval { results, follow_up } = retrieve
                    .retrieve(&query, metadata.as_ref(), token.clone())
                    .await?;
                Ok::<_, EngineError>((validate_retrieval_results(&results)?, follow_up))
            })
            .await?;

        let mode = self.settled_mode(!sources.is_empty());
        info!(count = sources.len(), %mode, "committing retrieved sources");
        self.commit(|s| {
            s.sources.replace_sources(sources);
            s.conversation.mode = mode;
        });
        Ok(follow_up)
    }

    fn set_active_sources(&self, ids: Option<Vec<SourceId>>) -> Result<(), EngineError> {
        if let Some(ids) = &ids {
            for id in ids {
                self.ensure_known(id)?;
            }
        }
        self.commit(|s| s.sources.active_ids = ids);
        Ok(())
    }
}

/// 未提交的工作历史：已提交消息 + 新的用户消息
fn working_history(conversation: &ConversationState, message: Message, preserve: bool) -> Vec<Message> {
    let mut history = if preserve {
        conversation.messages.clone()
    } else {
        Vec::new()
    };
    history.push(message);
    history
}

async fn resolve_sources(sources: Option<SourcesFuture>) -> Result<Option<Vec<Source>>, EngineError> {
    match sources {
        Some(pending) => {
            let raw = pending.await?;
            validate_retrieval_results(&raw).map(Some)
        }
        None => Ok(None),
    }
}
