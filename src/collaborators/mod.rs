//! 协作方注册表
//!
//! 每种能力都是可选的；引擎按已注册的能力决定路由。

pub mod mock;
pub mod traits;

use std::sync::Arc;

pub use mock::MockCollaborator;
pub use traits::{
    ChunkStream, CollaboratorError, ContentLoader, Generate, GenerateResponse, Generation,
    LoadedContent, MessageRoute, OnAddMessage, Retrieval, Retrieve, RetrieveAndGenerate,
    RetrieveAndGenerateResponse, SourcesFuture, StreamChunk,
};

use crate::conversation::Message;

#[derive(Clone, Default)]
pub struct Collaborators {
    pub retrieve_and_generate: Option<Arc<dyn RetrieveAndGenerate>>,
    pub generate: Option<Arc<dyn Generate>>,
    pub retrieve: Option<Arc<dyn Retrieve>>,
    pub content_loader: Option<Arc<dyn ContentLoader>>,
    pub on_add_message: Option<OnAddMessage>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retrieve_and_generate(mut self, c: Arc<dyn RetrieveAndGenerate>) -> Self {
        self.retrieve_and_generate = Some(c);
        self
    }

    pub fn with_generate(mut self, c: Arc<dyn Generate>) -> Self {
        self.generate = Some(c);
        self
    }

    pub fn with_retrieve(mut self, c: Arc<dyn Retrieve>) -> Self {
        self.retrieve = Some(c);
        self
    }

    pub fn with_content_loader(mut self, c: Arc<dyn ContentLoader>) -> Self {
        self.content_loader = Some(c);
        self
    }

    pub fn with_on_add_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Message, &[Message]) -> MessageRoute + Send + Sync + 'static,
    {
        self.on_add_message = Some(Arc::new(hook));
        self
    }

    /// 一个实现了全部能力的协作方（如 MockCollaborator）
    pub fn from_all<C>(c: Arc<C>) -> Self
    where
        C: RetrieveAndGenerate + Generate + Retrieve + ContentLoader + 'static,
    {
        Self {
            retrieve_and_generate: Some(c.clone()),
            generate: Some(c.clone()),
            retrieve: Some(c.clone()),
            content_loader: Some(c),
            on_add_message: None,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("retrieve_and_generate", &self.retrieve_and_generate.is_some())
            .field("generate", &self.generate.is_some())
            .field("retrieve", &self.retrieve.is_some())
            .field("content_loader", &self.content_loader.is_some())
            .field("on_add_message", &self.on_add_message.is_some())
            .finish()
    }
}
