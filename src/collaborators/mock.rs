//! Mock 协作方（用于演示与测试，无需任何外部服务）
//!
//! 内存语料按关键词重叠检索；回答取最相关片段，逐词流式输出。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::traits::{
    ChunkStream, CollaboratorError, ContentLoader, Generate, GenerateResponse, Generation,
    LoadedContent, Retrieval, Retrieve, RetrieveAndGenerate, RetrieveAndGenerateResponse,
    StreamChunk,
};
use crate::conversation::{Message, Role};
use crate::sources::{Metadata, Source, SourceBody, SourceContent, SourceType};

/// 语料中的一篇文档
#[derive(Clone, Debug)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub text: String,
    /// 为 true 时以引用来源返回，内容需经 ContentLoader 加载
    pub by_reference: bool,
    tokens: HashSet<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            title: title.into(),
            tokens: tokenize_lower(&text),
            text,
            by_reference: false,
        }
    }

    pub fn by_reference(mut self) -> Self {
        self.by_reference = true;
        self
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

fn last_user_message(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

#[derive(Clone, Debug)]
pub struct MockCollaborator {
    corpus: Vec<Document>,
    top_k: usize,
    chunk_delay: Duration,
}

impl Default for MockCollaborator {
    fn default() -> Self {
        Self::new(Self::sample_corpus())
    }
}

impl MockCollaborator {
    pub fn new(corpus: Vec<Document>) -> Self {
        Self {
            corpus,
            top_k: 3,
            chunk_delay: Duration::from_millis(40),
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn sample_corpus() -> Vec<Document> {
        vec![
            Document::new(
                "ownership",
                "Ownership in Rust",
                "Every value in Rust has a single owner. When the owner goes out of scope the value is dropped. \
                 Borrowing lets code read or mutate a value without taking ownership.",
            ),
            Document::new(
                "async",
                "Async Rust",
                "Async functions return futures that do nothing until polled. An executor such as tokio drives \
                 futures to completion and every await is a suspension point.",
            ),
            Document::new(
                "rag",
                "Retrieval-augmented generation",
                "Retrieval-augmented generation first retrieves relevant sources for a question and then \
                 generates an answer grounded in those sources.",
            )
            .by_reference(),
            Document::new(
                "timeouts",
                "Timeouts",
                "A request timeout bounds the whole operation while a stream timeout bounds the gap between \
                 consecutive chunks of a streamed answer.",
            )
            .by_reference(),
        ]
    }

    /// 按词重叠打分，返回最相关的 top_k 篇（分数为 0 的不返回）
    fn search(&self, query: &str) -> Vec<(&Document, f64)> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(&Document, usize)> = self
            .corpus
            .iter()
            .map(|d| (d, query_tokens.intersection(&d.tokens).count()))
            .filter(|(_, s)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
            .into_iter()
            .take(self.top_k)
            .map(|(d, s)| (d, s as f64 / query_tokens.len() as f64))
            .collect()
    }

    /// 生成与传输层一致的原始 JSON 检索结果
    fn results_json(&self, query: &str) -> Value {
        let items = self
            .search(query)
            .into_iter()
            .map(|(doc, relevance)| {
                if doc.by_reference {
                    json!({
                        "id": doc.id,
                        "title": doc.title,
                        "type": "markdown",
                        "sourceReference": format!("corpus://{}", doc.id),
                        "relevance": relevance,
                    })
                } else {
                    json!({
                        "id": doc.id,
                        "title": doc.title,
                        "text": doc.text,
                        "relevance": relevance,
                    })
                }
            })
            .collect();
        Value::Array(items)
    }

    fn answer(question: &str, context: Option<(&str, &str)>) -> String {
        match context {
            Some((title, text)) => format!("Based on \"{}\": {}", title, text),
            None => format!("I could not find anything relevant to \"{}\".", question.trim()),
        }
    }

    /// 逐词输出，最后一段 done = true
    fn word_stream(&self, text: String, cancel: CancellationToken) -> ChunkStream {
        let words: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.chunk_delay;
        Box::pin(stream::unfold(
            (words.into_iter(), cancel),
            move |(mut words, cancel)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let word = words.next()?;
                tokio::time::sleep(delay).await;
                let chunk = if words.as_slice().is_empty() {
                    StreamChunk::done(word)
                } else {
                    StreamChunk::new(word)
                };
                Some((Ok(chunk), (words, cancel)))
            },
        ))
    }
}

impl RetrieveAndGenerate for MockCollaborator {
    fn retrieve_and_generate(
        &self,
        messages: &[Message],
        _metadata: Option<&Metadata>,
        cancel: CancellationToken,
    ) -> Result<RetrieveAndGenerateResponse, CollaboratorError> {
        let question = last_user_message(messages);
        let results = self.results_json(question);
        let answer = Self::answer(
            question,
            self.search(question)
                .first()
                .map(|(d, _)| (d.title.as_str(), d.text.as_str())),
        );
        Ok(
            RetrieveAndGenerateResponse::new(GenerateResponse::Stream(self.word_stream(answer, cancel)))
                .with_sources(Box::pin(async move { Ok::<_, CollaboratorError>(results) })),
        )
    }
}

impl Generate for MockCollaborator {
    fn generate(
        &self,
        messages: &[Message],
        sources: &[Source],
        cancel: CancellationToken,
    ) -> Result<Generation, CollaboratorError> {
        let question = last_user_message(messages);
        let context = sources.first().and_then(|s| match &s.body {
            SourceBody::Inline { text } => Some((s.title.as_str(), text.as_str())),
            SourceBody::Reference { .. } => self
                .corpus
                .iter()
                .find(|d| d.id == s.id.as_str())
                .map(|d| (s.title.as_str(), d.text.as_str())),
        });
        let answer = Self::answer(question, context);
        Ok(Generation::new(GenerateResponse::Stream(
            self.word_stream(answer, cancel),
        )))
    }
}

#[async_trait]
impl Retrieve for MockCollaborator {
    async fn retrieve(
        &self,
        query: &str,
        _metadata: Option<&Metadata>,
        _cancel: CancellationToken,
    ) -> Result<Retrieval, CollaboratorError> {
        Ok(self.results_json(query).into())
    }
}

#[async_trait]
impl ContentLoader for MockCollaborator {
    async fn load(
        &self,
        source: &Source,
        _cancel: CancellationToken,
    ) -> Result<LoadedContent, CollaboratorError> {
        let doc = self
            .corpus
            .iter()
            .find(|d| d.id == source.id.as_str())
            .ok_or_else(|| CollaboratorError::failed(format!("no document for source '{}'", source.id)))?;
        Ok(SourceContent::text(source.source_type, doc.text.clone()).into())
    }

    fn supports(&self, source_type: SourceType) -> bool {
        !source_type.is_binary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::validate_retrieval_results;
    use futures_util::StreamExt;

    #[test]
    fn test_search_ranks_by_overlap() {
        let mock = MockCollaborator::default().with_top_k(1);
        let hits = mock.search("how does rust ownership and borrowing work");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "ownership");
    }

    #[test]
    fn test_results_pass_validation() {
        let mock = MockCollaborator::default();
        let sources = validate_retrieval_results(&mock.results_json("retrieval sources timeout")).unwrap();
        assert!(!sources.is_empty());
        assert!(sources.iter().any(|s| !s.is_inline()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_word_stream_ends_with_done() {
        let mock = MockCollaborator::default().with_chunk_delay(Duration::from_millis(5));
        let chunks: Vec<_> = mock
            .word_stream("one two three".to_string(), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.content, "three");
    }

    #[tokio::test]
    async fn test_loader_rejects_pdf() {
        let mock = MockCollaborator::default();
        assert!(!mock.supports(SourceType::Pdf));
        let source = Source::reference("rag", "RAG", SourceType::Markdown);
        let loaded = mock.load(&source, CancellationToken::new()).await.unwrap();
        assert!(loaded.follow_up.is_none());
        assert!(loaded.content.data.as_text().unwrap().contains("Retrieval"));
    }
}
