//! 来源数据模型：Source / Highlight / SourceContent
//!
//! 「内联文本来源」与「引用来源」在校验时一次性解析为 SourceBody 枚举，之后不再按字段猜测。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任意 JSON 对象（检索元数据、来源元数据）
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// 来源 ID：检索结果自带 id 时沿用，否则生成 UUID
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// 来源类型（决定内容以字节还是文本形式加载）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Html,
    Markdown,
    Text,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Html => "html",
            SourceType::Markdown => "markdown",
            SourceType::Text => "text",
        }
    }

    /// PDF 以二进制承载，其余均为文本
    pub fn is_binary(&self) -> bool {
        matches!(self, SourceType::Pdf)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 归一化矩形（各分量 ∈ [0,1]，相对页面宽高）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// PDF 高亮标注（页码从 1 开始）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Highlight {
    pub page: u32,
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// 来源主体：内联文本（已有数据）或引用（需经 ContentLoader 懒加载）
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceBody {
    Inline { text: String },
    Reference { reference: Option<String> },
}

/// 已校验的检索来源
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Source {
    pub id: SourceId,
    pub title: String,
    pub source_type: SourceType,
    pub relevance: Option<f64>,
    pub metadata: Option<Metadata>,
    pub highlights: Vec<Highlight>,
    pub href: Option<String>,
    pub description: Option<String>,
    pub body: SourceBody,
}

impl Source {
    /// 构造内联文本来源（测试与演示用）
    pub fn inline(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: SourceId::new(id),
            title: title.into(),
            source_type: SourceType::Text,
            relevance: None,
            metadata: None,
            highlights: Vec::new(),
            href: None,
            description: None,
            body: SourceBody::Inline { text: text.into() },
        }
    }

    /// 构造引用来源
    pub fn reference(id: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: SourceId::new(id),
            title: title.into(),
            source_type,
            relevance: None,
            metadata: None,
            highlights: Vec::new(),
            href: None,
            description: None,
            body: SourceBody::Reference { reference: None },
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.body, SourceBody::Inline { .. })
    }

    /// 内联来源直接得到内容；引用来源返回 None
    pub fn inline_content(&self) -> Option<SourceContent> {
        match &self.body {
            SourceBody::Inline { text } => Some(SourceContent {
                source_type: self.source_type,
                data: SourceData::Text(text.clone()),
                metadata: self.metadata.clone(),
                highlights: self.highlights.clone(),
            }),
            SourceBody::Reference { .. } => None,
        }
    }
}

/// 加载后的内容数据
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SourceData {
    Text(String),
    Bytes(Vec<u8>),
}

impl SourceData {
    pub fn len(&self) -> usize {
        match self {
            SourceData::Text(s) => s.len(),
            SourceData::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SourceData::Text(s) => Some(s),
            SourceData::Bytes(_) => None,
        }
    }
}

/// 某个来源懒加载后的内容
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceContent {
    pub source_type: SourceType,
    pub data: SourceData,
    pub metadata: Option<Metadata>,
    pub highlights: Vec<Highlight>,
}

impl SourceContent {
    pub fn text(source_type: SourceType, text: impl Into<String>) -> Self {
        Self {
            source_type,
            data: SourceData::Text(text.into()),
            metadata: None,
            highlights: Vec::new(),
        }
    }

    pub fn bytes(source_type: SourceType, bytes: Vec<u8>) -> Self {
        Self {
            source_type,
            data: SourceData::Bytes(bytes),
            metadata: None,
            highlights: Vec::new(),
        }
    }

    pub fn with_highlights(mut self, highlights: Vec<Highlight>) -> Self {
        self.highlights = highlights;
        self
    }
}
