//! 检索结果与来源内容的结构校验
//!
//! 协作方以原始 JSON 交付检索结果（与传输层收到的一致）。每一项必须恰好匹配一种形状，
//! 且不允许多余字段；不合法的结果整体拒绝（ValidationError），不做静默修正或丢弃。
//!
//! - 内联：`{ text, id?, title?, sourceName?, type?: text|html|markdown, relevance?|relevanceScore?, metadata? }`
//! - 引用：`{ type, id?, title?, sourceName?, sourceReference?, relevance?|relevanceScore?, metadata?, highlights?, href?, description? }`

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::core::EngineError;
use crate::sources::{
    Highlight, Metadata, Source, SourceBody, SourceContent, SourceData, SourceId, SourceType,
};

/// 错误信息里 JSON 预览的最大字符数
const ITEM_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InlineShape {
    text: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "sourceName")]
    source_name: Option<String>,
    #[serde(default, rename = "type")]
    source_type: Option<SourceType>,
    #[serde(default, alias = "relevanceScore")]
    relevance: Option<f64>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReferenceShape {
    #[serde(rename = "type")]
    source_type: SourceType,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "sourceName")]
    source_name: Option<String>,
    #[serde(default, rename = "sourceReference")]
    source_reference: Option<String>,
    #[serde(default, alias = "relevanceScore")]
    relevance: Option<f64>,
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    highlights: Option<Vec<Highlight>>,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn preview(item: &Value) -> String {
    let s = item.to_string();
    if s.chars().count() > ITEM_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ITEM_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

fn check_relevance(index: usize, relevance: Option<f64>) -> Result<(), EngineError> {
    match relevance {
        Some(r) if !(r.is_finite() && (0.0..=1.0).contains(&r)) => Err(EngineError::validation(
            format!("retrieval result {index}: relevance {r} is outside [0, 1]"),
        )),
        _ => Ok(()),
    }
}

fn unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// 高亮：页码从 1 开始，矩形各分量为 [0,1] 归一化坐标
pub fn validate_highlights(highlights: &[Highlight]) -> Result<(), EngineError> {
    for (i, h) in highlights.iter().enumerate() {
        if h.page == 0 {
            return Err(EngineError::validation(format!(
                "highlight {i}: page numbers start at 1"
            )));
        }
        let r = &h.rect;
        if !(unit(r.top) && unit(r.left) && unit(r.width) && unit(r.height)) {
            return Err(EngineError::validation(format!(
                "highlight {i}: rect must use normalized coordinates in [0, 1]"
            )));
        }
    }
    Ok(())
}

fn inline_source(index: usize, shape: InlineShape) -> Result<Source, EngineError> {
    let source_type = shape.source_type.unwrap_or(SourceType::Text);
    if source_type.is_binary() {
        return Err(EngineError::validation(format!(
            "retrieval result {index}: inline text sources cannot have type '{source_type}'"
        )));
    }
    check_relevance(index, shape.relevance)?;
    Ok(Source {
        id: shape.id.map(SourceId::new).unwrap_or_else(SourceId::generate),
        title: shape
            .title
            .or(shape.source_name)
            .unwrap_or_else(|| format!("Source {}", index + 1)),
        source_type,
        relevance: shape.relevance,
        metadata: shape.metadata,
        highlights: Vec::new(),
        href: None,
        description: None,
        body: SourceBody::Inline { text: shape.text },
    })
}

fn reference_source(index: usize, shape: ReferenceShape) -> Result<Source, EngineError> {
    check_relevance(index, shape.relevance)?;
    let highlights = shape.highlights.unwrap_or_default();
    validate_highlights(&highlights)
        .map_err(|e| EngineError::validation(format!("retrieval result {index}: {e}")))?;
    let title = shape
        .title
        .or(shape.source_name)
        .or_else(|| shape.source_reference.clone())
        .unwrap_or_else(|| format!("Source {}", index + 1));
    Ok(Source {
        id: shape.id.map(SourceId::new).unwrap_or_else(SourceId::generate),
        title,
        source_type: shape.source_type,
        relevance: shape.relevance,
        metadata: shape.metadata,
        highlights,
        href: shape.href,
        description: shape.description,
        body: SourceBody::Reference {
            reference: shape.source_reference,
        },
    })
}

/// 校验并解析检索结果：必须是数组，每一项恰好匹配一种形状，id 不重复
pub fn validate_retrieval_results(raw: &Value) -> Result<Vec<Source>, EngineError> {
    let items = raw.as_array().ok_or_else(|| {
        EngineError::validation(
            "retrieval results must be an array of inline-text or reference sources",
        )
    })?;

    let mut sources = Vec::with_capacity(items.len());
    let mut seen = HashSet::new();

    for (index, item) in items.iter().enumerate() {
        let inline = serde_json::from_value::<InlineShape>(item.clone());
        let reference = serde_json::from_value::<ReferenceShape>(item.clone());

        let source = match (inline, reference) {
            (Ok(shape), Err(_)) => inline_source(index, shape)?,
            (Err(_), Ok(shape)) => reference_source(index, shape)?,
            (Ok(_), Ok(_)) => {
                return Err(EngineError::validation(format!(
                    "retrieval result {index} is ambiguous (matches both inline and reference shapes): {}",
                    preview(item)
                )))
            }
            (Err(inline_err), Err(reference_err)) => {
                return Err(EngineError::validation(format!(
                    "invalid retrieval result {index}: {} (as inline: {inline_err}; as reference: {reference_err})",
                    preview(item)
                )))
            }
        };

        if !seen.insert(source.id.clone()) {
            return Err(EngineError::validation(format!(
                "retrieval result {index}: duplicate source id '{}'",
                source.id
            )));
        }
        sources.push(source);
    }

    Ok(sources)
}

/// 校验 ContentLoader 返回的内容：类型一致、PDF 为字节、文本类为字符串、高亮合法
pub fn validate_source_content(source: &Source, content: &SourceContent) -> Result<(), EngineError> {
    if content.source_type != source.source_type {
        return Err(EngineError::validation(format!(
            "content for source '{}' has type '{}' but the source is '{}'",
            source.id, content.source_type, source.source_type
        )));
    }
    match (&content.data, content.source_type.is_binary()) {
        (SourceData::Bytes(_), true) | (SourceData::Text(_), false) => {}
        (SourceData::Text(_), true) => {
            return Err(EngineError::validation(format!(
                "{} content must be binary",
                content.source_type
            )))
        }
        (SourceData::Bytes(_), false) => {
            return Err(EngineError::validation(format!(
                "{} content must be text",
                content.source_type
            )))
        }
    }
    validate_highlights(&content.highlights)
}
