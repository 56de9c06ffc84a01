//! 来源状态：检索到的来源、激活集合、选中项、懒加载缓存
//!
//! 每个来源的内容状态：Unresolved → Loading → Resolved | Failed（可重试）。
//! 内联来源视为已解析；已解析的内容除非显式失效，否则不会重新加载。
//! 过滤条件只影响展示视图（visible_sources），不改变激活集合。

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::types::{Source, SourceContent, SourceId};

/// 单个来源的内容加载状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLoadState {
    Unresolved,
    Loading,
    Resolved,
    Failed,
}

/// 来源视图的过滤条件
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum SourceFilter {
    /// 只保留指定 id
    Ids(Vec<SourceId>),
    /// 标题或 id 包含该文本（不区分大小写）
    Text(String),
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        match self {
            SourceFilter::Ids(ids) => ids.contains(&source.id),
            SourceFilter::Text(needle) => {
                let needle = needle.to_lowercase();
                source.title.to_lowercase().contains(&needle)
                    || source.id.as_str().to_lowercase().contains(&needle)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SourceState {
    /// 最近一次检索的来源（按相关度顺序）
    pub sources: Vec<Source>,
    /// None 表示「全部来源」
    pub active_ids: Option<Vec<SourceId>>,
    pub selected_id: Option<SourceId>,
    pub filter: Option<SourceFilter>,
    /// 懒加载得到的内容缓存
    #[serde(skip)]
    pub contents: HashMap<SourceId, SourceContent>,
    /// 正在加载的来源（瞬态）
    pub loading_id: Option<SourceId>,
    pub failed: HashSet<SourceId>,
}

impl SourceState {
    pub fn get(&self, id: &SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.get(id).is_some()
    }

    /// 交给生成协作方的来源
    pub fn active_sources(&self) -> Vec<Source> {
        match &self.active_ids {
            None => self.sources.clone(),
            Some(ids) => self
                .sources
                .iter()
                .filter(|s| ids.contains(&s.id))
                .cloned()
                .collect(),
        }
    }

    /// 应用过滤条件后的来源；无过滤时即全部来源
    pub fn visible_sources(&self) -> Vec<Source> {
        match &self.filter {
            None => self.sources.clone(),
            Some(filter) => self
                .sources
                .iter()
                .filter(|s| filter.matches(s))
                .cloned()
                .collect(),
        }
    }

    pub fn selected_source(&self) -> Option<&Source> {
        self.selected_id.as_ref().and_then(|id| self.get(id))
    }

    /// 选中来源的内容：缓存优先，内联来源直接生成
    pub fn selected_content(&self) -> Option<SourceContent> {
        let source = self.selected_source()?;
        self.contents
            .get(&source.id)
            .cloned()
            .or_else(|| source.inline_content())
    }

    /// 是否无需加载即可得到内容
    pub fn is_resolved(&self, id: &SourceId) -> bool {
        self.contents.contains_key(id) || self.get(id).map(Source::is_inline).unwrap_or(false)
    }

    pub fn load_state(&self, id: &SourceId) -> SourceLoadState {
        if self.loading_id.as_ref() == Some(id) {
            SourceLoadState::Loading
        } else if self.is_resolved(id) {
            SourceLoadState::Resolved
        } else if self.failed.contains(id) {
            SourceLoadState::Failed
        } else {
            SourceLoadState::Unresolved
        }
    }

    /// 新的检索结果整体替换旧来源，并重置激活、选中与缓存
    pub fn replace_sources(&mut self, sources: Vec<Source>) {
        self.sources = sources;
        self.reset_derived();
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.reset_derived();
    }

    fn reset_derived(&mut self) {
        self.active_ids = None;
        self.selected_id = None;
        self.filter = None;
        self.contents.clear();
        self.loading_id = None;
        self.failed.clear();
    }

    /// 丢弃缓存内容，下次选中时重新加载
    pub fn invalidate(&mut self, id: &SourceId) {
        self.contents.remove(id);
        self.failed.remove(id);
        if self.selected_id.as_ref() == Some(id) {
            self.selected_id = None;
        }
    }
}
