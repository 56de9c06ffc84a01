//! 检索来源：数据模型、状态机与校验

pub mod state;
pub mod types;
pub mod validation;

pub use state::{SourceFilter, SourceLoadState, SourceState};
pub use types::{
    Highlight, Metadata, Rect, Source, SourceBody, SourceContent, SourceData, SourceId, SourceType,
};
pub use validation::{validate_highlights, validate_retrieval_results, validate_source_content};
