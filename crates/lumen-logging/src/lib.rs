//! 结构化日志聚合：有界缓冲区、倒排索引、搜索、统计与导出

pub mod aggregator;
pub mod export;
pub mod index;
pub mod structured;

pub use aggregator::{
    LogAggregator, LogAggregatorConfig, LogBatch, LogStats, SearchOptions, SearchResult, TimeRange,
};
pub use export::ExportFormat;
pub use index::LogIndex;
pub use structured::{extract_keywords, LogEntry, LogLevel};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Unknown time range: {0}")]
    UnknownTimeRange(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
