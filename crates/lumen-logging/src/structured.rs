use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// 结构化日志条目
///
/// 追加到聚合器后不可变。`id` 为空时由聚合器分配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub id: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    pub level: LogLevel,

    /// 产生日志的组件
    pub component: String,

    pub message: String,

    /// 自定义字段
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn debug(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, component, message)
    }

    pub fn info(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, component, message)
    }

    pub fn warn(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, component, message)
    }

    pub fn error(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, component, message)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 提取关键词：小写、去标点、长度大于 2，最多 `limit` 个
pub fn extract_keywords(message: &str, limit: usize) -> Vec<String> {
    let cleaned: String = message
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    let mut keywords: Vec<String> = Vec::new();
    for word in cleaned.split_whitespace() {
        if keywords.len() >= limit {
            break;
        }
        if word.chars().count() > 2 && !keywords.iter().any(|k| k == word) {
            keywords.push(word.to_string());
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_creation() {
        let entry = LogEntry::info("auth", "User signed in")
            .with_field("user_id", serde_json::json!("user-123"));

        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.component, "auth");
        assert!(entry.id.is_empty());
        assert_eq!(entry.metadata_json(), r#"{"user_id":"user-123"}"#);
    }

    #[test]
    fn test_log_entry_json_defaults() {
        let entry: LogEntry =
            serde_json::from_str(r#"{"level":"warn","component":"billing","message":"retrying"}"#)
                .unwrap();

        assert_eq!(entry.level, LogLevel::Warn);
        assert!(entry.id.is_empty());
        assert!(entry.metadata.is_empty());
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("Payment FAILED: card declined, retry in 5s!", 10);
        assert_eq!(keywords, vec!["payment", "failed", "card", "declined", "retry"]);
    }

    #[test]
    fn test_extract_keywords_limit() {
        let message = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima";
        assert_eq!(extract_keywords(message, 10).len(), 10);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("fatal".parse::<LogLevel>().is_err());
    }
}
