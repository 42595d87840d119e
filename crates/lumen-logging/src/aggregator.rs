use crate::export::{self, ExportFormat};
use crate::index::LogIndex;
use crate::structured::{LogEntry, LogLevel};
use crate::LogError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// 日志聚合器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogAggregatorConfig {
    /// 保留的最大日志条数
    pub max_logs: usize,
    /// 每条消息最多索引的关键词数
    pub max_keywords: usize,
}

impl Default for LogAggregatorConfig {
    fn default() -> Self {
        Self {
            max_logs: 10_000,
            max_keywords: 10,
        }
    }
}

/// 搜索条件，各条件之间为 AND 关系
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub level: Option<LogLevel>,
    pub component: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            level: None,
            component: None,
            start_time: None,
            end_time: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl SearchOptions {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// 搜索结果（最新的在前）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub logs: Vec<LogEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// 统计时间范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Hour,
    Day,
    Week,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::Hour => Duration::hours(1),
            TimeRange::Day => Duration::days(1),
            TimeRange::Week => Duration::weeks(1),
        }
    }
}

impl FromStr for TimeRange {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeRange::Hour),
            "day" => Ok(TimeRange::Day),
            "week" => Ok(TimeRange::Week),
            other => Err(LogError::UnknownTimeRange(other.to_string())),
        }
    }
}

/// 时间窗口内的日志统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStats {
    pub time_range: TimeRange,
    pub total: usize,
    pub by_level: BTreeMap<LogLevel, usize>,
    pub by_component: BTreeMap<String, usize>,
}

/// 按追加序号读取的一批日志
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    pub logs: Vec<LogEntry>,
    /// 下一次读取的起始序号
    pub next_seq: u64,
}

struct Slot {
    seq: u64,
    entry: LogEntry,
}

struct LogBuffer {
    entries: VecDeque<Slot>,
    index: LogIndex,
    next_seq: u64,
}

/// 日志聚合器
///
/// 有界的追加式缓冲区，附带按级别、组件、关键词的倒排索引。
/// 超出容量时淘汰最早的条目，并从其参与的所有索引桶中撤回。
pub struct LogAggregator {
    buffer: Arc<RwLock<LogBuffer>>,
    max_logs: usize,
}

impl LogAggregator {
    pub fn new(config: LogAggregatorConfig) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(LogBuffer {
                entries: VecDeque::new(),
                index: LogIndex::new(config.max_keywords),
                next_seq: 0,
            })),
            max_logs: config.max_logs.max(1),
        }
    }

    /// 添加日志条目，返回其 id
    pub async fn add_log(&self, mut entry: LogEntry) -> String {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();

        let mut buffer = self.buffer.write().await;
        let seq = buffer.next_seq;
        buffer.next_seq += 1;
        buffer.index.insert(seq, &entry);
        buffer.entries.push_back(Slot { seq, entry });

        while buffer.entries.len() > self.max_logs {
            if let Some(evicted) = buffer.entries.pop_front() {
                buffer.index.remove(evicted.seq, &evicted.entry);
                debug!("Evicted log entry {}", evicted.entry.id);
            }
        }

        id
    }

    /// 按 id 查找；id 重复时返回最新的一条
    pub async fn get_log(&self, id: &str) -> Option<LogEntry> {
        let buffer = self.buffer.read().await;
        buffer
            .entries
            .iter()
            .rev()
            .find(|slot| slot.entry.id == id)
            .map(|slot| slot.entry.clone())
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResult {
        let buffer = self.buffer.read().await;

        // 先用索引缩小候选集
        let mut allowed: Option<HashSet<u64>> = None;
        if let Some(level) = options.level {
            allowed = Some(intersect(allowed, buffer.index.level(level)));
        }
        if let Some(component) = &options.component {
            allowed = Some(intersect(allowed, buffer.index.component(component)));
        }

        let needle = query.trim().to_lowercase();
        let mut matched: Vec<&LogEntry> = buffer
            .entries
            .iter()
            .rev()
            .filter(|slot| allowed.as_ref().map_or(true, |seqs| seqs.contains(&slot.seq)))
            .map(|slot| &slot.entry)
            .filter(|e| options.start_time.map_or(true, |start| e.timestamp >= start))
            .filter(|e| options.end_time.map_or(true, |end| e.timestamp <= end))
            .filter(|e| {
                needle.is_empty()
                    || e.message.to_lowercase().contains(&needle)
                    || e.metadata_json().to_lowercase().contains(&needle)
            })
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len();
        let logs: Vec<LogEntry> = matched
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .cloned()
            .collect();

        SearchResult {
            has_more: options.offset + logs.len() < total,
            logs,
            total,
            offset: options.offset,
            limit: options.limit,
        }
    }

    /// 通过关键词索引查找，最新的在前
    pub async fn search_keyword(&self, keyword: &str) -> Vec<LogEntry> {
        let buffer = self.buffer.read().await;
        let Some(seqs) = buffer.index.keyword(keyword) else {
            return Vec::new();
        };
        buffer
            .entries
            .iter()
            .rev()
            .filter(|slot| seqs.contains(&slot.seq))
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub async fn get_log_stats(&self, range: TimeRange) -> LogStats {
        self.get_log_stats_at(range, Utc::now()).await
    }

    pub async fn get_log_stats_at(&self, range: TimeRange, now: DateTime<Utc>) -> LogStats {
        let buffer = self.buffer.read().await;
        let since = now
            .checked_sub_signed(range.duration())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut stats = LogStats {
            time_range: range,
            total: 0,
            by_level: BTreeMap::new(),
            by_component: BTreeMap::new(),
        };

        for entry in buffer
            .entries
            .iter()
            .map(|slot| &slot.entry)
            .filter(|e| e.timestamp >= since)
        {
            stats.total += 1;
            *stats.by_level.entry(entry.level).or_insert(0) += 1;
            *stats.by_component.entry(entry.component.clone()).or_insert(0) += 1;
        }

        stats
    }

    /// 导出全部日志，顺序与 `search` 相同（最新的在前）
    pub async fn export_logs(&self, format: ExportFormat) -> Result<String, LogError> {
        let buffer = self.buffer.read().await;
        let mut entries: Vec<LogEntry> = buffer
            .entries
            .iter()
            .rev()
            .map(|slot| slot.entry.clone())
            .collect();
        drop(buffer);

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        export::render(&entries, format)
    }

    pub async fn cleanup(&self, older_than_hours: i64) -> usize {
        self.cleanup_at(older_than_hours, Utc::now()).await
    }

    /// 删除早于截止时间的日志并重建索引，返回删除条数
    ///
    /// 负数按 0 处理；超出时间范围的保留时长不删除任何条目。
    pub async fn cleanup_at(&self, older_than_hours: i64, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = Duration::try_hours(older_than_hours.max(0))
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            debug!("Log retention of {} hours exceeds the time range, nothing to clean", older_than_hours);
            return 0;
        };
        let mut buffer = self.buffer.write().await;

        let before = buffer.entries.len();
        buffer.entries.retain(|slot| slot.entry.timestamp >= cutoff);
        let removed = before - buffer.entries.len();

        let LogBuffer { entries, index, .. } = &mut *buffer;
        index.rebuild(entries.iter().map(|slot| (slot.seq, &slot.entry)));

        if removed > 0 {
            info!("Log cleanup removed {} entries, remaining: {}", removed, entries.len());
        }
        removed
    }

    /// 时间戳晚于 `after` 的日志，按追加顺序
    pub async fn logs_since(&self, after: Option<DateTime<Utc>>) -> Vec<LogEntry> {
        let buffer = self.buffer.read().await;
        buffer
            .entries
            .iter()
            .map(|slot| &slot.entry)
            .filter(|e| after.map_or(true, |after| e.timestamp > after))
            .cloned()
            .collect()
    }

    /// 追加序号不小于 `from_seq` 的日志，按追加顺序
    ///
    /// 序号在 `add_log` 时分配，与条目自带的时间戳无关。
    pub async fn logs_from(&self, from_seq: u64) -> LogBatch {
        let buffer = self.buffer.read().await;
        let logs = buffer
            .entries
            .iter()
            .filter(|slot| slot.seq >= from_seq)
            .map(|slot| slot.entry.clone())
            .collect();
        LogBatch {
            logs,
            next_seq: buffer.next_seq,
        }
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new(LogAggregatorConfig::default())
    }
}

fn intersect(current: Option<HashSet<u64>>, postings: Option<&HashSet<u64>>) -> HashSet<u64> {
    let Some(postings) = postings else {
        return HashSet::new();
    };
    match current {
        Some(current) => current.into_iter().filter(|seq| postings.contains(seq)).collect(),
        None => postings.clone(),
    }
}
