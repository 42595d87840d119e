use crate::structured::{extract_keywords, LogEntry, LogLevel};
use std::collections::{HashMap, HashSet};

/// 倒排索引：级别、组件、关键词 -> 追加序号
///
/// 键为缓冲区分配的追加序号，与条目 id 无关。
#[derive(Debug, Default)]
pub struct LogIndex {
    by_level: HashMap<LogLevel, HashSet<u64>>,
    by_component: HashMap<String, HashSet<u64>>,
    by_keyword: HashMap<String, HashSet<u64>>,
    max_keywords: usize,
}

impl LogIndex {
    pub fn new(max_keywords: usize) -> Self {
        Self {
            max_keywords,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, seq: u64, entry: &LogEntry) {
        self.by_level.entry(entry.level).or_default().insert(seq);
        self.by_component
            .entry(entry.component.clone())
            .or_default()
            .insert(seq);
        for keyword in extract_keywords(&entry.message, self.max_keywords) {
            self.by_keyword.entry(keyword).or_default().insert(seq);
        }
    }

    /// 从每个参与过的桶中撤回条目，空桶一并删除
    pub fn remove(&mut self, seq: u64, entry: &LogEntry) {
        retract(&mut self.by_level, &entry.level, seq);
        retract(&mut self.by_component, &entry.component, seq);
        for keyword in extract_keywords(&entry.message, self.max_keywords) {
            retract(&mut self.by_keyword, &keyword, seq);
        }
    }

    pub fn rebuild<'a>(&mut self, entries: impl IntoIterator<Item = (u64, &'a LogEntry)>) {
        self.by_level.clear();
        self.by_component.clear();
        self.by_keyword.clear();
        for (seq, entry) in entries {
            self.insert(seq, entry);
        }
    }

    pub fn level(&self, level: LogLevel) -> Option<&HashSet<u64>> {
        self.by_level.get(&level)
    }

    pub fn component(&self, component: &str) -> Option<&HashSet<u64>> {
        self.by_component.get(component)
    }

    pub fn keyword(&self, keyword: &str) -> Option<&HashSet<u64>> {
        self.by_keyword.get(&keyword.to_lowercase())
    }

    /// 所有桶中的投递总数
    pub fn postings(&self) -> usize {
        bucket_sizes(&self.by_level)
            + bucket_sizes(&self.by_component)
            + bucket_sizes(&self.by_keyword)
    }
}

fn bucket_sizes<K>(index: &HashMap<K, HashSet<u64>>) -> usize {
    index.values().map(HashSet::len).sum()
}

fn retract<K>(index: &mut HashMap<K, HashSet<u64>>, key: &K, seq: u64)
where
    K: std::hash::Hash + Eq,
{
    if let Some(seqs) = index.get_mut(key) {
        seqs.remove(&seq);
        if seqs.is_empty() {
            index.remove(key);
        }
    }
}
