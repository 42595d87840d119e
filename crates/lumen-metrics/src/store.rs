use crate::key::MetricKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::AtomicU64;
use tracing::debug;

/// 指标存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricStoreConfig {
    /// 每个直方图保留的最大样本数
    pub histogram_window: usize,
    /// 同时存在的计时器上限，超出时丢弃最早启动的
    pub max_active_timers: usize,
}

impl Default for MetricStoreConfig {
    fn default() -> Self {
        Self {
            histogram_window: 1000,
            max_active_timers: 10_000,
        }
    }
}

/// 直方图样本
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// 直方图统计（基于当前窗口）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

impl HistogramStats {
    /// 由样本值计算统计；百分位采用最近秩 `sorted[floor(count * q)]`
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        values.sort_by(|a, b| a.total_cmp(b));
        let count = values.len();
        let sum: f64 = values.iter().sum();

        Self {
            count,
            min: values[0],
            max: values[count - 1],
            avg: sum / count as f64,
            p95: values[nearest_rank(count, 0.95)],
            p99: values[nearest_rank(count, 0.99)],
        }
    }
}

fn nearest_rank(count: usize, quantile: f64) -> usize {
    ((count as f64 * quantile).floor() as usize).min(count - 1)
}

/// 全量指标快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramStats>,
}

pub(crate) struct ActiveTimer {
    pub(crate) key: MetricKey,
    pub(crate) started: std::time::Instant,
}

/// 指标存储
///
/// 计数器与有界直方图按规范化键保存。所有记录操作都是同步的，
/// 可以从任意线程调用。
pub struct MetricStore {
    counters: DashMap<MetricKey, u64>,
    histograms: DashMap<MetricKey, VecDeque<Sample>>,
    pub(crate) timers: DashMap<u64, ActiveTimer>,
    pub(crate) next_timer_id: AtomicU64,
    pub(crate) max_active_timers: usize,
    window_size: usize,
}

impl MetricStore {
    pub fn new(config: MetricStoreConfig) -> Self {
        Self {
            counters: DashMap::new(),
            histograms: DashMap::new(),
            timers: DashMap::new(),
            next_timer_id: AtomicU64::new(1),
            max_active_timers: config.max_active_timers.max(1),
            window_size: config.histogram_window.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    // 计数器

    pub fn increment_counter(&self, name: &str, delta: u64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut value = self.counters.entry(key).or_insert(0);
        *value = value.saturating_add(delta);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.get_counter_by_key(&MetricKey::new(name, labels))
    }

    pub fn get_counter_by_key(&self, key: &MetricKey) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    /// 汇总同名计数器的所有标签变体
    pub fn get_aggregated_counter(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|entry| entry.key().name() == name)
            .fold(0u64, |acc, entry| acc.saturating_add(*entry.value()))
    }

    pub fn counters_named(&self, name: &str) -> Vec<(MetricKey, u64)> {
        self.counters
            .iter()
            .filter(|entry| entry.key().name() == name)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn reset_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        if self.counters.remove(&key).is_some() {
            debug!("Counter reset: {}", key);
        }
    }

    // 直方图

    /// 追加样本，超出窗口时淘汰最早的样本；非有限值被忽略
    pub fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.record_histogram_by_key(MetricKey::new(name, labels), value);
    }

    pub(crate) fn record_histogram_by_key(&self, key: MetricKey, value: f64) {
        if !value.is_finite() {
            debug!("Ignoring non-finite sample for {}", key);
            return;
        }

        let mut samples = self.histograms.entry(key).or_default();
        samples.push_back(Sample {
            value,
            timestamp: Utc::now(),
        });
        while samples.len() > self.window_size {
            samples.pop_front();
        }
    }

    pub fn get_histogram_stats(&self, name: &str, labels: &[(&str, &str)]) -> HistogramStats {
        self.get_histogram_stats_by_key(&MetricKey::new(name, labels))
    }

    pub fn get_histogram_stats_by_key(&self, key: &MetricKey) -> HistogramStats {
        let values = self
            .histograms
            .get(key)
            .map(|samples| samples.iter().map(|s| s.value).collect())
            .unwrap_or_default();
        HistogramStats::from_values(values)
    }

    /// 合并同名直方图所有标签变体的窗口后计算统计
    pub fn get_aggregated_histogram_stats(&self, name: &str) -> HistogramStats {
        let values = self
            .histograms
            .iter()
            .filter(|entry| entry.key().name() == name)
            .flat_map(|entry| entry.value().iter().map(|s| s.value).collect::<Vec<_>>())
            .collect();
        HistogramStats::from_values(values)
    }

    pub fn histogram_samples(&self, name: &str, labels: &[(&str, &str)]) -> Vec<Sample> {
        self.histograms
            .get(&MetricKey::new(name, labels))
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 导出所有计数器与直方图统计，键为规范化字符串
    pub fn get_all_metrics(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();

        let histograms = self
            .histograms
            .iter()
            .map(|entry| {
                let values = entry.value().iter().map(|s| s.value).collect();
                (entry.key().to_string(), HistogramStats::from_values(values))
            })
            .collect();

        MetricsSnapshot {
            timestamp: Utc::now(),
            counters,
            histograms,
        }
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(MetricStoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_sums_exact_label_set() {
        let store = MetricStore::default();

        store.increment_counter("requests", 1, &[("method", "GET")]);
        store.increment_counter("requests", 4, &[("method", "GET")]);
        store.increment_counter("requests", 2, &[("method", "POST")]);

        assert_eq!(store.get_counter("requests", &[("method", "GET")]), 5);
        assert_eq!(store.get_counter("requests", &[("method", "POST")]), 2);
        assert_eq!(store.get_counter("requests", &[]), 0);
        assert_eq!(store.get_counter("missing", &[]), 0);
    }

    #[test]
    fn test_label_order_hits_same_counter() {
        let store = MetricStore::default();

        store.increment_counter("jobs", 1, &[("a", "1"), ("b", "2")]);
        store.increment_counter("jobs", 1, &[("b", "2"), ("a", "1")]);

        assert_eq!(store.get_counter("jobs", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn test_aggregated_counter_matches_name_only() {
        let store = MetricStore::default();

        store.increment_counter("webhook", 3, &[("event", "a")]);
        store.increment_counter("webhook", 2, &[("event", "b")]);
        store.increment_counter("webhook", 1, &[]);
        store.increment_counter("webhook_failures", 10, &[]);

        assert_eq!(store.get_aggregated_counter("webhook"), 6);
        assert_eq!(store.get_aggregated_counter("webhook_failures"), 10);
    }

    #[test]
    fn test_reset_counter() {
        let store = MetricStore::default();
        store.increment_counter("retries", 7, &[]);
        store.reset_counter("retries", &[]);
        assert_eq!(store.get_counter("retries", &[]), 0);
    }

    #[test]
    fn test_histogram_window_keeps_most_recent() {
        let store = MetricStore::new(MetricStoreConfig {
            histogram_window: 1000,
            ..Default::default()
        });

        for i in 0..1005 {
            store.record_histogram("latency", i as f64, &[]);
        }

        let samples = store.histogram_samples("latency", &[]);
        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0].value, 5.0);
        assert_eq!(samples[999].value, 1004.0);

        let stats = store.get_histogram_stats("latency", &[]);
        assert_eq!(stats.count, 1000);
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 1004.0);
    }

    #[test]
    fn test_empty_histogram_stats_are_zero() {
        let store = MetricStore::default();
        let stats = store.get_histogram_stats("nothing", &[]);

        assert_eq!(stats, HistogramStats::default());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.p99, 0.0);
        assert_eq!(store.get_aggregated_histogram_stats("nothing").count, 0);
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        // 10 个样本：floor(10 * 0.95) = 9，floor(10 * 0.99) = 9
        let stats = HistogramStats::from_values((1..=10).map(|v| v as f64).collect());
        assert_eq!(stats.p95, 10.0);
        assert_eq!(stats.p99, 10.0);
        assert_eq!(stats.avg, 5.5);

        // 100 个样本：索引 95 和 99
        let stats = HistogramStats::from_values((0..100).rev().map(|v| v as f64).collect());
        assert_eq!(stats.p95, 95.0);
        assert_eq!(stats.p99, 99.0);
        assert_eq!(stats.min, 0.0);
    }

    #[test]
    fn test_aggregated_histogram_unions_variants() {
        let store = MetricStore::default();

        store.record_histogram("db_query_ms", 10.0, &[("table", "users")]);
        store.record_histogram("db_query_ms", 30.0, &[("table", "orders")]);
        store.record_histogram("db_query_ms_other", 1000.0, &[]);

        let stats = store.get_aggregated_histogram_stats("db_query_ms");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.avg, 20.0);
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let store = MetricStore::default();
        store.record_histogram("latency", f64::NAN, &[]);
        store.record_histogram("latency", f64::INFINITY, &[]);
        store.record_histogram("latency", 2.0, &[]);

        assert_eq!(store.get_histogram_stats("latency", &[]).count, 1);
    }

    #[test]
    fn test_get_all_metrics_snapshot() {
        let store = MetricStore::default();
        store.increment_counter("errors", 2, &[("component", "auth")]);
        store.record_histogram("latency", 5.0, &[]);

        let snapshot = store.get_all_metrics();
        assert_eq!(snapshot.counters.get("errors{component=\"auth\"}"), Some(&2));
        assert_eq!(snapshot.histograms.get("latency").map(|s| s.count), Some(1));
    }
}
