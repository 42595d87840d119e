use crate::key::MetricKey;
use crate::store::{HistogramStats, MetricStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 规则评估错误
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Rule evaluation panicked: {0}")]
    Panicked(String),
}

/// 告警条件：针对指标存储当前状态的谓词
pub trait AlertCondition: Send + Sync {
    fn check(&self, store: &MetricStore) -> Result<bool, RuleError>;

    /// 条件观测到的当前值，用于消息模板中的 `{value}`
    fn current_value(&self, _store: &MetricStore) -> Option<f64> {
        None
    }

    fn describe(&self) -> String {
        "custom condition".to_string()
    }
}

impl<F> AlertCondition for F
where
    F: Fn(&MetricStore) -> Result<bool, RuleError> + Send + Sync,
{
    fn check(&self, store: &MetricStore) -> Result<bool, RuleError> {
        self(store)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
}

impl Comparison {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistogramStat {
    Count,
    Min,
    Max,
    Avg,
    P95,
    P99,
}

impl HistogramStat {
    fn pick(&self, stats: &HistogramStats) -> f64 {
        match self {
            HistogramStat::Count => stats.count as f64,
            HistogramStat::Min => stats.min,
            HistogramStat::Max => stats.max,
            HistogramStat::Avg => stats.avg,
            HistogramStat::P95 => stats.p95,
            HistogramStat::P99 => stats.p99,
        }
    }
}

/// 从指标存储中读取一个数值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricQuery {
    Counter {
        name: String,
        #[serde(default)]
        labels: BTreeMap<String, String>,
    },
    AggregatedCounter {
        name: String,
    },
    Histogram {
        name: String,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        stat: HistogramStat,
    },
    AggregatedHistogram {
        name: String,
        stat: HistogramStat,
    },
    WebhookSuccessRate,
    QuotaWriteFailureRate,
    QuotaUtilization,
    ConversionSuccessRate,
    ErrorCount {
        severity: String,
    },
}

impl MetricQuery {
    pub fn read(&self, store: &MetricStore) -> f64 {
        match self {
            MetricQuery::Counter { name, labels } => {
                store.get_counter_by_key(&MetricKey::from_map(name, labels)) as f64
            }
            MetricQuery::AggregatedCounter { name } => store.get_aggregated_counter(name) as f64,
            MetricQuery::Histogram { name, labels, stat } => {
                stat.pick(&store.get_histogram_stats_by_key(&MetricKey::from_map(name, labels)))
            }
            MetricQuery::AggregatedHistogram { name, stat } => {
                stat.pick(&store.get_aggregated_histogram_stats(name))
            }
            MetricQuery::WebhookSuccessRate => store.get_webhook_success_rate(),
            MetricQuery::QuotaWriteFailureRate => store.get_quota_write_failure_rate(),
            MetricQuery::QuotaUtilization => store.get_quota_utilization(),
            MetricQuery::ConversionSuccessRate => store.get_conversion_success_rate(),
            MetricQuery::ErrorCount { severity } => store.get_error_count(severity) as f64,
        }
    }

    fn label(&self) -> String {
        match self {
            MetricQuery::Counter { name, .. } | MetricQuery::AggregatedCounter { name } => {
                name.clone()
            }
            MetricQuery::Histogram { name, stat, .. }
            | MetricQuery::AggregatedHistogram { name, stat } => {
                format!("{}.{:?}", name, stat).to_lowercase()
            }
            MetricQuery::WebhookSuccessRate => "webhook_success_rate".to_string(),
            MetricQuery::QuotaWriteFailureRate => "quota_write_failure_rate".to_string(),
            MetricQuery::QuotaUtilization => "quota_utilization".to_string(),
            MetricQuery::ConversionSuccessRate => "conversion_success_rate".to_string(),
            MetricQuery::ErrorCount { severity } => format!("errors[{}]", severity),
        }
    }
}

/// 阈值告警条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    pub query: MetricQuery,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl ThresholdCondition {
    pub fn new(query: MetricQuery, comparison: Comparison, threshold: f64) -> Self {
        Self {
            query,
            comparison,
            threshold,
        }
    }
}

impl AlertCondition for ThresholdCondition {
    fn check(&self, store: &MetricStore) -> Result<bool, RuleError> {
        let value = self.query.read(store);
        if value.is_nan() {
            return Err(RuleError::Evaluation(format!(
                "{} produced NaN",
                self.query.label()
            )));
        }
        Ok(self.comparison.apply(value, self.threshold))
    }

    fn current_value(&self, store: &MetricStore) -> Option<f64> {
        Some(self.query.read(store))
    }

    fn describe(&self) -> String {
        format!(
            "{} {} {}",
            self.query.label(),
            self.comparison.symbol(),
            self.threshold
        )
    }
}
