pub mod alert;
pub mod condition;
pub mod domain;
pub mod key;
pub mod rules;
pub mod store;
pub mod timer;

pub use alert::{AlertEngine, AlertEngineConfig, AlertMessage, AlertRule, AlertStats, RuleSummary};
pub use condition::{AlertCondition, Comparison, HistogramStat, MetricQuery, RuleError, ThresholdCondition};
pub use domain::{failure_rate, names, success_rate};
pub use key::MetricKey;
pub use rules::{default_rules, RuleConfig};
pub use store::{HistogramStats, MetricStore, MetricStoreConfig, MetricsSnapshot, Sample};
pub use timer::TimerHandle;
