use crate::alert::AlertRule;
use crate::condition::{Comparison, HistogramStat, MetricQuery, ThresholdCondition};
use crate::domain::names;
use chrono::Duration;
use lumen_types::AlertSeverity;
use serde::{Deserialize, Serialize};

/// 配置文件中的阈值规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub severity: AlertSeverity,
    pub query: MetricQuery,
    pub comparison: Comparison,
    pub threshold: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_cooldown_secs() -> i64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    pub fn into_rule(self) -> AlertRule {
        let condition = ThresholdCondition::new(self.query, self.comparison, self.threshold);
        let mut rule = AlertRule::new(self.name, self.severity, condition)
            .with_cooldown(
                Duration::try_seconds(self.cooldown_secs.max(0)).unwrap_or(Duration::MAX),
            )
            .with_max_retries(self.max_retries)
            .enabled(self.enabled);
        if let Some(message) = self.message {
            rule = rule.with_message(message);
        }
        rule
    }
}

/// 业务指标的内置规则
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "webhook_success_rate_low",
            AlertSeverity::Warning,
            ThresholdCondition::new(MetricQuery::WebhookSuccessRate, Comparison::LessThan, 95.0),
        )
        .with_message("Webhook success rate dropped to {value}%")
        .with_cooldown(Duration::minutes(10)),
        AlertRule::new(
            "quota_write_failures_high",
            AlertSeverity::Critical,
            ThresholdCondition::new(
                MetricQuery::QuotaWriteFailureRate,
                Comparison::GreaterThan,
                5.0,
            ),
        )
        .with_message("Quota write failure rate is {value}%")
        .with_cooldown(Duration::minutes(5)),
        AlertRule::new(
            "conversion_latency_high",
            AlertSeverity::Warning,
            ThresholdCondition::new(
                MetricQuery::AggregatedHistogram {
                    name: names::CONVERSION_DURATION_MS.to_string(),
                    stat: HistogramStat::P95,
                },
                Comparison::GreaterThan,
                30_000.0,
            ),
        )
        .with_message("Conversion p95 latency is {value}ms")
        .with_cooldown(Duration::minutes(15)),
        AlertRule::new(
            "critical_errors",
            AlertSeverity::Critical,
            ThresholdCondition::new(
                MetricQuery::ErrorCount {
                    severity: "critical".to_string(),
                },
                Comparison::GreaterThan,
                0.0,
            ),
        )
        .with_message("{value} critical errors recorded")
        .with_cooldown(Duration::minutes(5)),
    ]
}
