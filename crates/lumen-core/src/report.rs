use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use lumen_logging::{LogAggregator, TimeRange};
use lumen_metrics::{names, AlertEngine, MetricStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// 报告章节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSection {
    Metrics,
    Webhooks,
    Quota,
    Conversions,
    Alerts,
    Logs,
    Health,
}

impl ReportSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSection::Metrics => "metrics",
            ReportSection::Webhooks => "webhooks",
            ReportSection::Quota => "quota",
            ReportSection::Conversions => "conversions",
            ReportSection::Alerts => "alerts",
            ReportSection::Logs => "logs",
            ReportSection::Health => "health",
        }
    }
}

impl fmt::Display for ReportSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportSection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "metrics" => Ok(ReportSection::Metrics),
            "webhooks" => Ok(ReportSection::Webhooks),
            "quota" => Ok(ReportSection::Quota),
            "conversions" => Ok(ReportSection::Conversions),
            "alerts" => Ok(ReportSection::Alerts),
            "logs" => Ok(ReportSection::Logs),
            "health" => Ok(ReportSection::Health),
            other => Err(CoreError::UnknownReportSection(other.to_string())),
        }
    }
}

/// 生成的报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub system: String,
    pub generated_at: DateTime<Utc>,
    pub sections: serde_json::Map<String, serde_json::Value>,
}

/// 报告生成器，只读取各组件的统计结果
pub struct ReportGenerator {
    system: String,
    sections: Vec<ReportSection>,
    store: Arc<MetricStore>,
    logs: Arc<LogAggregator>,
    alerts: Arc<AlertEngine>,
}

impl ReportGenerator {
    /// 章节名未知时返回配置错误
    pub fn new(
        system: impl Into<String>,
        sections: &[String],
        store: Arc<MetricStore>,
        logs: Arc<LogAggregator>,
        alerts: Arc<AlertEngine>,
    ) -> Result<Self> {
        let sections = sections
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<ReportSection>>>()?;

        Ok(Self {
            system: system.into(),
            sections,
            store,
            logs,
            alerts,
        })
    }

    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    pub async fn generate(&self) -> Result<Report> {
        self.generate_at(Utc::now()).await
    }

    pub async fn generate_at(&self, now: DateTime<Utc>) -> Result<Report> {
        let mut sections = serde_json::Map::new();
        for section in &self.sections {
            let value = self.render(*section, now).await?;
            sections.insert(section.to_string(), value);
        }

        Ok(Report {
            id: Uuid::new_v4().to_string(),
            system: self.system.clone(),
            generated_at: now,
            sections,
        })
    }

    async fn render(&self, section: ReportSection, now: DateTime<Utc>) -> Result<serde_json::Value> {
        let store = &self.store;
        let value = match section {
            ReportSection::Metrics => serde_json::to_value(store.get_all_metrics())?,
            ReportSection::Webhooks => serde_json::json!({
                "success_rate": store.get_webhook_success_rate(),
                "successes": store.get_aggregated_counter(names::WEBHOOK_SUCCESS_TOTAL),
                "failures": store.get_aggregated_counter(names::WEBHOOK_FAILURE_TOTAL),
                "processing_ms": store.get_aggregated_histogram_stats(names::WEBHOOK_PROCESSING_MS),
            }),
            ReportSection::Quota => serde_json::json!({
                "write_failure_rate": store.get_quota_write_failure_rate(),
                "utilization_percent": store.get_quota_utilization(),
                "write_duration_ms": store.get_aggregated_histogram_stats(names::QUOTA_WRITE_DURATION_MS),
            }),
            ReportSection::Conversions => serde_json::json!({
                "success_rate": store.get_conversion_success_rate(),
                "total": store.get_aggregated_counter(names::CONVERSIONS_TOTAL),
                "bytes": store.get_aggregated_counter(names::CONVERSION_BYTES_TOTAL),
                "duration_ms": store.get_aggregated_histogram_stats(names::CONVERSION_DURATION_MS),
            }),
            ReportSection::Alerts => serde_json::json!({
                "stats": serde_json::to_value(self.alerts.get_alert_stats_at(now).await)?,
                "active": serde_json::to_value(self.alerts.get_active_alerts().await)?,
            }),
            ReportSection::Logs => {
                serde_json::to_value(self.logs.get_log_stats_at(TimeRange::Day, now).await)?
            }
            ReportSection::Health => serde_json::json!({
                "status": self.alerts.get_system_health().await,
            }),
        };
        Ok(value)
    }
}
