use crate::error::{CoreError, Result};
use crate::report::ReportGenerator;
use chrono::{DateTime, Utc};
use lumen_config::GlobalConfig;
use lumen_logging::{LogAggregator, LogLevel, TimeRange};
use lumen_metrics::{default_rules, AlertEngine, MetricStore};
use lumen_notify::{HttpTransport, NotificationDispatcher, Transport};
use lumen_types::{Alert, AlertSeverity, SystemHealth};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// 健康概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: SystemHealth,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub error_logs_last_hour: usize,
    pub timestamp: DateTime<Utc>,
}

/// 可观测性服务集合
///
/// 所有组件由配置显式构造并以 `Arc` 共享，不依赖全局状态。
pub struct Observability {
    config: GlobalConfig,
    store: Arc<MetricStore>,
    logs: Arc<LogAggregator>,
    alerts: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    transport: Arc<dyn Transport>,
    alert_rx: Mutex<Option<mpsc::UnboundedReceiver<Alert>>>,
}

impl Observability {
    pub async fn build(config: GlobalConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MetricStore::new(config.metrics.clone()));
        let logs = Arc::new(LogAggregator::new(config.logging.aggregator()));

        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let alerts = Arc::new(
            AlertEngine::new(store.clone(), config.alerts.engine()).with_sink(alert_tx),
        );
        if config.alerts.default_rules {
            for rule in default_rules() {
                alerts.add_rule(rule).await;
            }
        }
        for rule in &config.alerts.rules {
            alerts.add_rule(rule.clone().into_rule()).await;
        }

        let dispatcher = Arc::new(NotificationDispatcher::new(
            config.notifications.clone(),
            transport.clone(),
        )?);

        info!(
            system = %config.system.name,
            "Observability services ready ({} rules, {} channels)",
            alerts.rule_count().await,
            config.notifications.channels.len()
        );

        Ok(Self {
            config,
            store,
            logs,
            alerts,
            dispatcher,
            transport,
            alert_rx: Mutex::new(Some(alert_rx)),
        })
    }

    /// 使用 HTTP 投递构建
    pub async fn with_http_transport(config: GlobalConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.shipping.timeout_secs);
        let transport = Arc::new(HttpTransport::new(timeout)?);
        Self::build(config, transport).await
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn logs(&self) -> &Arc<LogAggregator> {
        &self.logs
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 启动分发任务，消费告警引擎产生的告警；只能启动一次
    pub async fn spawn_dispatcher(&self) -> Result<JoinHandle<()>> {
        let rx = self
            .alert_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| CoreError::Internal("dispatcher already started".to_string()))?;
        Ok(tokio::spawn(self.dispatcher.clone().run(rx)))
    }

    pub fn report_generator(&self) -> Result<ReportGenerator> {
        ReportGenerator::new(
            self.config.system.name.clone(),
            &self.config.reports.sections,
            self.store.clone(),
            self.logs.clone(),
            self.alerts.clone(),
        )
    }

    pub async fn health(&self) -> HealthReport {
        self.health_at(Utc::now()).await
    }

    /// 告警推导的状态；没有活跃告警但最近一小时有错误日志时降为 warning
    pub async fn health_at(&self, now: DateTime<Utc>) -> HealthReport {
        let active = self.alerts.get_active_alerts().await;
        let log_stats = self.logs.get_log_stats_at(TimeRange::Hour, now).await;
        let error_logs = log_stats
            .by_level
            .get(&LogLevel::Error)
            .copied()
            .unwrap_or(0);

        let mut status = SystemHealth::from_alerts(&active);
        if status == SystemHealth::Healthy && error_logs > 0 {
            status = SystemHealth::Warning;
        }

        HealthReport {
            status,
            active_alerts: active.len(),
            critical_alerts: active
                .iter()
                .filter(|a| a.severity == AlertSeverity::Critical)
                .count(),
            error_logs_last_hour: error_logs,
            timestamp: now,
        }
    }
}
