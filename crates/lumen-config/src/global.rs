use anyhow::{anyhow, Result};
use chrono::Duration;
use lumen_logging::LogAggregatorConfig;
use lumen_metrics::{AlertEngineConfig, MetricStoreConfig, RuleConfig};
use lumen_notify::{Channel, DispatcherConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 全局配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub system: SystemConfig,
    pub metrics: MetricStoreConfig,
    pub logging: LoggingConfig,
    pub alerts: AlertsConfig,
    pub notifications: DispatcherConfig,
    pub shipping: ShippingConfig,
    pub reports: ReportsConfig,
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    pub environment: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "lumen".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// 日志配置：聚合器容量与进程日志输出
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_logs: usize,
    pub max_keywords: usize,
    /// `RUST_LOG` 未设置时使用的过滤指令
    pub level: String,
    /// 以 JSON 格式输出
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let aggregator = LogAggregatorConfig::default();
        Self {
            max_logs: aggregator.max_logs,
            max_keywords: aggregator.max_keywords,
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn aggregator(&self) -> LogAggregatorConfig {
        LogAggregatorConfig {
            max_logs: self.max_logs,
            max_keywords: self.max_keywords,
        }
    }
}

/// 告警配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub max_history: usize,
    pub evaluation_interval_secs: u64,
    /// 是否注册内置的业务告警规则
    pub default_rules: bool,
    pub rules: Vec<RuleConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            max_history: AlertEngineConfig::default().max_history,
            evaluation_interval_secs: 30,
            default_rules: true,
            rules: Vec::new(),
        }
    }
}

impl AlertsConfig {
    pub fn engine(&self) -> AlertEngineConfig {
        AlertEngineConfig {
            max_history: self.max_history,
        }
    }
}

/// 指标与日志上报配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShippingConfig {
    pub metrics_endpoint: Option<String>,
    pub logs_endpoint: Option<String>,
    pub metrics_interval_secs: u64,
    pub logs_interval_secs: u64,
    pub log_cleanup_interval_secs: u64,
    pub log_retention_hours: i64,
    /// 出站请求超时
    pub timeout_secs: u64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            metrics_endpoint: None,
            logs_endpoint: None,
            metrics_interval_secs: 60,
            logs_interval_secs: 30,
            log_cleanup_interval_secs: 3600,
            log_retention_hours: 24,
            timeout_secs: 10,
        }
    }
}

/// 定期报告配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// 未设置时不生成定期报告
    pub interval_secs: Option<u64>,
    pub endpoint: Option<String>,
    pub sections: Vec<String>,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            endpoint: None,
            sections: vec![
                "metrics".to_string(),
                "alerts".to_string(),
                "logs".to_string(),
            ],
        }
    }
}

impl GlobalConfig {
    /// 构建服务之前检查配置
    pub fn validate(&self) -> Result<()> {
        if self.metrics.histogram_window == 0 {
            return Err(anyhow!("metrics.histogram_window must be greater than 0"));
        }
        if self.logging.max_logs == 0 {
            return Err(anyhow!("logging.max_logs must be greater than 0"));
        }
        if self.alerts.max_history == 0 {
            return Err(anyhow!("alerts.max_history must be greater than 0"));
        }
        if self.alerts.evaluation_interval_secs == 0 {
            return Err(anyhow!("alerts.evaluation_interval_secs must be greater than 0"));
        }
        if self.notifications.max_history == 0 {
            return Err(anyhow!("notifications.max_history must be greater than 0"));
        }
        let rate_limit = &self.notifications.rate_limit;
        if rate_limit.window_secs <= 0 {
            return Err(anyhow!("notifications.rate_limit.window_secs must be greater than 0"));
        }
        check_secs("notifications.rate_limit.window_secs", rate_limit.window_secs)?;
        check_secs("notifications.rate_limit.critical_spacing_secs", rate_limit.critical_spacing_secs)?;
        check_secs("notifications.rate_limit.default_spacing_secs", rate_limit.default_spacing_secs)?;

        let shipping = &self.shipping;
        if shipping.metrics_interval_secs == 0
            || shipping.logs_interval_secs == 0
            || shipping.log_cleanup_interval_secs == 0
        {
            return Err(anyhow!("shipping intervals must be greater than 0"));
        }
        if shipping.log_retention_hours < 0
            || Duration::try_hours(shipping.log_retention_hours).is_none()
        {
            return Err(anyhow!(
                "shipping.log_retention_hours out of range: {}",
                shipping.log_retention_hours
            ));
        }
        if self.reports.interval_secs == Some(0) {
            return Err(anyhow!("reports.interval_secs must be greater than 0"));
        }

        let mut rule_names = HashSet::new();
        for rule in &self.alerts.rules {
            if !rule_names.insert(rule.name.as_str()) {
                return Err(anyhow!("duplicate alert rule: {}", rule.name));
            }
            check_secs(&format!("alert rule '{}' cooldown_secs", rule.name), rule.cooldown_secs)?;
        }

        let mut channel_names = HashSet::new();
        for channel in &self.notifications.channels {
            if !channel_names.insert(channel.name.as_str()) {
                return Err(anyhow!("duplicate notification channel: {}", channel.name));
            }
            Channel::from_config(channel)
                .map_err(|e| anyhow!("notification channel '{}': {}", channel.name, e))?;
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// 秒数必须非负且能表示为时长
fn check_secs(field: &str, value: i64) -> Result<()> {
    if value < 0 || Duration::try_seconds(value).is_none() {
        return Err(anyhow!("{} out of range: {}", field, value));
    }
    Ok(())
}
