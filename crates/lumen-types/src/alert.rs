use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 告警级别
///
/// 排序即严重程度：`Info < Warning < Critical`，渠道的级别过滤直接比较大小。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn rank(&self) -> u8 {
        match self {
            AlertSeverity::Info => 0,
            AlertSeverity::Warning => 1,
            AlertSeverity::Critical => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" | "warn" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity: {}", other)),
        }
    }
}

/// 告警实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl Alert {
    pub fn new(
        rule_name: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_name: rule_name.into(),
            severity,
            message: message.into(),
            timestamp,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// 标记为已解决；已解决的告警保持原样
    pub fn resolve(&mut self, resolved_by: impl Into<String>, at: DateTime<Utc>) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolved_by = Some(resolved_by.into());
    }
}

/// 系统健康状态，由活跃告警的级别推导
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Critical,
}

impl SystemHealth {
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> Self {
        let mut health = SystemHealth::Healthy;
        for alert in alerts.into_iter().filter(|a| !a.resolved) {
            match alert.severity {
                AlertSeverity::Critical => return SystemHealth::Critical,
                AlertSeverity::Warning => health = SystemHealth::Warning,
                AlertSeverity::Info => {}
            }
        }
        health
    }
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemHealth::Healthy => "healthy",
            SystemHealth::Warning => "warning",
            SystemHealth::Critical => "critical",
        };
        f.write_str(s)
    }
}
