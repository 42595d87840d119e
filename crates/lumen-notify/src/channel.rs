use crate::NotifyError;
use chrono::{DateTime, NaiveTime, Utc};
use lettre::message::Mailbox;
use lumen_types::{Alert, AlertSeverity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 渠道配置（来自配置文件）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,

    /// console | webhook | email | database | chat
    #[serde(rename = "type")]
    pub channel_type: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// 最低告警级别
    #[serde(default = "default_severity_filter")]
    pub severity_filter: AlertSeverity,

    /// 允许的规则名，未设置时接受全部
    #[serde(default)]
    pub alert_names: Option<Vec<String>>,

    #[serde(default)]
    pub time_window: Option<TimeWindowConfig>,

    #[serde(default)]
    pub endpoint: Option<String>,

    /// 邮件发件人
    #[serde(default)]
    pub from: Option<String>,

    /// 邮件收件人
    #[serde(default)]
    pub to: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_severity_filter() -> AlertSeverity {
    AlertSeverity::Info
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, channel_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_type: channel_type.into(),
            enabled: true,
            severity_filter: AlertSeverity::Info,
            alert_names: None,
            time_window: None,
            endpoint: None,
            from: None,
            to: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_severity_filter(mut self, severity: AlertSeverity) -> Self {
        self.severity_filter = severity;
        self
    }

    pub fn with_alert_names(mut self, names: &[&str]) -> Self {
        self.alert_names = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_time_window(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.time_window = Some(TimeWindowConfig {
            start: start.into(),
            end: end.into(),
        });
        self
    }

    pub fn with_recipients(mut self, from: impl Into<String>, to: &[&str]) -> Self {
        self.from = Some(from.into());
        self.to = to.iter().map(|t| t.to_string()).collect();
        self
    }

    fn require_endpoint(&self) -> Result<String, NotifyError> {
        self.endpoint.clone().ok_or_else(|| {
            NotifyError::InvalidConfig(format!("channel '{}' requires an endpoint", self.name))
        })
    }
}

/// 时间窗口配置，`HH:MM` 格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowConfig {
    pub start: String,
    pub end: String,
}

/// 每日时间窗口（UTC），`start > end` 时跨越午夜
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn parse(config: &TimeWindowConfig) -> Result<Self, NotifyError> {
        let parse = |value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| {
                NotifyError::InvalidConfig(format!("invalid time '{}': {}", value, e))
            })
        };
        Ok(Self {
            start: parse(&config.start)?,
            end: parse(&config.end)?,
        })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// 渠道类型及其投递目标
#[derive(Debug, Clone)]
pub enum ChannelKind {
    Console,
    Webhook {
        url: String,
    },
    Email {
        endpoint: String,
        from: Mailbox,
        to: Vec<Mailbox>,
    },
    Database {
        endpoint: String,
    },
    Chat {
        webhook_url: String,
    },
}

impl ChannelKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::Webhook { .. } => "webhook",
            ChannelKind::Email { .. } => "email",
            ChannelKind::Database { .. } => "database",
            ChannelKind::Chat { .. } => "chat",
        }
    }

    fn from_config(config: &ChannelConfig) -> Result<Self, NotifyError> {
        match config.channel_type.to_ascii_lowercase().as_str() {
            "console" => Ok(ChannelKind::Console),
            "webhook" => Ok(ChannelKind::Webhook {
                url: config.require_endpoint()?,
            }),
            "email" => {
                let mailbox = |value: &str| {
                    value.parse::<Mailbox>().map_err(|e| {
                        NotifyError::InvalidConfig(format!("invalid mailbox '{}': {}", value, e))
                    })
                };
                let from = config.from.as_deref().ok_or_else(|| {
                    NotifyError::InvalidConfig(format!(
                        "email channel '{}' requires a sender",
                        config.name
                    ))
                })?;
                if config.to.is_empty() {
                    return Err(NotifyError::InvalidConfig(format!(
                        "email channel '{}' requires at least one recipient",
                        config.name
                    )));
                }
                Ok(ChannelKind::Email {
                    endpoint: config.require_endpoint()?,
                    from: mailbox(from)?,
                    to: config
                        .to
                        .iter()
                        .map(|t| mailbox(t))
                        .collect::<Result<Vec<_>, _>>()?,
                })
            }
            "database" => Ok(ChannelKind::Database {
                endpoint: config.require_endpoint()?,
            }),
            "chat" => Ok(ChannelKind::Chat {
                webhook_url: config.require_endpoint()?,
            }),
            other => Err(NotifyError::UnknownChannelType(other.to_string())),
        }
    }
}

/// 渠道投递统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub name: String,
    pub channel_type: String,
    pub enabled: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// 已注册的通知渠道
#[derive(Debug, Clone)]
pub struct Channel {
    pub(crate) name: String,
    pub(crate) kind: ChannelKind,
    pub(crate) enabled: bool,
    severity_filter: AlertSeverity,
    alert_names: Option<HashSet<String>>,
    time_window: Option<TimeWindow>,
    pub(crate) success_count: u64,
    pub(crate) failure_count: u64,
    pub(crate) last_used_at: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, NotifyError> {
        let kind = ChannelKind::from_config(config)?;
        let time_window = config
            .time_window
            .as_ref()
            .map(TimeWindow::parse)
            .transpose()?;

        Ok(Self {
            name: config.name.clone(),
            kind,
            enabled: config.enabled,
            severity_filter: config.severity_filter,
            alert_names: config
                .alert_names
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            time_window,
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    /// 级别、规则名、时间窗口三项过滤均通过时接受告警
    pub fn accepts(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        if alert.severity.rank() < self.severity_filter.rank() {
            return false;
        }
        if let Some(names) = &self.alert_names {
            if !names.contains(&alert.rule_name) {
                return false;
            }
        }
        if let Some(window) = &self.time_window {
            if !window.contains(now.time()) {
                return false;
            }
        }
        true
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            name: self.name.clone(),
            channel_type: self.kind.type_name().to_string(),
            enabled: self.enabled,
            success_count: self.success_count,
            failure_count: self.failure_count,
            last_used_at: self.last_used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert(rule: &str, severity: AlertSeverity) -> Alert {
        Alert::new(rule, severity, "test", Utc::now())
    }

    #[test]
    fn test_unknown_channel_type() {
        let result = Channel::from_config(&ChannelConfig::new("pager", "sms"));
        assert!(matches!(result, Err(NotifyError::UnknownChannelType(t)) if t == "sms"));
    }

    #[test]
    fn test_webhook_requires_endpoint() {
        let result = Channel::from_config(&ChannelConfig::new("hooks", "webhook"));
        assert!(matches!(result, Err(NotifyError::InvalidConfig(_))));
    }

    #[test]
    fn test_email_mailboxes() {
        let config = ChannelConfig::new("ops-mail", "email")
            .with_endpoint("http://mailer.local/send")
            .with_recipients("Lumen <alerts@example.com>", &["ops@example.com"]);
        let channel = Channel::from_config(&config).unwrap();
        assert_eq!(channel.kind().type_name(), "email");

        let bad = ChannelConfig::new("ops-mail", "email")
            .with_endpoint("http://mailer.local/send")
            .with_recipients("not a mailbox", &["ops@example.com"]);
        assert!(matches!(
            Channel::from_config(&bad),
            Err(NotifyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_severity_and_name_filters() {
        let channel = Channel::from_config(
            &ChannelConfig::new("console", "console")
                .with_severity_filter(AlertSeverity::Warning)
                .with_alert_names(&["quota_failures"]),
        )
        .unwrap();
        let now = Utc::now();

        assert!(!channel.accepts(&alert("quota_failures", AlertSeverity::Info), now));
        assert!(channel.accepts(&alert("quota_failures", AlertSeverity::Critical), now));
        assert!(!channel.accepts(&alert("webhook_errors", AlertSeverity::Critical), now));
    }

    #[test]
    fn test_time_window_wraps_midnight() {
        let window = TimeWindow::parse(&TimeWindowConfig {
            start: "22:00".to_string(),
            end: "06:00".to_string(),
        })
        .unwrap();

        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(window.contains(at(23, 30)));
        assert!(window.contains(at(2, 0)));
        assert!(!window.contains(at(12, 0)));

        let channel = Channel::from_config(
            &ChannelConfig::new("night", "console").with_time_window("22:00", "06:00"),
        )
        .unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        assert!(!channel.accepts(&alert("any", AlertSeverity::Critical), noon));
        assert!(channel.accepts(&alert("any", AlertSeverity::Critical), night));
    }

    #[test]
    fn test_invalid_time_window() {
        let config = ChannelConfig::new("night", "console").with_time_window("25:00", "06:00");
        assert!(matches!(
            Channel::from_config(&config),
            Err(NotifyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_from_toml() {
        let config: ChannelConfig = toml::from_str(
            r#"
            name = "ops-chat"
            type = "chat"
            severity_filter = "critical"
            endpoint = "https://chat.example.com/hook"
            alert_names = ["quota_write_failures"]
            "#,
        )
        .unwrap();

        assert!(config.enabled);
        assert_eq!(config.severity_filter, AlertSeverity::Critical);
        let channel = Channel::from_config(&config).unwrap();
        assert_eq!(channel.stats().channel_type, "chat");
    }
}
