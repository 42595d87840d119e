use crate::channel::{Channel, ChannelConfig, ChannelKind, ChannelStats};
use crate::providers;
use crate::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::transport::Transport;
use crate::NotifyError;
use chrono::{DateTime, Utc};
use lumen_types::Alert;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

/// 通知分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 通知记录保留条数
    pub max_history: usize,
    pub rate_limit: RateLimitPolicy,
    pub channels: Vec<ChannelConfig>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_history: 500,
            rate_limit: RateLimitPolicy::default(),
            channels: Vec::new(),
        }
    }
}

/// 一次分发的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub alert_id: String,
    pub rule_name: String,
    /// 实际尝试投递的渠道（已通过过滤与限流）
    pub channels_attempted: Vec<String>,
    pub channels_failed: Vec<String>,
    /// 至少尝试一个渠道且全部成功
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// 通知分发器
pub struct NotificationDispatcher {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
    limiter: Mutex<RateLimiter>,
    history: RwLock<VecDeque<NotificationRecord>>,
    transport: Arc<dyn Transport>,
    max_history: usize,
}

impl NotificationDispatcher {
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Result<Self, NotifyError> {
        let mut channels = HashMap::new();
        for channel_config in &config.channels {
            let channel = Channel::from_config(channel_config)?;
            info!(channel = %channel.name, "Registered notification channel ({})", channel.kind.type_name());
            channels.insert(channel.name.clone(), channel);
        }

        Ok(Self {
            channels: Arc::new(RwLock::new(channels)),
            limiter: Mutex::new(RateLimiter::new(config.rate_limit)),
            history: RwLock::new(VecDeque::new()),
            transport,
            max_history: config.max_history.max(1),
        })
    }

    /// 注册渠道，同名渠道被替换
    pub async fn add_channel(&self, config: ChannelConfig) -> Result<(), NotifyError> {
        let channel = Channel::from_config(&config)?;
        info!(channel = %channel.name, "Registered notification channel ({})", channel.kind.type_name());
        self.channels
            .write()
            .await
            .insert(channel.name.clone(), channel);
        Ok(())
    }

    pub async fn remove_channel(&self, name: &str) -> bool {
        let removed = self.channels.write().await.remove(name).is_some();
        if removed {
            info!(channel = %name, "Removed notification channel");
        }
        removed
    }

    pub async fn set_channel_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get_mut(name) {
            Some(channel) => {
                channel.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn get_channel_stats(&self) -> Vec<ChannelStats> {
        let channels = self.channels.read().await;
        let mut stats: Vec<ChannelStats> = channels.values().map(Channel::stats).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// 最近的通知记录，最新的在前
    pub async fn get_notification_history(&self, limit: usize) -> Vec<NotificationRecord> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn dispatch(&self, alert: &Alert) -> NotificationRecord {
        self.dispatch_at(alert, Utc::now()).await
    }

    pub async fn dispatch_at(&self, alert: &Alert, now: DateTime<Utc>) -> NotificationRecord {
        let mut eligible: Vec<(String, ChannelKind)> = {
            let channels = self.channels.read().await;
            channels
                .values()
                .filter(|c| c.enabled && c.accepts(alert, now))
                .map(|c| (c.name.clone(), c.kind.clone()))
                .collect()
        };
        eligible.sort_by(|a, b| a.0.cmp(&b.0));

        let allowed: Vec<(String, ChannelKind)> = {
            let mut limiter = self.limiter.lock().await;
            limiter.prune(now);
            eligible
                .into_iter()
                .filter(|(name, _)| {
                    let ok = limiter.try_acquire(name, &alert.rule_name, alert.severity, now);
                    if !ok {
                        debug!(channel = %name, rule = %alert.rule_name, "Notification rate limited");
                    }
                    ok
                })
                .collect()
        };

        let mut attempted = Vec::with_capacity(allowed.len());
        let mut failed = Vec::new();
        let mut outcomes = Vec::with_capacity(allowed.len());

        for (name, kind) in allowed {
            let result = self.deliver(&kind, alert, now).await;
            if let Err(e) = &result {
                error!(channel = %name, rule = %alert.rule_name, "Notification delivery failed: {}", e);
                failed.push(name.clone());
            }
            attempted.push(name.clone());
            outcomes.push((name, result.is_ok()));
        }

        {
            let mut channels = self.channels.write().await;
            for (name, ok) in outcomes {
                if let Some(channel) = channels.get_mut(&name) {
                    if ok {
                        channel.success_count += 1;
                    } else {
                        channel.failure_count += 1;
                    }
                    channel.last_used_at = Some(now);
                }
            }
        }

        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            rule_name: alert.rule_name.clone(),
            success: !attempted.is_empty() && failed.is_empty(),
            channels_attempted: attempted,
            channels_failed: failed,
            timestamp: now,
        };

        let mut history = self.history.write().await;
        history.push_back(record.clone());
        while history.len() > self.max_history {
            history.pop_front();
        }

        record
    }

    async fn deliver(
        &self,
        kind: &ChannelKind,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        match kind {
            ChannelKind::Console => {
                providers::log_to_console(alert);
                Ok(())
            }
            ChannelKind::Webhook { url } => {
                let payload = providers::webhook_payload(alert, now)?;
                self.transport.deliver(url, &payload).await
            }
            ChannelKind::Email { endpoint, from, to } => {
                let payload = providers::email_payload(from, to, alert)?;
                self.transport.deliver(endpoint, &payload).await
            }
            ChannelKind::Database { endpoint } => {
                self.transport
                    .deliver(endpoint, &providers::database_payload(alert))
                    .await
            }
            ChannelKind::Chat { webhook_url } => {
                self.transport
                    .deliver(webhook_url, &providers::chat_payload(alert))
                    .await
            }
        }
    }

    /// 消费告警流直到发送端关闭
    pub async fn run(self: Arc<Self>, mut alerts: mpsc::UnboundedReceiver<Alert>) {
        info!("Notification dispatcher started");
        while let Some(alert) = alerts.recv().await {
            self.dispatch(&alert).await;
        }
        info!("Notification dispatcher stopped");
    }
}
