use chrono::{DateTime, Duration, Utc};
use lumen_types::AlertSeverity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 限流策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// 严重告警每个窗口的最大发送次数
    pub critical_max: u32,
    /// 严重告警两次发送的最小间隔（秒）
    pub critical_spacing_secs: i64,
    pub default_max: u32,
    pub default_spacing_secs: i64,
    /// 滑动窗口长度（秒）
    pub window_secs: i64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            critical_max: 10,
            critical_spacing_secs: 300,
            default_max: 3,
            default_spacing_secs: 900,
            window_secs: 3600,
        }
    }
}

impl RateLimitPolicy {
    fn limits(&self, severity: AlertSeverity) -> (u32, Duration) {
        match severity {
            AlertSeverity::Critical => (self.critical_max, secs(self.critical_spacing_secs)),
            _ => (self.default_max, secs(self.default_spacing_secs)),
        }
    }

    fn window(&self) -> Duration {
        secs(self.window_secs)
    }
}

/// 负数视为 0，超出范围取最大时长
fn secs(value: i64) -> Duration {
    Duration::try_seconds(value.max(0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone)]
struct WindowState {
    started_at: DateTime<Utc>,
    count: u32,
    last_sent_at: Option<DateTime<Utc>>,
}

/// 按 (渠道, 规则) 计数的滑动窗口限流器
#[derive(Debug, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: HashMap<(String, String), WindowState>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
        }
    }

    /// 允许发送时占用一次配额并返回 true
    pub fn try_acquire(
        &mut self,
        channel: &str,
        rule: &str,
        severity: AlertSeverity,
        now: DateTime<Utc>,
    ) -> bool {
        let (max, spacing) = self.policy.limits(severity);
        let window = self.policy.window();

        let state = self
            .windows
            .entry((channel.to_string(), rule.to_string()))
            .or_insert_with(|| WindowState {
                started_at: now,
                count: 0,
                last_sent_at: None,
            });

        // 窗口过期后重置计数，最小间隔仍以上次发送为准
        if now - state.started_at > window {
            state.started_at = now;
            state.count = 0;
        }

        if let Some(last) = state.last_sent_at {
            if now - last < spacing {
                return false;
            }
        }
        if state.count >= max {
            return false;
        }

        state.count += 1;
        state.last_sent_at = Some(now);
        true
    }

    /// 清除已过期且不再影响间隔判断的窗口
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.policy.window();
        let before = self.windows.len();
        self.windows.retain(|_, state| {
            let last = state.last_sent_at.unwrap_or(state.started_at);
            now - last <= window
        });
        before - self.windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
