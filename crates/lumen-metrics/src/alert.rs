use crate::condition::{AlertCondition, RuleError};
use crate::store::MetricStore;
use chrono::{DateTime, Duration, Utc};
use lumen_types::{Alert, AlertSeverity, SystemHealth};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// 告警消息：模板或动态生成
///
/// 模板支持 `{rule}`、`{severity}`、`{value}` 占位符。
#[derive(Clone)]
pub enum AlertMessage {
    Template(String),
    Dynamic(Arc<dyn Fn(&MetricStore) -> String + Send + Sync>),
}

impl AlertMessage {
    fn render(
        &self,
        rule: &str,
        severity: AlertSeverity,
        value: Option<f64>,
        store: &MetricStore,
    ) -> String {
        match self {
            AlertMessage::Template(template) => {
                let value = value
                    .map(|v| format!("{:.2}", v))
                    .unwrap_or_else(|| "n/a".to_string());
                template
                    .replace("{rule}", rule)
                    .replace("{severity}", severity.as_str())
                    .replace("{value}", &value)
            }
            AlertMessage::Dynamic(f) => f(store),
        }
    }
}

/// 告警规则
///
/// 注册后由引擎独占，`last_triggered_at` 与 `consecutive_trigger_count` 在每次评估时更新。
pub struct AlertRule {
    name: String,
    condition: Arc<dyn AlertCondition>,
    severity: AlertSeverity,
    message: AlertMessage,
    cooldown: Duration,
    max_retries: u32,
    enabled: bool,
    last_triggered_at: Option<DateTime<Utc>>,
    consecutive_trigger_count: u32,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        severity: AlertSeverity,
        condition: impl AlertCondition + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            severity,
            message: AlertMessage::Template("{rule} triggered (value={value})".to_string()),
            cooldown: Duration::minutes(5),
            max_retries: 3,
            enabled: true,
            last_triggered_at: None,
            consecutive_trigger_count: 0,
        }
    }

    pub fn with_message(mut self, template: impl Into<String>) -> Self {
        self.message = AlertMessage::Template(template.into());
        self
    }

    pub fn with_message_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&MetricStore) -> String + Send + Sync + 'static,
    {
        self.message = AlertMessage::Dynamic(Arc::new(f));
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_cooldown_ms(self, cooldown_ms: i64) -> Self {
        self.with_cooldown(Duration::try_milliseconds(cooldown_ms).unwrap_or(Duration::zero()))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn severity(&self) -> AlertSeverity {
        self.severity
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered_at
            .map(|last| now - last < self.cooldown)
            .unwrap_or(false)
    }

    fn summary(&self) -> RuleSummary {
        RuleSummary {
            name: self.name.clone(),
            severity: self.severity,
            condition: self.condition.describe(),
            enabled: self.enabled,
            cooldown_ms: self.cooldown.num_milliseconds(),
            max_retries: self.max_retries,
            last_triggered_at: self.last_triggered_at,
            consecutive_trigger_count: self.consecutive_trigger_count,
        }
    }
}

/// 规则状态摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSummary {
    pub name: String,
    pub severity: AlertSeverity,
    pub condition: String,
    pub enabled: bool,
    pub cooldown_ms: i64,
    pub max_retries: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub consecutive_trigger_count: u32,
}

/// 告警统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<AlertSeverity, usize>,
    pub by_rule: BTreeMap<String, usize>,
    pub last_24h: usize,
}

/// 告警引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    pub max_history: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self { max_history: 1000 }
    }
}

/// 单条规则的评估结果
enum Evaluation {
    Clear,
    Suppressed,
    Fire(Alert),
}

/// 告警规则引擎
pub struct AlertEngine {
    store: Arc<MetricStore>,
    rules: RwLock<Vec<AlertRule>>,
    // 规则名 -> 最近一次触发的告警
    active_alerts: RwLock<HashMap<String, Alert>>,
    alert_history: RwLock<VecDeque<Alert>>,
    max_history: usize,
    sink: Option<mpsc::UnboundedSender<Alert>>,
}

impl AlertEngine {
    pub fn new(store: Arc<MetricStore>, config: AlertEngineConfig) -> Self {
        Self {
            store,
            rules: RwLock::new(Vec::new()),
            active_alerts: RwLock::new(HashMap::new()),
            alert_history: RwLock::new(VecDeque::new()),
            max_history: config.max_history.max(1),
            sink: None,
        }
    }

    /// 新触发的告警会发送到此通道，由通知分发任务消费
    pub fn with_sink(mut self, sink: mpsc::UnboundedSender<Alert>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// 注册规则；同名规则会被替换
    pub async fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.write().await;
        if let Some(existing) = rules.iter_mut().find(|r| r.name == rule.name) {
            info!("Replacing alert rule: {}", rule.name);
            *existing = rule;
        } else {
            info!("Adding alert rule: {}", rule.name);
            rules.push(rule);
        }
    }

    pub async fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.name != name);
        before != rules.len()
    }

    pub async fn set_rule_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                info!(rule = %name, enabled, "Alert rule toggled");
                true
            }
            None => false,
        }
    }

    pub async fn rules(&self) -> Vec<RuleSummary> {
        self.rules.read().await.iter().map(AlertRule::summary).collect()
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn evaluate_once(&self) -> Vec<Alert> {
        self.evaluate_at(Utc::now()).await
    }

    /// 评估所有启用的规则，返回本次触发的告警
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let mut fired = Vec::new();
        let mut rules = self.rules.write().await;

        for rule in rules.iter_mut() {
            if !rule.enabled || rule.in_cooldown(now) {
                continue;
            }

            let evaluation = match self.evaluate_rule(rule, now) {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    error!(rule = %rule.name, error = %e, "Alert rule evaluation failed");
                    Evaluation::Clear
                }
            };

            match evaluation {
                Evaluation::Clear => {
                    if rule.consecutive_trigger_count > 0 {
                        debug!(rule = %rule.name, "Alert condition cleared");
                        rule.consecutive_trigger_count = 0;
                    }
                }
                Evaluation::Suppressed => {
                    warn!(
                        rule = %rule.name,
                        count = rule.consecutive_trigger_count,
                        "Alert suppressed after reaching retry ceiling"
                    );
                }
                Evaluation::Fire(alert) => {
                    rule.last_triggered_at = Some(now);
                    rule.consecutive_trigger_count += 1;

                    info!(
                        rule = %alert.rule_name,
                        severity = %alert.severity,
                        "Alert fired: {}",
                        alert.message
                    );
                    fired.push(alert);
                }
            }
        }
        drop(rules);

        for alert in &fired {
            self.record(alert.clone()).await;
            if let Some(sink) = &self.sink {
                if sink.send(alert.clone()).is_err() {
                    warn!(rule = %alert.rule_name, "Notification dispatcher is gone, alert not delivered");
                }
            }
        }

        fired
    }

    /// 条件、取值与消息渲染都在同一个隔离区内执行，不修改规则状态
    fn evaluate_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<Evaluation, RuleError> {
        let store = self.store.as_ref();
        let step = || -> Result<Evaluation, RuleError> {
            if !rule.condition.check(store)? {
                return Ok(Evaluation::Clear);
            }
            if rule.consecutive_trigger_count >= rule.max_retries {
                return Ok(Evaluation::Suppressed);
            }

            let value = rule.condition.current_value(store);
            let message = rule.message.render(&rule.name, rule.severity, value, store);
            Ok(Evaluation::Fire(Alert::new(
                rule.name.clone(),
                rule.severity,
                message,
                now,
            )))
        };

        match catch_unwind(AssertUnwindSafe(step)) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(RuleError::Panicked(reason))
            }
        }
    }

    async fn record(&self, alert: Alert) {
        // 同一规则的旧告警被新实例取代，只保留在历史中
        self.active_alerts
            .write()
            .await
            .insert(alert.rule_name.clone(), alert.clone());

        let mut history = self.alert_history.write().await;
        history.push_back(alert);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    pub async fn resolve_alert(&self, id: &str, resolved_by: &str) -> bool {
        self.resolve_alert_at(id, resolved_by, Utc::now()).await
    }

    /// 解决告警；已解决时保持不变，未知 id 返回 false
    pub async fn resolve_alert_at(&self, id: &str, resolved_by: &str, now: DateTime<Utc>) -> bool {
        let mut found = false;

        {
            let mut active = self.active_alerts.write().await;
            if let Some(alert) = active.values_mut().find(|a| a.id == id) {
                alert.resolve(resolved_by, now);
                found = true;
            }
        }

        let mut history = self.alert_history.write().await;
        if let Some(alert) = history.iter_mut().find(|a| a.id == id) {
            alert.resolve(resolved_by, now);
            found = true;
        }

        if found {
            info!(alert_id = %id, resolved_by = %resolved_by, "Alert resolved");
        }
        found
    }

    /// 所有未解决的告警，最新的在前
    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        let active = self.active_alerts.read().await;
        let mut alerts: Vec<Alert> = active.values().filter(|a| !a.resolved).cloned().collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    /// 最近的 `limit` 条告警，最新的在前
    pub async fn get_alert_history(&self, limit: usize) -> Vec<Alert> {
        let history = self.alert_history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_alert_stats(&self) -> AlertStats {
        self.get_alert_stats_at(Utc::now()).await
    }

    pub async fn get_alert_stats_at(&self, now: DateTime<Utc>) -> AlertStats {
        let history = self.alert_history.read().await;
        let active = self.get_active_alerts().await.len();

        let mut stats = AlertStats {
            total: history.len(),
            active,
            ..Default::default()
        };

        let day_ago = now - Duration::hours(24);
        for alert in history.iter() {
            if alert.resolved {
                stats.resolved += 1;
            }
            if alert.timestamp >= day_ago {
                stats.last_24h += 1;
            }
            *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
            *stats.by_rule.entry(alert.rule_name.clone()).or_insert(0) += 1;
        }

        stats
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        let active = self.active_alerts.read().await;
        SystemHealth::from_alerts(active.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Comparison, MetricQuery, ThresholdCondition};

    fn always(value: bool) -> impl Fn(&MetricStore) -> Result<bool, RuleError> + Send + Sync {
        move |_: &MetricStore| Ok(value)
    }

    fn engine() -> AlertEngine {
        AlertEngine::new(Arc::new(MetricStore::default()), AlertEngineConfig::default())
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_tick() {
        let engine = engine();
        engine
            .add_rule(
                AlertRule::new("always_on", AlertSeverity::Warning, always(true))
                    .with_cooldown_ms(300_000),
            )
            .await;

        let t0 = Utc::now();
        assert_eq!(engine.evaluate_at(t0).await.len(), 1);
        assert!(engine.evaluate_at(t0 + Duration::seconds(1)).await.is_empty());

        // 冷却结束后可以再次触发
        assert_eq!(engine.evaluate_at(t0 + Duration::minutes(6)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_ceiling_suppresses_storm() {
        let engine = engine();
        engine
            .add_rule(
                AlertRule::new("flapping", AlertSeverity::Critical, always(true))
                    .with_cooldown_ms(0)
                    .with_max_retries(2),
            )
            .await;

        let t0 = Utc::now();
        let mut total = 0;
        for i in 0..5 {
            total += engine.evaluate_at(t0 + Duration::seconds(i)).await.len();
        }
        assert_eq!(total, 2);

        let rules = engine.rules().await;
        assert_eq!(rules[0].consecutive_trigger_count, 2);
    }

    #[tokio::test]
    async fn test_false_condition_resets_count() {
        let store = Arc::new(MetricStore::default());
        let engine = AlertEngine::new(store.clone(), AlertEngineConfig::default());
        engine
            .add_rule(
                AlertRule::new(
                    "errors",
                    AlertSeverity::Warning,
                    ThresholdCondition::new(
                        MetricQuery::AggregatedCounter {
                            name: "errors".to_string(),
                        },
                        Comparison::GreaterThan,
                        0.0,
                    ),
                )
                .with_cooldown_ms(0)
                .with_max_retries(1),
            )
            .await;

        let t0 = Utc::now();
        store.increment_counter("errors", 1, &[]);
        assert_eq!(engine.evaluate_at(t0).await.len(), 1);
        assert!(engine.evaluate_at(t0 + Duration::seconds(1)).await.is_empty());

        store.reset_counter("errors", &[]);
        assert!(engine.evaluate_at(t0 + Duration::seconds(2)).await.is_empty());
        assert_eq!(engine.rules().await[0].consecutive_trigger_count, 0);

        store.increment_counter("errors", 1, &[]);
        assert_eq!(engine.evaluate_at(t0 + Duration::seconds(3)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_rule_does_not_block_others() {
        let engine = engine();
        engine
            .add_rule(AlertRule::new(
                "broken",
                AlertSeverity::Critical,
                |_: &MetricStore| -> Result<bool, RuleError> {
                    Err(RuleError::Evaluation("metric source unavailable".to_string()))
                },
            ))
            .await;
        engine
            .add_rule(AlertRule::new(
                "panicking",
                AlertSeverity::Critical,
                |_: &MetricStore| -> Result<bool, RuleError> { panic!("bad predicate") },
            ))
            .await;
        engine
            .add_rule(AlertRule::new("healthy", AlertSeverity::Info, always(true)))
            .await;

        let fired = engine.evaluate_once().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_name, "healthy");
    }

    #[tokio::test]
    async fn test_panicking_message_does_not_lose_other_alerts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine().with_sink(tx);
        engine
            .add_rule(AlertRule::new("good_first", AlertSeverity::Warning, always(true)))
            .await;
        engine
            .add_rule(
                AlertRule::new("bad_message", AlertSeverity::Critical, always(true))
                    .with_message_fn(|_: &MetricStore| -> String { panic!("template exploded") }),
            )
            .await;
        engine
            .add_rule(AlertRule::new("good_last", AlertSeverity::Info, always(true)))
            .await;

        let fired = engine.evaluate_once().await;
        let names: Vec<_> = fired.iter().map(|a| a.rule_name.as_str()).collect();
        assert_eq!(names, vec!["good_first", "good_last"]);
        assert_eq!(engine.get_alert_history(10).await.len(), 2);
        assert_eq!(rx.recv().await.unwrap().rule_name, "good_first");

        // 渲染失败的规则不进入冷却，也不计数
        let rules = engine.rules().await;
        let bad = rules.iter().find(|r| r.name == "bad_message").unwrap();
        assert!(bad.last_triggered_at.is_none());
        assert_eq!(bad.consecutive_trigger_count, 0);
    }

    #[tokio::test]
    async fn test_panicking_value_is_contained() {
        struct ExplodingValue;

        impl AlertCondition for ExplodingValue {
            fn check(&self, _store: &MetricStore) -> Result<bool, RuleError> {
                Ok(true)
            }

            fn current_value(&self, _store: &MetricStore) -> Option<f64> {
                panic!("value source exploded")
            }

            fn describe(&self) -> String {
                "exploding value".to_string()
            }
        }

        let engine = engine();
        engine
            .add_rule(AlertRule::new("exploding", AlertSeverity::Critical, ExplodingValue))
            .await;
        engine
            .add_rule(AlertRule::new("steady", AlertSeverity::Warning, always(true)))
            .await;

        let fired = engine.evaluate_once().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_name, "steady");
        assert_eq!(engine.get_system_health().await, SystemHealth::Warning);
    }

    #[tokio::test]
    async fn test_disabled_rule_is_skipped() {
        let engine = engine();
        engine
            .add_rule(AlertRule::new("off", AlertSeverity::Warning, always(true)).enabled(false))
            .await;
        assert!(engine.evaluate_once().await.is_empty());

        assert!(engine.set_rule_enabled("off", true).await);
        assert_eq!(engine.evaluate_once().await.len(), 1);
        assert!(!engine.set_rule_enabled("missing", true).await);
    }

    #[tokio::test]
    async fn test_message_template() {
        let store = Arc::new(MetricStore::default());
        store.increment_counter("errors", 7, &[]);
        let engine = AlertEngine::new(store, AlertEngineConfig::default());
        engine
            .add_rule(
                AlertRule::new(
                    "too_many_errors",
                    AlertSeverity::Critical,
                    ThresholdCondition::new(
                        MetricQuery::AggregatedCounter {
                            name: "errors".to_string(),
                        },
                        Comparison::GreaterThan,
                        5.0,
                    ),
                )
                .with_message("{severity}: {rule} at {value}"),
            )
            .await;

        let fired = engine.evaluate_once().await;
        assert_eq!(fired[0].message, "critical: too_many_errors at 7.00");
    }

    #[tokio::test]
    async fn test_message_fn() {
        let store = Arc::new(MetricStore::default());
        store.record_webhook_failure("invoice.paid", 5.0, None);
        let engine = AlertEngine::new(store, AlertEngineConfig::default());
        engine
            .add_rule(
                AlertRule::new("webhooks", AlertSeverity::Warning, always(true)).with_message_fn(
                    |s: &MetricStore| format!("success rate {:.0}%", s.get_webhook_success_rate()),
                ),
            )
            .await;

        assert_eq!(engine.evaluate_once().await[0].message, "success rate 0%");
    }

    #[tokio::test]
    async fn test_resolve_and_health() {
        let engine = engine();
        engine
            .add_rule(AlertRule::new("db_down", AlertSeverity::Critical, always(true)))
            .await;
        engine
            .add_rule(AlertRule::new("slow", AlertSeverity::Warning, always(true)))
            .await;

        assert_eq!(engine.get_system_health().await, SystemHealth::Healthy);
        let fired = engine.evaluate_once().await;
        assert_eq!(engine.get_system_health().await, SystemHealth::Critical);

        let critical = fired.iter().find(|a| a.rule_name == "db_down").unwrap();
        assert!(engine.resolve_alert(&critical.id, "oncall").await);
        assert!(engine.resolve_alert(&critical.id, "someone-else").await);
        assert!(!engine.resolve_alert("no-such-id", "oncall").await);

        assert_eq!(engine.get_system_health().await, SystemHealth::Warning);
        let active = engine.get_active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule_name, "slow");

        let history = engine.get_alert_history(10).await;
        let resolved = history.iter().find(|a| a.id == critical.id).unwrap();
        assert_eq!(resolved.resolved_by.as_deref(), Some("oncall"));

        let stats = engine.get_alert_stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.by_severity.get(&AlertSeverity::Critical), Some(&1));
        assert_eq!(stats.last_24h, 2);
    }

    #[tokio::test]
    async fn test_retrigger_supersedes_active_alert() {
        let engine = engine();
        engine
            .add_rule(
                AlertRule::new("disk", AlertSeverity::Warning, always(true)).with_cooldown_ms(1000),
            )
            .await;

        let t0 = Utc::now();
        let first = engine.evaluate_at(t0).await.remove(0);
        let second = engine.evaluate_at(t0 + Duration::seconds(2)).await.remove(0);

        let active = engine.get_active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_ne!(first.id, second.id);
        assert_eq!(engine.get_alert_history(10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let engine = AlertEngine::new(
            Arc::new(MetricStore::default()),
            AlertEngineConfig { max_history: 3 },
        );
        engine
            .add_rule(
                AlertRule::new("noisy", AlertSeverity::Info, always(true))
                    .with_cooldown_ms(0)
                    .with_max_retries(100),
            )
            .await;

        let t0 = Utc::now();
        for i in 0..5 {
            engine.evaluate_at(t0 + Duration::seconds(i)).await;
        }
        let history = engine.get_alert_history(100).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, t0 + Duration::seconds(4));
        assert_eq!(history[2].timestamp, t0 + Duration::seconds(2));

        let latest = engine.get_alert_history(1).await;
        assert_eq!(latest[0].timestamp, t0 + Duration::seconds(4));
    }

    #[tokio::test]
    async fn test_fired_alerts_reach_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine().with_sink(tx);
        engine
            .add_rule(AlertRule::new("sink", AlertSeverity::Warning, always(true)))
            .await;

        let fired = engine.evaluate_once().await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, fired[0].id);
    }
}
