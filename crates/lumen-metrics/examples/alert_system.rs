use chrono::{Duration, Utc};
use lumen_metrics::{
    default_rules, AlertEngine, AlertEngineConfig, AlertRule, Comparison, MetricQuery,
    MetricStore, MetricStoreConfig, ThresholdCondition,
};
use lumen_types::AlertSeverity;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    println!("=== Lumen 告警引擎示例 ===\n");

    // 1. 创建指标存储与告警引擎
    let store = Arc::new(MetricStore::new(MetricStoreConfig::default()));
    let engine = AlertEngine::new(store.clone(), AlertEngineConfig::default());

    for rule in default_rules() {
        engine.add_rule(rule).await;
    }
    engine
        .add_rule(
            AlertRule::new(
                "slow_webhooks",
                AlertSeverity::Warning,
                ThresholdCondition::new(
                    MetricQuery::AggregatedHistogram {
                        name: "webhook_processing_ms".to_string(),
                        stat: lumen_metrics::HistogramStat::P95,
                    },
                    Comparison::GreaterThan,
                    250.0,
                ),
            )
            .with_message("Webhook p95 is {value}ms"),
        )
        .await;
    println!("已添加 {} 条告警规则\n", engine.rule_count().await);

    // 2. 模拟业务事件
    for i in 0..20 {
        store.record_webhook_success("checkout.completed", 120.0 + i as f64 * 20.0);
    }
    store.record_webhook_failure("invoice.paid", 900.0, Some("timeout"));
    store.record_quota_write_failure(15.0, Some("conflict"));

    let timer = store.start_timer("conversion", &[("format", "png")]);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    println!("转换耗时: {:.1}ms", store.end_timer(timer));

    // 3. 评估规则
    let now = Utc::now();
    for alert in engine.evaluate_at(now).await {
        println!("[{}] {}: {}", alert.severity, alert.rule_name, alert.message);
    }

    // 冷却期内再次评估不会重复触发
    let repeated = engine.evaluate_at(now + Duration::seconds(1)).await;
    println!("\n冷却期内新告警数: {}", repeated.len());

    println!("系统健康: {}", engine.get_system_health().await);
    println!(
        "指标快照: {}",
        serde_json::to_string_pretty(&store.get_all_metrics()).unwrap_or_default()
    );
}
