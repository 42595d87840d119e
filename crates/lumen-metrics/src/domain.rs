use crate::store::MetricStore;

/// 业务指标名称
pub mod names {
    pub const CONVERSIONS_TOTAL: &str = "conversions_total";
    pub const CONVERSION_DURATION_MS: &str = "conversion_duration_ms";
    pub const CONVERSION_BYTES_TOTAL: &str = "conversion_bytes_total";
    pub const CONVERSION_USERS_TOTAL: &str = "conversion_users_total";

    pub const WEBHOOK_SUCCESS_TOTAL: &str = "webhook_success_total";
    pub const WEBHOOK_FAILURE_TOTAL: &str = "webhook_failure_total";
    pub const WEBHOOK_ERRORS_TOTAL: &str = "webhook_errors_total";
    pub const WEBHOOK_PROCESSING_MS: &str = "webhook_processing_ms";

    pub const QUOTA_WRITE_SUCCESS_TOTAL: &str = "quota_write_success_total";
    pub const QUOTA_WRITE_FAILURE_TOTAL: &str = "quota_write_failure_total";
    pub const QUOTA_WRITE_ERRORS_TOTAL: &str = "quota_write_errors_total";
    pub const QUOTA_WRITE_DURATION_MS: &str = "quota_write_duration_ms";
    pub const QUOTA_UTILIZATION_PERCENT: &str = "quota_utilization_percent";

    pub const ERRORS_TOTAL: &str = "errors_total";
}

use names::*;

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// 成功率（百分比）；没有数据时视为健康，返回 100
pub fn success_rate(successes: u64, failures: u64) -> f64 {
    let total = successes + failures;
    if total == 0 {
        return 100.0;
    }
    successes as f64 * 100.0 / total as f64
}

/// 失败率（百分比）；没有数据时返回 0
pub fn failure_rate(successes: u64, failures: u64) -> f64 {
    let total = successes + failures;
    if total == 0 {
        return 0.0;
    }
    failures as f64 * 100.0 / total as f64
}

// 业务事件记录接口
impl MetricStore {
    pub fn record_conversion(&self, user_id: &str, success: bool, duration_ms: f64, bytes: u64) {
        self.increment_counter(CONVERSIONS_TOTAL, 1, &[("status", status(success))]);
        self.increment_counter(CONVERSION_USERS_TOTAL, 1, &[("user_id", user_id)]);
        self.record_histogram(CONVERSION_DURATION_MS, duration_ms, &[]);
        if success {
            self.increment_counter(CONVERSION_BYTES_TOTAL, bytes, &[]);
        }
    }

    pub fn record_webhook_success(&self, event_type: &str, duration_ms: f64) {
        self.increment_counter(WEBHOOK_SUCCESS_TOTAL, 1, &[("event_type", event_type)]);
        self.record_histogram(WEBHOOK_PROCESSING_MS, duration_ms, &[("event_type", event_type)]);
    }

    pub fn record_webhook_failure(&self, event_type: &str, duration_ms: f64, error: Option<&str>) {
        self.increment_counter(WEBHOOK_FAILURE_TOTAL, 1, &[("event_type", event_type)]);
        self.record_histogram(WEBHOOK_PROCESSING_MS, duration_ms, &[("event_type", event_type)]);
        if let Some(error) = error {
            self.increment_counter(
                WEBHOOK_ERRORS_TOTAL,
                1,
                &[("event_type", event_type), ("error", error)],
            );
        }
    }

    pub fn record_quota_write_success(&self, duration_ms: f64) {
        self.increment_counter(QUOTA_WRITE_SUCCESS_TOTAL, 1, &[]);
        self.record_histogram(QUOTA_WRITE_DURATION_MS, duration_ms, &[]);
    }

    pub fn record_quota_write_failure(&self, duration_ms: f64, error: Option<&str>) {
        self.increment_counter(QUOTA_WRITE_FAILURE_TOTAL, 1, &[]);
        self.record_histogram(QUOTA_WRITE_DURATION_MS, duration_ms, &[]);
        if let Some(error) = error {
            self.increment_counter(QUOTA_WRITE_ERRORS_TOTAL, 1, &[("error", error)]);
        }
    }

    /// 记录配额使用率；`limit` 为 0 时忽略
    pub fn record_quota_usage(&self, used: u64, limit: u64) {
        if limit == 0 {
            return;
        }
        let percent = used as f64 * 100.0 / limit as f64;
        self.record_histogram(QUOTA_UTILIZATION_PERCENT, percent, &[]);
    }

    pub fn record_error(&self, component: &str, kind: &str, severity: &str) {
        self.increment_counter(
            ERRORS_TOTAL,
            1,
            &[("component", component), ("kind", kind), ("severity", severity)],
        );
    }

    // 派生指标

    pub fn get_webhook_success_rate(&self) -> f64 {
        success_rate(
            self.get_aggregated_counter(WEBHOOK_SUCCESS_TOTAL),
            self.get_aggregated_counter(WEBHOOK_FAILURE_TOTAL),
        )
    }

    pub fn get_quota_write_failure_rate(&self) -> f64 {
        failure_rate(
            self.get_counter(QUOTA_WRITE_SUCCESS_TOTAL, &[]),
            self.get_counter(QUOTA_WRITE_FAILURE_TOTAL, &[]),
        )
    }

    pub fn get_conversion_success_rate(&self) -> f64 {
        success_rate(
            self.get_counter(CONVERSIONS_TOTAL, &[("status", "success")]),
            self.get_counter(CONVERSIONS_TOTAL, &[("status", "failure")]),
        )
    }

    /// 窗口内配额使用率的平均值
    pub fn get_quota_utilization(&self) -> f64 {
        self.get_histogram_stats(QUOTA_UTILIZATION_PERCENT, &[]).avg
    }

    /// 带 `severity` 标签的错误计数
    pub fn get_error_count(&self, severity: &str) -> u64 {
        self.counters_named(ERRORS_TOTAL)
            .into_iter()
            .filter(|(key, _)| key.labels().get("severity").map(String::as_str) == Some(severity))
            .map(|(_, value)| value)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_success_rate() {
        let store = MetricStore::default();
        assert_eq!(store.get_webhook_success_rate(), 100.0);

        store.record_webhook_success("checkout.completed", 12.0);
        store.record_webhook_success("invoice.paid", 8.0);
        store.record_webhook_failure("checkout.completed", 30.0, Some("timeout"));

        let rate = store.get_webhook_success_rate();
        assert!((rate - 66.67).abs() < 0.1, "rate = {}", rate);
        assert_eq!(
            store.get_counter(
                WEBHOOK_ERRORS_TOTAL,
                &[("event_type", "checkout.completed"), ("error", "timeout")]
            ),
            1
        );
        assert_eq!(store.get_aggregated_histogram_stats(WEBHOOK_PROCESSING_MS).count, 3);
    }

    #[test]
    fn test_quota_write_failure_rate() {
        let store = MetricStore::default();
        assert_eq!(store.get_quota_write_failure_rate(), 0.0);

        for _ in 0..95 {
            store.record_quota_write_success(3.0);
        }
        for _ in 0..5 {
            store.record_quota_write_failure(9.0, None);
        }

        assert_eq!(store.get_quota_write_failure_rate(), 5.0);
    }

    #[test]
    fn test_conversion_recording() {
        let store = MetricStore::default();
        store.record_conversion("user-1", true, 1200.0, 2048);
        store.record_conversion("user-1", false, 300.0, 4096);
        store.record_conversion("user-2", true, 800.0, 1024);

        assert_eq!(store.get_counter(CONVERSION_BYTES_TOTAL, &[]), 3072);
        assert_eq!(store.get_counter(CONVERSION_USERS_TOTAL, &[("user_id", "user-1")]), 2);
        assert_eq!(store.get_histogram_stats(CONVERSION_DURATION_MS, &[]).count, 3);
        assert!((store.get_conversion_success_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_quota_utilization() {
        let store = MetricStore::default();
        store.record_quota_usage(50, 100);
        store.record_quota_usage(90, 100);
        store.record_quota_usage(10, 0);

        assert_eq!(store.get_quota_utilization(), 70.0);
    }

    #[test]
    fn test_error_count_by_severity() {
        let store = MetricStore::default();
        store.record_error("auth", "token_expired", "warning");
        store.record_error("billing", "charge_failed", "critical");
        store.record_error("billing", "charge_failed", "critical");

        assert_eq!(store.get_error_count("critical"), 2);
        assert_eq!(store.get_error_count("warning"), 1);
        assert_eq!(store.get_aggregated_counter(ERRORS_TOTAL), 3);
    }
}
