use lumen_logging::LogAggregator;
use lumen_metrics::MetricStore;
use lumen_notify::{NotifyError, Transport};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 指标快照上报
pub struct MetricsShipper {
    store: Arc<MetricStore>,
    transport: Arc<dyn Transport>,
    endpoint: String,
}

impl MetricsShipper {
    pub fn new(store: Arc<MetricStore>, transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        Self {
            store,
            transport,
            endpoint: endpoint.into(),
        }
    }

    pub async fn ship(&self) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "type": "metrics",
            "snapshot": serde_json::to_value(self.store.get_all_metrics())?,
        });
        self.transport.deliver(&self.endpoint, &payload).await
    }

    /// 上报并吞掉失败，供定时任务调用
    pub async fn ship_logged(&self) {
        if let Err(e) = self.ship().await {
            warn!(endpoint = %self.endpoint, "Metrics shipping failed: {}", e);
        }
    }
}

/// 新增日志上报
///
/// 游标为下一条待上报日志的追加序号，失败时保持不变，下一轮重发。
pub struct LogShipper {
    logs: Arc<LogAggregator>,
    transport: Arc<dyn Transport>,
    endpoint: String,
    cursor: Mutex<u64>,
}

impl LogShipper {
    pub fn new(logs: Arc<LogAggregator>, transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        Self {
            logs,
            transport,
            endpoint: endpoint.into(),
            cursor: Mutex::new(0),
        }
    }

    /// 返回本次上报的条数；上一轮仍在进行时跳过
    pub async fn ship(&self) -> Result<usize, NotifyError> {
        let Ok(mut cursor) = self.cursor.try_lock() else {
            debug!(endpoint = %self.endpoint, "Previous log shipment still in flight");
            return Ok(0);
        };

        let batch = self.logs.logs_from(*cursor).await;
        if batch.logs.is_empty() {
            *cursor = batch.next_seq;
            return Ok(0);
        }

        let payload = serde_json::json!({
            "type": "logs",
            "logs": serde_json::to_value(&batch.logs)?,
        });
        self.transport.deliver(&self.endpoint, &payload).await?;

        *cursor = batch.next_seq;
        debug!(endpoint = %self.endpoint, "Shipped {} log entries", batch.logs.len());
        Ok(batch.logs.len())
    }

    pub async fn ship_logged(&self) {
        if let Err(e) = self.ship().await {
            warn!(endpoint = %self.endpoint, "Log shipping failed: {}", e);
        }
    }

    pub async fn cursor(&self) -> u64 {
        *self.cursor.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use lumen_logging::LogEntry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FlakyTransport {
        down: AtomicBool,
        payloads: StdMutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn deliver(&self, endpoint: &str, payload: &serde_json::Value) -> Result<(), NotifyError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(NotifyError::Transport(format!("{} unavailable", endpoint)));
            }
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_metrics_shipper_payload() {
        let store = Arc::new(MetricStore::default());
        store.increment_counter("requests_total", 3, &[("route", "/convert")]);
        let transport = Arc::new(FlakyTransport::default());

        let shipper = MetricsShipper::new(store, transport.clone(), "http://collector/metrics");
        shipper.ship().await.unwrap();

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[0]["type"], "metrics");
        assert_eq!(
            payloads[0]["snapshot"]["counters"]["requests_total{route=\"/convert\"}"],
            3
        );
    }

    #[tokio::test]
    async fn test_log_cursor_advances_only_on_success() {
        let logs = Arc::new(LogAggregator::default());
        let transport = Arc::new(FlakyTransport::default());
        let shipper = LogShipper::new(logs.clone(), transport.clone(), "http://collector/logs");

        let base = Utc::now();
        logs.add_log(LogEntry::info("auth", "first").with_timestamp(base)).await;

        transport.down.store(true, Ordering::SeqCst);
        assert!(shipper.ship().await.is_err());
        assert_eq!(shipper.cursor().await, 0);

        transport.down.store(false, Ordering::SeqCst);
        assert_eq!(shipper.ship().await.unwrap(), 1);
        assert_eq!(shipper.cursor().await, 1);

        // 没有新日志时不投递
        assert_eq!(shipper.ship().await.unwrap(), 0);

        logs.add_log(
            LogEntry::warn("auth", "second").with_timestamp(base + Duration::seconds(5)),
        )
        .await;
        assert_eq!(shipper.ship().await.unwrap(), 1);
        assert_eq!(transport.payloads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_append_with_older_timestamp_is_shipped() {
        let logs = Arc::new(LogAggregator::default());
        let transport = Arc::new(FlakyTransport::default());
        let shipper = LogShipper::new(logs.clone(), transport.clone(), "http://collector/logs");

        let base = Utc::now();
        let early = LogEntry::info("convert", "built first").with_timestamp(base);
        logs.add_log(
            LogEntry::info("convert", "appended first").with_timestamp(base + Duration::milliseconds(5)),
        )
        .await;
        assert_eq!(shipper.ship().await.unwrap(), 1);

        logs.add_log(early).await;
        assert_eq!(shipper.ship().await.unwrap(), 1);

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[1]["logs"][0]["message"], "built first");
        assert_eq!(logs_len(&payloads), 2);
    }

    fn logs_len(payloads: &[serde_json::Value]) -> usize {
        payloads
            .iter()
            .filter_map(|p| p["logs"].as_array())
            .map(Vec::len)
            .sum()
    }
}
