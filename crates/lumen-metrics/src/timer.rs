use crate::key::MetricKey;
use crate::store::{ActiveTimer, MetricStore};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::warn;

/// 计时器句柄，由 `start_timer` 返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl MetricStore {
    pub fn start_timer(&self, name: &str, labels: &[(&str, &str)]) -> TimerHandle {
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        self.timers.insert(
            id,
            ActiveTimer {
                key: MetricKey::new(name, labels),
                started: Instant::now(),
            },
        );

        // 句柄单调递增，最小的即最早启动的
        while self.timers.len() > self.max_active_timers {
            let Some(oldest) = self.timers.iter().map(|t| *t.key()).min() else {
                break;
            };
            if self.timers.remove(&oldest).is_some() {
                warn!("Timer {} never ended, dropped", oldest);
            }
        }

        TimerHandle(id)
    }

    /// 结束计时，把耗时（毫秒）写入 `<name>_duration_ms` 并返回；未知句柄返回 0
    pub fn end_timer(&self, handle: TimerHandle) -> f64 {
        let Some((_, timer)) = self.timers.remove(&handle.0) else {
            warn!("Timer {} not found", handle.0);
            return 0.0;
        };

        let elapsed_ms = timer.started.elapsed().as_secs_f64() * 1000.0;
        let key = timer
            .key
            .with_name(format!("{}_duration_ms", timer.key.name()));
        self.record_histogram_by_key(key, elapsed_ms);
        elapsed_ms
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }
}
