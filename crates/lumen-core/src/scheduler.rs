use crate::error::Result;
use crate::report::ReportGenerator;
use crate::service::Observability;
use crate::shipping::{LogShipper, MetricsShipper};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// 告警规则评估
    EvaluateAlerts,
    /// 指标快照上报
    ShipMetrics,
    /// 新增日志上报
    ShipLogs,
    /// 过期日志清理
    CleanupLogs,
    /// 定期报告
    GenerateReport,
}

/// 调度任务
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// 任务名称
    pub name: String,

    /// 执行间隔
    pub interval: Duration,

    /// 任务类型
    pub task_type: TaskType,

    /// 是否启用
    pub enabled: bool,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, interval: Duration, task_type: TaskType) -> Self {
        Self {
            name: name.into(),
            interval,
            task_type,
            enabled: true,
        }
    }

    pub fn evaluate_alerts(secs: u64) -> Self {
        Self::new("alert-evaluation", Duration::from_secs(secs), TaskType::EvaluateAlerts)
    }

    pub fn ship_metrics(secs: u64) -> Self {
        Self::new("metrics-shipping", Duration::from_secs(secs), TaskType::ShipMetrics)
    }

    pub fn ship_logs(secs: u64) -> Self {
        Self::new("log-shipping", Duration::from_secs(secs), TaskType::ShipLogs)
    }

    pub fn cleanup_logs(secs: u64) -> Self {
        Self::new("log-cleanup", Duration::from_secs(secs), TaskType::CleanupLogs)
    }

    pub fn generate_report(secs: u64) -> Self {
        Self::new("report", Duration::from_secs(secs), TaskType::GenerateReport)
    }

    /// 投递类任务在独立任务中执行，不阻塞下一次触发
    fn is_detached(&self) -> bool {
        matches!(
            self.task_type,
            TaskType::ShipMetrics | TaskType::ShipLogs | TaskType::GenerateReport
        )
    }
}

/// 周期任务调度器
///
/// 持有所有定时触发，组件本身不自行调度。
pub struct Scheduler {
    service: Arc<Observability>,
    tasks: Vec<ScheduledTask>,
    metrics_shipper: Option<MetricsShipper>,
    log_shipper: Option<LogShipper>,
    reports: Option<ReportGenerator>,
}

impl Scheduler {
    /// 按配置创建任务；报告章节未知时返回配置错误
    pub fn from_service(service: Arc<Observability>) -> Result<Self> {
        let config = service.config();
        let shipping = &config.shipping;
        let mut tasks = vec![
            ScheduledTask::evaluate_alerts(config.alerts.evaluation_interval_secs),
            ScheduledTask::cleanup_logs(shipping.log_cleanup_interval_secs),
        ];

        let metrics_shipper = shipping.metrics_endpoint.as_ref().map(|endpoint| {
            tasks.push(ScheduledTask::ship_metrics(shipping.metrics_interval_secs));
            MetricsShipper::new(service.store().clone(), service.transport().clone(), endpoint)
        });

        let log_shipper = shipping.logs_endpoint.as_ref().map(|endpoint| {
            tasks.push(ScheduledTask::ship_logs(shipping.logs_interval_secs));
            LogShipper::new(service.logs().clone(), service.transport().clone(), endpoint)
        });

        let reports = match config.reports.interval_secs {
            Some(secs) => {
                tasks.push(ScheduledTask::generate_report(secs));
                Some(service.report_generator()?)
            }
            None => None,
        };

        Ok(Self {
            service,
            tasks,
            metrics_shipper,
            log_shipper,
            reports,
        })
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// 执行一次任务，失败只记录日志
    pub async fn run_task(&self, task_type: TaskType) {
        match task_type {
            TaskType::EvaluateAlerts => {
                let fired = self.service.alerts().evaluate_once().await;
                if !fired.is_empty() {
                    debug!("Alert evaluation fired {} alerts", fired.len());
                }
            }
            TaskType::ShipMetrics => {
                if let Some(shipper) = &self.metrics_shipper {
                    shipper.ship_logged().await;
                }
            }
            TaskType::ShipLogs => {
                if let Some(shipper) = &self.log_shipper {
                    shipper.ship_logged().await;
                }
            }
            TaskType::CleanupLogs => {
                let hours = self.service.config().shipping.log_retention_hours;
                let removed = self.service.logs().cleanup(hours).await;
                debug!("Log cleanup removed {} entries", removed);
            }
            TaskType::GenerateReport => {
                if let Some(generator) = &self.reports {
                    self.publish_report(generator).await;
                }
            }
        }
    }

    async fn publish_report(&self, generator: &ReportGenerator) {
        let report = match generator.generate().await {
            Ok(report) => report,
            Err(e) => {
                warn!("Report generation failed: {}", e);
                return;
            }
        };

        let payload = match serde_json::to_value(&report) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Report serialization failed: {}", e);
                return;
            }
        };

        match &self.service.config().reports.endpoint {
            Some(endpoint) => {
                if let Err(e) = self.service.transport().deliver(endpoint, &payload).await {
                    warn!(endpoint = %endpoint, "Report delivery failed: {}", e);
                }
            }
            None => info!(report_id = %report.id, "Report generated: {}", payload),
        }
    }

    /// 启动全部启用的任务
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Arc::new(self);
        let mut join_handles = Vec::new();

        for task in scheduler.tasks.iter().filter(|t| t.enabled) {
            let task = task.clone();
            let scheduler = scheduler.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            info!(task = %task.name, interval = ?task.interval, "Task scheduled");

            join_handles.push(tokio::spawn(async move {
                let mut ticker = interval(task.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if task.is_detached() {
                                tokio::spawn(run_isolated(scheduler.clone(), task.clone()));
                            } else {
                                run_isolated(scheduler.clone(), task.clone()).await;
                            }
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!(task = %task.name, "Task stopped");
            }));
        }

        info!("Scheduler started with {} tasks", join_handles.len());
        SchedulerHandle {
            shutdown_tx,
            join_handles,
        }
    }
}

/// 在独立任务中执行一次触发，panic 只记录日志，不影响后续触发
async fn run_isolated(scheduler: Arc<Scheduler>, task: ScheduledTask) {
    let task_type = task.task_type;
    if let Err(e) = tokio::spawn(async move { scheduler.run_task(task_type).await }).await {
        error!(task = %task.name, "Scheduled task run failed: {}", e);
    }
}

/// 运行中的调度器
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn task_count(&self) -> usize {
        self.join_handles.len()
    }

    /// 停止所有定时触发并等待任务退出
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}
