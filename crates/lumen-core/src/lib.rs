//! 服务装配：可观测性组件、周期调度、上报与报告

pub mod error;
pub mod report;
pub mod scheduler;
pub mod service;
pub mod shipping;

pub use error::{CoreError, Result};
pub use report::{Report, ReportGenerator, ReportSection};
pub use scheduler::{ScheduledTask, Scheduler, SchedulerHandle, TaskType};
pub use service::{HealthReport, Observability};
pub use shipping::{LogShipper, MetricsShipper};
