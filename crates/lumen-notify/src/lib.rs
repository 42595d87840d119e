//! 告警通知分发：渠道过滤、限流与投递

pub mod channel;
pub mod dispatcher;
pub mod providers;
pub mod rate_limit;
pub mod transport;

pub use channel::{Channel, ChannelConfig, ChannelKind, ChannelStats, TimeWindow, TimeWindowConfig};
pub use dispatcher::{DispatcherConfig, NotificationDispatcher, NotificationRecord};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use transport::{HttpTransport, Transport};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Unknown channel type: {0}")]
    UnknownChannelType(String),

    #[error("Invalid channel config: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
