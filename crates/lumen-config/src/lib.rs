pub mod global;
pub mod loader;

pub use global::{
    AlertsConfig, GlobalConfig, LoggingConfig, ReportsConfig, ShippingConfig, SystemConfig,
};
pub use loader::{ConfigLoader, CONFIG_FILE, ENV_PREFIX};
