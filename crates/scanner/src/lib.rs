pub mod config;
pub mod schedule;
mod service;

pub use config::{
    config_path_from_env, load_or_create_config, resolve_path, save_config, ConfigError,
    FallbackConfig, ScannerConfig, CONFIG_VERSION,
};
pub use schedule::{next_scan_time, parse_start_time, UpdatePeriod};
pub use service::{ScanEvent, ScannerService, ServiceState, ServiceStatus};
