use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Device provisioning file consulted during credential resolution
    #[serde(default = "default_devices_file")]
    pub devices_file: String,

    /// Interval for the periodic session report in seconds
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    /// Worker pool size for the downlink response router
    #[serde(default = "default_response_pool_size")]
    pub response_pool_size: usize,

    /// Default downlink request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_devices_file() -> String {
    "devices.json".to_string()
}

fn default_report_interval_secs() -> u64 {
    30
}

fn default_response_pool_size() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TETHER"))
            .build()?
            .try_deserialize()
    }

    pub fn dispatcher_config(&self) -> tether_domain::DispatcherConfig {
        tether_domain::DispatcherConfig {
            response_pool_size: self.response_pool_size,
            default_timeout: std::time::Duration::from_secs(self.request_timeout_secs),
        }
    }
}
