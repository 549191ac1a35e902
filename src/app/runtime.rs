//! Runtime initialization and setup

use crate::app::{config::AppConfig, logging::init_logging};
use crate::config::{DriverConfig, ENV_LOG_LEVEL};
use std::path::Path;

/// Initialize logging before anything else can emit
///
/// The log filter comes from `SIMDRIVE_LOG_LEVEL`, then the `log_level` of
/// the configuration file, then `-v`. The file is read only to find that
/// key; errors in it are reported later by the command that loads it.
pub fn initialize_app(verbose: u8, config_path: Option<&Path>) -> AppConfig {
    let filter = std::env::var(ENV_LOG_LEVEL)
        .ok()
        .or_else(|| file_log_level(config_path));

    let config = AppConfig::new(verbose).with_log_filter(filter);
    init_logging(&config);
    config
}

fn file_log_level(config_path: Option<&Path>) -> Option<String> {
    let path = config_path.unwrap_or_else(|| Path::new(crate::config::CONFIG_FILE_NAME));
    if !path.exists() {
        return None;
    }
    DriverConfig::from_file(path).ok()?.log_level
}
