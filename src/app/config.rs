//! Application configuration
//!
//! Settings that shape the process rather than a simulation run.

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Explicit tracing filter; takes precedence over `verbose`
    pub log_filter: Option<String>,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            log_filter: None,
        }
    }

    /// Use an explicit filter such as `SIMDRIVE_LOG_LEVEL` or the config `log_level`
    pub fn with_log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,hyper=debug,reqwest=debug",
        }
    }

    /// Filter handed to the subscriber
    pub fn filter(&self) -> String {
        match &self.log_filter {
            Some(filter) if self.verbose == 0 => filter.clone(),
            _ => self.log_level().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_follows_verbosity() {
        assert_eq!(AppConfig::new(0).log_level(), "info");
        assert_eq!(AppConfig::new(1).log_level(), "debug");
        assert_eq!(AppConfig::new(2).log_level(), "trace");
        assert!(AppConfig::new(5).log_level().starts_with("trace,"));
    }

    #[test]
    fn test_explicit_filter() {
        let config = AppConfig::new(0).with_log_filter(Some("simdrive=debug".into()));
        assert_eq!(config.filter(), "simdrive=debug");

        // -v on the command line wins
        let config = AppConfig::new(1).with_log_filter(Some("warn".into()));
        assert_eq!(config.filter(), "debug");

        let config = AppConfig::new(0).with_log_filter(Some("  ".into()));
        assert_eq!(config.filter(), "info");
    }
}
