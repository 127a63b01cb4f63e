//! Common command-line arguments for nibesrv services
//!
//! Services define their own `clap` parser and convert it into [`ServiceArgs`]
//! for the shared bootstrap helpers.

use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone)]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Configuration file path
    pub config: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    pub no_color: bool,

    /// Only validate configuration without starting service
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Configuration file to load, falling back to `default`
    pub fn config_path(&self, default: &str) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(default))
    }
}
