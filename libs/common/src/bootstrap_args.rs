//! Common command-line arguments for sensorsrv binaries
//!
//! Service binaries flatten [`ServiceArgs`] into their own argument struct.

#[cfg(feature = "cli")]
use clap::Args;
use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        arg(short = 'l', long, default_value = "info", env = "RUST_LOG")
    )]
    pub log_level: String,

    /// Directory for daily-rolling log files (console only when omitted)
    #[cfg_attr(feature = "cli", arg(long, env = "SENSORSRV_LOG_DIR"))]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output (useful when piping to files)
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", arg(long))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Build a logging configuration for the named service
    pub fn log_config(&self, service_name: &str) -> crate::logging::LogConfig {
        crate::logging::LogConfig {
            service_name: service_name.to_string(),
            level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            enable_json: false,
            ansi: !self.no_color,
        }
    }
}
