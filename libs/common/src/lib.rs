//! Shared bootstrap library for sensorsrv
//!
//! Provides the pieces every service binary needs before it can do real work:
//! - logging initialisation (console + optional rolling file)
//! - common command-line arguments
//! - graceful shutdown signal handling

pub mod bootstrap_args;
pub mod logging;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use logging::LogConfig;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;
