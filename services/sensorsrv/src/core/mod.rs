//! Service configuration and process bootstrap

pub mod bootstrap;
pub mod config;
