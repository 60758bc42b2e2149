//! Logging utilities.
//!
//! Centralizes logger initialization behind the standard `log` facade.

mod init;

pub use init::{DEFAULT_FILTER, LoggingConfig, init_logging};
