//! OBD-II diagnostics CLI support
//!
//! Settings loading, log setup and the subcommand bodies used by the
//! `obd-cli` binary.

pub mod commands;
pub mod settings;

pub use settings::{init_logging, AppConfig, LoggingConfig};
