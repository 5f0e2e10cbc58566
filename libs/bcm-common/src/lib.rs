//! Shared bootstrap for the body-control workspace
//!
//! - `logging`: tracing subscriber setup with the bracketed console format
//!   and an optional daily log file
//! - `config`: layered configuration loading (files, then `BCM_` env vars)

pub mod config;
pub mod error;
pub mod logging;

pub use config::{load_config, load_config_from_file};
pub use error::{CommonError, Result};
pub use logging::{init_logging, LogConfig};
