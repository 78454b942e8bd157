//! # cubapi Telemetry
//!
//! Structured logging for the cubapi services and tools.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
