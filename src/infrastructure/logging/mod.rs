//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, with JSON or
//! pretty console output on stderr and optional rolling log files.

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
