//! # Shelfguard Core — shared plumbing for the security telemetry pipeline
//!
//! Every telemetry crate links against this library. It carries the error
//! taxonomy, the environment-driven configuration, and the record types that
//! cross crate boundaries (severities, log levels, alert channel variants).

pub mod config;
pub mod error;
pub mod types;

pub use config::{ChannelConfig, SmtpConfig, TelemetryConfig};
pub use error::{ShelfguardError, ShelfguardResult};
pub use types::{LogLevel, Severity};
