//! # Shelfguard SIEM — encrypted log sinks and alert dispatch
//!
//! The write side of the telemetry pipeline: structured events land in
//! date-partitioned encrypted files, and notable conditions fan out to the
//! configured alert channels with cooldown deduplication.

pub mod alert_dispatcher;
pub mod log_sink;

pub use alert_dispatcher::{Alert, AlertDispatcher};
pub use log_sink::EncryptedLogSink;

#[cfg(test)]
mod tests;
