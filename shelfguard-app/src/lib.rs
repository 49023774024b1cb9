//! # Shelfguard — telemetry stack for the library lending service
//!
//! Wires the individual components (encryption engine, log sinks, intrusion
//! monitor, alert dispatcher, metrics collector, backup service) into one
//! explicitly constructed stack the web layer and the admin surface call into.

pub mod components;

pub use components::TelemetryStack;
