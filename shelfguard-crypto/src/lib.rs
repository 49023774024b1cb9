//! # Shelfguard Crypto — encrypted-at-rest engine for the telemetry pipeline
//!
//! Owns the master key (never written to disk or logs in plaintext), derives
//! a distinct key per logical stream context, and seals/opens the envelopes
//! the log sinks and backup service write to disk.

pub mod engine;
pub mod keystore;

pub use engine::{EncryptedEnvelope, EncryptionEngine, ALGORITHM};
pub use keystore::{KeyFileInfo, Keystore};

#[cfg(test)]
mod tests;
