//! # Shelfguard API guard — stateful request inspection
//!
//! Runs in front of every request of the lending service: scores URLs,
//! bodies, queries, and headers against a catalogue of attack patterns,
//! tracks failed logins per source IP in a sliding window, and hands out
//! temporary bans.

pub mod monitor;
pub mod patterns;

pub use monitor::{InspectedRequest, IntrusionMonitor, ThreatLevel, Verdict};
pub use patterns::PatternCatalogue;
