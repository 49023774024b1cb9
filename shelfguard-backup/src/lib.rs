//! # Shelfguard Backup — log archive and retention service
//!
//! Ticks on an external schedule: copies the day's log files into a dated
//! backup directory, optionally compresses and re-encrypts the archive, and
//! prunes backups past the retention window.

pub mod backup_service;

pub use backup_service::{BackupInfo, BackupOutcome, LogBackupService};

#[cfg(test)]
mod tests;
