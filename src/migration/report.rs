//! Per-key outcomes and the run-level report they fold into.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{KeyType, RunMode, RunPhase};
use crate::error::KeyError;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a key was not transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The type is not copied, or could not be determined.
    Unsupported,
    /// The key's TTL ran out before it could be written.
    Expired,
}

/// Final status of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Written to the destination, or would have been in a dry run.
    Migrated,
    /// Deliberately not written.
    Skipped(SkipReason),
    /// Reading or writing failed.
    Failed,
}

/// Result of handling one enumerated key.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    /// Key name.
    pub key: Bytes,
    /// Classified type; `Unsupported` when classification failed.
    pub kind: KeyType,
    /// What happened.
    pub status: TransferStatus,
    /// Cause, for failures and classification errors.
    pub error: Option<KeyError>,
    /// The destination already held this key before it was written.
    pub existed_on_destination: bool,
}

impl TransferOutcome {
    /// A migrated key.
    pub fn migrated(key: Bytes, kind: KeyType) -> Self {
        Self {
            key,
            kind,
            status: TransferStatus::Migrated,
            error: None,
            existed_on_destination: false,
        }
    }

    /// A skipped key.
    pub fn skipped(key: Bytes, kind: KeyType, reason: SkipReason) -> Self {
        Self {
            key,
            kind,
            status: TransferStatus::Skipped(reason),
            error: None,
            existed_on_destination: false,
        }
    }

    /// A failed key.
    pub fn failed(key: Bytes, kind: KeyType, error: KeyError) -> Self {
        Self {
            key,
            kind,
            status: TransferStatus::Failed,
            error: Some(error),
            existed_on_destination: false,
        }
    }

    /// Attach a cause without changing the status.
    pub fn with_error(mut self, error: KeyError) -> Self {
        self.error = Some(error);
        self
    }

    /// Mark whether the destination already held the key.
    pub fn existed(mut self, existed: bool) -> Self {
        self.existed_on_destination = existed;
        self
    }
}

/// A failed key with its cause, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFailure {
    /// Key name, lossily decoded.
    pub key: String,
    /// Why it failed.
    pub cause: KeyError,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Aggregate result of a run.
///
/// Every recorded outcome lands in exactly one of `migrated`, `skipped` or
/// `failed`, and `total_source_keys` counts recorded outcomes, so the three
/// always add up to the total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Dry run or live.
    pub mode: RunMode,
    /// Phase reached; `Done` or `Aborted` once the run is over.
    pub phase: RunPhase,
    /// Keys enumerated on the source.
    pub total_source_keys: u64,
    /// Keys written (or that would have been written).
    pub migrated: u64,
    /// Keys not written on purpose.
    pub skipped: u64,
    /// Part of `skipped`: type not copied.
    pub skipped_unsupported: u64,
    /// Part of `skipped`: TTL ran out first.
    pub skipped_expired: u64,
    /// Keys whose read or write failed.
    pub failed: u64,
    /// Part of `failed`: gone from the source between enumeration and read.
    pub vanished: u64,
    /// Keys that already existed on the destination when reached.
    pub already_existing: u64,
    /// Destination keys counted before the run; zero when flushing.
    pub preexisting_destination_keys: u64,
    /// Failed keys with causes.
    pub failures: Vec<KeyFailure>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl MigrationReport {
    /// Empty report for a run in `mode`.
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Fold one key's outcome into the counters.
    pub fn record(&mut self, outcome: &TransferOutcome) {
        self.total_source_keys += 1;
        if outcome.existed_on_destination {
            self.already_existing += 1;
        }

        match outcome.status {
            TransferStatus::Migrated => self.migrated += 1,
            TransferStatus::Skipped(reason) => {
                self.skipped += 1;
                match reason {
                    SkipReason::Unsupported => self.skipped_unsupported += 1,
                    SkipReason::Expired => self.skipped_expired += 1,
                }
            }
            TransferStatus::Failed => {
                self.failed += 1;
                if outcome.error == Some(KeyError::Vanished) {
                    self.vanished += 1;
                }
                if let Some(cause) = &outcome.error {
                    self.failures.push(KeyFailure {
                        key: String::from_utf8_lossy(&outcome.key).into_owned(),
                        cause: cause.clone(),
                    });
                }
            }
        }
    }

    /// True when no key failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Multi-line human-readable summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Mode:                  {}\n", self.mode));
        out.push_str(&format!("Phase:                 {}\n", self.phase));
        out.push_str(&format!(
            "Duration:              {}\n",
            format_duration(self.duration)
        ));
        out.push_str(&format!(
            "Source keys:           {}\n",
            format_num(self.total_source_keys)
        ));
        out.push_str(&format!(
            "Migrated:              {}\n",
            format_num(self.migrated)
        ));
        out.push_str(&format!(
            "Skipped:               {} ({} unsupported, {} expired)\n",
            format_num(self.skipped),
            format_num(self.skipped_unsupported),
            format_num(self.skipped_expired)
        ));
        out.push_str(&format!(
            "Failed:                {} ({} vanished)\n",
            format_num(self.failed),
            format_num(self.vanished)
        ));
        out.push_str(&format!(
            "Already on destination: {}\n",
            format_num(self.already_existing)
        ));
        out.push_str(&format!(
            "Preexisting dest keys: {}\n",
            format_num(self.preexisting_destination_keys)
        ));
        for failure in &self.failures {
            out.push_str(&format!("  ✗ {}: {}\n", failure.key, failure.cause));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn format_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
