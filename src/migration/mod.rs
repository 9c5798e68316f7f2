//! Keyspace migration engine.
//!
//! A run walks the source keyspace and hands every key through three steps:
//!
//! - [`classifier`] asks the source for the key's type and remaining TTL,
//! - [`replicator`] reads the value and, in a live run, replaces the
//!   destination key with it in one transaction,
//! - [`report`] folds the per-key outcome into the run's [`MigrationReport`].
//!
//! [`preflight`] prepares the destination beforehand, and [`orchestrator`]
//! drives the whole sequence.
//!
//! # Example
//!
//! ```ignore
//! use keyferry::migration::{Migrator, RunMode, RunOptions};
//!
//! let options = RunOptions { mode: RunMode::DryRun, ..Default::default() };
//! let report = Migrator::new(source, destination, options).run().await?;
//! println!("{}", report.render_text());
//! ```

pub mod classifier;
pub mod orchestrator;
pub mod preflight;
pub mod replicator;
pub mod report;

pub use classifier::{classify, KeyRecord, Ttl};
pub use orchestrator::{run_migration, Migrator, ProgressSnapshot, RunOptions};
pub use preflight::{preflight, PreflightAction};
pub use replicator::{replicator_for, KeyValue, Replicator};
pub use report::{KeyFailure, MigrationReport, SkipReason, TransferOutcome, TransferStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

/// Whether the destination is actually written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Classify and read everything, write nothing.
    DryRun,
    /// Replace destination keys with source values.
    #[default]
    Live,
}

impl RunMode {
    /// `DryRun` when `dry_run` is set, `Live` otherwise.
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::DryRun => write!(f, "dry-run"),
            RunMode::Live => write!(f, "live"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run phase
// ---------------------------------------------------------------------------

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Sessions open, nothing done yet
    #[default]
    Init,
    /// Flushing or counting the destination
    Preflight,
    /// Walking the source keyspace
    Enumerating,
    /// Finalizing the report
    Reporting,
    /// Finished; some keys may have failed
    Done,
    /// Stopped by a fatal error
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Preflight => write!(f, "preflight"),
            Self::Enumerating => write!(f, "enumerating"),
            Self::Reporting => write!(f, "reporting"),
            Self::Done => write!(f, "done"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Key type
// ---------------------------------------------------------------------------

/// Value type of a source key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// `string`
    String,
    /// `list`
    List,
    /// `set`
    Set,
    /// `zset`
    SortedSet,
    /// `hash`
    Hash,
    /// Anything the engine does not copy (streams, module types, `none`).
    Unsupported,
}

impl KeyType {
    /// Map a `TYPE` reply to a key type.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "string" => KeyType::String,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "zset" => KeyType::SortedSet,
            "hash" => KeyType::Hash,
            _ => KeyType::Unsupported,
        }
    }

    /// Native type name as `TYPE` reports it.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::SortedSet => "zset",
            KeyType::Hash => "hash",
            KeyType::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
