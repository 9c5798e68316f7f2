//! Error types for the migration engine.
//!
//! Two tiers: [`MigrationError`] aborts a run, [`KeyError`] is scoped to one
//! key and only ever lands in that key's outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::migration::MigrationReport;

/// Which side of the migration an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The store being read.
    Source,
    /// The store being written.
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Destination => write!(f, "destination"),
        }
    }
}

/// Run-level failure. Any of these ends the run.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// An endpoint could not be reached, authenticated, or secured, or the
    /// session to it was lost.
    #[error("connection error ({role}): {cause}")]
    Connection {
        /// Endpoint the failure belongs to.
        role: Role,
        /// Underlying client error.
        #[source]
        cause: keyferry_client::Error,
    },

    /// Flushing the destination during preflight failed.
    #[error("flush of destination failed: {0}")]
    Flush(#[source] keyferry_client::Error),

    /// Walking the source keyspace failed part way.
    #[error("enumeration of source keys failed: {0}")]
    Enumeration(#[source] keyferry_client::Error),

    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Wrap a client error raised while talking to `role`.
    pub fn connection(role: Role, cause: keyferry_client::Error) -> Self {
        MigrationError::Connection { role, cause }
    }
}

/// A fatal error together with everything recorded before it happened.
#[derive(Debug, thiserror::Error)]
#[error("migration aborted: {cause}")]
pub struct MigrationAbort {
    /// Why the run stopped.
    #[source]
    pub cause: MigrationError,
    /// Report accumulated up to the abort.
    pub partial: MigrationReport,
}

/// Per-key failure. Recorded in the key's outcome; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KeyError {
    /// `TYPE` or `PTTL` could not be answered for the key.
    #[error("classification failed: {0}")]
    Classification(String),

    /// Reading the value from the source failed.
    #[error("read failed: {0}")]
    Read(String),

    /// The key disappeared from the source after it was enumerated.
    #[error("key vanished from source before it could be read")]
    Vanished,

    /// Writing the value to the destination failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Checking whether the key already exists on the destination failed.
    #[error("destination existence check failed: {0}")]
    Probe(String),
}
