//! # keyferry
//!
//! Copies the keyspace of one Redis-protocol store onto another, keeping
//! each key's type, content and remaining time to live.
//!
//! - Strings, lists, sets, sorted sets and hashes are copied; other types are
//!   skipped and counted.
//! - Every destination key is replaced in one `MULTI`/`EXEC` transaction, so
//!   re-running a migration converges on the same destination state.
//! - A dry run reads and classifies everything without writing a byte.
//! - A key that fails is recorded with its cause and the run goes on; only a
//!   lost endpoint, a failed flush or a broken scan stop the run, and even
//!   then the report built so far is returned.
//!
//! ```ignore
//! use keyferry::{config::MigrationConfig, migration::run_migration};
//!
//! let config = MigrationConfig::from_file("migrate.toml".as_ref())?;
//! match run_migration(&config, None).await {
//!     Ok(report) => println!("{}", report.render_text()),
//!     Err(abort) => eprintln!("{}\n{}", abort, abort.partial.render_text()),
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod migration;
pub mod session;
pub mod telemetry;

pub use config::{EndpointConfig, MigrationConfig};
pub use error::{KeyError, MigrationAbort, MigrationError, Role};
pub use migration::{run_migration, MigrationReport, Migrator, RunMode, RunOptions};
pub use session::{MemoryStore, RemoteSession, Session};
