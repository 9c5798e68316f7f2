//! # keyferry-client
//!
//! A small RESP2 client for Redis-compatible servers, used by keyferry to
//! hold one session per migration endpoint.
//!
//! - **Async**: built on Tokio
//! - **TLS**: rustls, with a caller-supplied CA bundle or web PKI roots
//! - **Pipelining**: many commands per write, one reply slot per command
//! - **Bounded calls**: optional per-operation timeout
//!
//! ```ignore
//! use bytes::Bytes;
//! use keyferry_client::{Connection, ConnectionConfig};
//!
//! let mut conn = Connection::connect(&ConnectionConfig::from_addr("127.0.0.1", 6379)).await?;
//! let reply = conn.execute(&[Bytes::from("PING")]).await?;
//! ```

pub mod connection;
pub mod error;
pub mod resp;
pub mod tls;
pub mod types;

pub use connection::{Connection, ConnectionConfig};
pub use error::{Error, Result};
pub use types::{ToArg, Value};
