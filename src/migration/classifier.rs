//! Key classification: native type plus remaining time to live.

use std::time::{Duration, Instant};

use bytes::Bytes;
use keyferry_client::Result as ClientResult;

use super::KeyType;
use crate::session::{commands, Session};

/// Expiration state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No expiration set.
    Persistent,
    /// Expires after the given duration.
    Remaining(Duration),
    /// Already expired or gone.
    Expired,
}

impl Ttl {
    /// Interpret a `PTTL` reply.
    pub fn from_pttl(ms: i64) -> Self {
        match ms {
            -1 => Ttl::Persistent,
            ms if ms > 0 => Ttl::Remaining(Duration::from_millis(ms as u64)),
            _ => Ttl::Expired,
        }
    }
}

/// A classified source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Key name.
    pub name: Bytes,
    /// Value type.
    pub kind: KeyType,
    /// Expiration as read from the source.
    pub ttl: Ttl,
    /// When `ttl` was read.
    pub captured_at: Instant,
}

impl KeyRecord {
    /// Expiration state at `now`, counting down from when the TTL was read.
    ///
    /// A remaining TTL below one millisecond cannot be expressed with
    /// `PEXPIRE` and reads as expired.
    pub fn ttl_at(&self, now: Instant) -> Ttl {
        match self.ttl {
            Ttl::Remaining(remaining) => {
                let elapsed = now.saturating_duration_since(self.captured_at);
                match remaining.checked_sub(elapsed) {
                    Some(left) if left >= Duration::from_millis(1) => Ttl::Remaining(left),
                    _ => Ttl::Expired,
                }
            }
            other => other,
        }
    }
}

/// Classify `key` with `TYPE` and `PTTL` on the source.
///
/// Types the engine cannot copy come back as [`KeyType::Unsupported`]; only
/// a failing command is an error.
pub async fn classify<S: Session + ?Sized>(session: &mut S, key: Bytes) -> ClientResult<KeyRecord> {
    let kind = KeyType::from_type_name(&commands::key_type(session, &key).await?);
    let ttl = Ttl::from_pttl(commands::pttl(session, &key).await?);

    Ok(KeyRecord {
        name: key,
        kind,
        ttl,
        captured_at: Instant::now(),
    })
}
