//! Endpoint sessions.
//!
//! A [`Session`] is the only way the engine talks to a store: it executes a
//! command, or a group of commands atomically. [`RemoteSession`] drives a real
//! server over the wire; [`MemorySession`] runs the same commands against an
//! in-process keyspace.
//!
//! The typed helpers in [`commands`] and the lazy [`KeyScan`] cursor are
//! built on top of those two calls, so every capability the engine needs
//! (enumerate, type, TTL, exists, flush, count) behaves identically against
//! either implementation.

pub mod commands;
mod memory;
mod remote;

pub use memory::{MemorySession, MemoryStore, StoredValue};
pub use remote::RemoteSession;

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use keyferry_client::{Result as ClientResult, Value};

/// A command channel to one store.
#[async_trait]
pub trait Session: Send {
    /// Human-readable endpoint label for logs.
    fn label(&self) -> &str;

    /// Run one command and return its reply.
    async fn execute(&mut self, args: Vec<Bytes>) -> ClientResult<Value>;

    /// Run `commands` as one `MULTI`/`EXEC` transaction and return one reply
    /// per command.
    async fn execute_atomic(&mut self, commands: Vec<Vec<Bytes>>) -> ClientResult<Vec<Value>>;
}

/// Lazy walk over every key of a session's selected database.
///
/// Backed by `SCAN`, one page per call to [`KeyScan::next_batch`]. `SCAN` may
/// hand out the same key more than once; repeats are dropped here so each key
/// is produced exactly once.
///
/// Deduplication remembers every key name handed out so far, so the walk
/// holds a copy of the whole keyspace's names in memory until it is dropped.
#[derive(Debug)]
pub struct KeyScan {
    cursor: u64,
    count: usize,
    finished: bool,
    seen: HashSet<Bytes>,
}

impl KeyScan {
    /// Start a new walk asking for roughly `count` keys per page.
    pub fn new(count: usize) -> Self {
        Self {
            cursor: 0,
            count,
            finished: false,
            seen: HashSet::new(),
        }
    }

    /// Fetch the next non-empty page of keys, or `None` once the walk is
    /// complete.
    pub async fn next_batch<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
    ) -> ClientResult<Option<Vec<Bytes>>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let (next, keys) = commands::scan(session, self.cursor, self.count).await?;
            self.cursor = next;
            self.finished = next == 0;

            let fresh: Vec<Bytes> = keys
                .into_iter()
                .filter(|key| self.seen.insert(key.clone()))
                .collect();
            if !fresh.is_empty() {
                return Ok(Some(fresh));
            }
        }
    }

    /// Number of distinct keys produced so far.
    pub fn produced(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_walks_every_key_once() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.set_string(format!("key:{}", i), "v");
        }
        let mut session = store.session();

        let mut scan = KeyScan::new(7);
        let mut all = Vec::new();
        while let Some(batch) = scan.next_batch(&mut session).await.unwrap() {
            assert!(batch.len() <= 7);
            all.extend(batch);
        }

        all.sort();
        all.dedup();
        assert_eq!(all.len(), 25);
        assert_eq!(scan.produced(), 25);
        assert!(scan.next_batch(&mut session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_empty_keyspace() {
        let store = MemoryStore::new();
        let mut session = store.session();
        let mut scan = KeyScan::new(10);
        assert!(scan.next_batch(&mut session).await.unwrap().is_none());
    }
}
