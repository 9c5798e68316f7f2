//! Type-specific value transfer.
//!
//! Each supported [`KeyType`] has one [`Replicator`]: it knows the read
//! command for that type and how to express the value as bulk writes. The
//! shared [`Replicator::write`] wraps those writes in a transaction that
//! first deletes the destination key and finally applies the TTL, so a key
//! is either fully replaced or left as it was.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use keyferry_client::{Error, Result as ClientResult, ToArg, Value};

use super::KeyType;
use crate::session::{commands, Session};

/// Maximum elements carried by one write command.
pub const WRITE_CHUNK: usize = 512;

/// A value read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// Plain string.
    String(Bytes),
    /// Elements in list order.
    List(Vec<Bytes>),
    /// Members in no particular order.
    Set(Vec<Bytes>),
    /// `(member, score)` pairs.
    SortedSet(Vec<(Bytes, f64)>),
    /// `(field, value)` pairs.
    Hash(Vec<(Bytes, Bytes)>),
}

impl KeyValue {
    /// Type of this value.
    pub fn kind(&self) -> KeyType {
        match self {
            KeyValue::String(_) => KeyType::String,
            KeyValue::List(_) => KeyType::List,
            KeyValue::Set(_) => KeyType::Set,
            KeyValue::SortedSet(_) => KeyType::SortedSet,
            KeyValue::Hash(_) => KeyType::Hash,
        }
    }

    /// Number of elements; a string counts as one.
    pub fn len(&self) -> usize {
        match self {
            KeyValue::String(_) => 1,
            KeyValue::List(v) | KeyValue::Set(v) => v.len(),
            KeyValue::SortedSet(v) => v.len(),
            KeyValue::Hash(v) => v.len(),
        }
    }

    /// Whether this is a container without elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read and write strategy for one value type.
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Type handled by this replicator.
    fn kind(&self) -> KeyType;

    /// Read the full value of `key`. `None` means the key no longer exists.
    async fn read(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>>;

    /// Bulk write commands that rebuild `value` under `key` on an absent key.
    fn write_commands(&self, key: &Bytes, value: &KeyValue) -> ClientResult<Vec<Vec<Bytes>>>;

    /// Read `key`, telling an empty container apart from a vanished key.
    ///
    /// Container reads answer an absent key with an empty reply, so an empty
    /// result is confirmed with `EXISTS`.
    async fn fetch(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>> {
        match self.read(session, key).await? {
            Some(value) if value.is_empty() => {
                if commands::exists(session, key).await? {
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            other => Ok(other),
        }
    }

    /// Replace `key` on the destination with `value`, expiring after `ttl`.
    ///
    /// Runs as one transaction: `DEL`, the bulk writes, then `PEXPIRE`.
    async fn write(
        &self,
        session: &mut dyn Session,
        key: &Bytes,
        value: &KeyValue,
        ttl: Option<Duration>,
    ) -> ClientResult<()> {
        let transaction = replace_transaction(key, self.write_commands(key, value)?, ttl);
        let expected = transaction.len();
        let replies = session.execute_atomic(transaction).await?;
        if replies.len() != expected {
            return Err(Error::Protocol(format!(
                "transaction returned {} replies for {} commands",
                replies.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Assemble `DEL key`, `writes`, and `PEXPIRE key ms` when a TTL is given.
///
/// An empty container has no writes, which leaves the key deleted.
pub fn replace_transaction(
    key: &Bytes,
    writes: Vec<Vec<Bytes>>,
    ttl: Option<Duration>,
) -> Vec<Vec<Bytes>> {
    let mut transaction = Vec::with_capacity(writes.len() + 2);
    transaction.push(vec![Bytes::from_static(b"DEL"), key.clone()]);
    let wrote = !writes.is_empty();
    transaction.extend(writes);
    if let Some(ttl) = ttl.filter(|_| wrote) {
        let ms = (ttl.as_millis() as u64).max(1);
        transaction.push(vec![Bytes::from_static(b"PEXPIRE"), key.clone(), ms.to_arg()]);
    }
    transaction
}

/// Replicator for `kind`, or `None` when the type is not copied.
pub fn replicator_for(kind: KeyType) -> Option<&'static dyn Replicator> {
    match kind {
        KeyType::String => Some(&StringReplicator),
        KeyType::List => Some(&ListReplicator),
        KeyType::Set => Some(&SetReplicator),
        KeyType::SortedSet => Some(&SortedSetReplicator),
        KeyType::Hash => Some(&HashReplicator),
        KeyType::Unsupported => None,
    }
}

// ---------------------------------------------------------------------------
// Replicators
// ---------------------------------------------------------------------------

/// `GET` / `SET`.
pub struct StringReplicator;

/// `LRANGE 0 -1` / `RPUSH`.
pub struct ListReplicator;

/// `SMEMBERS` / `SADD`.
pub struct SetReplicator;

/// `ZRANGE 0 -1 WITHSCORES` / `ZADD`.
pub struct SortedSetReplicator;

/// `HGETALL` / `HSET`.
pub struct HashReplicator;

#[async_trait]
impl Replicator for StringReplicator {
    fn kind(&self) -> KeyType {
        KeyType::String
    }

    async fn read(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>> {
        let reply = session.execute(command("GET", key, &[])).await?;
        Ok(reply.into_bytes()?.map(KeyValue::String))
    }

    fn write_commands(&self, key: &Bytes, value: &KeyValue) -> ClientResult<Vec<Vec<Bytes>>> {
        match value {
            KeyValue::String(v) => Ok(vec![command("SET", key, std::slice::from_ref(v))]),
            other => Err(mismatch(self.kind(), other)),
        }
    }
}

#[async_trait]
impl Replicator for ListReplicator {
    fn kind(&self) -> KeyType {
        KeyType::List
    }

    async fn read(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>> {
        let reply = session
            .execute(command("LRANGE", key, &[0i64.to_arg(), (-1i64).to_arg()]))
            .await?;
        Ok(Some(KeyValue::List(bulk_strings(reply)?)))
    }

    fn write_commands(&self, key: &Bytes, value: &KeyValue) -> ClientResult<Vec<Vec<Bytes>>> {
        match value {
            KeyValue::List(items) => Ok(items
                .chunks(WRITE_CHUNK)
                .map(|chunk| command("RPUSH", key, chunk))
                .collect()),
            other => Err(mismatch(self.kind(), other)),
        }
    }
}

#[async_trait]
impl Replicator for SetReplicator {
    fn kind(&self) -> KeyType {
        KeyType::Set
    }

    async fn read(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>> {
        let reply = session.execute(command("SMEMBERS", key, &[])).await?;
        Ok(Some(KeyValue::Set(bulk_strings(reply)?)))
    }

    fn write_commands(&self, key: &Bytes, value: &KeyValue) -> ClientResult<Vec<Vec<Bytes>>> {
        match value {
            KeyValue::Set(members) => Ok(members
                .chunks(WRITE_CHUNK)
                .map(|chunk| command("SADD", key, chunk))
                .collect()),
            other => Err(mismatch(self.kind(), other)),
        }
    }
}

#[async_trait]
impl Replicator for SortedSetReplicator {
    fn kind(&self) -> KeyType {
        KeyType::SortedSet
    }

    async fn read(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>> {
        let reply = session
            .execute(command(
                "ZRANGE",
                key,
                &[
                    0i64.to_arg(),
                    (-1i64).to_arg(),
                    Bytes::from_static(b"WITHSCORES"),
                ],
            ))
            .await?;

        let members = pairs(bulk_strings(reply)?, "ZRANGE")?
            .into_iter()
            .map(|(member, score)| Ok((member, parse_score(&score)?)))
            .collect::<ClientResult<Vec<_>>>()?;
        Ok(Some(KeyValue::SortedSet(members)))
    }

    fn write_commands(&self, key: &Bytes, value: &KeyValue) -> ClientResult<Vec<Vec<Bytes>>> {
        match value {
            KeyValue::SortedSet(members) => Ok(members
                .chunks(WRITE_CHUNK)
                .map(|chunk| {
                    let args: Vec<Bytes> = chunk
                        .iter()
                        .flat_map(|(member, score)| [score.to_arg(), member.clone()])
                        .collect();
                    command("ZADD", key, &args)
                })
                .collect()),
            other => Err(mismatch(self.kind(), other)),
        }
    }
}

#[async_trait]
impl Replicator for HashReplicator {
    fn kind(&self) -> KeyType {
        KeyType::Hash
    }

    async fn read(&self, session: &mut dyn Session, key: &Bytes) -> ClientResult<Option<KeyValue>> {
        let reply = session.execute(command("HGETALL", key, &[])).await?;
        Ok(Some(KeyValue::Hash(pairs(bulk_strings(reply)?, "HGETALL")?)))
    }

    fn write_commands(&self, key: &Bytes, value: &KeyValue) -> ClientResult<Vec<Vec<Bytes>>> {
        match value {
            KeyValue::Hash(fields) => Ok(fields
                .chunks(WRITE_CHUNK)
                .map(|chunk| {
                    let args: Vec<Bytes> = chunk
                        .iter()
                        .flat_map(|(field, value)| [field.clone(), value.clone()])
                        .collect();
                    command("HSET", key, &args)
                })
                .collect()),
            other => Err(mismatch(self.kind(), other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn command(name: &'static str, key: &Bytes, rest: &[Bytes]) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    args.push(Bytes::from_static(name.as_bytes()));
    args.push(key.clone());
    args.extend_from_slice(rest);
    args
}

fn mismatch(expected: KeyType, value: &KeyValue) -> Error {
    Error::UnexpectedResponse {
        expected: expected.as_str(),
        actual: format!("{} value", value.kind()),
    }
}

fn bulk_strings(reply: Value) -> ClientResult<Vec<Bytes>> {
    reply
        .into_array()?
        .into_iter()
        .map(|item| {
            item.into_bytes()?
                .ok_or_else(|| Error::UnexpectedResponse {
                    expected: "bulk string",
                    actual: "nil".into(),
                })
        })
        .collect()
}

fn pairs(flat: Vec<Bytes>, command: &str) -> ClientResult<Vec<(Bytes, Bytes)>> {
    if flat.len() % 2 != 0 {
        return Err(Error::UnexpectedResponse {
            expected: "even number of elements",
            actual: format!("{} elements in {} reply", flat.len(), command),
        });
    }
    let mut iter = flat.into_iter();
    let mut out = Vec::new();
    while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
        out.push((a, b));
    }
    Ok(out)
}

/// Parse a score as the server prints it, including `inf` and `-inf`.
fn parse_score(raw: &[u8]) -> ClientResult<f64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|score| !score.is_nan())
        .ok_or_else(|| Error::UnexpectedResponse {
            expected: "sorted set score",
            actual: String::from_utf8_lossy(raw).into_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryStore, StoredValue};

    fn key(name: &str) -> Bytes {
        Bytes::copy_from_slice(name.as_bytes())
    }

    #[test]
    fn test_dispatch_table() {
        for kind in [
            KeyType::String,
            KeyType::List,
            KeyType::Set,
            KeyType::SortedSet,
            KeyType::Hash,
        ] {
            assert_eq!(replicator_for(kind).map(|r| r.kind()), Some(kind));
        }
        assert!(replicator_for(KeyType::Unsupported).is_none());
    }

    #[test]
    fn test_replace_transaction_shape() {
        let k = key("k");
        let tx = replace_transaction(
            &k,
            vec![vec![Bytes::from("SET"), k.clone(), Bytes::from("v")]],
            Some(Duration::from_millis(1500)),
        );
        assert_eq!(tx.len(), 3);
        assert_eq!(tx[0], vec![Bytes::from("DEL"), k.clone()]);
        assert_eq!(tx[2], vec![Bytes::from("PEXPIRE"), k.clone(), Bytes::from("1500")]);

        let empty = replace_transaction(&k, Vec::new(), Some(Duration::from_secs(5)));
        assert_eq!(empty, vec![vec![Bytes::from("DEL"), k]]);
    }

    #[test]
    fn test_large_list_is_chunked() {
        let items: Vec<Bytes> = (0..1300).map(|i| Bytes::from(i.to_string())).collect();
        let cmds = ListReplicator
            .write_commands(&key("l"), &KeyValue::List(items))
            .unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].len(), WRITE_CHUNK + 2);
        assert_eq!(cmds[2].len(), 1300 - 2 * WRITE_CHUNK + 2);
    }

    #[test]
    fn test_wrong_value_kind_rejected() {
        let err = HashReplicator
            .write_commands(&key("h"), &KeyValue::String(Bytes::from("x")))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("expected hash, got string value"));
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score(b"1.5").unwrap(), 1.5);
        assert_eq!(parse_score(b"inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_score(b"-inf").unwrap(), f64::NEG_INFINITY);
        assert_eq!(parse_score(b"1e+20").unwrap(), 1e20);
        assert!(parse_score(b"nan").is_err());
        assert!(!parse_score(b"abc").unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_every_type_copies_between_stores() {
        let source = MemoryStore::new();
        source.set_string("s", "hello");
        source.push_list("l", ["x", "y", "x"]);
        source.add_set("set", ["a", "b"]);
        source.add_sorted("z", [("lo", f64::NEG_INFINITY), ("pi", 3.141592653589793)]);
        source.set_hash("h", [("f1", "v1"), ("f2", "v2")]);

        let destination = MemoryStore::new();
        let mut src = source.session();
        let mut dst = destination.session();

        for (name, kind) in [
            ("s", KeyType::String),
            ("l", KeyType::List),
            ("set", KeyType::Set),
            ("z", KeyType::SortedSet),
            ("h", KeyType::Hash),
        ] {
            let replicator = replicator_for(kind).unwrap();
            let value = replicator.fetch(&mut src, &key(name)).await.unwrap().unwrap();
            assert_eq!(value.kind(), kind);
            replicator
                .write(&mut dst, &key(name), &value, None)
                .await
                .unwrap();
            assert_eq!(destination.value(name.as_bytes()), source.value(name.as_bytes()));
        }
    }

    #[tokio::test]
    async fn test_write_replaces_other_type_and_stale_ttl() {
        let destination = MemoryStore::new();
        destination.add_set("k", ["old"]);
        destination.expire("k", Duration::from_secs(100));
        let mut dst = destination.session();

        StringReplicator
            .write(&mut dst, &key("k"), &KeyValue::String(Bytes::from("new")), None)
            .await
            .unwrap();

        assert_eq!(
            destination.value(b"k"),
            Some(StoredValue::String(Bytes::from("new")))
        );
        assert!(destination.ttl(b"k").is_none());
    }

    #[tokio::test]
    async fn test_write_applies_ttl() {
        let destination = MemoryStore::new();
        let mut dst = destination.session();

        ListReplicator
            .write(
                &mut dst,
                &key("l"),
                &KeyValue::List(vec![Bytes::from("x")]),
                Some(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        let ttl = destination.ttl(b"l").unwrap();
        assert!(ttl > Duration::from_secs(29) && ttl <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_vanished_key_reads_as_none() {
        let source = MemoryStore::new();
        source.set_string("s", "v");
        source.push_list("l", ["x"]);
        source.vanish_on_read("s");
        source.vanish_on_read("l");
        let mut src = source.session();

        assert!(StringReplicator.fetch(&mut src, &key("s")).await.unwrap().is_none());
        assert!(ListReplicator.fetch(&mut src, &key("l")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_destination_untouched() {
        let destination = MemoryStore::new();
        destination.set_hash("h", [("keep", "me")]);
        destination.fail_command("HSET", "h");
        let mut dst = destination.session();

        let value = KeyValue::Hash(vec![(Bytes::from("f"), Bytes::from("v"))]);
        assert!(HashReplicator.write(&mut dst, &key("h"), &value, None).await.is_err());
        assert!(matches!(destination.value(b"h"), Some(StoredValue::Hash(f)) if f.len() == 1));
    }
}
