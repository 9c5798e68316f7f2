//! In-process keyspace speaking the engine's command subset.
//!
//! [`MemoryStore`] is shared state; every [`MemorySession`] handed out by
//! [`MemoryStore::session`] operates on it, so a caller can keep the store to
//! inspect what a migration did. Faults can be injected per command and key
//! to reproduce eviction races, rejected writes and lost connections.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use keyferry_client::{Error, Result, Value};
use parking_lot::Mutex;

use super::Session;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// A stored value, as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// Plain string.
    String(Bytes),
    /// Ordered list.
    List(Vec<Bytes>),
    /// Unordered set.
    Set(BTreeSet<Bytes>),
    /// Member to score.
    SortedSet(BTreeMap<Bytes, f64>),
    /// Field to value.
    Hash(BTreeMap<Bytes, Bytes>),
    /// A type the store can hold but the engine does not copy, e.g. `stream`.
    Foreign(String),
}

impl StoredValue {
    fn type_name(&self) -> &str {
        match self {
            StoredValue::String(_) => "string",
            StoredValue::List(_) => "list",
            StoredValue::Set(_) => "set",
            StoredValue::SortedSet(_) => "zset",
            StoredValue::Hash(_) => "hash",
            StoredValue::Foreign(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Keyspace {
    entries: BTreeMap<Bytes, Entry>,
    failures: HashSet<(String, Bytes)>,
    vanish_on_read: HashSet<Bytes>,
    commands_left: Option<usize>,
    log: Vec<String>,
}

/// Shared in-memory keyspace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Keyspace>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session on this store.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            label: "memory".to_string(),
        }
    }

    // ── Seeding ─────────────────────────────────────────────────────────

    /// Store a string, replacing any previous value.
    pub fn set_string(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.put(key.into(), StoredValue::String(value.into()));
    }

    /// Store a list, replacing any previous value.
    pub fn push_list<I, V>(&self, key: impl Into<Bytes>, items: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.put(key.into(), StoredValue::List(items));
    }

    /// Store a set, replacing any previous value.
    pub fn add_set<I, V>(&self, key: impl Into<Bytes>, members: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.put(key.into(), StoredValue::Set(members));
    }

    /// Store a sorted set, replacing any previous value.
    pub fn add_sorted<I, V>(&self, key: impl Into<Bytes>, members: I)
    where
        I: IntoIterator<Item = (V, f64)>,
        V: Into<Bytes>,
    {
        let members = members.into_iter().map(|(m, s)| (m.into(), s)).collect();
        self.put(key.into(), StoredValue::SortedSet(members));
    }

    /// Store a hash, replacing any previous value.
    pub fn set_hash<I, F, V>(&self, key: impl Into<Bytes>, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<Bytes>,
        V: Into<Bytes>,
    {
        let fields = fields
            .into_iter()
            .map(|(f, v)| (f.into(), v.into()))
            .collect();
        self.put(key.into(), StoredValue::Hash(fields));
    }

    /// Store a value of a type the engine does not copy.
    pub fn insert_foreign(&self, key: impl Into<Bytes>, type_name: &str) {
        self.put(key.into(), StoredValue::Foreign(type_name.to_string()));
    }

    /// Give an existing key a time to live.
    pub fn expire(&self, key: impl Into<Bytes>, ttl: Duration) {
        let key: Bytes = key.into();
        let mut ks = self.inner.lock();
        if let Some(entry) = ks.entries.get_mut(&key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    fn put(&self, key: Bytes, value: StoredValue) {
        self.inner.lock().entries.insert(
            key,
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Current value of a key.
    pub fn value(&self, key: &[u8]) -> Option<StoredValue> {
        let mut ks = self.inner.lock();
        ks.purge_expired();
        ks.entries.get(key).map(|e| e.value.clone())
    }

    /// Remaining time to live; `None` for persistent or absent keys.
    pub fn ttl(&self, key: &[u8]) -> Option<Duration> {
        let mut ks = self.inner.lock();
        ks.purge_expired();
        ks.entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// All live keys in order.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut ks = self.inner.lock();
        ks.purge_expired();
        ks.entries.keys().cloned().collect()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of every command received, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.inner.lock().log.clone()
    }

    // ── Fault injection ─────────────────────────────────────────────────

    /// Make `command` fail with a server error whenever it targets `key`.
    pub fn fail_command(&self, command: &str, key: impl Into<Bytes>) {
        self.inner
            .lock()
            .failures
            .insert((command.to_ascii_uppercase(), key.into()));
    }

    /// Delete `key` the first time a value read targets it, as if it was
    /// evicted right after being enumerated.
    pub fn vanish_on_read(&self, key: impl Into<Bytes>) {
        self.inner.lock().vanish_on_read.insert(key.into());
    }

    /// Serve `n` more exchanges, then behave like a dropped connection.
    pub fn disconnect_after(&self, n: usize) {
        self.inner.lock().commands_left = Some(n);
    }
}

/// A [`Session`] on a [`MemoryStore`].
pub struct MemorySession {
    store: MemoryStore,
    label: String,
}

impl MemorySession {
    /// The store this session operates on.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl Session for MemorySession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn execute(&mut self, args: Vec<Bytes>) -> Result<Value> {
        let mut ks = self.store.inner.lock();
        ks.take_exchange()?;
        ks.admit(&args)?;
        ks.apply(&args)
    }

    async fn execute_atomic(&mut self, commands: Vec<Vec<Bytes>>) -> Result<Vec<Value>> {
        let mut ks = self.store.inner.lock();
        ks.take_exchange()?;
        for args in &commands {
            ks.admit(args)?;
        }

        let snapshot = ks.entries.clone();
        let mut results = Vec::with_capacity(commands.len());
        for args in &commands {
            match ks.apply(args) {
                Ok(value) => results.push(value),
                Err(e) => {
                    ks.entries = snapshot;
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}

impl Keyspace {
    fn take_exchange(&mut self) -> Result<()> {
        match self.commands_left.as_mut() {
            Some(0) => Err(Error::ConnectionClosed),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Queue-time checks: known command, injected failures.
    fn admit(&mut self, args: &[Bytes]) -> Result<()> {
        let Some(name) = args.first() else {
            return Err(Error::Server("ERR empty command".into()));
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        self.log.push(name.clone());

        if !KNOWN_COMMANDS.contains(&name.as_str()) {
            return Err(Error::Server(format!("ERR unknown command '{}'", name)));
        }
        if let Some(key) = args.get(1) {
            if self.failures.contains(&(name, key.clone())) {
                return Err(Error::Server("ERR injected failure".into()));
            }
        }
        Ok(())
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, e| e.expires_at.map_or(true, |at| at > now));
    }

    fn apply(&mut self, args: &[Bytes]) -> Result<Value> {
        self.purge_expired();
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

        match name.as_str() {
            "PING" => Ok(Value::Status("PONG".into())),
            "DBSIZE" => Ok(Value::Integer(self.entries.len() as i64)),
            "FLUSHDB" => {
                self.entries.clear();
                Ok(Value::Status("OK".into()))
            }
            "SCAN" => {
                arity(&name, args, 2)?;
                let cursor = parse_int(&args[1])?.max(0) as usize;
                let count = match args.get(2) {
                    Some(opt) if opt.eq_ignore_ascii_case(b"COUNT") => {
                        arity(&name, args, 4)?;
                        parse_int(&args[3])?.max(1) as usize
                    }
                    _ => 10,
                };
                let keys: Vec<Value> = self
                    .entries
                    .keys()
                    .skip(cursor)
                    .take(count)
                    .cloned()
                    .map(Value::String)
                    .collect();
                let next = if cursor + count >= self.entries.len() {
                    0
                } else {
                    cursor + count
                };
                Ok(Value::Array(vec![
                    Value::String(Bytes::from(next.to_string())),
                    Value::Array(keys),
                ]))
            }
            "TYPE" => {
                arity(&name, args, 2)?;
                let type_name = self
                    .entries
                    .get(&args[1])
                    .map_or("none", |e| e.value.type_name());
                Ok(Value::Status(type_name.to_string()))
            }
            "PTTL" => {
                arity(&name, args, 2)?;
                let ttl = match self.entries.get(&args[1]) {
                    None => -2,
                    Some(Entry {
                        expires_at: None, ..
                    }) => -1,
                    Some(Entry {
                        expires_at: Some(at),
                        ..
                    }) => at.saturating_duration_since(Instant::now()).as_millis() as i64,
                };
                Ok(Value::Integer(ttl))
            }
            "EXISTS" => {
                arity(&name, args, 2)?;
                let n = args[1..]
                    .iter()
                    .filter(|k| self.entries.contains_key(*k))
                    .count();
                Ok(Value::Integer(n as i64))
            }
            "DEL" => {
                arity(&name, args, 2)?;
                let n = args[1..]
                    .iter()
                    .filter(|k| self.entries.remove(*k).is_some())
                    .count();
                Ok(Value::Integer(n as i64))
            }
            "PEXPIRE" => {
                arity(&name, args, 3)?;
                let ms = parse_int(&args[2])?;
                if !self.entries.contains_key(&args[1]) {
                    return Ok(Value::Integer(0));
                }
                if ms <= 0 {
                    self.entries.remove(&args[1]);
                } else if let Some(entry) = self.entries.get_mut(&args[1]) {
                    entry.expires_at = Some(Instant::now() + Duration::from_millis(ms as u64));
                }
                Ok(Value::Integer(1))
            }
            "GET" => {
                arity(&name, args, 2)?;
                match self.read(&args[1]) {
                    None => Ok(Value::Nil),
                    Some(StoredValue::String(v)) => Ok(Value::String(v.clone())),
                    Some(_) => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "LRANGE" => {
                arity(&name, args, 4)?;
                let (start, stop) = (parse_int(&args[2])?, parse_int(&args[3])?);
                match self.read(&args[1]) {
                    None => Ok(Value::Array(vec![])),
                    Some(StoredValue::List(items)) => Ok(Value::Array(
                        slice_range(items, start, stop)
                            .iter()
                            .cloned()
                            .map(Value::String)
                            .collect(),
                    )),
                    Some(_) => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "SMEMBERS" => {
                arity(&name, args, 2)?;
                match self.read(&args[1]) {
                    None => Ok(Value::Array(vec![])),
                    Some(StoredValue::Set(members)) => Ok(Value::Array(
                        members.iter().cloned().map(Value::String).collect(),
                    )),
                    Some(_) => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "HGETALL" => {
                arity(&name, args, 2)?;
                match self.read(&args[1]) {
                    None => Ok(Value::Array(vec![])),
                    Some(StoredValue::Hash(fields)) => Ok(Value::Array(
                        fields
                            .iter()
                            .flat_map(|(f, v)| [Value::String(f.clone()), Value::String(v.clone())])
                            .collect(),
                    )),
                    Some(_) => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "ZRANGE" => {
                arity(&name, args, 4)?;
                let (start, stop) = (parse_int(&args[2])?, parse_int(&args[3])?);
                let with_scores = args
                    .get(4)
                    .is_some_and(|a| a.eq_ignore_ascii_case(b"WITHSCORES"));
                match self.read(&args[1]) {
                    None => Ok(Value::Array(vec![])),
                    Some(StoredValue::SortedSet(members)) => {
                        let mut ordered: Vec<(&Bytes, f64)> =
                            members.iter().map(|(m, s)| (m, *s)).collect();
                        ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                        let mut out = Vec::new();
                        for (member, score) in slice_range(&ordered, start, stop) {
                            out.push(Value::String((*member).clone()));
                            if with_scores {
                                out.push(Value::String(Bytes::from(score.to_string())));
                            }
                        }
                        Ok(Value::Array(out))
                    }
                    Some(_) => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "SET" => {
                arity(&name, args, 3)?;
                self.entries.insert(
                    args[1].clone(),
                    Entry {
                        value: StoredValue::String(args[2].clone()),
                        expires_at: None,
                    },
                );
                Ok(Value::Status("OK".into()))
            }
            "RPUSH" => {
                arity(&name, args, 3)?;
                match self.slot(&args[1], || StoredValue::List(Vec::new())) {
                    StoredValue::List(items) => {
                        items.extend(args[2..].iter().cloned());
                        Ok(Value::Integer(items.len() as i64))
                    }
                    _ => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "SADD" => {
                arity(&name, args, 3)?;
                match self.slot(&args[1], || StoredValue::Set(BTreeSet::new())) {
                    StoredValue::Set(members) => {
                        let added = args[2..]
                            .iter()
                            .filter(|m| members.insert((*m).clone()))
                            .count();
                        Ok(Value::Integer(added as i64))
                    }
                    _ => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "HSET" => {
                arity(&name, args, 4)?;
                if args.len() % 2 != 0 {
                    return Err(wrong_arity(&name));
                }
                match self.slot(&args[1], || StoredValue::Hash(BTreeMap::new())) {
                    StoredValue::Hash(fields) => {
                        let added = args[2..]
                            .chunks(2)
                            .filter(|p| fields.insert(p[0].clone(), p[1].clone()).is_none())
                            .count();
                        Ok(Value::Integer(added as i64))
                    }
                    _ => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            "ZADD" => {
                arity(&name, args, 4)?;
                if args.len() % 2 != 0 {
                    return Err(wrong_arity(&name));
                }
                let pairs = args[2..]
                    .chunks(2)
                    .map(|p| Ok((parse_score(&p[0])?, p[1].clone())))
                    .collect::<Result<Vec<_>>>()?;
                match self.slot(&args[1], || StoredValue::SortedSet(BTreeMap::new())) {
                    StoredValue::SortedSet(members) => {
                        let added = pairs
                            .into_iter()
                            .filter(|(score, member)| members.insert(member.clone(), *score).is_none())
                            .count();
                        Ok(Value::Integer(added as i64))
                    }
                    _ => Err(Error::Server(WRONGTYPE.into())),
                }
            }
            _ => Err(Error::Server(format!("ERR unknown command '{}'", name))),
        }
    }

    /// Look up a key for a value read, honoring `vanish_on_read`.
    fn read(&mut self, key: &Bytes) -> Option<&StoredValue> {
        if self.vanish_on_read.remove(key) {
            self.entries.remove(key);
        }
        self.entries.get(key).map(|e| &e.value)
    }

    /// Existing value of `key`, or a fresh one from `empty`.
    fn slot(&mut self, key: &Bytes, empty: impl FnOnce() -> StoredValue) -> &mut StoredValue {
        &mut self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry {
                value: empty(),
                expires_at: None,
            })
            .value
    }
}

const KNOWN_COMMANDS: &[&str] = &[
    "PING", "DBSIZE", "FLUSHDB", "SCAN", "TYPE", "PTTL", "EXISTS", "DEL", "PEXPIRE", "GET",
    "LRANGE", "SMEMBERS", "HGETALL", "ZRANGE", "SET", "RPUSH", "SADD", "HSET", "ZADD",
];

fn arity(name: &str, args: &[Bytes], min: usize) -> Result<()> {
    if args.len() < min {
        return Err(wrong_arity(name));
    }
    Ok(())
}

fn wrong_arity(name: &str) -> Error {
    Error::Server(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn parse_int(arg: &[u8]) -> Result<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Server("ERR value is not an integer or out of range".into()))
}

fn parse_score(arg: &[u8]) -> Result<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| !s.is_nan())
        .ok_or_else(|| Error::Server("ERR value is not a valid float".into()))
}

/// Inclusive `start..=stop` with negative indexes counted from the end.
fn slice_range<T>(items: &[T], start: i64, stop: i64) -> &[T] {
    let len = items.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return &[];
    }
    &items[start as usize..=stop as usize]
}
