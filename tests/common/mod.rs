//! Shared test utilities for keyferry integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use keyferry::session::{MemoryStore, Session, StoredValue};
use keyferry::{EndpointConfig, MigrationConfig};
use keyferry_client::resp::decode_value;
use keyferry_client::{Error, Value};

/// Commands the server handled itself instead of forwarding to the store.
pub type HandshakeLog = Arc<Mutex<Vec<Vec<String>>>>;

// ============================================================================
// Keyspace helpers
// ============================================================================

/// `{"a": "hello", "b": ["x", "y"] (TTL 30s), "c": <stream>}`.
#[allow(dead_code)]
pub fn scenario_source() -> MemoryStore {
    let store = MemoryStore::new();
    store.set_string("a", "hello");
    store.push_list("b", ["x", "y"]);
    store.expire("b", Duration::from_secs(30));
    store.insert_foreign("c", "stream");
    store
}

/// Store holding `n` unrelated string keys.
#[allow(dead_code)]
pub fn prepopulated(n: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for i in 0..n {
        store.set_string(format!("existing:{}", i), "v");
    }
    store
}

/// Every key with its value, in key order.
#[allow(dead_code)]
pub fn snapshot(store: &MemoryStore) -> Vec<(Bytes, Option<StoredValue>)> {
    store
        .keys()
        .into_iter()
        .map(|k| {
            let v = store.value(&k);
            (k, v)
        })
        .collect()
}

/// Whether any mutating command reached the store.
#[allow(dead_code)]
pub fn saw_writes(store: &MemoryStore) -> bool {
    const WRITES: &[&str] = &[
        "DEL", "SET", "RPUSH", "SADD", "ZADD", "HSET", "PEXPIRE", "FLUSHDB",
    ];
    store
        .command_log()
        .iter()
        .any(|c| WRITES.contains(&c.as_str()))
}

// ============================================================================
// Server helpers
// ============================================================================

/// Serve `store` over RESP on a random local port.
///
/// `AUTH` and `SELECT` are acknowledged and logged; `MULTI`/`EXEC` queue
/// commands and run them through [`Session::execute_atomic`]; everything
/// else goes to [`Session::execute`].
#[allow(dead_code)]
pub async fn serve(store: MemoryStore) -> (u16, HandshakeLog) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind to random port");
    let port = listener.local_addr().expect("should have local addr").port();
    let log: HandshakeLog = Arc::new(Mutex::new(Vec::new()));
    let handshakes = log.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(handle(socket, store.clone(), handshakes.clone()));
        }
    });

    (port, log)
}

/// A local port with nothing listening on it.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind to random port");
    let port = listener.local_addr().expect("should have local addr").port();
    drop(listener);
    port
}

/// Configuration for migrating between two local ports.
#[allow(dead_code)]
pub fn local_config(source_port: u16, destination_port: u16) -> MigrationConfig {
    MigrationConfig {
        source: EndpointConfig::new("127.0.0.1", source_port),
        destination: EndpointConfig::new("127.0.0.1", destination_port),
        timeout_secs: Some(5),
        ..MigrationConfig::default()
    }
}

async fn handle(mut socket: TcpStream, store: MemoryStore, handshakes: HandshakeLog) {
    let mut session = store.session();
    let mut buf = BytesMut::with_capacity(4096);
    let mut queue: Option<Vec<Vec<Bytes>>> = None;

    loop {
        while let Ok(Some(Value::Array(parts))) = decode_value(&mut buf) {
            let args: Vec<Bytes> = parts
                .into_iter()
                .filter_map(|p| p.into_bytes().ok().flatten())
                .collect();
            let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

            let reply = match (name.as_str(), queue.is_some()) {
                ("AUTH" | "SELECT", _) => {
                    handshakes.lock().push(
                        args.iter()
                            .map(|a| String::from_utf8_lossy(a).into_owned())
                            .collect(),
                    );
                    Ok(Value::Status("OK".into()))
                }
                ("MULTI", false) => {
                    queue = Some(Vec::new());
                    Ok(Value::Status("OK".into()))
                }
                ("EXEC", true) => {
                    let commands = queue.take().unwrap_or_default();
                    match session.execute_atomic(commands).await {
                        Ok(results) => Ok(Value::Array(results)),
                        Err(Error::Server(msg)) => Err(Error::Server(format!(
                            "EXECABORT Transaction discarded because of previous errors: {}",
                            msg
                        ))),
                        Err(e) => Err(e),
                    }
                }
                (_, true) => {
                    queue.get_or_insert_with(Vec::new).push(args);
                    Ok(Value::Status("QUEUED".into()))
                }
                (_, false) => session.execute(args).await,
            };

            let mut out = BytesMut::new();
            match reply {
                Ok(value) => encode_reply(&value, &mut out),
                Err(Error::Server(msg)) => encode_reply(&Value::Error(msg), &mut out),
                Err(_) => return,
            }
            if socket.write_all(&out).await.is_err() {
                return;
            }
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn encode_reply(value: &Value, out: &mut BytesMut) {
    match value {
        Value::Status(s) => {
            out.extend_from_slice(b"+");
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Value::Error(e) => {
            out.extend_from_slice(b"-");
            out.extend_from_slice(e.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Value::Integer(i) => {
            out.extend_from_slice(format!(":{}\r\n", i).as_bytes());
        }
        Value::Nil => out.extend_from_slice(b"$-1\r\n"),
        Value::String(b) => {
            out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Value::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_reply(item, out);
            }
        }
    }
}
