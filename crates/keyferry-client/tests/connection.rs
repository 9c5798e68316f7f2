#![allow(clippy::unwrap_used)]
//! Wire-level tests against a scripted RESP responder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use keyferry_client::resp::decode_value;
use keyferry_client::{Connection, ConnectionConfig, Error, Value};

type Log = Arc<Mutex<Vec<Vec<String>>>>;

/// Start a one-connection responder. `respond` maps each decoded command to
/// a raw reply, or `None` to stay silent.
async fn scripted_server(respond: fn(&[String]) -> Option<&'static [u8]>) -> (u16, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            while let Ok(Some(Value::Array(parts))) = decode_value(&mut buf) {
                let cmd: Vec<String> = parts
                    .into_iter()
                    .map(|p| p.into_string().unwrap())
                    .collect();
                seen.lock().unwrap().push(cmd.clone());
                if let Some(reply) = respond(&cmd) {
                    socket.write_all(reply).await.unwrap();
                }
            }
            match socket.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    });

    (port, log)
}

fn args(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

#[tokio::test]
async fn test_connect_authenticates_and_selects() {
    let (port, log) = scripted_server(|cmd| match cmd[0].as_str() {
        "AUTH" | "SELECT" => Some(b"+OK\r\n"),
        "PING" => Some(b"+PONG\r\n"),
        _ => Some(b"-ERR unknown\r\n"),
    })
    .await;

    let config = ConnectionConfig {
        username: Some("migrator".into()),
        password: Some("s3cret".into()),
        database: 3,
        ..ConnectionConfig::from_addr("127.0.0.1", port)
    };
    let mut conn = Connection::connect(&config).await.unwrap();
    let reply = conn.execute(&args(&["PING"])).await.unwrap();
    assert_eq!(reply, Value::Status("PONG".into()));

    let log = log.lock().unwrap();
    assert_eq!(log[0], vec!["AUTH", "migrator", "s3cret"]);
    assert_eq!(log[1], vec!["SELECT", "3"]);
}

#[tokio::test]
async fn test_rejected_auth() {
    let (port, _log) = scripted_server(|_| Some(b"-WRONGPASS invalid username-password pair\r\n")).await;

    let config = ConnectionConfig {
        password: Some("nope".into()),
        ..ConnectionConfig::from_addr("127.0.0.1", port)
    };
    let err = Connection::connect(&config).await.err().unwrap();
    assert!(matches!(err, Error::Auth(ref m) if m.starts_with("WRONGPASS")));
}

#[tokio::test]
async fn test_pipeline_keeps_replies_in_step() {
    let (port, _log) = scripted_server(|cmd| match cmd[0].as_str() {
        "MULTI" => Some(b"+OK\r\n"),
        "BOGUS" => Some(b"-ERR unknown command 'BOGUS'\r\n"),
        "EXEC" => Some(b"-EXECABORT Transaction discarded because of previous errors.\r\n"),
        "GET" => Some(b"$5\r\nhello\r\n"),
        _ => Some(b"+QUEUED\r\n"),
    })
    .await;

    let mut conn = Connection::connect(&ConnectionConfig::from_addr("127.0.0.1", port))
        .await
        .unwrap();

    let replies = conn
        .pipeline(&[
            args(&["MULTI"]),
            args(&["SET", "a", "1"]),
            args(&["BOGUS"]),
            args(&["EXEC"]),
        ])
        .await
        .unwrap();

    assert_eq!(replies.len(), 4);
    assert!(replies[0].as_ref().unwrap().is_ok());
    assert_eq!(
        replies[1].as_ref().unwrap(),
        &Value::Status("QUEUED".into())
    );
    assert!(matches!(replies[2], Err(Error::Server(_))));
    assert!(matches!(replies[3], Err(Error::Server(ref m)) if m.starts_with("EXECABORT")));

    // The stream is still aligned for the next command.
    let reply = conn.execute(&args(&["GET", "a"])).await.unwrap();
    assert_eq!(reply, Value::String(Bytes::from("hello")));
}

#[tokio::test]
async fn test_timeout_poisons_connection() {
    let (port, _log) = scripted_server(|cmd| match cmd[0].as_str() {
        "PING" => Some(b"+PONG\r\n"),
        _ => None,
    })
    .await;

    let config = ConnectionConfig {
        timeout: Some(Duration::from_millis(100)),
        ..ConnectionConfig::from_addr("127.0.0.1", port)
    };
    let mut conn = Connection::connect(&config).await.unwrap();

    let err = conn.execute(&args(&["BLPOP", "q", "0"])).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    let err = conn.execute(&args(&["PING"])).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = Connection::connect(&ConnectionConfig::from_addr("127.0.0.1", port))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Io(_)));
}
