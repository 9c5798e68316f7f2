//! TCP and TLS connection management.
//!
//! A [`Connection`] owns one socket to a RESP server with buffered I/O. It
//! authenticates and selects the database at connect time and can run single
//! commands or pipelines.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resp;
use crate::tls;
use crate::types::Value;

/// Default read/write buffer size (8 KB).
const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Configuration for connecting to a server.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Optional ACL username, sent as `AUTH username password`.
    pub username: Option<String>,
    /// Optional password for AUTH.
    pub password: Option<String>,
    /// Database index to SELECT on connect.
    pub database: u8,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
    /// Negotiate TLS after the TCP connect.
    pub tls: bool,
    /// CA bundle used to verify the server; web PKI roots when `None`.
    pub ca_file: Option<PathBuf>,
    /// Upper bound for connecting and for each command round trip.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("buffer_size", &self.buffer_size)
            .field("tls", &self.tls)
            .field("ca_file", &self.ca_file)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            buffer_size: DEFAULT_BUF_SIZE,
            tls: false,
            ca_file: None,
            timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a config for `host:port` with every other setting defaulted.
    pub fn from_addr(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` of the server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A TCP (or TLS) stream with buffered RESP I/O.
pub struct Connection {
    stream: Stream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    timeout: Option<Duration>,
    poisoned: bool,
}

enum Stream {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    /// Open a new connection using the given configuration.
    ///
    /// TLS material is loaded before any network activity so a bad CA path
    /// fails without touching the server.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let connector = if config.tls {
            Some(tls::build_connector(config.ca_file.as_deref())?)
        } else {
            None
        };

        let stream = bounded(config.timeout, async {
            let tcp = TcpStream::connect(config.addr()).await?;
            tcp.set_nodelay(true)?;
            match connector {
                Some(ref connector) => Ok(Stream::Tls(Box::new(
                    tls::handshake(connector, &config.host, tcp).await?,
                ))),
                None => Ok(Stream::Tcp(tcp)),
            }
        })
        .await?;

        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(config.buffer_size),
            write_buf: BytesMut::with_capacity(config.buffer_size),
            timeout: config.timeout,
            poisoned: false,
        };

        if let Some(ref password) = config.password {
            let mut args = vec![Bytes::from_static(b"AUTH")];
            if let Some(ref username) = config.username {
                args.push(Bytes::copy_from_slice(username.as_bytes()));
            }
            args.push(Bytes::copy_from_slice(password.as_bytes()));

            match conn.execute(&args).await {
                Ok(reply) if reply.is_ok() => {}
                Ok(reply) => {
                    return Err(Error::Auth(format!("unexpected AUTH response: {}", reply)))
                }
                Err(Error::Server(msg)) => return Err(Error::Auth(msg)),
                Err(e) => return Err(e),
            }
        }

        if config.database != 0 {
            let reply = conn
                .execute(&[
                    Bytes::from_static(b"SELECT"),
                    Bytes::from(config.database.to_string()),
                ])
                .await?;
            if !reply.is_ok() {
                return Err(Error::Protocol(format!(
                    "unexpected SELECT response: {}",
                    reply
                )));
            }
        }

        debug!(addr = %config.addr(), tls = config.tls, db = config.database, "connected");
        Ok(conn)
    }

    /// Send a command and read its reply.
    pub async fn execute(&mut self, args: &[Bytes]) -> Result<Value> {
        self.ensure_usable()?;
        let result = bounded(self.timeout, self.roundtrip(args)).await;
        self.poison_on_fatal(&result);
        result
    }

    /// Send every command in one write, then read exactly one reply per
    /// command.
    ///
    /// The outer `Result` fails only when the connection itself fails; server
    /// error replies are returned in their command's slot so the stream stays
    /// in step.
    pub async fn pipeline(&mut self, commands: &[Vec<Bytes>]) -> Result<Vec<Result<Value>>> {
        self.ensure_usable()?;
        let result = bounded(self.timeout, self.pipeline_roundtrip(commands)).await;
        self.poison_on_fatal(&result);
        result
    }

    async fn roundtrip(&mut self, args: &[Bytes]) -> Result<Value> {
        self.write_buf.clear();
        resp::encode_command(args, &mut self.write_buf);
        self.flush_write_buf().await?;
        self.read_response().await
    }

    async fn pipeline_roundtrip(&mut self, commands: &[Vec<Bytes>]) -> Result<Vec<Result<Value>>> {
        self.write_buf.clear();
        for args in commands {
            resp::encode_command(args, &mut self.write_buf);
        }
        self.flush_write_buf().await?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            match self.read_response().await {
                Ok(value) => replies.push(Ok(value)),
                Err(Error::Server(msg)) => replies.push(Err(Error::Server(msg))),
                Err(e) => return Err(e),
            }
        }
        Ok(replies)
    }

    async fn flush_write_buf(&mut self) -> Result<()> {
        match &mut self.stream {
            Stream::Tcp(tcp) => {
                tcp.write_all(&self.write_buf).await?;
                tcp.flush().await?;
            }
            Stream::Tls(tls) => {
                tls.write_all(&self.write_buf).await?;
                tls.flush().await?;
            }
        }
        self.write_buf.clear();
        Ok(())
    }

    /// Read a single reply from the connection.
    async fn read_response(&mut self) -> Result<Value> {
        loop {
            if let Some(value) = resp::decode_value(&mut self.read_buf)? {
                return Ok(value);
            }

            let n = match &mut self.stream {
                Stream::Tcp(tcp) => tcp.read_buf(&mut self.read_buf).await?,
                Stream::Tls(tls) => tls.read_buf(&mut self.read_buf).await?,
            };

            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    // A reply may be half-read after a timeout or I/O error, so nothing else
    // can be sent on this stream.
    fn poison_on_fatal<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_fatal() {
                self.poisoned = true;
            }
        }
    }
}

async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(limit))),
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_hides_password() {
        let config = ConnectionConfig {
            password: Some("hunter2".into()),
            ..ConnectionConfig::from_addr("db.internal", 6380)
        };
        let debug = format!("{:?}", config);
        assert!(debug.contains("db.internal"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_addr() {
        assert_eq!(ConnectionConfig::from_addr("h", 7000).addr(), "h:7000");
    }

    #[tokio::test]
    async fn test_connect_with_missing_ca_fails_before_dialing() {
        let config = ConnectionConfig {
            tls: true,
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            // Nothing listens here; reaching the network would be a different error.
            ..ConnectionConfig::from_addr("127.0.0.1", 1)
        };
        let err = Connection::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Tls(_)));
    }
}
