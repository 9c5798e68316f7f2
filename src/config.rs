//! Configuration for a migration run.
//!
//! A run is described by a [`MigrationConfig`], built from CLI arguments,
//! optionally layered over a TOML file. Every optional field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use keyferry_client::ConnectionConfig;

use crate::error::{MigrationError, Role};

/// Keys requested per `SCAN` round trip.
pub const DEFAULT_SCAN_COUNT: usize = 2000;

/// Highest database index a standard server exposes.
pub const MAX_DB_INDEX: u8 = 15;

/// Full description of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Store being read.
    pub source: EndpointConfig,
    /// Store being written.
    pub destination: EndpointConfig,
    /// Database index used on both sides.
    pub db: u8,
    /// Read and classify everything but never mutate the destination.
    pub dry_run: bool,
    /// Drop every destination key before copying.
    pub flush: bool,
    /// `COUNT` hint for each `SCAN`.
    pub scan_count: usize,
    /// Bound for connecting and for each command, in seconds.
    pub timeout_secs: Option<u64>,
    /// Log settings for the binary.
    pub logging: LoggingConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source: EndpointConfig::default(),
            destination: EndpointConfig {
                port: 6380,
                ..EndpointConfig::default()
            },
            db: 0,
            dry_run: false,
            flush: false,
            scan_count: DEFAULT_SCAN_COUNT,
            timeout_secs: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, MigrationError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(contents: &str) -> Result<Self, MigrationError> {
        toml::from_str(contents)
            .map_err(|e| MigrationError::Config(format!("failed to parse config: {}", e)))
    }

    /// Check the configuration before any connection is attempted.
    pub fn validate(&self) -> Result<(), MigrationError> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;

        // Missing trust material is reported as a destination connection failure.
        if self.destination.tls && self.destination.ca_cert.is_none() {
            return Err(MigrationError::connection(
                Role::Destination,
                keyferry_client::Error::Tls(
                    "destination TLS requires a CA certificate path".to_string(),
                ),
            ));
        }

        if self.source.host == self.destination.host && self.source.port == self.destination.port
        {
            return Err(MigrationError::Config(
                "source and destination must be different".to_string(),
            ));
        }

        if self.db > MAX_DB_INDEX {
            return Err(MigrationError::Config(format!(
                "db must be between 0 and {}",
                MAX_DB_INDEX
            )));
        }

        if self.scan_count == 0 {
            return Err(MigrationError::Config(
                "scan_count cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-operation bound, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Client settings for the source endpoint.
    pub fn source_connection(&self) -> ConnectionConfig {
        self.source.connection_config(self.db, self.timeout())
    }

    /// Client settings for the destination endpoint.
    pub fn destination_connection(&self) -> ConnectionConfig {
        self.destination.connection_config(self.db, self.timeout())
    }
}

/// One store endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Credential: empty, `password`, or `username:password`.
    pub auth: String,
    /// Negotiate TLS.
    pub tls: bool,
    /// CA bundle used to verify the server certificate.
    pub ca_cert: Option<PathBuf>,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &if self.auth.is_empty() { "" } else { "***" })
            .field("tls", &self.tls)
            .field("ca_cert", &self.ca_cert)
            .finish()
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            auth: String::new(),
            tls: false,
            ca_cert: None,
        }
    }
}

impl EndpointConfig {
    /// Create an endpoint for `host:port` without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` label used in logs and reports.
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Interpret the credential string.
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::parse(&self.auth)
    }

    fn validate(&self, name: &str) -> Result<(), MigrationError> {
        if self.host.trim().is_empty() {
            return Err(MigrationError::Config(format!("{} host cannot be empty", name)));
        }
        if self.port == 0 {
            return Err(MigrationError::Config(format!("{} port cannot be 0", name)));
        }
        Ok(())
    }

    fn connection_config(&self, db: u8, timeout: Option<Duration>) -> ConnectionConfig {
        let (username, password) = match self.credentials() {
            Some(creds) => (creds.username, Some(creds.password)),
            None => (None, None),
        };

        ConnectionConfig {
            username,
            password,
            database: db,
            tls: self.tls,
            ca_file: self.ca_cert.clone(),
            timeout,
            ..ConnectionConfig::from_addr(self.host.clone(), self.port)
        }
    }
}

/// Parsed endpoint credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// ACL user, when the credential was `user:password`.
    pub username: Option<String>,
    /// Password sent with `AUTH`.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Empty means no AUTH; `user:password` splits on the first colon;
    /// anything else is a bare password.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match raw.split_once(':') {
            Some((user, password)) if !user.is_empty() => Some(Self {
                username: Some(user.to_string()),
                password: password.to_string(),
            }),
            _ => Some(Self {
                username: None,
                password: raw.to_string(),
            }),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json).
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MigrationConfig {
        MigrationConfig {
            source: EndpointConfig::new("redis-a.internal", 6379),
            destination: EndpointConfig::new("redis-b.internal", 6379),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.scan_count, DEFAULT_SCAN_COUNT);
        assert!(!config.dry_run);
        assert!(!config.flush);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_parse() {
        assert_eq!(Credentials::parse(""), None);
        assert_eq!(
            Credentials::parse("pw"),
            Some(Credentials {
                username: None,
                password: "pw".into()
            })
        );
        assert_eq!(
            Credentials::parse("admin:pa:ss"),
            Some(Credentials {
                username: Some("admin".into()),
                password: "pa:ss".into()
            })
        );
        // A leading colon has no user part.
        assert_eq!(
            Credentials::parse(":pw"),
            Some(Credentials {
                username: None,
                password: ":pw".into()
            })
        );
    }

    #[test]
    fn test_destination_tls_requires_ca() {
        let mut config = valid();
        config.destination.tls = true;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Connection {
                role: Role::Destination,
                ..
            }
        ));
        assert!(err.to_string().contains("CA certificate"));

        config.destination.ca_cert = Some(PathBuf::from("/etc/ssl/dst-ca.pem"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_source_tls_without_ca_is_allowed() {
        let mut config = valid();
        config.source.tls = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_endpoint_rejected() {
        let mut config = valid();
        config.destination = config.source.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_fields() {
        let mut config = valid();
        config.db = 16;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.scan_count = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.source.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.destination.host = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config = MigrationConfig::parse_str(
            r#"
            db = 2
            flush = true
            timeout_secs = 30

            [source]
            host = "old.internal"
            auth = "secret"

            [destination]
            host = "new.internal"
            port = 6380
            auth = "migrator:secret"
            tls = true
            ca_cert = "/certs/ca.pem"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.db, 2);
        assert!(config.flush);
        assert!(!config.dry_run);
        assert_eq!(config.source.port, 6379);
        assert_eq!(config.scan_count, DEFAULT_SCAN_COUNT);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());

        let conn = config.destination_connection();
        assert_eq!(conn.username.as_deref(), Some("migrator"));
        assert_eq!(conn.password.as_deref(), Some("secret"));
        assert_eq!(conn.database, 2);
        assert!(conn.tls);
        assert_eq!(conn.ca_file, Some(PathBuf::from("/certs/ca.pem")));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = MigrationConfig::parse_str("db = \"zero\"").unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");
        std::fs::write(&path, "dry_run = true\n[source]\nhost = \"a\"\n[destination]\nhost = \"b\"\n")
            .unwrap();

        let config = MigrationConfig::from_file(&path).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.source.host, "a");

        assert!(MigrationConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_endpoint_debug_hides_auth() {
        let mut endpoint = EndpointConfig::new("h", 1);
        endpoint.auth = "user:topsecret".into();
        assert!(!format!("{:?}", endpoint).contains("topsecret"));
    }
}
