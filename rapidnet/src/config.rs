//! Configuration for servers, clients and the connections they create.
//!
//! All of these can be deserialised from JSON. Anything omitted takes its
//! default value, so `{"address": "0.0.0.0:8888", "max_connections": 100}` is a
//! complete server configuration.

use crate::error::ConfigError;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use tokio::sync::Semaphore;

/// Byte order of the length field in the default frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::BigEndian
    }
}

/// What [`Connection::send`](crate::Connection::send) does when the outbound
/// queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Refuse the frame and return [`SendQueueFull`](crate::ConnectionError::SendQueueFull).
    Reject,
    /// Refuse the frame and tear down the connection.
    Disconnect,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Per-connection settings, shared by servers and clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Capacity of the decoded-frame channel handed to the application.
    pub inbound_queue_len: usize,
    /// Capacity of the queue feeding the send task.
    pub outbound_queue_len: usize,
    /// How long a single read may wait before the receive task re-checks for shutdown.
    pub read_timeout_ms: u64,
    /// Upper bound on writing one frame to the socket.
    pub write_timeout_ms: u64,
    pub byte_order: ByteOrder,
    pub overflow_policy: OverflowPolicy,
    pub nodelay: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            inbound_queue_len: 16,
            outbound_queue_len: 16,
            read_timeout_ms: 2000,
            write_timeout_ms: 10_000,
            byte_order: ByteOrder::default(),
            overflow_policy: OverflowPolicy::default(),
            nodelay: true,
        }
    }
}

impl ConnectionSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_queue_len == 0 || self.outbound_queue_len == 0 {
            return Err(ConfigError::Invalid(
                "connection queue lengths must be at least 1".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_server_event_queue_len() -> usize {
    1024
}

fn default_client_event_queue_len() -> usize {
    16
}

fn default_keepalive_secs() -> Option<u64> {
    Some(30)
}

/// Configuration of a [`TcpServer`](crate::TcpServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on; host names are resolved and the first result used.
    pub address: String,
    /// Upper bound on concurrently registered connections.
    pub max_connections: usize,
    #[serde(default = "default_server_event_queue_len")]
    pub event_queue_len: usize,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>, max_connections: usize) -> Self {
        Self {
            address: address.into(),
            max_connections,
            event_queue_len: default_server_event_queue_len(),
            connection: ConnectionSettings::default(),
        }
    }

    /// Load a server configuration from a JSON file
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(filename)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "max_connections must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.event_queue_len == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_len must be at least 1".to_string(),
            ));
        }
        self.connection.validate()
    }
}

/// Configuration of a [`TcpClient`](crate::TcpClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub address: String,
    /// Dial timeout; zero waits as long as the operating system does.
    #[serde(default)]
    pub connect_timeout_ms: u32,
    /// TCP keep-alive idle time, or `None` to leave keep-alive off.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: Option<u64>,
    #[serde(default = "default_client_event_queue_len")]
    pub event_queue_len: usize,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, connect_timeout_ms: u32) -> Self {
        Self {
            address: address.into(),
            connect_timeout_ms,
            keepalive_secs: default_keepalive_secs(),
            event_queue_len: default_client_event_queue_len(),
            connection: ConnectionSettings::default(),
        }
    }

    /// Load a client configuration from a JSON file
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(filename)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms.into())),
        }
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_queue_len == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_len must be at least 1".to_string(),
            ));
        }
        if self.keepalive_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "keepalive_secs must be non-zero; use null to disable keep-alive".to_string(),
            ));
        }
        self.connection.validate()
    }
}

/// Deserialise any JSON configuration file, attributing errors to its path.
pub fn load_json<T: DeserializeOwned>(filename: impl AsRef<Path>) -> Result<T, ConfigError> {
    let filename = filename.as_ref();
    let file = File::open(filename).map_err(|e| ConfigError::IoError(e, filename.to_owned()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| ConfigError::JsonError(e, filename.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_server_config() {
        let conf: ServerConfig =
            serde_json::from_str(r#"{"address": "0.0.0.0:8888", "max_connections": 100}"#).unwrap();

        assert_eq!(conf, ServerConfig::new("0.0.0.0:8888", 100));
        assert_eq!(conf.event_queue_len, 1024);
        assert_eq!(conf.connection.read_timeout(), Duration::from_secs(2));
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn nested_connection_settings() {
        let conf: ServerConfig = serde_json::from_str(
            r#"{
                "address": "127.0.0.1:0",
                "max_connections": 4,
                "connection": {
                    "inbound_queue_len": 2,
                    "byte_order": "little-endian",
                    "overflow_policy": "disconnect"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(conf.connection.inbound_queue_len, 2);
        assert_eq!(conf.connection.outbound_queue_len, 16);
        assert_eq!(conf.connection.byte_order, ByteOrder::LittleEndian);
        assert_eq!(conf.connection.overflow_policy, OverflowPolicy::Disconnect);
    }

    #[test]
    fn zero_connections_rejected() {
        let conf = ServerConfig::new("127.0.0.1:0", 0);
        assert!(matches!(conf.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_queue_rejected() {
        let mut conf = ClientConfig::new("127.0.0.1:1", 100);
        conf.connection.outbound_queue_len = 0;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn client_defaults() {
        let conf: ClientConfig = serde_json::from_str(r#"{"address": "example.org:9000"}"#).unwrap();

        assert_eq!(conf.connect_timeout(), None);
        assert_eq!(conf.keepalive(), Some(Duration::from_secs(30)));

        let conf: ClientConfig = serde_json::from_str(
            r#"{"address": "example.org:9000", "connect_timeout_ms": 500, "keepalive_secs": null}"#,
        )
        .unwrap();

        assert_eq!(conf.connect_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(conf.keepalive(), None);
    }

    #[test]
    fn zero_keepalive_rejected() {
        let mut conf = ClientConfig::new("127.0.0.1:1", 100);
        conf.keepalive_secs = Some(0);
        assert!(matches!(conf.validate(), Err(ConfigError::Invalid(_))));

        conf.keepalive_secs = None;
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn load_json_reports_path() {
        let path = std::env::temp_dir().join(format!("rapidnet-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<ServerConfig, _> = load_json(&path);
        std::fs::remove_file(&path).unwrap();

        match result {
            Err(ConfigError::JsonError(_, reported)) => assert_eq!(reported, path),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn missing_file() {
        let err = ServerConfig::load_file("/nonexistent/rapidnet.json").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, _)));
    }
}
