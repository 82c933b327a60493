//! Network module - Handles the TCP session with a control processor
//!
//! Provides:
//! - Connection driving the registration handshake and join traffic
//! - Heartbeat keepalive task
//! - A single serialized write path shared by both

mod callbacks;
mod connection;
mod heartbeat;
mod writer;

pub use callbacks::*;
pub use connection::*;
pub use heartbeat::*;
pub use writer::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{DEFAULT_PORT, DEFAULT_PROGRAM_ID};

/// Configuration for a connection
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Control processor host name or address
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Program ID presented during registration
    pub program_id: u8,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout of a single receive in milliseconds
    pub read_timeout_ms: u64,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Maximum bytes taken from the transport per read
    pub read_buffer_size: usize,
    /// Consecutive read failures before the connection is reported lost
    pub max_read_failures: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            program_id: DEFAULT_PROGRAM_ID,
            connect_timeout_ms: 5000,
            read_timeout_ms: 100,
            heartbeat_interval_ms: 5000,
            read_buffer_size: 1024,
            max_read_failures: 3,
        }
    }
}

impl NetworkConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_program_id(mut self, program_id: u8) -> Self {
        self.program_id = program_id;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let mut addrs = lookup_host((host, port)).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = NetworkConfig::new("10.0.0.5")
            .with_port(41795)
            .with_program_id(0x0A)
            .with_heartbeat_interval(Duration::from_secs(2));

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 41795);
        assert_eq!(config.program_id, 0x0A);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", DEFAULT_PORT).await.unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
        assert!(addr.ip().is_loopback());
    }
}
