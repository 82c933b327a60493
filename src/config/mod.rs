//! Configuration module
//!
//! Handles loading and saving cipclient configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::protocol::{DEFAULT_PORT, DEFAULT_PROGRAM_ID};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("No control processor host configured")]
    MissingHost,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Control processor connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log filter directive, e.g. "cipclient=trace"
    pub log_filter: Option<String>,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Control processor host
    pub host: Option<String>,
    /// Port to connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Program ID presented during registration
    #[serde(default = "default_program_id")]
    pub program_id: u8,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Read timeout in ms
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Heartbeat interval in ms
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Consecutive read failures before giving up
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_program_id() -> u8 {
    DEFAULT_PROGRAM_ID
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    100
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_max_read_failures() -> u32 {
    3
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            program_id: default_program_id(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_read_failures: default_max_read_failures(),
        }
    }
}

impl ConnectionConfig {
    /// Build the runtime network configuration, preferring `host` over the file's host
    pub fn to_network_config(&self, host: Option<&str>) -> ConfigResult<NetworkConfig> {
        let host = host
            .or(self.host.as_deref())
            .ok_or(ConfigError::MissingHost)?;

        Ok(NetworkConfig {
            host: host.to_string(),
            port: self.port,
            program_id: self.program_id,
            connect_timeout_ms: self.connect_timeout_ms,
            read_timeout_ms: self.read_timeout_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            max_read_failures: self.max_read_failures,
            ..NetworkConfig::default()
        })
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("cipclient/config.toml")),
            Some(PathBuf::from("./cipclient.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            verbose: false,
            log_filter: Some("cipclient=info".to_string()),
        },
        connection: ConnectionConfig {
            host: Some("192.168.1.50".to_string()),
            ..Default::default()
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.port, DEFAULT_PORT);
        assert_eq!(config.connection.program_id, DEFAULT_PROGRAM_ID);
        assert!(config.connection.host.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.connection.host = Some("10.1.1.1".to_string());
        config.connection.program_id = 0x0A;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.connection.host.as_deref(), Some("10.1.1.1"));
        assert_eq!(loaded.connection.program_id, 0x0A);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nhost = \"cp3.local\"\nport = 41795").unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.connection.port, 41795);
        assert_eq!(loaded.connection.heartbeat_interval_ms, 5000);
        assert!(!loaded.general.verbose);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/cipclient.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.connection.host.as_deref(), Some("192.168.1.50"));
    }

    #[test]
    fn test_network_config_host_override() {
        let mut config = ConnectionConfig::default();
        assert!(matches!(
            config.to_network_config(None),
            Err(ConfigError::MissingHost)
        ));

        config.host = Some("from-file".to_string());
        config.read_timeout_ms = 250;
        let net = config.to_network_config(None).unwrap();
        assert_eq!(net.host, "from-file");
        assert_eq!(net.read_timeout_ms, 250);

        let net = config.to_network_config(Some("from-cli")).unwrap();
        assert_eq!(net.host, "from-cli");
    }
}
