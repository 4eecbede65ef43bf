use crate::network::node::{DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_BUFFER_SIZE};
use crate::network::reconnect::{Backoff, DEFAULT_MAX_RECONNECT_DELAY, DEFAULT_RECONNECT_BASE_DELAY};
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_EXCESSIVE_EMPTY_WAKEUPS: u32 = 100;
pub const DEFAULT_MAX_POLL_WAIT_MS: u64 = 1000;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 2500;

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Cluster nodes as `host:port`
    pub servers: Vec<String>,
    /// Maximum queued operations per node
    pub queue_capacity: usize,
    /// Size of each node's read buffer in bytes
    pub read_buffer_size: usize,
    /// Delay before the first reconnect attempt
    pub reconnect_base_delay_ms: u64,
    /// Upper bound on the delay between reconnect attempts
    pub max_reconnect_delay_ms: u64,
    /// Empty wakeups tolerated before the loop re-scans every socket
    pub excessive_empty_wakeups: u32,
    /// Longest poll when no reconnect is pending; 0 waits indefinitely
    pub max_poll_wait_ms: u64,
    /// How long the async client waits for a single operation
    pub operation_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:11211".to_string()],
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY.as_millis() as u64,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY.as_millis() as u64,
            excessive_empty_wakeups: DEFAULT_EXCESSIVE_EMPTY_WAKEUPS,
            max_poll_wait_ms: DEFAULT_MAX_POLL_WAIT_MS,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
        }
    }
}

impl ConnectionConfig {
    /// Get the default config file path
    pub fn default_config_file() -> Result<PathBuf> {
        ProjectDirs::from("dev", "memconn", "memconn")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let config: ConnectionConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or the default location, falling back to defaults when absent
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_config_file() {
                Ok(path) => path,
                Err(_) => return Ok(Self::default()),
            },
        };
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content).context("Failed to write configuration file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.read_buffer_size == 0 {
            bail!("read_buffer_size must be at least 1");
        }
        if self.reconnect_base_delay_ms == 0 {
            bail!("reconnect_base_delay_ms must be at least 1");
        }
        if self.max_reconnect_delay_ms < self.reconnect_base_delay_ms {
            bail!(
                "max_reconnect_delay_ms ({}) is below reconnect_base_delay_ms ({})",
                self.max_reconnect_delay_ms,
                self.reconnect_base_delay_ms
            );
        }
        Ok(())
    }

    /// Resolve the configured servers to socket addresses
    pub fn resolve_servers(&self) -> Result<Vec<SocketAddr>> {
        self.servers
            .iter()
            .map(|server| resolve_server(server))
            .collect()
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_delay_ms),
            Duration::from_millis(self.max_reconnect_delay_ms),
        )
    }

    pub fn max_poll_wait(&self) -> Option<Duration> {
        match self.max_poll_wait_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Parse a server list such as `"host1:11211 host2:11211"` or `"a:1,b:2"`.
pub fn parse_server_list(list: &str) -> Result<Vec<SocketAddr>> {
    let servers: Vec<SocketAddr> = list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|entry| !entry.is_empty())
        .map(resolve_server)
        .collect::<Result<_>>()?;
    if servers.is_empty() {
        bail!("No servers given in {:?}", list);
    }
    Ok(servers)
}

fn resolve_server(server: &str) -> Result<SocketAddr> {
    if !server.contains(':') {
        bail!("Invalid server {:?}: expected host:port", server);
    }
    server
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve server address: {}", server))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Server address {} resolved to nothing", server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.queue_capacity, 8192);
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.max_reconnect_delay_ms, 30_000);
        assert_eq!(config.excessive_empty_wakeups, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ConnectionConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: ConnectionConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            servers = ["10.0.0.1:11211", "10.0.0.2:11211"]
            queue_capacity = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.operation_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = ConnectionConfig {
            servers: vec!["127.0.0.1:22122".to_string()],
            max_poll_wait_ms: 0,
            ..ConnectionConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = ConnectionConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.max_poll_wait(), None);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.toml");
        let config = ConnectionConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config, ConnectionConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "queue_capacity = 0\n").unwrap();
        assert!(ConnectionConfig::load(&path).is_err());

        let config = ConnectionConfig {
            reconnect_base_delay_ms: 500,
            max_reconnect_delay_ms: 100,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_server_list() {
        let servers = parse_server_list("127.0.0.1:11211 127.0.0.1:11212,127.0.0.1:11213").unwrap();
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[1].port(), 11212);

        assert!(parse_server_list("").is_err());
        assert!(parse_server_list("localhost").is_err());
    }
}
