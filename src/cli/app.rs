use crate::cli::display::{display_nodes, format_outcome, NodeRow};
use crate::config::{parse_server_list, ConnectionConfig};
use crate::network::Client;
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Main application state
pub struct App {
    /// Effective configuration
    pub config: ConnectionConfig,
    /// Where the configuration was (or would be) loaded from
    pub config_path: Option<PathBuf>,
}

impl App {
    /// Load configuration from `config_path`, or the default location
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => Some(path),
            None => ConnectionConfig::default_config_file().ok(),
        };
        let config = ConnectionConfig::load_or_default(config_path.as_deref())
            .context("Failed to initialize configuration")?;
        Ok(Self {
            config,
            config_path,
        })
    }

    /// Servers from the command line, falling back to the configuration
    pub fn servers(&self, servers: Option<&str>) -> Result<Vec<SocketAddr>> {
        match servers {
            Some(list) => parse_server_list(list),
            None => self.config.resolve_servers(),
        }
    }

    fn start_client(&self, servers: Option<&str>) -> Result<(Client, Vec<SocketAddr>)> {
        let addresses = self.servers(servers)?;
        if addresses.is_empty() {
            bail!("No servers configured");
        }
        let client = Client::start(&addresses, &self.config).context("Failed to start client")?;
        Ok((client, addresses))
    }

    /// Query every node once and print the result table
    #[instrument(skip(self))]
    pub async fn version(&self, servers: Option<&str>) -> Result<()> {
        let (client, addresses) = self.start_client(servers)?;
        let rows = Self::query_round(&client, &addresses).await;
        display_nodes(&rows);
        client.shutdown().context("Event loop failed")?;
        Ok(())
    }

    /// Query every node repeatedly until `count` rounds pass or Ctrl-C
    #[instrument(skip(self))]
    pub async fn watch(&self, servers: Option<&str>, interval: Duration, count: Option<u32>) -> Result<()> {
        let (client, addresses) = self.start_client(servers)?;
        let mut round = 0u32;
        loop {
            round += 1;
            println!("Round {}", round);
            let rows = Self::query_round(&client, &addresses).await;
            display_nodes(&rows);

            if count.is_some_and(|count| round >= count) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }
        client.shutdown().context("Event loop failed")?;
        Ok(())
    }

    async fn query_round(client: &Client, addresses: &[SocketAddr]) -> Vec<NodeRow> {
        let results = client.versions().await;
        let handle = client.handle();
        results
            .iter()
            .zip(addresses)
            .enumerate()
            .map(|(which, (result, &address))| NodeRow {
                which,
                address,
                queued: handle.queue_len(which).unwrap_or(0),
                reconnect_attempts: handle.reconnect_attempts(which).unwrap_or(0),
                outcome: format_outcome(result),
            })
            .collect()
    }

    pub fn config_path(&self) -> Result<&Path> {
        self.config_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    pub fn show_config(&self) -> Result<String> {
        toml::to_string_pretty(&self.config).context("Failed to serialize configuration")
    }

    /// Write the default configuration, refusing to clobber an existing file
    pub fn init_config(&self, force: bool) -> Result<PathBuf> {
        let path = self.config_path()?;
        if path.exists() && !force {
            bail!(
                "Configuration already exists at {} (use --force to overwrite)",
                path.display()
            );
        }
        ConnectionConfig::default().save(path)?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_config_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("memconn").join("config.toml");
        let app = App::new(Some(path.clone())).unwrap();
        assert_eq!(app.config, ConnectionConfig::default());

        assert_eq!(app.init_config(false).unwrap(), path);
        assert!(path.exists());
        assert!(app.init_config(false).is_err());
        assert!(app.init_config(true).is_ok());
    }

    #[test]
    fn test_command_line_servers_override_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "servers = [\"127.0.0.1:22122\"]\n").unwrap();

        let app = App::new(Some(path)).unwrap();
        assert_eq!(app.servers(None).unwrap()[0].port(), 22122);
        assert_eq!(app.servers(Some("127.0.0.1:1,127.0.0.1:2")).unwrap().len(), 2);
    }

    #[test]
    fn test_show_config_is_toml() {
        let temp_dir = TempDir::new().unwrap();
        let app = App::new(Some(temp_dir.path().join("absent.toml"))).unwrap();
        let shown = app.show_config().unwrap();
        let parsed: ConnectionConfig = toml::from_str(&shown).unwrap();
        assert_eq!(parsed, app.config);
    }
}
