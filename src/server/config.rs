//! Server CLI and configuration (C9).
//!
//! Precedence for `port`: CLI flag > `NUMSCULL_PORT` env var > `server.json`
//! > built-in default (`5222`).

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::core::{ConfigError, DEFAULT_SERVER_PORT};

/// `numscull-server` — accept encrypted JSON-RPC connections for a project store.
#[derive(Debug, Parser)]
#[command(name = "numscull-server", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory holding identities/, users/, server.keypair, and optionally server.json.
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// TCP port to listen on.
    #[arg(long, env = "NUMSCULL_PORT")]
    pub port: Option<u16>,

    /// Address to bind.
    #[arg(long)]
    pub host: Option<IpAddr>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a fresh identity keypair and register its public half.
    CreateKeypair {
        /// Name the keypair will be stored and looked up under.
        identity: String,
    },
}

/// On-disk `server.json`, all fields optional.
#[derive(Debug, Default, Deserialize)]
struct ServerJson {
    port: Option<u16>,
    #[allow(dead_code)]
    max_users_per_project: Option<u32>,
}

fn read_server_json(config_dir: &Path) -> Result<ServerJson, ConfigError> {
    let path = config_dir.join("server.json");
    if !path.exists() {
        return Ok(ServerJson::default());
    }
    let text = std::fs::read_to_string(&path)?;
    serde_json::from_str(&text).map_err(|e| ConfigError::InvalidServerJson(e.to_string()))
}

/// Fully resolved server configuration, after applying the precedence chain.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub config_dir: PathBuf,
    pub port: u16,
    pub host: IpAddr,
}

impl ServerConfig {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let config_dir = cli
            .config_dir
            .clone()
            .ok_or_else(|| ConfigError::InvalidServerJson("--config-dir is required".into()))?;
        let server_json = read_server_json(&config_dir)?;
        let port = cli.port.or(server_json.port).unwrap_or(DEFAULT_SERVER_PORT);
        let host = cli.host.unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));
        Ok(Self { config_dir, port, host })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_wins_over_server_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.json"), r#"{"port": 6000}"#).unwrap();
        let cli = Cli { command: None, config_dir: Some(dir.path().to_path_buf()), port: Some(7000), host: None };
        let config = ServerConfig::resolve(&cli).unwrap();
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn server_json_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.json"), r#"{"port": 6000}"#).unwrap();
        let cli = Cli { command: None, config_dir: Some(dir.path().to_path_buf()), port: None, host: None };
        let config = ServerConfig::resolve(&cli).unwrap();
        assert_eq!(config.port, 6000);
    }

    #[test]
    fn falls_back_to_built_in_default() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli { command: None, config_dir: Some(dir.path().to_path_buf()), port: None, host: None };
        let config = ServerConfig::resolve(&cli).unwrap();
        assert_eq!(config.port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn missing_config_dir_is_a_config_error() {
        let cli = Cli { command: None, config_dir: None, port: None, host: None };
        assert!(ServerConfig::resolve(&cli).is_err());
    }
}
