//! Daemon settings: a JSON file with defaults for every field, overridden from the command line.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8168;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How a connecting peer is mapped to the workstation its locks are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Peer IP address. One workstation, one connection.
    #[default]
    Address,
    /// Peer IP address and port, so several clients on one machine count as separate workstations.
    Endpoint,
}
impl IdentityMode {
    pub fn identity(self, peer: &SocketAddr) -> String {
        let id = match self {
            IdentityMode::Address => peer.ip().to_string(),
            IdentityMode::Endpoint => peer.to_string(),
        };
        crate::registry::normalize_name(&id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub history_capacity: usize,
    /// Largest request frame accepted, header included.
    pub max_frame_len: u32,
    /// Unsent bytes a connection may queue before it is dropped as stalled.
    pub max_pending: usize,
    pub identity: IdentityMode,
    pub log_level: String,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("."),
            history_capacity: crate::history::HistoryLog::DEFAULT_CAPACITY,
            max_frame_len: 64 * 1024,
            max_pending: 4 * 1024 * 1024,
            identity: IdentityMode::Address,
            log_level: "info".to_owned(),
        }
    }
}
impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_owned(),
            source,
        })
    }
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(ref dir) = args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(identity) = args.identity {
            self.identity = identity;
        }
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
    }
}

/// Region lock daemon for concurrent world editors.
#[derive(Parser, Debug)]
#[command(name = "chunklockd", version)]
pub struct CliArgs {
    /// JSON config file. Command-line values win over it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interface to listen on.
    #[arg(short = 'I', long)]
    pub bind: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding registry and history documents.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub identity: Option<IdentityMode>,

    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon (default).
    Serve,
    /// Drop a workstation's locks while the daemon is stopped.
    Wipe {
        /// Peer identity whose locks are removed.
        #[arg(long)]
        host: String,
        /// Only this space. Every space when omitted.
        #[arg(long)]
        space: Option<String>,
    },
    /// Print the persisted history log.
    History,
}
