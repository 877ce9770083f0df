//! Typed node configuration.
//!
//! Loads once at startup from environment variables or a TOML file and fails
//! fast if the peer identity is missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::model::PeerId;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub peer_id: String,
    pub state_path: Option<PathBuf>,
    /// Bootstrap peer ids, in addition to this peer.
    pub peers: Vec<String>,
    pub poll_interval: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    node: NodeSection,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    peer_id: String,
    state_path: Option<PathBuf>,
    #[serde(default)]
    peers: Vec<String>,
    poll_interval_secs: Option<u64>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let poll_interval_secs = match std::env::var("WORKMESH_POLL_INTERVAL_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                Error::Config(format!("WORKMESH_POLL_INTERVAL_SECS={raw:?} is not a number: {e}"))
            })?,
            Err(_) => DEFAULT_POLL_INTERVAL_SECS,
        };
        let poll_interval = nonzero_interval(poll_interval_secs, "WORKMESH_POLL_INTERVAL_SECS")?;

        Ok(Self {
            peer_id: required_var("WORKMESH_PEER_ID")?,
            state_path: std::env::var("WORKMESH_STATE_PATH").ok().map(PathBuf::from),
            peers: std::env::var("WORKMESH_PEERS")
                .map(|raw| split_peers(&raw))
                .unwrap_or_default(),
            poll_interval,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Load configuration from a TOML file with a `[node]` table.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        let node = file.node;
        if node.peer_id.trim().is_empty() {
            return Err(Error::Config("peer_id must not be empty".to_string()));
        }

        Ok(Self {
            peer_id: node.peer_id,
            state_path: node.state_path,
            peers: node.peers,
            poll_interval: nonzero_interval(
                node.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
                "poll_interval_secs",
            )?,
            otel_endpoint: node.otel_endpoint,
            log_level: node.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Settings for constructing this node's coordinator.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            peer_id: PeerId::new(self.peer_id.clone()),
            state_path: self.state_path.clone(),
            peers: self.peers.iter().cloned().map(PeerId::new).collect(),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!(
            "required environment variable {name} is not set"
        ))),
    }
}

fn nonzero_interval(secs: u64, source: &str) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::Config(format!("{source} must be at least 1 second")));
    }
    Ok(Duration::from_secs(secs))
}

fn split_peers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
