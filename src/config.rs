//! Process configuration.
//!
//! Configs are plain serde structs with defaults for every field. A JSON
//! file (`--config`) fills them in, then the binaries' CLI flags override
//! individual fields.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rtpf.sock";
pub const DEFAULT_RESOURCE_ID: &str = "infores:test";

/// Remote store connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            connect_timeout_ms: 5_000,
            op_timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    /// Connection parameters for logical database `db`. The password is
    /// passed through as-is, never spliced into a URL.
    pub fn connection_info(&self, db: usize) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: db as i64,
                password: self.password.clone(),
                ..RedisConnectionInfo::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub store: StoreConfig,
    /// Biolink model YAML. Required unless `closures_from_store` is set.
    pub biolink_model: Option<PathBuf>,
    /// Read the closure snapshot written by the loader instead of
    /// rebuilding from the model.
    pub closures_from_store: bool,
    /// `resource_id` stamped on every result's edge binding.
    pub resource_id: String,
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            store: StoreConfig::default(),
            biolink_model: None,
            closures_from_store: false,
            resource_id: DEFAULT_RESOURCE_ID.to_string(),
            metrics: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub store: StoreConfig,
    pub biolink_model: Option<PathBuf>,
    /// Records between write-batch flushes.
    pub flush_interval: usize,
    /// Records between progress log lines.
    pub progress_interval: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            biolink_model: None,
            flush_interval: 10_000,
            progress_interval: 10_000,
        }
    }
}

/// Read a config from a JSON file; missing fields take their defaults.
pub fn from_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
