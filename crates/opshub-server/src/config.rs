//! Server configuration, read from a TOML file.
//!
//! Lookup order: the `--config` path, then `<config dir>/opshub/server.toml`,
//! then built-in defaults. `OPSHUB_LISTEN` overrides the listen address.

use std::path::{Path, PathBuf};

use opshub_store::MemoryStoreConfig;
use opshub_votes::VoteConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";
pub const LISTEN_ENV: &str = "OPSHUB_LISTEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub store: MemoryStoreConfig,
    pub votes: VoteConfig,
    pub admin: AdminConfig,
    pub throttle: ThrottleConfig,
    /// Items written at startup when the items collection is empty.
    pub seed: Vec<SeedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub listen: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

/// E-mails allowed into the authoring screens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Votes a user may cast back to back. Zero disables throttling.
    pub burst: u32,
    pub refill_per_sec: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            burst: 20,
            refill_per_sec: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedItem {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Resolve configuration. An explicit path must exist; the default
    /// location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            config.apply_listen_override(&listen);
        }
        Ok(config)
    }

    /// Replace the listen address unless `listen` is blank.
    pub fn apply_listen_override(&mut self, listen: &str) {
        let listen = listen.trim();
        if !listen.is_empty() {
            self.server.listen = listen.to_string();
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("opshub").join("server.toml"))
}
