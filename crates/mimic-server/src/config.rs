//! Server configuration.
//!
//! Resolution order: defaults, then an optional TOML file, then CLI
//! flags and `MIMIC_*` environment variables (applied in `main`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mimic_core::KeyspaceSetConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest accepted active-expiry frequency.
const MAX_HZ: u32 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid bind address '{0}'")]
    BadAddress(String),

    #[error("{0}")]
    Invalid(String),
}

/// Everything the server can be configured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct MimicConfig {
    /// Address to listen on.
    pub bind: String,
    pub port: u16,
    /// Number of logical databases.
    pub databases: usize,
    /// Snapshot directory. Persistence is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Write a snapshot on graceful shutdown. Ignored without `dir`.
    pub save_on_shutdown: bool,
    /// Active expiry cycles per second.
    pub hz: u32,
    pub max_connections: usize,
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 6379,
            databases: mimic_core::spaces::DEFAULT_DATABASES,
            dir: None,
            save_on_shutdown: true,
            hz: 10,
            max_connections: 10_000,
        }
    }
}

impl MimicConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The config as TOML, used by `--config-template`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks cross-field constraints once every layer is applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases == 0 {
            return Err(ConfigError::Invalid("databases must be at least 1".into()));
        }
        if self.databases > u16::MAX as usize + 1 {
            return Err(ConfigError::Invalid(format!(
                "databases must be at most {}",
                u16::MAX as usize + 1
            )));
        }
        if self.hz == 0 || self.hz > MAX_HZ {
            return Err(ConfigError::Invalid(format!(
                "hz must be between 1 and {MAX_HZ}"
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max-connections must be at least 1".into(),
            ));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse().map_err(|_| ConfigError::BadAddress(addr))
    }

    pub fn keyspace_config(&self) -> KeyspaceSetConfig {
        KeyspaceSetConfig {
            databases: self.databases,
        }
    }

    /// Snapshot directory, when persistence is enabled.
    pub fn snapshot_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn saves_on_shutdown(&self) -> bool {
        self.dir.is_some() && self.save_on_shutdown
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(1) / self.hz.max(1)
    }
}
