//! Server configuration.
//!
//! Layers, lowest precedence first: compiled defaults, the JSON config file,
//! `AGENT_CONTROL_*` environment variables, then whatever the caller sets on
//! the returned value (CLI flags).

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_ADDRESS: &str = "AGENT_CONTROL_ADDRESS";
pub const ENV_PORT: &str = "AGENT_CONTROL_PORT";
pub const ENV_TRANSPORT: &str = "AGENT_CONTROL_TRANSPORT";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub address: String,
    /// Port to bind.
    pub port: u16,
    /// Name of the transport profile.
    pub transport: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 4433,
            transport: "tcp".to_string(),
        }
    }
}

impl ServerConfig {
    /// `<config dir>/agent-control/server.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agent-control").join("server.json"))
    }

    /// Read a config file. A missing file yields `None`.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Load from `path` (or the default location) and the process environment.
    ///
    /// # Errors
    /// Returns error if the file or an environment variable is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    /// Like [`ServerConfig::load`] with an explicit environment lookup.
    ///
    /// # Errors
    /// Returns error if the file or an environment variable is invalid.
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match &path {
            Some(path) => Self::from_file(path)?.unwrap_or_default(),
            None => Self::default(),
        };
        if let Some(path) = &path {
            tracing::debug!(path = %path.display(), "Loaded server config");
        }
        config.apply_env(env)?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(address) = env(ENV_ADDRESS) {
            self.address = address;
        }
        if let Some(port) = env(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT,
                value: port,
            })?;
        }
        if let Some(transport) = env(ENV_TRANSPORT) {
            self.transport = transport;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio_test::assert_ok;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_with(Some(&dir.path().join("absent.json")), no_env);
        assert_eq!(assert_ok!(config), ServerConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults_partially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"port": 8443}"#).unwrap();

        let config = ServerConfig::load_with(Some(&path), no_env).unwrap();
        assert_eq!(config.port, 8443);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.transport, "tcp");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"address": "10.1.1.1", "port": 8443}"#).unwrap();
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_PORT, "9000"), (ENV_TRANSPORT, "tcp-psk")]);

        let config =
            ServerConfig::load_with(Some(&path), |v| env.get(v).map(ToString::to_string)).unwrap();
        assert_eq!(config.address, "10.1.1.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport, "tcp-psk");
    }

    #[test]
    fn test_invalid_port_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        let err = ServerConfig::load_with(Some(&path), |v| {
            (v == ENV_PORT).then(|| "http".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_PORT, .. }));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, "port = 1").unwrap();
        assert!(matches!(
            ServerConfig::load_with(Some(&path), no_env),
            Err(ConfigError::Parse { .. })
        ));
    }
}
