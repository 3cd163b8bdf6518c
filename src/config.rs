use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pty::DEFAULT_EXTRA_PATH;
use crate::session::SessionSettings;

pub const DEFAULT_PORT: u16 = 9999;

/// Relay configuration, loaded from TOML. Every field is optional in the
/// file; missing fields take the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Shell binary. Unset means `$SHELL`.
    pub shell: Option<String>,
    pub login_shell: bool,
    /// Initial command when a viewer does not send `cmd`.
    pub default_command: String,
    pub idle_timeout_secs: u64,
    pub command_delay_ms: u64,
    pub kill_grace_ms: u64,
    pub extra_path: Vec<String>,
    /// Browser origins allowed to call the HTTP endpoints.
    pub cors_origins: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            shell: None,
            login_shell: true,
            default_command: crate::api::DEFAULT_COMMAND.to_string(),
            idle_timeout_secs: 60,
            command_delay_ms: 100,
            kill_grace_ms: 3000,
            extra_path: DEFAULT_EXTRA_PATH.iter().map(|s| s.to_string()).collect(),
            cors_origins: vec![],
        }
    }
}

impl RelayConfig {
    /// Load config from a TOML file path. Returns `None` if the file doesn't
    /// exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config = Self::from_toml(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load `path` if present, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            command_delay: Duration::from_millis(self.command_delay_ms),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            shell: self.shell.clone(),
            login_shell: self.login_shell,
            extra_path: self.extra_path.clone(),
        }
    }
}

/// `$XDG_CONFIG_HOME/ptyhub/config.toml` (or the platform equivalent).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ptyhub")
        .join("config.toml")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config {}: {}", .0.display(), .1)]
    ParseFailed(PathBuf, #[source] toml::de::Error),
}
