//! Session configuration: defaults, then a TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::ConfigOption;

/// Session configuration. File: ~/.config/peernet/config.toml or /etc/peernet/config.toml.
/// Env override: PEERNET_POLL_INTERVAL_MS.
///
/// ```toml
/// poll_interval_ms = 10
///
/// [[connect_options]]
/// key = 24
/// value = { int32 = 10000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Interval of the background poll loop (default 20).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Applied to every listen socket, ahead of per-call options.
    #[serde(default)]
    pub listen_options: Vec<ConfigOption>,
    /// Applied to every outbound connection, ahead of per-call options.
    #[serde(default)]
    pub connect_options: Vec<ConfigOption>,
}

fn default_poll_interval_ms() -> u64 {
    20
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            listen_options: Vec::new(),
            connect_options: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Load config: merge default, then the first config file present, then env vars.
/// An unreadable or invalid file is logged and skipped.
pub fn load() -> SessionConfig {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |name| std::env::var(name).ok());
    c
}

fn apply_env(c: &mut SessionConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("PEERNET_POLL_INTERVAL_MS") {
        match s.parse::<u64>() {
            Ok(ms) => c.poll_interval_ms = ms,
            Err(_) => warn!(value = %s, "ignoring invalid PEERNET_POLL_INTERVAL_MS"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/peernet/config.toml"));
    }
    out.push(PathBuf::from("/etc/peernet/config.toml"));
    out
}

fn load_file() -> Option<SessionConfig> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match SessionConfig::load_from(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %e, "ignoring config file");
            None
        }
    }
}
