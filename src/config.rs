//! Coordinator and CLI configuration, loadable from TOML.
//!
//! ```toml
//! wait_timeout_secs    = 120
//! poll_interval_ms     = 1000
//! consent_timeout_secs = 60
//! version              = "2.0"
//! ```
//!
//! Every key is optional; missing keys take the [`Default`] value.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference bound for a caller waiting on one report.
pub const DEFAULT_WAIT_TIMEOUT_SECS:    u64 = 120;
pub const DEFAULT_POLL_INTERVAL_MS:     u64 = 1000;
pub const DEFAULT_CONSENT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REPORT_VERSION:       &str = "2.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── CoordinatorConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub wait_timeout_secs:    u64,
    pub poll_interval_ms:     u64,
    pub consent_timeout_secs: u64,
    /// Written to `version.txt` by collectors that build archives.
    pub version:              String,
    pub worker_name:          String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs:    DEFAULT_WAIT_TIMEOUT_SECS,
            poll_interval_ms:     DEFAULT_POLL_INTERVAL_MS,
            consent_timeout_secs: DEFAULT_CONSENT_TIMEOUT_SECS,
            version:              DEFAULT_REPORT_VERSION.to_owned(),
            worker_name:          "sysdump-worker".to_owned(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_toml(path.as_ref())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }
}

pub(crate) fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}
