// Client configuration: a small flat JSON record persisted in the user's
// config directory. `ConfigStore` owns the file; everything else only sees
// `ClientConfig` values.

use crate::error::{ClientError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Service address used when neither a flag nor the config provides one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
/// Default request timeout for encryption calls, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const CONFIG_DIR_NAME: &str = "pyencrypt-client";
const CONFIG_FILE_NAME: &str = "config.json";

/// Persisted settings. Every field is optional so that a hand-edited file
/// with missing keys still loads.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Base URL to contact: the saved one, or the built-in default.
    pub fn base_url_or_default(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Saved timeout in seconds; zero or missing means the default.
    pub fn timeout_secs_or_default(&self) -> u64 {
        self.timeout_secs.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

/// Owns the location of the config file and reads/writes it.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by an explicit file path (the `--config` flag, tests).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config dir>/pyencrypt-client/config.json`. Falls back to the
    /// home directory and then the working directory when the platform has
    /// no config directory.
    pub fn at_default_location() -> Self {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config. A missing, unreadable or malformed file yields the
    /// default (empty) config; absence is a normal state.
    pub fn load(&self) -> ClientConfig {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", self.path.display());
                return ClientConfig::default();
            }
            Err(e) => {
                warn!("Could not read config file {} ({}), using defaults", self.path.display(), e);
                return ClientConfig::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!("Could not parse config file {} ({}), using defaults", self.path.display(), e);
                ClientConfig::default()
            }
        }
    }

    /// Overwrite the config file with `config`. Parent directories are
    /// created. The writer is flushed and synced before returning; on any
    /// error the file handle is still closed when it goes out of scope.
    pub fn save(&self, config: &ClientConfig) -> Result<()> {
        let persistence = |what: &str, e: std::io::Error| {
            ClientError::Persistence(format!("{} {}: {}", what, self.path.display(), e))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persistence("cannot create directory for", e))?;
        }

        let mut body = serde_json::to_string_pretty(config)
            .map_err(|e| ClientError::Persistence(format!("cannot serialize config: {e}")))?;
        body.push('\n');

        let file = File::create(&self.path).map_err(|e| persistence("cannot open", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(body.as_bytes())
            .map_err(|e| persistence("cannot write", e))?;
        let file = writer
            .into_inner()
            .map_err(|e| persistence("cannot flush", e.into_error()))?;
        file.sync_all().map_err(|e| persistence("cannot sync", e))?;

        debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}
