use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Configuration key for the transient data store root directory.
pub const DATA_STORE_KEY: &str = "transient.data.store";

/// Configuration key for the cloud-deployment flag.
pub const RUNNING_IN_CLOUD_KEY: &str = "running.in.cloud";

/// Default root directory for the transient data store.
pub const DEFAULT_DATA_STORE: &str = "/tmp/reactive";

/// A flat key-value configuration with environment fallback.
///
/// Keys use dotted lower-case names. A key that is absent from the map
/// is looked up in the environment under its upper-case underscore form
/// (`transient.data.store` becomes `TRANSIENT_DATA_STORE`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Creates an empty configuration that resolves purely from the
    /// environment and built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a JSON settings file containing a single
    /// object of string values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sets a key, overriding file and environment values.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Looks up a key, falling back to the environment.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.values.get(key) {
            return Some(v.clone());
        }
        env::var(env_name(key)).ok()
    }

    /// Root directory for holding areas.
    pub fn data_store(&self) -> PathBuf {
        self.get(DATA_STORE_KEY)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_STORE))
    }

    /// Whether this process runs in cloud mode, where the data store root
    /// itself is the holding area.
    pub fn running_in_cloud(&self) -> bool {
        self.get(RUNNING_IN_CLOUD_KEY)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Maps a dotted configuration key to its environment variable name.
fn env_name(key: &str) -> String {
    key.to_ascii_uppercase().replace('.', "_")
}
