use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::facade::Resource;
use crate::queue::QueueSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueSettings,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Per-request timeout; a request without a response by then counts as
  /// network unreachable
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// TTL for entries cached without an explicit one
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: u64,
  /// Per-resource TTLs, e.g. `products: 7200`
  #[serde(default)]
  pub ttl_overrides: HashMap<Resource, u64>,
}

fn default_ttl_secs() -> u64 {
  300
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: default_ttl_secs(),
      ttl_overrides: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file (default: $XDG_DATA_HOME/storesync/store.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storesync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/storesync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    // Fail at startup rather than on the first request
    config.api.base_url()?;

    Ok(config)
  }

  /// Get the API token from the environment, if set.
  ///
  /// When present it seeds the credential store at startup.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STORESYNC_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}

impl ApiConfig {
  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.base_url).map_err(|e| eyre!("Invalid api.base_url {}: {}", self.base_url, e))
  }

  pub fn timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.timeout_secs)
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::seconds(self.default_ttl_secs as i64)
  }

  pub fn ttl_overrides(&self) -> HashMap<Resource, Duration> {
    self
      .ttl_overrides
      .iter()
      .map(|(resource, secs)| (*resource, Duration::seconds(*secs as i64)))
      .collect()
  }
}
