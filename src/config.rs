use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, RetryPolicy};
use crate::realtime::ReconnectPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub environment: Environment,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub realtime: RealtimeSettings,
}

/// Build flavour; development surfaces verbose diagnostics.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  Development,
  Production,
}

impl Default for Environment {
  fn default() -> Self {
    if cfg!(debug_assertions) {
      Environment::Development
    } else {
      Environment::Production
    }
  }
}

impl Environment {
  pub fn is_development(self) -> bool {
    self == Environment::Development
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Bearer token; usually supplied through the environment instead
  pub token: Option<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_ms: default_timeout_ms(),
      token: None,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  #[serde(default = "default_gc_time_secs")]
  pub gc_time_secs: u64,
  #[serde(default = "default_gc_interval_secs")]
  pub gc_interval_secs: u64,
  #[serde(default)]
  pub retry: RetrySettings,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      gc_time_secs: default_gc_time_secs(),
      gc_interval_secs: default_gc_interval_secs(),
      retry: RetrySettings::default(),
    }
  }
}

impl CacheSettings {
  pub fn to_cache_config(&self) -> CacheConfig {
    CacheConfig {
      stale_time: Duration::from_secs(self.stale_time_secs),
      gc_time: Duration::from_secs(self.gc_time_secs),
      retry: self.retry.to_policy(),
    }
  }

  pub fn gc_interval(&self) -> Duration {
    Duration::from_secs(self.gc_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_retry_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_retry_max_delay_ms")]
  pub max_delay_ms: u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      base_delay_ms: default_retry_base_delay_ms(),
      max_delay_ms: default_retry_max_delay_ms(),
    }
  }
}

impl RetrySettings {
  pub fn to_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      base_delay: Duration::from_millis(self.base_delay_ms),
      max_delay: Duration::from_millis(self.max_delay_ms),
    }
  }
}

/// Real-time channel settings. The reconnect schedule is deliberately
/// separate from the cache's retry schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSettings {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_realtime_url")]
  pub url: String,
  #[serde(default = "default_room")]
  pub room: String,
  #[serde(default = "default_max_reconnect_attempts")]
  pub max_reconnect_attempts: u32,
  #[serde(default = "default_reconnect_base_delay_ms")]
  pub reconnect_base_delay_ms: u64,
  #[serde(default = "default_reconnect_max_delay_ms")]
  pub reconnect_max_delay_ms: u64,
  #[serde(default = "default_ping_interval_secs")]
  pub ping_interval_secs: u64,
  /// Bound on the TCP connect plus WebSocket handshake
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,
}

impl Default for RealtimeSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      url: default_realtime_url(),
      room: default_room(),
      max_reconnect_attempts: default_max_reconnect_attempts(),
      reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
      reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
      ping_interval_secs: default_ping_interval_secs(),
      connect_timeout_ms: default_connect_timeout_ms(),
    }
  }
}

impl RealtimeSettings {
  pub fn reconnect_policy(&self) -> ReconnectPolicy {
    ReconnectPolicy {
      max_attempts: self.max_reconnect_attempts,
      base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
      max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
    }
  }

  pub fn ping_interval(&self) -> Duration {
    Duration::from_secs(self.ping_interval_secs.max(1))
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms.max(1))
  }
}

fn default_base_url() -> String {
  "http://localhost:3001".to_string()
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_stale_time_secs() -> u64 {
  5 * 60
}

fn default_gc_time_secs() -> u64 {
  30 * 60
}

fn default_gc_interval_secs() -> u64 {
  60
}

fn default_max_retries() -> u32 {
  2
}

fn default_retry_base_delay_ms() -> u64 {
  1_000
}

fn default_retry_max_delay_ms() -> u64 {
  5_000
}

fn default_true() -> bool {
  true
}

fn default_realtime_url() -> String {
  "ws://localhost:3001/ws".to_string()
}

fn default_room() -> String {
  "dashboard".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
  5
}

fn default_reconnect_base_delay_ms() -> u64 {
  1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
  30_000
}

fn default_ping_interval_secs() -> u64 {
  30
}

fn default_connect_timeout_ms() -> u64 {
  10_000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pulseboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pulseboard/config.yaml
  ///
  /// Without a file the defaults apply. Environment overrides are applied
  /// last.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pulseboard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pulseboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// PULSEBOARD_API_URL replaces the base URL; PULSEBOARD_API_TOKEN
  /// replaces the token.
  fn apply_env_overrides(&mut self) {
    if let Ok(url) = std::env::var("PULSEBOARD_API_URL") {
      self.api.base_url = url;
    }
    if let Ok(token) = std::env::var("PULSEBOARD_API_TOKEN") {
      self.api.token = Some(token);
    }
  }

  /// Directory for the log file and the preference database.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pulseboard"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.api.base_url, "http://localhost:3001");
    assert_eq!(config.api.timeout(), Duration::from_millis(30_000));

    let cache = config.cache.to_cache_config();
    assert_eq!(cache.stale_time, Duration::from_secs(300));
    assert_eq!(cache.gc_time, Duration::from_secs(1800));
    assert_eq!(cache.retry, RetryPolicy::default());

    let policy = config.realtime.reconnect_policy();
    assert_eq!(policy, ReconnectPolicy::default());
    assert_eq!(config.realtime.room, "dashboard");
    assert_eq!(config.realtime.ping_interval(), Duration::from_secs(30));
    assert_eq!(config.realtime.connect_timeout(), Duration::from_secs(10));
    assert!(config.realtime.enabled);
  }

  #[test]
  fn test_partial_overrides() {
    let yaml = r#"
environment: production
api:
  base_url: https://shop.example.com
  timeout_ms: 5000
cache:
  stale_time_secs: 60
  retry:
    max_retries: 4
realtime:
  enabled: false
  room: ops
  max_reconnect_attempts: 3
  connect_timeout_ms: 2500
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.environment, Environment::Production);
    assert!(!config.environment.is_development());
    assert_eq!(config.api.base_url, "https://shop.example.com");
    assert_eq!(config.api.timeout(), Duration::from_secs(5));

    let cache = config.cache.to_cache_config();
    assert_eq!(cache.stale_time, Duration::from_secs(60));
    assert_eq!(cache.retry.max_retries, 4);
    assert_eq!(cache.retry.base_delay, Duration::from_secs(1));

    assert!(!config.realtime.enabled);
    assert_eq!(config.realtime.room, "ops");
    assert_eq!(config.realtime.reconnect_policy().max_attempts, 3);
    assert_eq!(config.realtime.connect_timeout(), Duration::from_millis(2500));
    assert_eq!(config.realtime.url, "ws://localhost:3001/ws");
  }

  #[test]
  fn test_unknown_environment_is_rejected() {
    assert!(Config::from_yaml("environment: staging").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
