use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::tz::LocalTime;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub erp: ErpConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub expenses: ExpensesConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErpConfig {
  /// JSON-RPC endpoint, e.g. https://erp.example.com/jsonrpc
  pub url: String,
  /// Database used when login does not name one
  pub database: String,
  /// Employee's offset from UTC in hours
  #[serde(default = "default_utc_offset_hours")]
  pub utc_offset_hours: i32,
  /// Request timeout; reqwest's default when unset
  pub timeout_secs: Option<u64>,
  /// Context sent with every model call (lang, tz, ...)
  #[serde(default)]
  pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Staleness window for queries without a specific one
  #[serde(default = "default_stale_secs")]
  pub default_stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_stale_secs: default_stale_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpensesConfig {
  /// Currency record new expenses are booked in
  #[serde(default = "default_currency_id")]
  pub currency_id: i64,
}

impl Default for ExpensesConfig {
  fn default() -> Self {
    Self {
      currency_id: default_currency_id(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// State database path (defaults to $XDG_DATA_HOME/ess/state.db)
  pub path: Option<PathBuf>,
}

fn default_utc_offset_hours() -> i32 {
  7
}

fn default_stale_secs() -> u64 {
  60
}

fn default_currency_id() -> i64 {
  12
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ess.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ess/config.yaml
  /// 4. ~/.config/ess/config.yaml
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
        "No configuration file found. Create one at ~/.config/ess/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("ess.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ess").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let url = self.endpoint()?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("erp.url must be http or https, got {}", url.scheme()));
    }
    if self.erp.database.trim().is_empty() {
      return Err(eyre!("erp.database must not be empty"));
    }
    self.local_time()?;
    Ok(())
  }

  pub fn endpoint(&self) -> Result<Url> {
    Url::parse(&self.erp.url).map_err(|e| eyre!("Invalid erp.url {}: {}", self.erp.url, e))
  }

  pub fn local_time(&self) -> Result<LocalTime> {
    LocalTime::from_offset_hours(self.erp.utc_offset_hours).ok_or_else(|| {
      eyre!(
        "erp.utc_offset_hours out of range: {}",
        self.erp.utc_offset_hours
      )
    })
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.erp.timeout_secs.map(Duration::from_secs)
  }

  pub fn default_stale_time(&self) -> Duration {
    Duration::from_secs(self.cache.default_stale_secs)
  }

  /// Get the ERP password from the environment.
  ///
  /// Checks ESS_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("ESS_PASSWORD")
      .map_err(|_| eyre!("ERP password not found. Set the ESS_PASSWORD environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_config_gets_defaults() {
    let config = Config::parse(
      r#"
erp:
  url: https://erp.example.com/jsonrpc
  database: erp_prod
"#,
    )
    .unwrap();

    assert_eq!(config.erp.utc_offset_hours, 7);
    assert_eq!(config.default_stale_time(), Duration::from_secs(60));
    assert_eq!(config.expenses.currency_id, 12);
    assert!(config.timeout().is_none());
    assert!(config.storage.path.is_none());
    assert!(config.erp.context.is_empty());
  }

  #[test]
  fn full_config() {
    let config = Config::parse(
      r#"
erp:
  url: https://erp.example.com/jsonrpc
  database: erp_prod
  utc_offset_hours: 8
  timeout_secs: 30
  context:
    lang: id_ID
    tz: Asia/Jakarta
cache:
  default_stale_secs: 120
expenses:
  currency_id: 3
storage:
  path: /tmp/ess/state.db
"#,
    )
    .unwrap();

    assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.erp.context["lang"], "id_ID");
    assert_eq!(config.default_stale_time(), Duration::from_secs(120));
    assert_eq!(config.expenses.currency_id, 3);
    assert_eq!(
      config.local_time().unwrap(),
      LocalTime::from_offset_hours(8).unwrap()
    );
  }

  #[test]
  fn rejects_bad_url_database_and_offset() {
    for yaml in [
      "erp: {url: 'not a url', database: d}",
      "erp: {url: 'ftp://erp.example.com', database: d}",
      "erp: {url: 'https://erp.example.com/jsonrpc', database: ' '}",
      "erp: {url: 'https://erp.example.com/jsonrpc', database: d, utc_offset_hours: 99}",
    ] {
      assert!(Config::parse(yaml).is_err(), "{} should be rejected", yaml);
    }
  }
}
