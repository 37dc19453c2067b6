use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  /// Override for the local database directory (defaults to the
  /// platform data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the task server, e.g. https://api.example.com/v1
  pub url: String,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tasksync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tasksync/config.yaml
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
        "No configuration file found. Create one at ~/.config/tasksync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tasksync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tasksync").join("config.yaml");
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

    Ok(config)
  }

  /// Get the bearer token for the task server from environment
  /// variables. This layer only reads the credential; issuing and
  /// refreshing it belong to the host application.
  ///
  /// Checks TASKSYNC_TOKEN first, then TASKSYNC_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("TASKSYNC_TOKEN")
      .or_else(|_| std::env::var("TASKSYNC_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set TASKSYNC_TOKEN or TASKSYNC_API_TOKEN environment variable.")
      })
  }

  /// Path of the local sync database.
  pub fn database_path(&self) -> Result<PathBuf> {
    let dir = match &self.data_dir {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .ok_or_else(|| eyre!("Could not determine data directory"))?
        .join("tasksync"),
    };

    Ok(dir.join("sync.db"))
  }
}
