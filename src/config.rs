use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the food diary service (e.g. "http://localhost:5001")
  #[serde(default = "default_url")]
  pub url: String,
  /// Per-request timeout
  #[serde(default = "default_timeout")]
  pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      request_timeout_secs: default_timeout(),
    }
  }
}

fn default_url() -> String {
  "http://localhost:5001".to_string()
}

fn default_timeout() -> u64 {
  10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Path of the local store database (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl ServerConfig {
  /// Parse the configured URL, normalized to end with a slash so endpoint
  /// paths join underneath it.
  pub fn base_url(&self) -> Result<Url> {
    let mut raw = self.url.trim().to_string();
    if !raw.ends_with('/') {
      raw.push('/');
    }
    let url = Url::parse(&raw).map_err(|e| eyre!("Invalid server url '{}': {}", self.url, e))?;
    match url.scheme() {
      "http" | "https" => Ok(url),
      other => Err(eyre!("Unsupported url scheme '{}' in {}", other, self.url)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mealsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mealsync/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
      None => {
        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mealsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mealsync").join("config.yaml");
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

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.server.base_url()?;
    Ok(config)
  }

  /// Get the session cookie used to authenticate against the service.
  ///
  /// Reads MEALSYNC_SESSION; requests go out unauthenticated without it.
  pub fn get_session_cookie() -> Option<String> {
    std::env::var("MEALSYNC_SESSION")
      .ok()
      .filter(|s| !s.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_from_empty_yaml() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.server.url, "http://localhost:5001");
    assert_eq!(config.server.request_timeout_secs, 10);
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_full_yaml() {
    let config = Config::from_yaml(
      "server:\n  url: https://diary.example.com/app\n  request_timeout_secs: 3\nstorage:\n  path: /tmp/diary.db\n",
    )
    .unwrap();
    assert_eq!(config.server.request_timeout_secs, 3);
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/diary.db")));
    assert_eq!(
      config.server.base_url().unwrap().as_str(),
      "https://diary.example.com/app/"
    );
  }

  #[test]
  fn test_rejects_bad_scheme() {
    assert!(Config::from_yaml("server:\n  url: ftp://example.com\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }
}
