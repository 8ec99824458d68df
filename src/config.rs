use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::policy::ExpirationRules;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the gateway fronts. Requests for any other origin bypass caching.
  pub origin: Url,
  /// Cache version. Bump to force invalidation on the next activation.
  pub version: u32,
  /// Shell URLs pre-warmed during install (all-or-nothing)
  #[serde(default = "default_shell_manifest")]
  pub shell_manifest: Vec<String>,
  /// Page served to offline navigations with no cached copy
  #[serde(default = "default_offline_fallback")]
  pub offline_fallback: String,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub expiration: ExpirationRules,
  #[serde(default)]
  pub sync: SyncConfig,
}

/// Path rules the request classifier consults.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path prefixes treated as backend calls (network-first)
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// Substrings marking backend-hosted paths (case-insensitive)
  #[serde(default = "default_api_markers", deserialize_with = "deserialize_lowercase_vec")]
  pub api_markers: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefixes: default_api_prefixes(),
      api_markers: default_api_markers(),
    }
  }
}

/// Endpoints the deferred-mutation queues flush to.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_jobs_endpoint")]
  pub jobs_endpoint: String,
  #[serde(default = "default_tracking_endpoint")]
  pub tracking_endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      jobs_endpoint: default_jobs_endpoint(),
      tracking_endpoint: default_tracking_endpoint(),
    }
  }
}

fn default_shell_manifest() -> Vec<String> {
  vec!["/".into(), "/manifest.json".into(), "/offline.html".into()]
}

fn default_offline_fallback() -> String {
  "/offline.html".into()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".into(), "/portal/".into()]
}

fn default_api_markers() -> Vec<String> {
  vec!["supabase".into()]
}

fn default_jobs_endpoint() -> String {
  "/api/jobs".into()
}

fn default_tracking_endpoint() -> String {
  "/api/tracking".into()
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tradegate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tradegate/config.yaml
  /// 4. ~/.config/tradegate/config.yaml
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
        "No configuration file found. Create one at ~/.config/tradegate/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tradegate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tradegate").join("config.yaml");
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

  /// Directory for durable gateway state (cache database, logs).
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tradegate"))
  }

  /// Resolve a configured path like "/offline.html" against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Failed to resolve {} against origin: {}", path, e))
  }
}
