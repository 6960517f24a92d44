use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::Directives;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub github: GitHubConfig,
  pub cache: CacheConfig,
  pub prefetch: PrefetchConfig,
  /// How many recently closed pull requests to merge in on every refresh (0 disables)
  pub closed_limit: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      github: GitHubConfig::default(),
      cache: CacheConfig::default(),
      prefetch: PrefetchConfig::default(),
      closed_limit: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
  pub api_url: String,
  pub graphql_url: String,
  /// `owner/name`; detected from git remotes when unset
  pub repo: Option<String>,
  /// Hard timeout per HTTP request
  pub timeout_secs: u64,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.github.com/".to_string(),
      graphql_url: "https://api.github.com/graphql".to_string(),
      repo: None,
      timeout_secs: 10,
    }
  }
}

impl GitHubConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Directory holding per-repository cache files
  pub dir: Option<PathBuf>,
  /// Exact cache file, overriding `dir`
  pub path: Option<PathBuf>,
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir: None,
      path: None,
      ttl_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs.min(i64::MAX / 1000))
  }

  /// Resolve the cache directory.
  ///
  /// Search order:
  /// 1. `cache.dir` from the config file
  /// 2. $GIT_BRANCHES_CACHE_DIR
  /// 3. $XDG_CACHE_HOME/git-branches
  /// 4. Platform cache directory + git-branches
  pub fn directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.dir {
      return Ok(dir.clone());
    }
    if let Some(dir) = env_path("GIT_BRANCHES_CACHE_DIR") {
      return Ok(dir);
    }
    if let Some(xdg) = env_path("XDG_CACHE_HOME") {
      return Ok(xdg.join("git-branches"));
    }
    let base = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory"))?;
    Ok(base.join("git-branches"))
  }
}

fn env_path(name: &str) -> Option<PathBuf> {
  std::env::var_os(name)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
  /// Maximum number of pull requests enriched per run
  pub branch_limit: usize,
  /// Pull requests per batched detail query
  pub chunk_size: usize,
  /// Ceiling on simultaneous detail requests
  pub concurrency: usize,
}

impl Default for PrefetchConfig {
  fn default() -> Self {
    Self {
      branch_limit: 50,
      chunk_size: 20,
      concurrency: 4,
    }
  }
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./git-branches.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/git-branches/config.yaml
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
      None => Ok(Self::default().with_defaults_filled()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("git-branches.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("git-branches").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default().with_defaults_filled());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config.with_defaults_filled())
  }

  fn with_defaults_filled(mut self) -> Self {
    self.prefetch.chunk_size = self.prefetch.chunk_size.max(1);
    self.prefetch.concurrency = self.prefetch.concurrency.max(1);
    self
  }

  /// Get the GitHub API token.
  ///
  /// Checks GITHUB_TOKEN, then GH_TOKEN, then asks the `gh` CLI.
  pub async fn get_api_token() -> Option<String> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
      if let Ok(token) = std::env::var(var) {
        let token = token.trim();
        if !token.is_empty() {
          return Some(token.to_string());
        }
      }
    }

    let output = tokio::process::Command::new("gh")
      .args(["auth", "token"])
      .output()
      .await
      .ok()?;
    if !output.status.success() {
      return None;
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!token.is_empty()).then_some(token)
  }
}

fn truthy(value: &str) -> bool {
  matches!(
    value.trim().to_ascii_lowercase().as_str(),
    "1" | "true" | "yes"
  )
}

fn env_flag(name: &str) -> bool {
  std::env::var(name).map(|v| truthy(&v)).unwrap_or(false)
}

impl Directives {
  /// Read GIT_BRANCHES_* directive variables.
  pub fn from_env() -> Self {
    Self {
      offline: env_flag("GIT_BRANCHES_OFFLINE"),
      no_cache: env_flag("GIT_BRANCHES_NO_CACHE"),
      refresh: env_flag("GIT_BRANCHES_REFRESH"),
      fast: env_flag("GIT_BRANCHES_FAST"),
      prefetch_details: env_flag("GIT_BRANCHES_PREFETCH_DETAILS"),
      show_checks: env_flag("GIT_BRANCHES_SHOW_CHECKS"),
    }
  }
}
