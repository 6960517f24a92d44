//! Cache file naming for GitHub repositories.

use color_eyre::Result;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::config::CacheConfig;
use crate::git::GitHubRepo;

/// `prs-<hash>.json`, where the hash is derived from the lowercased slug so
/// every repository gets its own file.
pub fn cache_file_name(repo: &GitHubRepo) -> String {
  let input = format!("{}/{}", repo.owner, repo.name).to_lowercase();

  // SHA256 hash for stable, fixed-length names
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  let result = hasher.finalize();
  format!("prs-{}.json", &hex::encode(result)[..16])
}

/// Location of the cache file for `repo`. `cache.path` wins outright.
pub fn cache_path(config: &CacheConfig, repo: &GitHubRepo) -> Result<PathBuf> {
  if let Some(path) = &config.path {
    return Ok(path.clone());
  }
  Ok(config.directory()?.join(cache_file_name(repo)))
}
