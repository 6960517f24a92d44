//! Cached GitHub client that wraps GitHubClient with the PR cache.

use color_eyre::Result;
use tracing::debug;

use crate::cache::{CacheLayer, CacheStorage, FileStorage, NoopStorage, Plan, SyncResult};
use crate::config::Config;
use crate::git::{Branch, GitHubRepo};

use super::cache::cache_path;
use super::client::GitHubClient;
use super::prefetch::Prefetcher;

/// GitHub client with transparent caching support.
///
/// Every call goes through the cache layer, which decides between serving
/// the snapshot on disk and a conditional refresh.
pub struct CachedGitHubClient {
  cache: CacheLayer<Box<dyn CacheStorage>, GitHubClient>,
}

impl CachedGitHubClient {
  /// Create a new cached client for `repo`. With persistence disabled the
  /// cache file is neither read nor written.
  pub async fn new(config: &Config, repo: GitHubRepo, plan: &Plan) -> Result<Self> {
    let storage: Box<dyn CacheStorage> = if plan.persist {
      let storage = FileStorage::new(cache_path(&config.cache, &repo)?);
      debug!(path = %storage.path().display(), "using PR cache file");
      Box::new(storage)
    } else {
      Box::new(NoopStorage)
    };

    // Offline runs never send a request, so skip asking for a token
    let token = if plan.network {
      Config::get_api_token().await
    } else {
      None
    };
    let inner = GitHubClient::new(&config.github, repo, token)?;

    let cache = CacheLayer::new(storage, inner, Prefetcher::new(&config.prefetch))
      .with_ttl(config.cache.ttl())
      .with_closed_limit(config.closed_limit);

    Ok(Self { cache })
  }

  /// Pull requests for the repository, keyed by head branch.
  pub async fn pull_requests(&self, plan: &Plan, branches: &[Branch]) -> SyncResult {
    let names: Vec<String> = branches.iter().map(|b| b.name.clone()).collect();
    self.cache.sync(plan, &names).await
  }
}
