use std::collections::HashMap;
use std::future::Future;

use super::types::{ChecksStatus, FetchFailure, FetchOutcome, PrDetails, PullRequest};

/// Remote pull request data consumed by the sync pipeline.
///
/// Implemented by [`super::client::GitHubClient`]; tests substitute in-memory
/// sources to drive the pipeline through arbitrary outcomes.
pub trait PrSource {
  /// Conditionally list open pull requests. `etag` is sent as `If-None-Match`.
  fn list_open(&self, etag: Option<String>) -> impl Future<Output = FetchOutcome>;

  /// The `limit` most recently updated closed or merged pull requests.
  fn list_recent_closed(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<PullRequest>, FetchFailure>>;

  /// Detail fields for a batch of pull requests, keyed by number. Numbers the
  /// server could not resolve are absent from the map.
  fn fetch_details(
    &self,
    numbers: Vec<u64>,
  ) -> impl Future<Output = Result<HashMap<u64, PrDetails>, FetchFailure>>;

  /// Combined CI status of a commit.
  fn combined_status(&self, sha: String) -> impl Future<Output = Result<ChecksStatus, FetchFailure>>;
}
