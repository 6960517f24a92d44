//! Reconciles open pull requests, the closed slice and the prior snapshot.

use chrono::{DateTime, Utc};

use super::traits::CacheEntry;
use crate::github::types::{FetchOutcome, PrMapping, PullRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
  pub entry: CacheEntry,
  /// The open listing could not be refreshed; data may be stale
  pub degraded: bool,
}

/// Build the new snapshot for this run.
///
/// - `NotModified` and `Failed` start from the prior mapping, `Updated`
///   replaces it with the fetched open pull requests.
/// - Closed pull requests are applied on top unless the entry already held
///   for that branch is strictly newer.
/// - A degraded merge keeps the prior timestamp so the next run retries.
pub fn merge(
  prior: Option<CacheEntry>,
  outcome: FetchOutcome,
  closed: Vec<PullRequest>,
  now: DateTime<Utc>,
) -> MergeResult {
  let (prior_timestamp, prior_etag, prior_mapping) = match prior {
    Some(entry) => (Some(entry.timestamp), entry.etag, entry.mapping),
    None => (None, None, PrMapping::new()),
  };

  let (mut mapping, etag, degraded) = match outcome {
    FetchOutcome::NotModified => (prior_mapping, prior_etag, false),
    FetchOutcome::Updated { prs, etag } => {
      let mut mapping = PrMapping::new();
      for pr in prs {
        insert_newer(&mut mapping, pr);
      }
      (mapping, etag, false)
    }
    FetchOutcome::Failed(_) => (prior_mapping, prior_etag, true),
  };

  for pr in closed {
    apply_closed(&mut mapping, pr);
  }

  let timestamp = if degraded {
    prior_timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
  } else {
    now
  };

  MergeResult {
    entry: CacheEntry {
      timestamp,
      etag,
      mapping,
    },
    degraded,
  }
}

/// Insert when the branch is free or `pr` supersedes the current entry.
fn insert_newer(mapping: &mut PrMapping, pr: PullRequest) {
  match mapping.get(&pr.head_ref) {
    Some(existing) if !pr.supersedes(existing) => {}
    _ => {
      mapping.insert(pr.head_ref.clone(), pr);
    }
  }
}

/// Closing is authoritative: a closed record replaces anything not strictly
/// newer, including the same pull request at the same update time.
fn apply_closed(mapping: &mut PrMapping, pr: PullRequest) {
  if let Some(existing) = mapping.get(&pr.head_ref) {
    if existing.supersedes(&pr) {
      return;
    }
    // Already recorded in this exact state; keep the entry and its details
    if existing.number == pr.number
      && existing.updated_at == pr.updated_at
      && existing.state == pr.state
    {
      return;
    }
  }
  mapping.insert(pr.head_ref.clone(), pr);
}
