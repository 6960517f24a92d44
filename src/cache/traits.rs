//! Core types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::github::prefetch::PrefetchReport;
use crate::github::types::{deserialize_timestamp, PrMapping};

/// The persisted pull request snapshot for one repository.
///
/// Passed explicitly through the pipeline; there is no process-wide copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// When the mapping was last refreshed from the network
  #[serde(deserialize_with = "deserialize_timestamp")]
  pub timestamp: DateTime<Utc>,
  /// ETag of the open pull request listing the mapping was built from
  pub etag: Option<String>,
  pub mapping: PrMapping,
}

impl CacheEntry {
  /// Whether the entry is younger than `ttl` at `now`.
  pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - self.timestamp < ttl
  }

  pub fn is_fresh(&self, ttl: Duration) -> bool {
    self.is_fresh_at(ttl, Utc::now())
  }
}

/// Where the returned mapping came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheSource {
  /// Refreshed from the network during this run
  Network,
  /// Served from a cache younger than the TTL, no network call made
  CacheFresh,
  /// The refresh failed; last known good data with closed PRs applied
  Degraded,
  /// Network disabled by directive; persisted data (or nothing) served
  Offline,
}

/// Result of one sync, handed to whatever displays branches.
#[derive(Debug, Clone)]
pub struct SyncResult {
  pub mapping: PrMapping,
  pub source: CacheSource,
  /// Refresh time of the data, if any data exists
  pub timestamp: Option<DateTime<Utc>>,
  /// Non-fatal, user-visible messages (fallbacks, write failures)
  pub notices: Vec<String>,
  pub prefetch: PrefetchReport,
}

impl SyncResult {
  /// Result served from a fresh cache entry.
  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      mapping: entry.mapping,
      source: CacheSource::CacheFresh,
      timestamp: Some(entry.timestamp),
      notices: Vec::new(),
      prefetch: PrefetchReport::default(),
    }
  }

  /// Result for offline mode, from the persisted entry if there is one.
  pub fn offline(entry: Option<CacheEntry>) -> Self {
    let (mapping, timestamp) = match entry {
      Some(entry) => (entry.mapping, Some(entry.timestamp)),
      None => (PrMapping::new(), None),
    };
    Self {
      mapping,
      source: CacheSource::Offline,
      timestamp,
      notices: Vec::new(),
      prefetch: PrefetchReport::default(),
    }
  }

  /// Empty offline result explaining why no data could be obtained.
  pub fn unavailable(notice: impl Into<String>) -> Self {
    let mut result = Self::offline(None);
    result.notices.push(notice.into());
    result
  }
}
