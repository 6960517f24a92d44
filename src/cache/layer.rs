//! Cache layer that orchestrates the cache file with network fetching.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::merge::{merge, MergeResult};
use super::mode::Plan;
use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheSource, SyncResult};
use crate::github::prefetch::{PrefetchReport, Prefetcher};
use crate::github::source::PrSource;
use crate::github::types::{FetchOutcome, PullRequest};

/// Cache layer that manages the pull request snapshot for one repository.
///
/// This layer sits between the application and the network source, providing
/// conditional refresh with a fallback to the last known good snapshot.
pub struct CacheLayer<S: CacheStorage, P: PrSource> {
  storage: S,
  source: P,
  /// How long a snapshot is served without contacting the network
  ttl: Duration,
  /// Size of the closed pull request slice (0 disables it)
  closed_limit: usize,
  prefetcher: Prefetcher,
}

impl<S: CacheStorage, P: PrSource> CacheLayer<S, P> {
  pub fn new(storage: S, source: P, prefetcher: Prefetcher) -> Self {
    Self {
      storage,
      source,
      ttl: Duration::minutes(5),
      closed_limit: 30,
      prefetcher,
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_closed_limit(mut self, closed_limit: usize) -> Self {
    self.closed_limit = closed_limit;
    self
  }

  /// Produce the branch to pull request mapping for this run.
  ///
  /// 1. Offline: serve whatever is persisted, no network
  /// 2. Fresh cache (and no forced refresh): serve it without refetching the
  ///    list; enabled detail and check lookups still run over it
  /// 3. Conditional fetch plus closed slice, merged over the prior snapshot
  /// 4. Optional prefetch of details and checks, skipped when degraded
  /// 5. Persist, unless degraded with nothing previously stored
  ///
  /// Never fails; problems surface as a `Degraded` source and notices.
  pub async fn sync(&self, plan: &Plan, branches: &[String]) -> SyncResult {
    let prior = self.storage.load();

    if !plan.network {
      debug!(cached = prior.is_some(), "network disabled, serving cache");
      return SyncResult::offline(prior);
    }

    let prior = match prior {
      Some(entry) if !plan.force_refresh && entry.is_fresh(self.ttl) => {
        debug!(timestamp = %entry.timestamp, "PR cache fresh");
        return self.serve_fresh(plan, entry, branches).await;
      }
      prior => prior,
    };

    let etag = if plan.force_refresh {
      None
    } else {
      prior.as_ref().and_then(|e| e.etag.clone())
    };
    let outcome = self.source.list_open(etag).await;
    match &outcome {
      FetchOutcome::NotModified => debug!("open PR list not modified"),
      FetchOutcome::Updated { prs, .. } => debug!(count = prs.len(), "open PR list updated"),
      FetchOutcome::Failed(_) => {}
    }
    let closed = self.closed_slice().await;

    let mut notices = Vec::new();
    if let FetchOutcome::Failed(reason) = &outcome {
      warn!(error = %reason, "PR refresh failed, using cached data");
      notices.push(match &prior {
        Some(entry) => format!(
          "showing cached pull requests from {}: {reason}",
          entry.timestamp.format("%Y-%m-%d %H:%M UTC")
        ),
        None => format!("could not fetch pull requests: {reason}"),
      });
    }

    let had_prior = prior.is_some();
    let MergeResult {
      mut entry,
      degraded,
    } = merge(prior, outcome, closed, Utc::now());

    let prefetch = if plan.wants_prefetch() && !degraded {
      self
        .prefetcher
        .run(
          &self.source,
          &mut entry.mapping,
          branches,
          plan.prefetch_details,
          plan.fetch_checks,
        )
        .await
    } else {
      PrefetchReport::default()
    };

    if degraded && !had_prior {
      debug!("nothing cached and refresh failed, not writing cache");
    } else {
      self.persist(&entry, &mut notices);
    }

    SyncResult {
      source: if degraded {
        CacheSource::Degraded
      } else {
        CacheSource::Network
      },
      timestamp: (!degraded || had_prior).then_some(entry.timestamp),
      mapping: entry.mapping,
      notices,
      prefetch,
    }
  }

  /// Serve a fresh entry. The PR list is not refetched, but enabled detail
  /// and check lookups still run over it and the result is written back
  /// with the original timestamp and ETag.
  async fn serve_fresh(&self, plan: &Plan, mut entry: CacheEntry, branches: &[String]) -> SyncResult {
    if !plan.wants_prefetch() {
      return SyncResult::from_cache(entry);
    }

    let prefetch = self
      .prefetcher
      .run(
        &self.source,
        &mut entry.mapping,
        branches,
        plan.prefetch_details,
        plan.fetch_checks,
      )
      .await;

    let mut notices = Vec::new();
    self.persist(&entry, &mut notices);

    let mut result = SyncResult::from_cache(entry);
    result.notices = notices;
    result.prefetch = prefetch;
    result
  }

  fn persist(&self, entry: &CacheEntry, notices: &mut Vec<String>) {
    match self.storage.save(entry) {
      Ok(()) => info!(prs = entry.mapping.len(), "PR cache updated"),
      Err(e) => {
        warn!(error = %e, "failed to write PR cache");
        notices.push(format!("Could not update PR cache: {e}"));
      }
    }
  }

  /// Recently closed pull requests. A failure here only costs the
  /// closed/merged markers, so it is logged and treated as empty.
  async fn closed_slice(&self) -> Vec<PullRequest> {
    if self.closed_limit == 0 {
      return Vec::new();
    }
    match self.source.list_recent_closed(self.closed_limit).await {
      Ok(prs) => prs,
      Err(e) => {
        debug!(error = %e, "closed PR list unavailable");
        Vec::new()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::mode::Directives;
  use crate::cache::storage::{FileStorage, NoopStorage};
  use crate::config::PrefetchConfig;
  use crate::github::types::fixtures::{at, pr};
  use crate::github::types::{ChecksStatus, FetchFailure, PrDetails, PrMapping, PrState};
  use std::collections::HashMap;
  use std::fs;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  struct FakeSource {
    open: FetchOutcome,
    closed: Result<Vec<PullRequest>, FetchFailure>,
    etags_sent: Mutex<Vec<Option<String>>>,
    closed_calls: AtomicUsize,
    detail_calls: AtomicUsize,
  }

  impl FakeSource {
    fn new(open: FetchOutcome) -> Self {
      Self {
        open,
        closed: Ok(Vec::new()),
        etags_sent: Mutex::new(Vec::new()),
        closed_calls: AtomicUsize::new(0),
        detail_calls: AtomicUsize::new(0),
      }
    }

    fn with_closed(mut self, closed: Result<Vec<PullRequest>, FetchFailure>) -> Self {
      self.closed = closed;
      self
    }

    fn open_calls(&self) -> usize {
      self.etags_sent.lock().unwrap().len()
    }

    fn total_calls(&self) -> usize {
      self.open_calls()
        + self.closed_calls.load(Ordering::SeqCst)
        + self.detail_calls.load(Ordering::SeqCst)
    }
  }

  impl PrSource for &FakeSource {
    async fn list_open(&self, etag: Option<String>) -> FetchOutcome {
      self.etags_sent.lock().unwrap().push(etag);
      self.open.clone()
    }

    async fn list_recent_closed(&self, _limit: usize) -> Result<Vec<PullRequest>, FetchFailure> {
      self.closed_calls.fetch_add(1, Ordering::SeqCst);
      self.closed.clone()
    }

    async fn fetch_details(&self, numbers: Vec<u64>) -> Result<HashMap<u64, PrDetails>, FetchFailure> {
      self.detail_calls.fetch_add(1, Ordering::SeqCst);
      Ok(
        numbers
          .into_iter()
          .map(|n| {
            let details = PrDetails {
              body: Some(format!("body {n}")),
              ..PrDetails::default()
            };
            (n, details)
          })
          .collect(),
      )
    }

    async fn combined_status(&self, _sha: String) -> Result<ChecksStatus, FetchFailure> {
      Ok(ChecksStatus::Pending)
    }
  }

  fn layer<'a, S: CacheStorage>(storage: S, source: &'a FakeSource) -> CacheLayer<S, &'a FakeSource> {
    CacheLayer::new(storage, source, Prefetcher::new(&PrefetchConfig::default()))
  }

  fn plan() -> Plan {
    Directives::default().plan()
  }

  fn offline_plan() -> Plan {
    Directives {
      offline: true,
      ..Directives::default()
    }
    .plan()
  }

  fn foo_mapping() -> PrMapping {
    let p = pr(12, "feature/foo", PrState::Open, at(0));
    PrMapping::from([(p.head_ref.clone(), p)])
  }

  /// Cache file holding `foo_mapping`, written `age` ago.
  fn stored(dir: &tempfile::TempDir, age: Duration) -> FileStorage {
    let storage = FileStorage::new(dir.path().join("prs.json"));
    storage
      .save(&CacheEntry {
        timestamp: Utc::now() - age,
        etag: Some("\"e1\"".to_string()),
        mapping: foo_mapping(),
      })
      .unwrap();
    storage
  }

  fn updated_outcome() -> FetchOutcome {
    FetchOutcome::Updated {
      prs: vec![
        pr(12, "feature/foo", PrState::Open, at(1)),
        pr(13, "feature/bar", PrState::Open, at(2)),
      ],
      etag: Some("\"e2\"".to_string()),
    }
  }

  #[tokio::test]
  async fn offline_without_cache_is_empty_and_silent() {
    let source = FakeSource::new(updated_outcome());
    let result = layer(NoopStorage, &source).sync(&offline_plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Offline);
    assert!(result.mapping.is_empty());
    assert_eq!(result.timestamp, None);
    assert_eq!(source.total_calls(), 0);
  }

  #[tokio::test]
  async fn offline_serves_stale_cache_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let storage = stored(&dir, Duration::days(3));
    let source = FakeSource::new(updated_outcome());
    let result = layer(storage, &source).sync(&offline_plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.mapping, foo_mapping());
    assert_eq!(source.total_calls(), 0);
  }

  #[tokio::test]
  async fn fresh_cache_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let storage = stored(&dir, Duration::minutes(1));
    let before = fs::read(storage.path()).unwrap();
    let source = FakeSource::new(updated_outcome());
    let layer = layer(storage, &source);
    let result = layer.sync(&plan(), &[]).await;

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.mapping, foo_mapping());
    assert_eq!(source.total_calls(), 0);
    assert_eq!(fs::read(layer.storage.path()).unwrap(), before);
  }

  #[tokio::test]
  async fn fresh_cache_still_prefetches_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let storage = stored(&dir, Duration::minutes(1));
    let stored_entry = storage.load().unwrap();
    let source = FakeSource::new(updated_outcome());
    let plan = Directives {
      prefetch_details: true,
      show_checks: true,
      ..Directives::default()
    }
    .plan();
    let layer = layer(storage, &source);
    let result = layer.sync(&plan, &["feature/foo".to_string()]).await;

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(source.open_calls(), 0);
    assert_eq!(source.closed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.detail_calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.prefetch.enriched, 1);
    assert_eq!(result.mapping["feature/foo"].body.as_deref(), Some("body 12"));
    assert_eq!(result.mapping["feature/foo"].checks_status, Some(ChecksStatus::Pending));

    // Enriched mapping is written back without refreshing the entry
    let saved = layer.storage.load().unwrap();
    assert_eq!(saved.timestamp, stored_entry.timestamp);
    assert_eq!(saved.etag, stored_entry.etag);
    assert_eq!(saved.mapping["feature/foo"].body.as_deref(), Some("body 12"));
  }

  #[tokio::test]
  async fn not_modified_keeps_mapping_and_refreshes_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let storage = stored(&dir, Duration::minutes(10));
    let source = FakeSource::new(FetchOutcome::NotModified);
    let layer = layer(storage, &source);
    let started = Utc::now();
    let result = layer.sync(&plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.mapping, foo_mapping());
    assert_eq!(*source.etags_sent.lock().unwrap(), vec![Some("\"e1\"".to_string())]);

    let saved = layer.storage.load().unwrap();
    assert!(saved.timestamp >= started);
    assert_eq!(saved.etag.as_deref(), Some("\"e1\""));
    assert_eq!(
      serde_json::to_vec(&saved.mapping).unwrap(),
      serde_json::to_vec(&foo_mapping()).unwrap()
    );
  }

  #[tokio::test]
  async fn forced_refresh_skips_etag_and_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let storage = stored(&dir, Duration::minutes(1));
    let source = FakeSource::new(updated_outcome());
    let plan = Directives {
      refresh: true,
      ..Directives::default()
    }
    .plan();
    let layer = layer(storage, &source);
    let result = layer.sync(&plan, &[]).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.mapping.len(), 2);
    assert_eq!(*source.etags_sent.lock().unwrap(), vec![None]);
    assert_eq!(layer.storage.load().unwrap().etag.as_deref(), Some("\"e2\""));
  }

  #[tokio::test]
  async fn failure_with_cache_is_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let storage = stored(&dir, Duration::minutes(10));
    let prior_timestamp = storage.load().unwrap().timestamp;
    let source = FakeSource::new(FetchOutcome::Failed(FetchFailure::RateLimited { reset_at: None }))
      .with_closed(Ok(vec![pr(12, "feature/foo", PrState::Merged, at(3))]));
    let layer = layer(storage, &source);
    let result = layer.sync(&plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Degraded);
    assert_eq!(result.notices.len(), 1);
    assert!(result.notices[0].contains("rate limited"));
    assert_eq!(result.mapping["feature/foo"].state, PrState::Merged);
    assert_eq!(result.timestamp, Some(prior_timestamp));

    // Stored timestamp is not advanced so the next run retries
    let saved = layer.storage.load().unwrap();
    assert_eq!(saved.timestamp, prior_timestamp);
    assert_eq!(saved.mapping["feature/foo"].state, PrState::Merged);
  }

  #[tokio::test]
  async fn failure_without_cache_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("prs.json"));
    let source = FakeSource::new(FetchOutcome::Failed(FetchFailure::Timeout));
    let layer = layer(storage, &source);
    let result = layer.sync(&plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Degraded);
    assert!(result.mapping.is_empty());
    assert_eq!(result.timestamp, None);
    assert!(!layer.storage.path().exists());
  }

  #[tokio::test]
  async fn closed_failure_does_not_degrade() {
    let source = FakeSource::new(updated_outcome()).with_closed(Err(FetchFailure::Status(500)));
    let result = layer(NoopStorage, &source).sync(&plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Network);
    assert!(result.notices.is_empty());
    assert_eq!(result.mapping.len(), 2);
  }

  #[tokio::test]
  async fn closed_limit_zero_skips_closed_request() {
    let source = FakeSource::new(updated_outcome());
    layer(NoopStorage, &source)
      .with_closed_limit(0)
      .sync(&plan(), &[])
      .await;
    assert_eq!(source.closed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.open_calls(), 1);
  }

  #[tokio::test]
  async fn prefetch_runs_on_success_only() {
    let plan = Directives {
      prefetch_details: true,
      show_checks: true,
      ..Directives::default()
    }
    .plan();
    let branches = vec!["feature/bar".to_string()];

    let source = FakeSource::new(updated_outcome());
    let result = layer(NoopStorage, &source).sync(&plan, &branches).await;
    assert_eq!(result.prefetch.enriched, 1);
    assert_eq!(result.prefetch.checks, 1);
    assert_eq!(result.mapping["feature/bar"].body.as_deref(), Some("body 13"));
    assert_eq!(result.mapping["feature/bar"].checks_status, Some(ChecksStatus::Pending));
    assert_eq!(result.mapping["feature/foo"].body, None);

    let source = FakeSource::new(FetchOutcome::Failed(FetchFailure::Timeout));
    let result = layer(NoopStorage, &source).sync(&plan, &branches).await;
    assert_eq!(source.detail_calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.prefetch, PrefetchReport::default());
  }

  #[tokio::test]
  async fn write_failure_becomes_a_notice() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, b"").unwrap();
    let storage = FileStorage::new(blocker.join("prs.json"));
    let source = FakeSource::new(updated_outcome());
    let result = layer(storage, &source).sync(&plan(), &[]).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.mapping.len(), 2);
    assert_eq!(result.notices.len(), 1);
    assert!(result.notices[0].starts_with("Could not update PR cache"));
  }
}
