//! Batched detail and check-status prefetch for the displayed pull requests.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::source::PrSource;
use super::types::{ChecksStatus, PrDetails, PrMapping};
use crate::config::PrefetchConfig;

/// Counters describing what a prefetch pass achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
  /// Pull requests that received detail fields
  pub enriched: usize,
  /// Pull requests that received a checks status
  pub checks: usize,
  /// Requested items left as they were because a request failed
  pub skipped: usize,
}

pub struct Prefetcher {
  branch_limit: usize,
  chunk_size: usize,
  concurrency: usize,
}

impl Prefetcher {
  pub fn new(config: &PrefetchConfig) -> Self {
    Self {
      branch_limit: config.branch_limit,
      chunk_size: config.chunk_size.max(1),
      concurrency: config.concurrency.max(1),
    }
  }

  /// Branch names whose pull requests get enriched.
  ///
  /// With a branch list, the first `branch_limit` branches that have a pull
  /// request, in list order. Without one, the most recently updated.
  pub fn working_set(&self, mapping: &PrMapping, branches: &[String]) -> Vec<String> {
    if branches.is_empty() {
      let mut recent: Vec<_> = mapping.values().collect();
      recent.sort_by(|a, b| (b.updated_at, b.number).cmp(&(a.updated_at, a.number)));
      return recent
        .into_iter()
        .take(self.branch_limit)
        .map(|pr| pr.head_ref.clone())
        .collect();
    }

    branches
      .iter()
      .filter(|b| mapping.contains_key(b.as_str()))
      .take(self.branch_limit)
      .cloned()
      .collect()
  }

  /// Enrich the working set in place. Failed requests leave their pull
  /// requests untouched; a pass never fails as a whole.
  pub async fn run<P: PrSource>(
    &self,
    source: &P,
    mapping: &mut PrMapping,
    branches: &[String],
    details: bool,
    checks: bool,
  ) -> PrefetchReport {
    let targets = self.working_set(mapping, branches);
    let mut report = PrefetchReport::default();
    if targets.is_empty() {
      return report;
    }

    if details {
      let numbers: Vec<u64> = targets.iter().map(|b| mapping[b].number).collect();
      let (found, skipped) = self.fetch_details(source, numbers).await;
      report.skipped += skipped;
      for branch in &targets {
        if let Some(pr) = mapping.get_mut(branch) {
          if let Some(d) = found.get(&pr.number) {
            pr.apply_details(d.clone());
            report.enriched += 1;
          }
        }
      }
    }

    if checks {
      let shas: Vec<(String, String)> = targets
        .iter()
        .filter_map(|b| {
          let sha = mapping[b].head_sha.clone()?;
          Some((b.clone(), sha))
        })
        .collect();
      let (statuses, skipped) = self.fetch_checks(source, shas).await;
      report.skipped += skipped;
      for (branch, status) in statuses {
        if let Some(pr) = mapping.get_mut(&branch) {
          pr.checks_status = Some(status);
          report.checks += 1;
        }
      }
    }

    debug!(
      enriched = report.enriched,
      checks = report.checks,
      skipped = report.skipped,
      "prefetch finished"
    );
    report
  }

  async fn fetch_details<P: PrSource>(
    &self,
    source: &P,
    numbers: Vec<u64>,
  ) -> (HashMap<u64, PrDetails>, usize) {
    let chunks: Vec<Vec<u64>> = numbers.chunks(self.chunk_size).map(<[u64]>::to_vec).collect();
    let results: Vec<_> = stream::iter(chunks)
      .map(|chunk| async move {
        let len = chunk.len();
        (len, source.fetch_details(chunk).await)
      })
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    let mut found = HashMap::new();
    let mut skipped = 0;
    for (len, result) in results {
      match result {
        Ok(details) => {
          skipped += len.saturating_sub(details.len());
          found.extend(details);
        }
        Err(e) => {
          warn!(error = %e, count = len, "detail prefetch chunk failed");
          skipped += len;
        }
      }
    }
    (found, skipped)
  }

  async fn fetch_checks<P: PrSource>(
    &self,
    source: &P,
    shas: Vec<(String, String)>,
  ) -> (Vec<(String, ChecksStatus)>, usize) {
    let results: Vec<_> = stream::iter(shas)
      .map(|(branch, sha)| async move { (branch, source.combined_status(sha).await) })
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    let mut statuses = Vec::new();
    let mut skipped = 0;
    for (branch, result) in results {
      match result {
        Ok(status) => statuses.push((branch, status)),
        Err(e) => {
          debug!(branch = %branch, error = %e, "check status unavailable");
          skipped += 1;
        }
      }
    }
    (statuses, skipped)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::github::types::fixtures::{at, pr};
  use crate::github::types::{FetchFailure, FetchOutcome, PrState, PullRequest};
  use std::sync::Mutex;

  /// Serves details for every number except those in `missing`; chunks that
  /// contain a number in `failing` fail as a whole.
  #[derive(Default)]
  struct DetailSource {
    missing: Vec<u64>,
    failing: Vec<u64>,
    chunks: Mutex<Vec<Vec<u64>>>,
  }

  impl PrSource for DetailSource {
    async fn list_open(&self, _etag: Option<String>) -> FetchOutcome {
      FetchOutcome::NotModified
    }

    async fn list_recent_closed(&self, _limit: usize) -> Result<Vec<PullRequest>, FetchFailure> {
      Ok(Vec::new())
    }

    async fn fetch_details(&self, numbers: Vec<u64>) -> Result<HashMap<u64, PrDetails>, FetchFailure> {
      self.chunks.lock().unwrap().push(numbers.clone());
      if numbers.iter().any(|n| self.failing.contains(n)) {
        return Err(FetchFailure::Status(502));
      }
      Ok(
        numbers
          .into_iter()
          .filter(|n| !self.missing.contains(n))
          .map(|n| {
            let details = PrDetails {
              labels: vec![format!("label-{n}")],
              review_decision: Some("APPROVED".to_string()),
              review_requests: Vec::new(),
              body: Some(format!("body {n}")),
            };
            (n, details)
          })
          .collect(),
      )
    }

    async fn combined_status(&self, sha: String) -> Result<ChecksStatus, FetchFailure> {
      if sha == "sha2" {
        Err(FetchFailure::Timeout)
      } else {
        Ok(ChecksStatus::Success)
      }
    }
  }

  fn mapping(count: u64) -> PrMapping {
    (1..=count)
      .map(|n| {
        let p = pr(n, &format!("b{n}"), PrState::Open, at(n as u32));
        (p.head_ref.clone(), p)
      })
      .collect()
  }

  fn prefetcher(branch_limit: usize, chunk_size: usize) -> Prefetcher {
    Prefetcher::new(&PrefetchConfig {
      branch_limit,
      chunk_size,
      concurrency: 2,
    })
  }

  #[test]
  fn working_set_follows_branch_order_and_limit() {
    let mapping = mapping(5);
    let branches: Vec<String> = ["b4", "main", "b1", "b3", "b2"].iter().map(|s| s.to_string()).collect();
    assert_eq!(prefetcher(2, 20).working_set(&mapping, &branches), vec!["b4", "b1"]);
  }

  #[test]
  fn working_set_without_branches_uses_recency() {
    let mapping = mapping(5);
    assert_eq!(prefetcher(3, 20).working_set(&mapping, &[]), vec!["b5", "b4", "b3"]);
  }

  #[tokio::test]
  async fn details_are_chunked() {
    let source = DetailSource::default();
    let mut mapping = mapping(5);
    let report = prefetcher(50, 2).run(&source, &mut mapping, &[], true, false).await;

    assert_eq!(report.enriched, 5);
    assert_eq!(report.skipped, 0);
    let mut sizes: Vec<usize> = source.chunks.lock().unwrap().iter().map(Vec::len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2, 2]);
    assert_eq!(mapping["b3"].body.as_deref(), Some("body 3"));
    assert_eq!(mapping["b3"].labels, Some(vec!["label-3".to_string()]));
  }

  #[tokio::test]
  async fn partial_failure_keeps_base_fields() {
    let source = DetailSource {
      missing: vec![4],
      failing: vec![1],
      ..DetailSource::default()
    };
    let mut mapping = mapping(4);
    let before = mapping.clone();
    let report = prefetcher(50, 2).run(&source, &mut mapping, &[], true, false).await;

    // Chunks are [4, 3] and [2, 1]; the second fails, 4 is unknown upstream
    assert_eq!(report.enriched, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(mapping["b3"].body.as_deref(), Some("body 3"));
    for branch in ["b1", "b2", "b4"] {
      assert_eq!(mapping[branch], before[branch]);
    }
  }

  #[tokio::test]
  async fn checks_status_is_attached() {
    let source = DetailSource::default();
    let mut mapping = mapping(3);
    mapping.get_mut("b3").unwrap().head_sha = None;
    let report = prefetcher(50, 20).run(&source, &mut mapping, &[], false, true).await;

    assert_eq!(report.checks, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(mapping["b1"].checks_status, Some(ChecksStatus::Success));
    assert_eq!(mapping["b2"].checks_status, None);
    assert_eq!(mapping["b3"].checks_status, None);
    assert!(source.chunks.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn prefetch_is_idempotent() {
    let source = DetailSource::default();
    let mut mapping = mapping(3);
    let prefetcher = prefetcher(50, 20);
    prefetcher.run(&source, &mut mapping, &[], true, true).await;
    let once = mapping.clone();
    prefetcher.run(&source, &mut mapping, &[], true, true).await;
    assert_eq!(mapping, once);
  }
}
