//! Plain and JSON printouts of branches joined with their pull requests.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheSource, SyncResult};
use crate::git::Branch;
use crate::github::prefetch::PrefetchReport;
use crate::github::types::{ChecksStatus, PullRequest};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
  source: CacheSource,
  timestamp: Option<DateTime<Utc>>,
  branches: Vec<Row<'a>>,
  /// Pull requests whose head branch is not checked out locally
  #[serde(skip_serializing_if = "Vec::is_empty")]
  remote_only: Vec<&'a PullRequest>,
  notices: &'a [String],
  prefetch: PrefetchReport,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Row<'a> {
  #[serde(flatten)]
  branch: &'a Branch,
  pull_request: Option<&'a PullRequest>,
}

fn remote_only<'a>(branches: &[Branch], result: &'a SyncResult) -> Vec<&'a PullRequest> {
  result
    .mapping
    .values()
    .filter(|pr| !branches.iter().any(|b| b.name == pr.head_ref))
    .collect()
}

pub fn to_json(branches: &[Branch], result: &SyncResult, all: bool) -> serde_json::Result<String> {
  let report = Report {
    source: result.source,
    timestamp: result.timestamp,
    branches: branches
      .iter()
      .map(|branch| Row {
        branch,
        pull_request: result.mapping.get(&branch.name),
      })
      .collect(),
    remote_only: if all {
      remote_only(branches, result)
    } else {
      Vec::new()
    },
    notices: &result.notices,
    prefetch: result.prefetch,
  };
  serde_json::to_string_pretty(&report)
}

fn checks_marker(status: Option<ChecksStatus>) -> &'static str {
  match status {
    Some(ChecksStatus::Success) => " ✓",
    Some(ChecksStatus::Failure) => " ✗",
    Some(ChecksStatus::Pending) => " …",
    Some(ChecksStatus::Unknown) | None => "",
  }
}

fn pr_summary(pr: &PullRequest) -> String {
  format!(
    "#{} {}{} {}",
    pr.number,
    pr.state,
    checks_marker(pr.checks_status),
    pr.title
  )
}

/// One line per branch, `name  #N state title`, padded to the longest name.
pub fn to_text(branches: &[Branch], result: &SyncResult, all: bool) -> String {
  let extra = if all {
    remote_only(branches, result)
  } else {
    Vec::new()
  };
  let width = branches
    .iter()
    .map(|b| b.name.chars().count())
    .chain(extra.iter().map(|pr| pr.head_ref.chars().count()))
    .max()
    .unwrap_or(0);

  let mut out = String::new();
  for branch in branches {
    match result.mapping.get(&branch.name) {
      Some(pr) => out.push_str(&format!("{:width$}  {}\n", branch.name, pr_summary(pr))),
      None => out.push_str(&format!("{}\n", branch.name)),
    }
  }
  for pr in extra {
    out.push_str(&format!("{:width$}  {} (remote)\n", pr.head_ref, pr_summary(pr)));
  }
  out
}
