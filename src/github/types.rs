use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Branch name to pull request, ordered by branch name.
pub type PrMapping = BTreeMap<String, PullRequest>;

/// Pull request state as shown next to a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
  Open,
  Draft,
  Merged,
  Closed,
}

impl PrState {
  pub fn as_str(self) -> &'static str {
    match self {
      PrState::Open => "open",
      PrState::Draft => "draft",
      PrState::Merged => "merged",
      PrState::Closed => "closed",
    }
  }
}

impl fmt::Display for PrState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Combined CI status of the head commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksStatus {
  Pending,
  Success,
  Failure,
  Unknown,
}

impl ChecksStatus {
  /// Map a combined-status `state` string onto the four known values.
  pub fn from_combined_state(state: &str) -> Self {
    match state.to_ascii_lowercase().as_str() {
      "pending" => ChecksStatus::Pending,
      "success" => ChecksStatus::Success,
      "failure" | "error" => ChecksStatus::Failure,
      _ => ChecksStatus::Unknown,
    }
  }
}

/// A pull request keyed by its head branch.
///
/// Detail fields (`labels`, `review_decision`, `review_requests`, `body`) are
/// only present after a detail prefetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
  pub number: u64,
  pub title: String,
  pub state: PrState,
  pub head_ref: String,
  pub base_ref: String,
  #[serde(deserialize_with = "deserialize_timestamp")]
  pub updated_at: DateTime<Utc>,
  pub url: String,
  #[serde(default)]
  pub checks_status: Option<ChecksStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub head_sha: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub labels: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub review_decision: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub review_requests: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}

impl PullRequest {
  /// True when `self` should replace `other` for the same branch.
  ///
  /// Newer `updated_at` wins; on a tie the larger number wins.
  pub fn supersedes(&self, other: &PullRequest) -> bool {
    (self.updated_at, self.number) > (other.updated_at, other.number)
  }

  /// Attach prefetched details, replacing whatever was there before.
  pub fn apply_details(&mut self, details: PrDetails) {
    self.labels = Some(details.labels);
    self.review_decision = details.review_decision;
    self.review_requests = Some(details.review_requests);
    self.body = details.body;
  }
}

/// Accept RFC 3339 strings as well as unix seconds (integer or fractional).
/// Serialization always writes RFC 3339.
pub fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Seconds(i64),
    Fractional(f64),
    Text(DateTime<Utc>),
  }

  let parsed = match Raw::deserialize(deserializer)? {
    Raw::Seconds(secs) => DateTime::from_timestamp(secs, 0),
    Raw::Fractional(value) if value.is_finite() => {
      let secs = value.floor();
      let nanos = ((value - secs) * 1e9) as u32;
      DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
    }
    Raw::Fractional(_) => None,
    Raw::Text(t) => Some(t),
  };
  parsed.ok_or_else(|| de::Error::custom("timestamp out of range"))
}

/// Secondary fields fetched in batches for displayed pull requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrDetails {
  pub labels: Vec<String>,
  pub review_decision: Option<String>,
  pub review_requests: Vec<String>,
  pub body: Option<String>,
}

/// Why a request against the PR data source did not produce data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,

  #[error("rate limited{}", reset_suffix(.reset_at))]
  RateLimited { reset_at: Option<DateTime<Utc>> },

  #[error("unexpected HTTP status {0}")]
  Status(u16),

  #[error("malformed response: {0}")]
  Malformed(String),
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
  reset_at
    .map(|t| format!(" until {}", t.format("%H:%M:%S UTC")))
    .unwrap_or_default()
}

/// Result of one conditional fetch of the open pull request list.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  /// The server confirmed the list is unchanged since the stored ETag
  NotModified,
  /// A full list, with the ETag to send next time
  Updated {
    prs: Vec<PullRequest>,
    etag: Option<String>,
  },
  Failed(FetchFailure),
}
