//! Serde-deserializable types matching GitHub API responses.
//!
//! These types are separate from domain types so that the loosely-typed
//! payloads are validated once, here, and everything past this module works
//! with [`PullRequest`] and [`PrDetails`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::types::{ChecksStatus, PrDetails, PrState, PullRequest};

// ============================================================================
// REST: pulls listing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiBranchRef {
  #[serde(rename = "ref")]
  pub ref_name: String,
  #[serde(default)]
  pub sha: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiPullRequest {
  pub number: u64,
  #[serde(default)]
  pub title: String,
  pub state: String,
  #[serde(default)]
  pub draft: bool,
  #[serde(default)]
  pub merged_at: Option<DateTime<Utc>>,
  pub html_url: String,
  pub updated_at: DateTime<Utc>,
  pub head: ApiBranchRef,
  pub base: ApiBranchRef,
  #[serde(default)]
  pub user: Option<ApiUser>,
}

// ============================================================================
// REST: combined commit status
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCombinedStatus {
  pub state: String,
  #[serde(default)]
  pub total_count: u64,
}

// ============================================================================
// GraphQL: batched pull request details
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiGraphqlResponse {
  #[serde(default)]
  pub data: Option<ApiGraphqlData>,
  #[serde(default)]
  pub errors: Vec<ApiGraphqlError>,
}

#[derive(Debug, Deserialize)]
pub struct ApiGraphqlData {
  /// Aliased `pullRequest` lookups; an alias is null when that lookup failed
  #[serde(default)]
  pub repository: Option<HashMap<String, Option<ApiPrDetails>>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiGraphqlError {
  #[serde(default)]
  pub message: String,
}

/// GraphQL connection page. The derived `T: Default` bound from the field
/// default is replaced, since node types have no default.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiNodes<T> {
  #[serde(default)]
  pub nodes: Vec<Option<T>>,
}

impl<T> Default for ApiNodes<T> {
  fn default() -> Self {
    Self { nodes: Vec::new() }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiReviewer {
  #[serde(default)]
  pub login: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReviewRequest {
  #[serde(default)]
  pub requested_reviewer: Option<ApiReviewer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPrDetails {
  pub number: u64,
  #[serde(default)]
  pub body: Option<String>,
  #[serde(default)]
  pub review_decision: Option<String>,
  #[serde(default)]
  pub labels: ApiNodes<ApiLabel>,
  #[serde(default)]
  pub review_requests: ApiNodes<ApiReviewRequest>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl ApiPullRequest {
  /// Convert into the domain shape. Returns `None` for pull requests without
  /// a head branch name, which cannot be joined to a local branch.
  pub fn into_domain(self) -> Option<PullRequest> {
    if self.head.ref_name.trim().is_empty() {
      return None;
    }
    let state = match (self.state.as_str(), self.merged_at.is_some(), self.draft) {
      ("open", _, true) => PrState::Draft,
      ("open", _, false) => PrState::Open,
      (_, true, _) => PrState::Merged,
      _ => PrState::Closed,
    };
    Some(PullRequest {
      number: self.number,
      title: self.title,
      state,
      head_ref: self.head.ref_name,
      base_ref: self.base.ref_name,
      updated_at: self.updated_at,
      url: self.html_url,
      checks_status: None,
      head_sha: self.head.sha.filter(|s| !s.is_empty()),
      author: self.user.map(|u| u.login),
      labels: None,
      review_decision: None,
      review_requests: None,
      body: None,
    })
  }
}

impl ApiCombinedStatus {
  pub fn checks_status(&self) -> ChecksStatus {
    // A commit without any status contexts reports "pending"
    if self.total_count == 0 {
      return ChecksStatus::Unknown;
    }
    ChecksStatus::from_combined_state(&self.state)
  }
}

impl From<ApiPrDetails> for PrDetails {
  fn from(api: ApiPrDetails) -> Self {
    PrDetails {
      labels: api
        .labels
        .nodes
        .into_iter()
        .flatten()
        .map(|l| l.name)
        .collect(),
      review_decision: api.review_decision,
      review_requests: api
        .review_requests
        .nodes
        .into_iter()
        .flatten()
        .filter_map(|r| r.requested_reviewer)
        .filter_map(|r| r.login.or(r.name))
        .collect(),
      body: api.body.filter(|b| !b.is_empty()),
    }
  }
}
