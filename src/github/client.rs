use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

use crate::config::GitHubConfig;
use crate::git::GitHubRepo;
use crate::github::api_types::{ApiCombinedStatus, ApiGraphqlResponse, ApiPullRequest};
use crate::github::source::PrSource;
use crate::github::types::{ChecksStatus, FetchFailure, FetchOutcome, PrDetails, PullRequest};

/// Page size for pull request listings (the API maximum)
const PAGE_SIZE: usize = 100;
/// Upper bound on pages followed for the open listing
const MAX_PAGES: usize = 10;

/// GitHub API client for one repository
#[derive(Clone)]
pub struct GitHubClient {
  http: reqwest::Client,
  api_url: Url,
  graphql_url: Url,
  repo: GitHubRepo,
}

impl GitHubClient {
  pub fn new(config: &GitHubConfig, repo: GitHubRepo, token: Option<String>) -> Result<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::ACCEPT,
      HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
      "x-github-api-version",
      HeaderValue::from_static("2022-11-28"),
    );
    if let Some(token) = token {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| eyre!("GitHub token contains invalid characters"))?;
      value.set_sensitive(true);
      headers.insert(header::AUTHORIZATION, value);
    }

    let http = reqwest::Client::builder()
      .user_agent(concat!("git-branches/", env!("CARGO_PKG_VERSION")))
      .default_headers(headers)
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let mut api_url = Url::parse(&config.api_url)
      .map_err(|e| eyre!("Invalid github.api_url '{}': {}", config.api_url, e))?;
    // Relative joins drop the last path segment unless it ends with a slash
    if !api_url.path().ends_with('/') {
      api_url.set_path(&format!("{}/", api_url.path()));
    }
    let graphql_url = Url::parse(&config.graphql_url)
      .map_err(|e| eyre!("Invalid github.graphql_url '{}': {}", config.graphql_url, e))?;

    Ok(Self {
      http,
      api_url,
      graphql_url,
      repo,
    })
  }

  fn repo_url(&self, path: &str) -> Result<Url, FetchFailure> {
    self
      .api_url
      .join(&format!("repos/{}/{}/{}", self.repo.owner, self.repo.name, path))
      .map_err(|e| FetchFailure::Network(format!("invalid URL: {}", e)))
  }

  fn pulls_url(&self, state: &str, per_page: usize) -> Result<Url, FetchFailure> {
    let mut url = self.repo_url("pulls")?;
    url
      .query_pairs_mut()
      .append_pair("state", state)
      .append_pair("sort", "updated")
      .append_pair("direction", "desc")
      .append_pair("per_page", &per_page.to_string())
      .append_pair("page", "1");
    Ok(url)
  }

  /// Fetch every page of open pull requests. `None` means 304 Not Modified.
  async fn open_pages(
    &self,
    etag: Option<String>,
  ) -> Result<Option<(Vec<PullRequest>, Option<String>)>, FetchFailure> {
    let mut request = self.http.get(self.pulls_url("open", PAGE_SIZE)?);
    if let Some(tag) = &etag {
      request = request.header(header::IF_NONE_MATCH, tag.as_str());
    }

    let response = send(request).await?;
    if response.status() == StatusCode::NOT_MODIFIED {
      return Ok(None);
    }
    check_status(&response)?;

    let new_etag = response
      .headers()
      .get(header::ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let mut next = next_page(response.headers());
    let mut prs = decode_pulls(response).await?;

    let mut pages = 1;
    while let Some(url) = next.take() {
      if pages >= MAX_PAGES {
        warn!(pages, "open pull request listing truncated");
        break;
      }
      let response = send(self.http.get(url)).await?;
      check_status(&response)?;
      next = next_page(response.headers());
      prs.extend(decode_pulls(response).await?);
      pages += 1;
    }

    // Pages are fetched in order but may shift while paging
    prs.sort_by(|a, b| (b.updated_at, b.number).cmp(&(a.updated_at, a.number)));
    let mut seen = HashSet::new();
    prs.retain(|pr| seen.insert(pr.number));

    Ok(Some((prs, new_etag)))
  }
}

impl PrSource for GitHubClient {
  async fn list_open(&self, etag: Option<String>) -> FetchOutcome {
    match self.open_pages(etag).await {
      Ok(None) => {
        debug!(repo = %self.repo, "open pull requests not modified");
        FetchOutcome::NotModified
      }
      Ok(Some((prs, etag))) => {
        debug!(repo = %self.repo, count = prs.len(), "fetched open pull requests");
        FetchOutcome::Updated { prs, etag }
      }
      Err(failure) => FetchOutcome::Failed(failure),
    }
  }

  async fn list_recent_closed(&self, limit: usize) -> Result<Vec<PullRequest>, FetchFailure> {
    let url = self.pulls_url("closed", limit.clamp(1, PAGE_SIZE))?;
    let response = send(self.http.get(url)).await?;
    check_status(&response)?;
    let mut prs = decode_pulls(response).await?;
    prs.truncate(limit);
    Ok(prs)
  }

  async fn fetch_details(&self, numbers: Vec<u64>) -> Result<HashMap<u64, PrDetails>, FetchFailure> {
    if numbers.is_empty() {
      return Ok(HashMap::new());
    }
    let body = serde_json::json!({
      "query": details_query(&numbers),
      "variables": { "owner": self.repo.owner, "repo": self.repo.name },
    });

    let response = send(self.http.post(self.graphql_url.clone()).json(&body)).await?;
    check_status(&response)?;
    let resp: ApiGraphqlResponse = decode(response).await?;

    for error in &resp.errors {
      debug!(message = %error.message, "GraphQL error in detail batch");
    }
    let repository = match resp.data.and_then(|d| d.repository) {
      Some(repository) => repository,
      None => {
        let message = resp
          .errors
          .into_iter()
          .next()
          .map(|e| e.message)
          .unwrap_or_else(|| "missing repository data".to_string());
        return Err(FetchFailure::Malformed(message));
      }
    };

    Ok(
      repository
        .into_values()
        .flatten()
        .map(|pr| (pr.number, PrDetails::from(pr)))
        .collect(),
    )
  }

  async fn combined_status(&self, sha: String) -> Result<ChecksStatus, FetchFailure> {
    let url = self.repo_url(&format!("commits/{}/status", sha))?;
    let response = send(self.http.get(url)).await?;
    check_status(&response)?;
    let status: ApiCombinedStatus = decode(response).await?;
    Ok(status.checks_status())
  }
}

/// Aliased GraphQL query resolving several pull requests in one round trip.
fn details_query(numbers: &[u64]) -> String {
  let aliases: Vec<String> = numbers
    .iter()
    .enumerate()
    .map(|(idx, number)| format!("    pr{}: pullRequest(number: {}) {{ ...details }}", idx, number))
    .collect();

  format!(
    "query PullRequestDetails($owner: String!, $repo: String!) {{\n  \
     repository(owner: $owner, name: $repo) {{\n{}\n  }}\n}}\n\n\
     fragment details on PullRequest {{\n  \
     number\n  body\n  reviewDecision\n  \
     labels(first: 10) {{ nodes {{ name }} }}\n  \
     reviewRequests(first: 10) {{ nodes {{ requestedReviewer {{ \
     ... on User {{ login }} ... on Team {{ name }} }} }} }}\n}}\n",
    aliases.join("\n")
  )
}

async fn send(request: RequestBuilder) -> Result<Response, FetchFailure> {
  request.send().await.map_err(|e| {
    if e.is_timeout() {
      FetchFailure::Timeout
    } else {
      FetchFailure::Network(e.to_string())
    }
  })
}

/// Classify non-success responses, separating rate limiting from other errors.
fn check_status(response: &Response) -> Result<(), FetchFailure> {
  let status = response.status();
  if status.is_success() {
    return Ok(());
  }

  let headers = response.headers();
  let exhausted = headers
    .get("x-ratelimit-remaining")
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.trim() == "0");
  let retry_after = headers.contains_key(header::RETRY_AFTER);
  let limited_status =
    status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS;

  if limited_status && (exhausted || retry_after || status == StatusCode::TOO_MANY_REQUESTS) {
    let reset_at = headers
      .get("x-ratelimit-reset")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse::<i64>().ok())
      .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    return Err(FetchFailure::RateLimited { reset_at });
  }

  Err(FetchFailure::Status(status.as_u16()))
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<Url> {
  let link = headers.get(header::LINK)?.to_str().ok()?;
  link.split(',').find_map(|part| {
    let (target, params) = part.split_once(';')?;
    let is_next = params
      .split(';')
      .any(|p| p.trim().eq_ignore_ascii_case("rel=\"next\""));
    if !is_next {
      return None;
    }
    let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
    Url::parse(target).ok()
  })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, FetchFailure> {
  let bytes = response.bytes().await.map_err(|e| {
    if e.is_timeout() {
      FetchFailure::Timeout
    } else {
      FetchFailure::Network(e.to_string())
    }
  })?;
  serde_json::from_slice(&bytes).map_err(|e| FetchFailure::Malformed(e.to_string()))
}

async fn decode_pulls(response: Response) -> Result<Vec<PullRequest>, FetchFailure> {
  let api: Vec<ApiPullRequest> = decode(response).await?;
  Ok(api.into_iter().filter_map(ApiPullRequest::into_domain).collect())
}
