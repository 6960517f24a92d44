//! Local git collaborators: GitHub repository detection and the bulk branch listing.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// `owner/name` of a GitHub repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
  pub owner: String,
  pub name: String,
}

impl GitHubRepo {
  /// Parse an `owner/name` slug.
  pub fn from_slug(slug: &str) -> Option<Self> {
    let slug = slug.trim().trim_end_matches('/');
    let slug = slug.strip_suffix(".git").unwrap_or(slug);
    let (owner, name) = slug.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
      return None;
    }
    Some(Self {
      owner: owner.to_string(),
      name: name.to_string(),
    })
  }

  /// Parse a github.com remote URL (scp-like ssh, https or ssh:// form).
  pub fn from_remote_url(url: &str) -> Option<Self> {
    const PREFIXES: &[&str] = &[
      "git@github.com:",
      "https://github.com/",
      "ssh://git@github.com/",
    ];
    let url = url.trim();
    PREFIXES
      .iter()
      .find_map(|prefix| url.strip_prefix(prefix))
      .and_then(Self::from_slug)
  }
}

impl fmt::Display for GitHubRepo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

/// A local branch as reported by `git for-each-ref`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
  pub name: String,
  pub last_commit_sha: String,
  pub last_commit_date: Option<DateTime<Utc>>,
  pub upstream: Option<String>,
}

async fn git(dir: &Path, args: &[&str]) -> Result<String> {
  let output = Command::new("git")
    .args(args)
    .current_dir(dir)
    .output()
    .await
    .map_err(|e| eyre!("Failed to run git {}: {}", args.join(" "), e))?;

  if !output.status.success() {
    return Err(eyre!(
      "git {} failed: {}",
      args.join(" "),
      String::from_utf8_lossy(&output.stderr).trim()
    ));
  }

  Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pick the remote to read pull requests from.
///
/// `upstream` is preferred over `origin`, then any other remote, skipping
/// remotes that do not point at github.com.
pub async fn detect_github_repo(dir: &Path) -> Result<Option<GitHubRepo>> {
  let remotes = git(dir, &["remote"]).await?;
  let mut names: Vec<&str> = remotes.lines().map(str::trim).filter(|r| !r.is_empty()).collect();
  names.sort_by_key(|name| match *name {
    "upstream" => 0,
    "origin" => 1,
    _ => 2,
  });

  for name in names {
    let url = match git(dir, &["remote", "get-url", name]).await {
      Ok(url) => url,
      Err(e) => {
        debug!(remote = name, error = %e, "skipping remote");
        continue;
      }
    };
    if let Some(repo) = GitHubRepo::from_remote_url(&url) {
      debug!(remote = name, %repo, "detected GitHub repository");
      return Ok(Some(repo));
    }
  }

  Ok(None)
}

const BRANCH_FORMAT: &str =
  "%(refname:short)%00%(objectname)%00%(committerdate:iso-strict)%00%(upstream:short)";

/// List local branches, most recently committed first.
pub async fn list_branches(dir: &Path) -> Result<Vec<Branch>> {
  let format = format!("--format={}", BRANCH_FORMAT);
  let output = git(
    dir,
    &["for-each-ref", "--sort=-committerdate", format.as_str(), "refs/heads"],
  )
  .await?;

  Ok(output.lines().filter_map(parse_branch_line).collect())
}

fn parse_branch_line(line: &str) -> Option<Branch> {
  let mut fields = line.split('\0');
  let name = fields.next()?.trim();
  if name.is_empty() {
    return None;
  }
  let sha = fields.next().unwrap_or_default();
  let date = fields
    .next()
    .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
    .map(|d| d.with_timezone(&Utc));
  let upstream = fields
    .next()
    .map(str::trim)
    .filter(|u| !u.is_empty())
    .map(String::from);

  Some(Branch {
    name: name.to_string(),
    last_commit_sha: sha.to_string(),
    last_commit_date: date,
    upstream,
  })
}
