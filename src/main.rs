mod cache;
mod config;
mod git;
mod github;
mod report;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use cache::{Directives, SyncResult};
use git::GitHubRepo;
use github::CachedGitHubClient;

#[derive(Parser, Debug)]
#[command(name = "git-branches")]
#[command(about = "Local git branches with their GitHub pull requests, cached")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/git-branches/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// GitHub repository as owner/name (default: detected from git remotes)
  #[arg(short, long)]
  repo: Option<String>,

  /// Serve cached data only, never touch the network
  #[arg(long)]
  offline: bool,

  /// Neither read nor write the PR cache
  #[arg(long)]
  no_cache: bool,

  /// Ignore the stored ETag and cache TTL
  #[arg(long)]
  refresh: bool,

  /// Offline, without detail prefetch
  #[arg(long)]
  fast: bool,

  /// Fetch labels, review state and body for listed pull requests
  #[arg(long)]
  prefetch_details: bool,

  /// Fetch combined CI status for listed pull requests
  #[arg(long)]
  checks: bool,

  /// Print JSON instead of plain lines
  #[arg(long)]
  json: bool,

  /// Also list pull requests whose branch is not checked out
  #[arg(short, long)]
  all: bool,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,
}

impl Args {
  fn directives(&self) -> Directives {
    Directives {
      offline: self.offline,
      no_cache: self.no_cache,
      refresh: self.refresh,
      fast: self.fast,
      prefetch_details: self.prefetch_details,
      show_checks: self.checks,
    }
  }
}

/// Set up logging. The returned guard flushes the log file on drop.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::WARN.into())
    .with_env_var("GIT_BRANCHES_LOG")
    .from_env_lossy();

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .compact()
      .init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Ok(Some(guard))
}

async fn resolve_repo(config: &config::Config, dir: &Path) -> Result<Option<GitHubRepo>> {
  if let Some(slug) = &config.github.repo {
    return GitHubRepo::from_slug(slug)
      .map(Some)
      .ok_or_else(|| eyre!("Invalid repository '{}', expected owner/name", slug));
  }
  git::detect_github_repo(dir).await
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(repo) = &args.repo {
    config.github.repo = Some(repo.clone());
  }

  let plan = Directives::from_env().or(args.directives()).plan();
  debug!(?plan, "resolved directives");

  let cwd = std::env::current_dir()?;
  let branches = match git::list_branches(&cwd).await {
    Ok(branches) => branches,
    Err(e) => {
      warn!(error = %e, "could not list local branches");
      Vec::new()
    }
  };

  let result = match resolve_repo(&config, &cwd).await {
    Ok(Some(repo)) => {
      let client = CachedGitHubClient::new(&config, repo, &plan).await?;
      client.pull_requests(&plan, &branches).await
    }
    Ok(None) => SyncResult::unavailable("no GitHub remote found; pull requests unavailable"),
    Err(e) => {
      warn!(error = %e, "could not determine GitHub repository");
      SyncResult::unavailable(format!("could not determine GitHub repository: {e}"))
    }
  };

  if args.json {
    println!("{}", report::to_json(&branches, &result, args.all)?);
  } else {
    for notice in &result.notices {
      eprintln!("{}", notice);
    }
    print!("{}", report::to_text(&branches, &result, args.all));
  }

  Ok(())
}
