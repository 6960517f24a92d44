//! GitHub pull request access: REST/GraphQL client, prefetch and caching.

mod api_types;
mod cache;
mod cached_client;
mod client;
pub mod prefetch;
pub mod source;
pub mod types;

pub use cached_client::CachedGitHubClient;
