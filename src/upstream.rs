//! Upstream change detection
//!
//! The cached Material 3 data is derived from two upstream repositories. Their
//! latest commit SHAs, concatenated, form a fingerprint; when the fingerprint
//! moves the cache is considered stale.

use crate::error::Result;
use crate::http::HttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Default GitHub REST API root
pub const GITHUB_API_URL: &str = "https://api.github.com";
/// Environment variable overriding the GitHub API root
pub const ENV_GITHUB_API_URL: &str = "GITHUB_API_URL";

/// A repository branch to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRepo {
    pub owner: String,
    pub name: String,
    pub branch: String,
}

impl UpstreamRepo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            branch: branch.into(),
        }
    }

    /// Material Web component library
    pub fn material_web() -> Self {
        Self::new("material-components", "material-web", "main")
    }

    /// Flutter framework (Material widgets)
    pub fn flutter() -> Self {
        Self::new("flutter", "flutter", "master")
    }

    /// The two repositories the cached data is derived from
    pub fn defaults() -> [UpstreamRepo; 2] {
        [Self::material_web(), Self::flutter()]
    }
}

impl fmt::Display for UpstreamRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.branch)
    }
}

/// Anything that can report the latest revision of a repository branch
#[async_trait]
pub trait RevisionSource: Send + Sync {
    async fn latest_revision(&self, repo: &UpstreamRepo) -> Result<String>;
}

/// GitHub REST implementation: `GET /repos/{owner}/{repo}/commits/{branch}`
pub struct GitHubRevisionSource {
    http: HttpClient,
    api_base: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

impl GitHubRevisionSource {
    pub fn new(http: HttpClient) -> Self {
        Self::with_api_base(http, GITHUB_API_URL)
    }

    /// Point at a different API root (GitHub Enterprise, test servers)
    pub fn with_api_base(http: HttpClient, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// API root from `GITHUB_API_URL`, or the public API
    pub fn from_env(http: HttpClient) -> Self {
        match std::env::var(ENV_GITHUB_API_URL) {
            Ok(base) if !base.trim().is_empty() => Self::with_api_base(http, base.trim()),
            _ => Self::new(http),
        }
    }

    fn commit_url(&self, repo: &UpstreamRepo) -> String {
        format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, repo.owner, repo.name, repo.branch
        )
    }
}

#[async_trait]
impl RevisionSource for GitHubRevisionSource {
    async fn latest_revision(&self, repo: &UpstreamRepo) -> Result<String> {
        let commit: CommitResponse = self.http.get_json(&self.commit_url(repo)).await?;
        debug!("Latest commit on {}: {}", repo, commit.sha);
        Ok(commit.sha)
    }
}

/// Result of one fingerprint comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintOutcome {
    /// A previous fingerprint existed and differs from the current one
    Changed { previous: String, current: String },
    /// Nothing recorded yet, or no difference; `current` should be recorded
    Unchanged { current: String },
}

impl FingerprintOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, FingerprintOutcome::Changed { .. })
    }

    /// The freshly computed fingerprint
    pub fn current(&self) -> &str {
        match self {
            FingerprintOutcome::Changed { current, .. } => current,
            FingerprintOutcome::Unchanged { current } => current,
        }
    }
}

/// Computes and compares the combined upstream fingerprint
#[derive(Clone)]
pub struct FingerprintChecker {
    source: Arc<dyn RevisionSource>,
    repos: Vec<UpstreamRepo>,
}

impl FingerprintChecker {
    /// Watch the default Material Web and Flutter branches
    pub fn new(source: Arc<dyn RevisionSource>) -> Self {
        Self::with_repos(source, UpstreamRepo::defaults().to_vec())
    }

    pub fn with_repos(source: Arc<dyn RevisionSource>, repos: Vec<UpstreamRepo>) -> Self {
        Self { source, repos }
    }

    pub fn repos(&self) -> &[UpstreamRepo] {
        &self.repos
    }

    /// Concatenation of every watched repository's latest revision
    ///
    /// Fails as a whole if any single repository cannot be queried; a partial
    /// fingerprint is never produced.
    pub async fn current_fingerprint(&self) -> Result<String> {
        let mut fingerprint = String::new();
        for repo in &self.repos {
            let revision = self.source.latest_revision(repo).await?;
            fingerprint.push_str(&revision);
        }
        Ok(fingerprint)
    }

    /// Compare the current fingerprint with `previous`
    ///
    /// With no previous fingerprint the outcome is always `Unchanged`.
    pub async fn compare(&self, previous: Option<&str>) -> Result<FingerprintOutcome> {
        let current = self.current_fingerprint().await?;

        match previous {
            Some(previous) if previous != current => {
                info!("Upstream fingerprint changed: {} -> {}", previous, current);
                Ok(FingerprintOutcome::Changed {
                    previous: previous.to_string(),
                    current,
                })
            }
            _ => Ok(FingerprintOutcome::Unchanged { current }),
        }
    }
}
