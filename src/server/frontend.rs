//! The external *frontend* collaborator (spec §6 "Frontend HTTP contract
//! (consumed)"): assigns repositories to this indexer, hands back per-repo
//! index options, and serves archive-path tar fetches. Modeled as an async
//! trait so tests substitute an in-memory fake, exactly as spec §6 asks
//! ("modeled as an async trait... so tests can substitute an in-memory
//! fake"); the `reqwest`-backed implementation reuses the teacher's existing
//! `reqwest` dependency (already pulled in for its semantic client).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::repo::types::BranchVersion;

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("frontend unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("frontend returned HTTP {status}")]
    Http { status: u16 },
    #[error("failed to decode frontend response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Per-repository options as returned by `search/configuration` (spec §6).
/// `error`, when non-empty, must be surfaced without aborting the rest of
/// the batch — callers inspect it before trusting the other fields.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoConfigEntry {
    pub symbols: bool,
    pub large_files: Vec<String>,
    pub branches: Vec<BranchVersion>,
    pub repo_id: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Serialize)]
struct RepoIndexRequest<'a> {
    hostname: &'a str,
    indexed: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RepoIndexResponse {
    repo_names: Vec<String>,
}

#[async_trait::async_trait]
pub trait Frontend: Send + Sync {
    /// `POST /.internal/ping?service=gitserver` — liveness check.
    async fn ping(&self) -> Result<(), FrontendError>;

    /// `POST /.internal/repos/index` — repositories assigned to `hostname`.
    async fn assigned_repos(&self, hostname: &str, indexed: &[String]) -> Result<Vec<String>, FrontendError>;

    /// `GET /.internal/search/configuration?repo=<name>...` — per-repo
    /// options, in the same order as `repos`.
    async fn search_configuration(&self, repos: &[String]) -> Result<Vec<RepoConfigEntry>, FrontendError>;

    /// `GET /.internal/git/<repo>/tar/<commit>` — archive code path.
    async fn fetch_tar(&self, repo: &str, commit: &str) -> Result<Vec<u8>, FrontendError>;
}

pub struct ReqwestFrontend {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestFrontend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl Frontend for ReqwestFrontend {
    async fn ping(&self) -> Result<(), FrontendError> {
        let response = self
            .client
            .post(format!("{}/.internal/ping", self.base_url))
            .query(&[("service", "gitserver")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FrontendError::Http {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn assigned_repos(&self, hostname: &str, indexed: &[String]) -> Result<Vec<String>, FrontendError> {
        let response = self
            .client
            .post(format!("{}/.internal/repos/index", self.base_url))
            .json(&RepoIndexRequest { hostname, indexed })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FrontendError::Http {
                status: response.status().as_u16(),
            });
        }
        let body: RepoIndexResponse = response.json().await?;
        Ok(body.repo_names)
    }

    async fn search_configuration(&self, repos: &[String]) -> Result<Vec<RepoConfigEntry>, FrontendError> {
        let query: Vec<(&str, &str)> = repos.iter().map(|r| ("repo", r.as_str())).collect();
        let response = self
            .client
            .get(format!("{}/.internal/search/configuration", self.base_url))
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FrontendError::Http {
                status: response.status().as_u16(),
            });
        }
        let entries: Vec<RepoConfigEntry> = response.json().await?;
        Ok(entries)
    }

    async fn fetch_tar(&self, repo: &str, commit: &str) -> Result<Vec<u8>, FrontendError> {
        let response = self
            .client
            .get(format!("{}/.internal/git/{repo}/tar/{commit}", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FrontendError::Http {
                status: response.status().as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// In-memory fake for tests: fixed responses, no network.
#[derive(Default)]
pub struct FakeFrontend {
    pub assigned: Vec<String>,
    pub configs: HashMap<String, RepoConfigEntry>,
    pub tarballs: HashMap<String, Vec<u8>>,
    pub ping_fails: bool,
}

#[async_trait::async_trait]
impl Frontend for FakeFrontend {
    async fn ping(&self) -> Result<(), FrontendError> {
        if self.ping_fails {
            return Err(FrontendError::Http { status: 503 });
        }
        Ok(())
    }

    async fn assigned_repos(&self, _hostname: &str, _indexed: &[String]) -> Result<Vec<String>, FrontendError> {
        Ok(self.assigned.clone())
    }

    async fn search_configuration(&self, repos: &[String]) -> Result<Vec<RepoConfigEntry>, FrontendError> {
        Ok(repos
            .iter()
            .map(|r| self.configs.get(r).cloned().unwrap_or_default())
            .collect())
    }

    async fn fetch_tar(&self, repo: &str, _commit: &str) -> Result<Vec<u8>, FrontendError> {
        self.tarballs
            .get(repo)
            .cloned()
            .ok_or(FrontendError::Http { status: 404 })
    }
}
