//! GitHub commit search, used to find patches that mention a CVE

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{IntelRetriever, RetrieverError, base_url, send_checked};
use crate::model::{CveId, PatchCandidate, SourceConfig};

/// Retriever for commits whose message references a CVE
pub struct GitHubCommitRetriever {
    client: Client,
    base_url: String,
    token: Option<String>,
    per_page: usize,
    timeout: std::time::Duration,
    commit_pattern: Regex,
}

#[derive(Debug, Deserialize)]
struct CommitSearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<CommitSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CommitSearchItem {
    sha: String,
    html_url: String,
    commit: CommitInfo,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

impl GitHubCommitRetriever {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            base_url: base_url(&config.github_api_base_url).to_string(),
            token: config.github_token.clone(),
            per_page: config.max_patch_candidates.clamp(1, 100),
            timeout: config.timeout(),
            // Matches: /owner/repo/commit/sha
            commit_pattern: Regex::new(r"/([^/]+)/([^/]+)/commit/([a-fA-F0-9]{7,40})").unwrap(),
        }
    }

    /// Keep well-formed commit links, first occurrence of each SHA wins (forks repeat them)
    fn to_candidates(&self, items: Vec<CommitSearchItem>) -> Vec<PatchCandidate> {
        let mut seen = HashSet::new();

        items
            .into_iter()
            .filter(|item| seen.insert(item.sha.clone()))
            .filter_map(|item| {
                let commit_url = Url::parse(&item.html_url).ok()?;
                if !self.commit_pattern.is_match(commit_url.path()) {
                    tracing::debug!(url = %item.html_url, "Skipping non-commit search result");
                    return None;
                }

                Some(PatchCandidate {
                    repository: item.repository.full_name,
                    commit_url,
                    commit_message: item.commit.message.trim().to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl IntelRetriever for GitHubCommitRetriever {
    type Output = Vec<PatchCandidate>;

    fn source(&self) -> &'static str {
        "github"
    }

    async fn retrieve(&self, cve_id: &CveId) -> Result<Vec<PatchCandidate>, RetrieverError> {
        let url = format!("{}/search/commits", self.base_url);

        tracing::debug!(cve = %cve_id, url = %url, "Searching GitHub commits");

        let mut request = self
            .client
            .get(&url)
            .query(&[
                ("q", cve_id.as_str().to_string()),
                ("per_page", self.per_page.to_string()),
            ])
            .header("Accept", "application/vnd.github+json")
            .timeout(self.timeout);

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = send_checked(request, cve_id.as_str()).await?;

        let body: CommitSearchResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid search response: {}", e)))?;

        let total_count = body.total_count;
        let candidates = self.to_candidates(body.items);

        tracing::debug!(
            cve = %cve_id,
            total_count = total_count,
            candidates = candidates.len(),
            "GitHub commit search completed"
        );

        Ok(candidates)
    }
}
