//! Retrievers for the upstream vulnerability intelligence sources
//!
//! Every retriever is best-effort: errors are logged and turned into an absent
//! value by [`fetch_or_absent`], so a missing signal never aborts the pipeline.

mod epss;
mod github_commit;
mod kev;
mod nvd;
mod redhat;

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::model::CveId;

pub use epss::EpssRetriever;
pub use github_commit::GitHubCommitRetriever;
pub use kev::KevRetriever;
pub use nvd::NvdRetriever;
pub use redhat::RedHatRetriever;

const USER_AGENT: &str = "cve-triage/0.1";

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A single upstream source queried by CVE identifier
#[async_trait]
pub trait IntelRetriever: Send + Sync {
    type Output: Send;

    /// Short name used in logs
    fn source(&self) -> &'static str;

    /// Fetch the source's data for a CVE
    async fn retrieve(&self, cve_id: &CveId) -> Result<Self::Output, RetrieverError>;
}

/// Run a retriever and degrade any failure to `None`
pub async fn fetch_or_absent<R>(retriever: &R, cve_id: &CveId) -> Option<R::Output>
where
    R: IntelRetriever + ?Sized,
{
    let start_time = Instant::now();

    match retriever.retrieve(cve_id).await {
        Ok(output) => {
            tracing::debug!(
                cve = %cve_id,
                source = retriever.source(),
                elapsed_ms = start_time.elapsed().as_millis(),
                "Retrieved intel"
            );
            Some(output)
        }
        Err(RetrieverError::NotFound(what)) => {
            tracing::info!(cve = %cve_id, source = retriever.source(), what = %what, "No data found");
            None
        }
        Err(e) => {
            tracing::warn!(
                cve = %cve_id,
                source = retriever.source(),
                elapsed_ms = start_time.elapsed().as_millis(),
                error = %e,
                "Retriever failed, treating as not found"
            );
            None
        }
    }
}

/// Send a request and map the common failure statuses
async fn send_checked(request: RequestBuilder, what: &str) -> Result<Response, RetrieverError> {
    let response = request.header("User-Agent", USER_AGENT).send().await?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        return Err(RetrieverError::NotFound(what.to_string()));
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
        tracing::warn!(what = %what, status = %status, "Upstream rate limited");
        return Err(RetrieverError::RateLimited);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RetrieverError::ParseError(format!(
            "Unexpected status {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    Ok(response)
}

/// Parse upstream timestamps: RFC 3339, or NVD's offset-less UTC form
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Reject CVSS base scores outside 0.0..=10.0, NaN included
fn check_base_score(score: f64) -> Result<f64, RetrieverError> {
    if (0.0..=10.0).contains(&score) {
        Ok(score)
    } else {
        Err(RetrieverError::ParseError(format!(
            "CVSS base score out of range: {}",
            score
        )))
    }
}

/// Trim a trailing slash so paths can be appended with `format!`
fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
