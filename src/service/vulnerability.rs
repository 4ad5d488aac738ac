//! Vulnerability intelligence collection
//!
//! Queries every upstream source once, one after another, and folds the
//! results into a [`VulnerabilityRecord`]. A source that fails leaves its
//! fields empty.

use std::time::Instant;

use reqwest::Client;

use crate::model::{CveId, SourceConfig, VulnerabilityRecord};
use crate::retriever::{
    EpssRetriever, GitHubCommitRetriever, KevRetriever, NvdRetriever, RedHatRetriever,
    fetch_or_absent,
};

/// Service that assembles a vulnerability record from all sources
pub struct VulnerabilityService {
    kev: KevRetriever,
    epss: EpssRetriever,
    nvd: NvdRetriever,
    redhat: RedHatRetriever,
    github: GitHubCommitRetriever,
}

impl VulnerabilityService {
    /// Creates the retrievers, sharing one HTTP client
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            kev: KevRetriever::new(client.clone(), config),
            epss: EpssRetriever::new(client.clone(), config),
            nvd: NvdRetriever::new(client.clone(), config),
            redhat: RedHatRetriever::new(client.clone(), config),
            github: GitHubCommitRetriever::new(client, config),
        }
    }

    /// Collect everything known about a CVE
    pub async fn collect(&self, cve_id: &CveId) -> VulnerabilityRecord {
        let start_time = Instant::now();
        let mut record = VulnerabilityRecord::empty(cve_id.clone());

        record.kev_status = fetch_or_absent(&self.kev, cve_id).await.unwrap_or(false);
        record.epss = fetch_or_absent(&self.epss, cve_id).await;

        if let Some(details) = fetch_or_absent(&self.nvd, cve_id).await {
            record.description = details.description;
            record.cvss = details.cvss;
            record.cwe = details.cwe;
            record.affected_products = details.affected_products;
            record.published = details.published;
            record.last_modified = details.last_modified;
            record.references = details.references;
        }

        if record.cvss.is_none() {
            tracing::debug!(cve = %cve_id, "No NVD CVSS score, trying Red Hat");
            record.cvss = fetch_or_absent(&self.redhat, cve_id).await;
        }

        record.patch_candidates = fetch_or_absent(&self.github, cve_id)
            .await
            .unwrap_or_default();

        tracing::info!(
            cve = %cve_id,
            kev = record.kev_status,
            epss = record.epss.as_ref().map(|e| e.probability),
            cvss = record.cvss.as_ref().map(|c| c.base_score),
            cwe = record.cwe.len(),
            patches = record.patch_candidates.len(),
            elapsed_ms = start_time.elapsed().as_millis(),
            "Collected vulnerability intelligence"
        );

        record
    }
}
