//! CISA Known Exploited Vulnerabilities catalog

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{IntelRetriever, RetrieverError, send_checked};
use crate::model::{CveId, SourceConfig};

/// Checks whether a CVE is listed in the KEV catalog feed
pub struct KevRetriever {
    client: Client,
    feed_url: String,
    timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct KevCatalog {
    #[serde(default)]
    vulnerabilities: Vec<KevEntry>,
}

#[derive(Debug, Deserialize)]
struct KevEntry {
    #[serde(rename = "cveID")]
    cve_id: String,
}

impl KevRetriever {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            feed_url: config.kev_feed_url.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl IntelRetriever for KevRetriever {
    type Output = bool;

    fn source(&self) -> &'static str {
        "kev"
    }

    async fn retrieve(&self, cve_id: &CveId) -> Result<bool, RetrieverError> {
        tracing::debug!(cve = %cve_id, url = %self.feed_url, "Fetching KEV catalog");

        let request = self.client.get(&self.feed_url).timeout(self.timeout);
        let response = send_checked(request, "KEV catalog").await?;

        let catalog: KevCatalog = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid KEV catalog: {}", e)))?;

        let listed = catalog
            .vulnerabilities
            .iter()
            .any(|entry| entry.cve_id == cve_id.as_str());

        tracing::debug!(
            cve = %cve_id,
            catalog_size = catalog.vulnerabilities.len(),
            listed = listed,
            "Checked KEV catalog"
        );

        Ok(listed)
    }
}
