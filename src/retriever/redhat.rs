//! Red Hat Security Data API, used as a CVSS fallback when NVD has no score

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{IntelRetriever, RetrieverError, base_url, check_base_score, send_checked};
use crate::model::{CveId, CvssMetrics, CvssSource, CvssVersion, Severity, SourceConfig};

/// Retriever for Red Hat's CVSS v3 scoring of a CVE
pub struct RedHatRetriever {
    client: Client,
    base_url: String,
    timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct RedHatCve {
    #[serde(default)]
    threat_severity: Option<String>,
    #[serde(default)]
    cvss3: Option<RedHatCvss3>,
}

#[derive(Debug, Deserialize)]
struct RedHatCvss3 {
    /// Serialized as a string, e.g. "9.8"
    cvss3_base_score: String,
    #[serde(default)]
    cvss3_scoring_vector: Option<String>,
}

impl RedHatRetriever {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            base_url: base_url(&config.redhat_base_url).to_string(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl IntelRetriever for RedHatRetriever {
    type Output = CvssMetrics;

    fn source(&self) -> &'static str {
        "redhat"
    }

    async fn retrieve(&self, cve_id: &CveId) -> Result<CvssMetrics, RetrieverError> {
        let url = format!("{}/cve/{}.json", self.base_url, cve_id);

        tracing::debug!(cve = %cve_id, url = %url, "Fetching Red Hat CVE data");

        let request = self.client.get(&url).timeout(self.timeout);
        let response = send_checked(request, cve_id.as_str()).await?;

        let record: RedHatCve = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid Red Hat response: {}", e)))?;

        let cvss3 = record
            .cvss3
            .ok_or_else(|| RetrieverError::NotFound(format!("Red Hat CVSS v3 for {}", cve_id)))?;

        let base_score: f64 = cvss3.cvss3_base_score.trim().parse().map_err(|_| {
            RetrieverError::ParseError(format!(
                "Invalid Red Hat base score '{}'",
                cvss3.cvss3_base_score
            ))
        })?;
        let base_score = check_base_score(base_score)?;

        // The minor version is only known from the vector prefix
        let version = cvss3
            .cvss3_scoring_vector
            .as_deref()
            .and_then(|v| match v.split('/').next() {
                Some("CVSS:3.0") => Some(CvssVersion::V30),
                Some("CVSS:3.1") => Some(CvssVersion::V31),
                _ => None,
            });

        Ok(CvssMetrics {
            version,
            base_score,
            severity: record
                .threat_severity
                .as_deref()
                .and_then(Severity::from_label),
            vector: cvss3.cvss3_scoring_vector,
            impact_score: None,
            exploitability_score: None,
            source: CvssSource::RedHat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever(server: &mockito::Server) -> RedHatRetriever {
        let config = SourceConfig {
            redhat_base_url: format!("{}/hydra/rest/securitydata", server.url()),
            ..SourceConfig::default()
        };
        RedHatRetriever::new(Client::new(), &config)
    }

    #[tokio::test]
    async fn test_cvss3_score() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hydra/rest/securitydata/cve/CVE-2023-44487.json")
            .with_status(200)
            .with_body(
                r#"{"threat_severity": "Important", "public_date": "2023-10-10T00:00:00Z",
                    "cvss3": {"cvss3_base_score": "7.5",
                              "cvss3_scoring_vector": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:H",
                              "status": "verified"}}"#,
            )
            .create_async()
            .await;

        let cve: CveId = "CVE-2023-44487".parse().unwrap();
        let cvss = retriever(&server).retrieve(&cve).await.unwrap();

        assert_eq!(cvss.base_score, 7.5);
        assert_eq!(cvss.severity, Some(Severity::High));
        assert_eq!(cvss.version, Some(CvssVersion::V31));
        assert_eq!(cvss.source, CvssSource::RedHat);
        assert!(cvss.impact_score.is_none());
    }

    #[tokio::test]
    async fn test_missing_cvss3_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hydra/rest/securitydata/cve/CVE-2010-0001.json")
            .with_status(200)
            .with_body(r#"{"threat_severity": "Low"}"#)
            .create_async()
            .await;

        let cve: CveId = "CVE-2010-0001".parse().unwrap();
        let result = retriever(&server).retrieve(&cve).await;
        assert!(matches!(result, Err(RetrieverError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_vector_leaves_version_unknown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hydra/rest/securitydata/cve/CVE-2016-5195.json")
            .with_status(200)
            .with_body(r#"{"threat_severity": "Important", "cvss3": {"cvss3_base_score": "7.8"}}"#)
            .create_async()
            .await;

        let cve: CveId = "CVE-2016-5195".parse().unwrap();
        let cvss = retriever(&server).retrieve(&cve).await.unwrap();

        assert_eq!(cvss.base_score, 7.8);
        assert_eq!(cvss.version, None);
        assert!(cvss.vector.is_none());
    }

    #[tokio::test]
    async fn test_non_finite_score_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hydra/rest/securitydata/cve/CVE-2023-0002.json")
            .with_status(200)
            .with_body(r#"{"cvss3": {"cvss3_base_score": "NaN"}}"#)
            .create_async()
            .await;

        let cve: CveId = "CVE-2023-0002".parse().unwrap();
        let result = retriever(&server).retrieve(&cve).await;
        assert!(matches!(result, Err(RetrieverError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_unknown_cve() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hydra/rest/securitydata/cve/CVE-2099-0001.json")
            .with_status(404)
            .create_async()
            .await;

        let cve: CveId = "CVE-2099-0001".parse().unwrap();
        let result = retriever(&server).retrieve(&cve).await;
        assert!(matches!(result, Err(RetrieverError::NotFound(_))));
    }
}
