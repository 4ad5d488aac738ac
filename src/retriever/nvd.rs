//! NVD (National Vulnerability Database) CVE API retriever

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{IntelRetriever, RetrieverError, check_base_score, parse_timestamp, send_checked};
use crate::model::nvd::{NvdCve, NvdCvssMetricV2, NvdCvssMetricV3, NvdMetrics, NvdResponse};
use crate::model::{CveId, CvssMetrics, CvssSource, CvssVersion, NvdDetails, Severity, SourceConfig};

/// Retriever for NVD CVE records
pub struct NvdRetriever {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: std::time::Duration,
}

impl NvdRetriever {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            base_url: config.nvd_base_url.clone(),
            api_key: config.nvd_api_key.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl IntelRetriever for NvdRetriever {
    type Output = NvdDetails;

    fn source(&self) -> &'static str {
        "nvd"
    }

    async fn retrieve(&self, cve_id: &CveId) -> Result<NvdDetails, RetrieverError> {
        tracing::debug!(cve = %cve_id, url = %self.base_url, "Fetching NVD record");

        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("cveId", cve_id.as_str())])
            .timeout(self.timeout);

        if let Some(ref key) = self.api_key {
            request = request.header("apiKey", key);
        }

        let response = send_checked(request, cve_id.as_str()).await?;

        let body: NvdResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid NVD response: {}", e)))?;

        let cve = body
            .vulnerabilities
            .into_iter()
            .map(|v| v.cve)
            .find(|c| c.id.eq_ignore_ascii_case(cve_id.as_str()))
            .ok_or_else(|| RetrieverError::NotFound(format!("NVD record for {}", cve_id)))?;

        let details = extract_details(cve);
        if let Some(cvss) = &details.cvss {
            check_base_score(cvss.base_score)?;
        }

        tracing::debug!(
            cve = %cve_id,
            total_results = body.total_results,
            cvss = ?details.cvss.as_ref().map(|c| c.base_score),
            cwe_count = details.cwe.len(),
            products_count = details.affected_products.len(),
            "Parsed NVD record"
        );

        Ok(details)
    }
}

/// Convert an NVD CVE record into the fields the triage prompt needs
fn extract_details(cve: NvdCve) -> NvdDetails {
    let description = cve
        .descriptions
        .iter()
        .find(|d| d.lang == "en")
        .or_else(|| cve.descriptions.first())
        .map(|d| d.value.trim().to_string())
        .filter(|d| !d.is_empty());

    // NVD uses NVD-CWE-Other / NVD-CWE-noinfo as placeholders
    let cwe: BTreeSet<String> = cve
        .weaknesses
        .iter()
        .flat_map(|w| w.description.iter())
        .map(|d| d.value.trim())
        .filter(|v| v.starts_with("CWE-"))
        .map(str::to_string)
        .collect();

    let mut affected_products: Vec<String> = Vec::new();
    for cpe_match in cve
        .configurations
        .iter()
        .flat_map(|c| c.nodes.iter())
        .flat_map(|n| n.cpe_match.iter())
        .filter(|m| m.vulnerable)
    {
        if !affected_products.contains(&cpe_match.criteria) {
            affected_products.push(cpe_match.criteria.clone());
        }
    }

    let references = cve
        .references
        .iter()
        .filter_map(|r| Url::parse(&r.url).ok())
        .collect();

    NvdDetails {
        description,
        cvss: select_cvss(&cve.metrics),
        cwe,
        affected_products,
        published: cve.published.as_deref().and_then(parse_timestamp),
        last_modified: cve.last_modified.as_deref().and_then(parse_timestamp),
        references,
    }
}

/// Pick the best available CVSS metric: v3.1, then v3.0, then v2.
/// Within a version NVD's own `Primary` scoring wins over CNA scoring.
fn select_cvss(metrics: &NvdMetrics) -> Option<CvssMetrics> {
    if let Some(m) = primary_first(&metrics.cvss_v31, |m| m.metric_type.as_deref()) {
        return Some(from_v3(m, CvssVersion::V31));
    }

    if let Some(m) = primary_first(&metrics.cvss_v30, |m| m.metric_type.as_deref()) {
        return Some(from_v3(m, CvssVersion::V30));
    }

    primary_first(&metrics.cvss_v2, |m| m.metric_type.as_deref()).map(from_v2)
}

fn primary_first<T>(items: &[T], metric_type: impl Fn(&T) -> Option<&str>) -> Option<&T> {
    items
        .iter()
        .find(|m| metric_type(*m) == Some("Primary"))
        .or_else(|| items.first())
}

fn from_v3(metric: &NvdCvssMetricV3, version: CvssVersion) -> CvssMetrics {
    CvssMetrics {
        version: Some(version),
        base_score: metric.cvss_data.base_score,
        severity: metric
            .cvss_data
            .base_severity
            .as_deref()
            .and_then(Severity::from_label),
        vector: metric.cvss_data.vector_string.clone(),
        impact_score: metric.impact_score,
        exploitability_score: metric.exploitability_score,
        source: CvssSource::Nvd,
    }
}

fn from_v2(metric: &NvdCvssMetricV2) -> CvssMetrics {
    CvssMetrics {
        version: Some(CvssVersion::V2),
        base_score: metric.cvss_data.base_score,
        severity: metric.base_severity.as_deref().and_then(Severity::from_label),
        vector: metric.cvss_data.vector_string.clone(),
        impact_score: metric.impact_score,
        exploitability_score: metric.exploitability_score,
        source: CvssSource::Nvd,
    }
}
