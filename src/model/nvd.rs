//! NVD CVE API 2.0 response models
//!
//! Based on https://nvd.nist.gov/developers/vulnerabilities. Only the fields
//! the triage prompt uses are modelled; everything else is ignored.

use serde::Deserialize;

/// Top-level response of `/rest/json/cves/2.0`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdResponse {
    #[serde(default)]
    pub total_results: u64,

    #[serde(default)]
    pub vulnerabilities: Vec<NvdVulnerability>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvdVulnerability {
    pub cve: NvdCve,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdCve {
    pub id: String,

    /// Publication timestamp, e.g. `2021-12-10T10:15:09.143` (UTC, no offset)
    #[serde(default)]
    pub published: Option<String>,

    #[serde(default)]
    pub last_modified: Option<String>,

    #[serde(default)]
    pub descriptions: Vec<NvdLangString>,

    #[serde(default)]
    pub metrics: NvdMetrics,

    #[serde(default)]
    pub weaknesses: Vec<NvdWeakness>,

    #[serde(default)]
    pub configurations: Vec<NvdConfiguration>,

    #[serde(default)]
    pub references: Vec<NvdReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvdLangString {
    pub lang: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NvdMetrics {
    #[serde(rename = "cvssMetricV31", default)]
    pub cvss_v31: Vec<NvdCvssMetricV3>,

    #[serde(rename = "cvssMetricV30", default)]
    pub cvss_v30: Vec<NvdCvssMetricV3>,

    #[serde(rename = "cvssMetricV2", default)]
    pub cvss_v2: Vec<NvdCvssMetricV2>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdCvssMetricV3 {
    /// `Primary` (NVD's own scoring) or `Secondary` (CNA scoring)
    #[serde(rename = "type", default)]
    pub metric_type: Option<String>,

    pub cvss_data: NvdCvssDataV3,

    #[serde(default)]
    pub exploitability_score: Option<f64>,

    #[serde(default)]
    pub impact_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdCvssDataV3 {
    pub base_score: f64,

    #[serde(default)]
    pub base_severity: Option<String>,

    #[serde(default)]
    pub vector_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdCvssMetricV2 {
    #[serde(rename = "type", default)]
    pub metric_type: Option<String>,

    pub cvss_data: NvdCvssDataV2,

    /// V2 carries the severity label next to `cvssData`, not inside it
    #[serde(default)]
    pub base_severity: Option<String>,

    #[serde(default)]
    pub exploitability_score: Option<f64>,

    #[serde(default)]
    pub impact_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdCvssDataV2 {
    pub base_score: f64,

    #[serde(default)]
    pub vector_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvdWeakness {
    #[serde(default)]
    pub description: Vec<NvdLangString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvdConfiguration {
    #[serde(default)]
    pub nodes: Vec<NvdNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvdNode {
    #[serde(default)]
    pub cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvdCpeMatch {
    #[serde(default)]
    pub vulnerable: bool,

    /// CPE 2.3 string, e.g. `cpe:2.3:a:apache:log4j:*:*:*:*:*:*:*:*`
    pub criteria: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvdReference {
    pub url: String,
}
