use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static CVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CVE-[0-9]{4}-[0-9]{4,}$").unwrap());

/// Canonical CVE identifier, e.g. `CVE-2021-44228`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CveId(String);

#[derive(Debug, thiserror::Error)]
#[error("Invalid CVE identifier '{0}', expected CVE-YYYY-NNNN")]
pub struct InvalidCveId(pub String);

impl CveId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CveId {
    type Err = InvalidCveId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        if CVE_PATTERN.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(InvalidCveId(s.to_string()))
        }
    }
}

impl TryFrom<String> for CveId {
    type Error = InvalidCveId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CveId> for String {
    fn from(id: CveId) -> Self {
        id.0
    }
}

impl fmt::Display for CveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse an upstream severity label (NVD uses `HIGH`, Red Hat uses `Important`)
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "important" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvssSource {
    Nvd,
    RedHat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvssVersion {
    V2,
    V30,
    V31,
}

impl fmt::Display for CvssVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::V2 => "2.0",
            Self::V30 => "3.0",
            Self::V31 => "3.1",
        };
        f.write_str(label)
    }
}

// CVSS data as reported by a single source
// - version: None when the source does not say which CVSS revision it scored
// - impact_score / exploitability_score: sub-scores, only NVD publishes them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvssMetrics {
    pub version: Option<CvssVersion>,
    pub base_score: f64,
    pub severity: Option<Severity>,
    pub vector: Option<String>,
    pub impact_score: Option<f64>,
    pub exploitability_score: Option<f64>,
    pub source: CvssSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpssScore {
    /// Probability of exploitation in the next 30 days, 0.0-1.0
    pub probability: f64,
    pub percentile: Option<f64>,
    pub date: Option<String>,
}

impl EpssScore {
    pub fn as_percentage(&self) -> f64 {
        self.probability * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    /// `owner/name` of the repository holding the commit
    pub repository: String,
    pub commit_url: Url,
    pub commit_message: String,
}

// Everything known about a CVE for one invocation
// - kev_status: listed in the CISA Known Exploited Vulnerabilities catalog
// - cwe: weakness identifiers, deduplicated
// - affected_products: CPE 2.3 criteria of vulnerable configurations
// - patch_candidates: commits mentioning the CVE, in search order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub cve_id: CveId,
    pub kev_status: bool,
    pub epss: Option<EpssScore>,
    pub cvss: Option<CvssMetrics>,
    pub description: Option<String>,
    pub cwe: BTreeSet<String>,
    pub affected_products: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub references: Vec<Url>,
    pub patch_candidates: Vec<PatchCandidate>,
}

impl VulnerabilityRecord {
    /// A record with every source reporting "not found"
    pub fn empty(cve_id: CveId) -> Self {
        Self {
            cve_id,
            kev_status: false,
            epss: None,
            cvss: None,
            description: None,
            cwe: BTreeSet::new(),
            affected_products: vec![],
            published: None,
            last_modified: None,
            references: vec![],
            patch_candidates: vec![],
        }
    }
}

/// Details extracted from an NVD CVE record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NvdDetails {
    pub description: Option<String>,
    pub cvss: Option<CvssMetrics>,
    pub cwe: BTreeSet<String>,
    pub affected_products: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub references: Vec<Url>,
}
