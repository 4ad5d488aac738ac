//! FIRST.org Exploit Prediction Scoring System API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};

use super::{IntelRetriever, RetrieverError, base_url, send_checked};
use crate::model::{CveId, EpssScore, SourceConfig};

/// Retriever for EPSS scores
pub struct EpssRetriever {
    client: Client,
    base_url: String,
    timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct EpssResponse {
    status: String,
    #[serde(default)]
    data: Vec<EpssRecord>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpssRecord {
    cve: String,
    #[serde(deserialize_with = "lenient_f64")]
    epss: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    percentile: Option<f64>,
    #[serde(default)]
    date: Option<String>,
}

/// The API serializes scores as strings ("0.97565"); accept numbers too
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid number '{}'", s))),
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrString::deserialize(deserializer)?.into_f64()
}

fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<NumberOrString>::deserialize(deserializer)?
        .map(NumberOrString::into_f64)
        .transpose()
}

impl EpssRetriever {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            base_url: base_url(&config.epss_base_url).to_string(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl IntelRetriever for EpssRetriever {
    type Output = EpssScore;

    fn source(&self) -> &'static str {
        "epss"
    }

    async fn retrieve(&self, cve_id: &CveId) -> Result<EpssScore, RetrieverError> {
        let url = format!("{}/epss", self.base_url);

        tracing::debug!(cve = %cve_id, url = %url, "Fetching EPSS score");

        let request = self
            .client
            .get(&url)
            .query(&[("cve", cve_id.as_str())])
            .timeout(self.timeout);
        let response = send_checked(request, cve_id.as_str()).await?;

        let body: EpssResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid EPSS response: {}", e)))?;

        if !body.status.eq_ignore_ascii_case("ok") {
            return Err(RetrieverError::ParseError(format!(
                "EPSS API status '{}': {}",
                body.status,
                body.message.unwrap_or_default()
            )));
        }

        let record = body
            .data
            .into_iter()
            .find(|r| r.cve.eq_ignore_ascii_case(cve_id.as_str()))
            .ok_or_else(|| RetrieverError::NotFound(format!("EPSS score for {}", cve_id)))?;

        if !(0.0..=1.0).contains(&record.epss) {
            return Err(RetrieverError::ParseError(format!(
                "EPSS probability out of range: {}",
                record.epss
            )));
        }

        Ok(EpssScore {
            probability: record.epss,
            percentile: record.percentile,
            date: record.date,
        })
    }
}
