use std::io::Read;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::*;

pub const METRIC_STAT_HEADER: &str = "X-Metric-Stat";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to request metric")]
    RequestError(#[from] reqwest::Error),

    #[error("metric server responded with status {0}")]
    Status(u16),

    #[error("response missing {} header", METRIC_STAT_HEADER)]
    MissingStat,

    #[error("malformed {} header", METRIC_STAT_HEADER)]
    MalformedStat(#[from] serde_json::Error),

    #[error("failed to read metric body")]
    Body(#[from] std::io::Error),
}

/// File attributes of a metric as reported by the metric daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStat {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: i64,
    #[serde(rename = "Mode")]
    pub mode: i64,
    #[serde(rename = "ModTime")]
    pub mod_time: i64,
}

#[derive(Clone, PartialEq)]
pub struct MetricData {
    pub stat: MetricStat,
    pub data: Vec<u8>,
}

impl MetricData {
    pub fn name(&self) -> &str { self.stat.name.as_str() }
}

impl std::fmt::Debug for MetricData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetricData(stat:{:?}, data:{} bytes)", self.stat, self.data.len())
    }
}

/// Somewhere metric files can be downloaded from.
pub trait MetricSource {
    fn fetch(&self, server: &str, name: &str) -> Result<MetricData, FetchError>;
}

/// Downloads metrics from the metric daemon's `/metrics/<name>` endpoint.
#[derive(Clone)]
pub struct HttpMetricSource {
    client: reqwest::blocking::Client,
    port: u16,
}

impl HttpMetricSource {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self { client, port })
    }

    pub fn scope(&self, server: &str) -> String { format!("http://{}:{}/metrics", server, self.port) }
}

impl std::fmt::Debug for HttpMetricSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HttpMetricSource(port:{})", self.port)
    }
}

impl MetricSource for HttpMetricSource {
    #[tracing::instrument(skip(self))]
    fn fetch(&self, server: &str, name: &str) -> Result<MetricData, FetchError> {
        let route = format!("{}/{}", self.scope(server), name);
        debug!(route = route.as_str(), "downloading metric");

        let mut response = self.client.get(&route).send()?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let stat = response.headers()
            .get(METRIC_STAT_HEADER)
            .ok_or(FetchError::MissingStat)?
            .as_bytes();
        let stat: MetricStat = serde_json::from_slice(stat)?;

        let mut data = Vec::new();
        response.read_to_end(&mut data)?;

        Ok(MetricData { stat, data })
    }
}
