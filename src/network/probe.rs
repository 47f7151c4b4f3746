//! Active reachability probes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a reachability probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("probe endpoint returned HTTP {0}")]
    Status(u16),
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
    #[error("probe failed: {0}")]
    Other(String),
}

/// A lightweight check that the backend can be reached.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// Probes an endpoint with an HTTP GET.
///
/// Any response below 500 counts as reachable: a 404 still proves the network
/// path works.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProbe {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Runs `probe` with a hard timeout.
pub async fn probe_with_timeout(
    probe: &dyn ReachabilityProbe,
    timeout: Duration,
) -> Result<(), ProbeError> {
    match tokio::time::timeout(timeout, probe.probe()).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::TimedOut(timeout)),
    }
}
