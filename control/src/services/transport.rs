use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

use crate::types::NodeConfig;

/// How the registry talks to a remote daemon.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Establish the session. Called on connect and on every reconnect.
    async fn handshake(&self, config: &NodeConfig) -> Result<()>;

    /// Cheap liveness check for an established session.
    async fn ping(&self, config: &NodeConfig) -> Result<()>;
}

/// Authenticated HTTP request against the daemon's root endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    async fn check(&self, config: &NodeConfig) -> Result<()> {
        let url = base_url(config)?;
        debug!("Probing daemon at {}", url);

        let mut req = self.client.get(url.clone());
        if !config.api_key.is_empty() {
            req = req.header(
                HeaderName::from_static("x-api-key"),
                HeaderValue::from_str(&config.api_key).context("Invalid api key value")?,
            );
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach daemon at {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Daemon at {} rejected request ({}): {}", url, status, body);
        }

        Ok(())
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn handshake(&self, config: &NodeConfig) -> Result<()> {
        self.check(config).await
    }

    async fn ping(&self, config: &NodeConfig) -> Result<()> {
        self.check(config).await
    }
}

/// Build the daemon base URL. An `ip` that already carries a scheme is used as-is.
pub fn base_url(config: &NodeConfig) -> Result<Url> {
    let ip = config.ip.trim();
    if ip.is_empty() {
        anyhow::bail!("Node {} has no address", config.uuid);
    }

    let raw = if ip.starts_with("http://") || ip.starts_with("https://") {
        ip.to_string()
    } else if ip.contains(':') && !ip.starts_with('[') {
        format!("http://[{}]:{}", ip, config.port)
    } else {
        format!("http://{}:{}", ip, config.port)
    };

    Url::parse(&raw).with_context(|| format!("Invalid daemon address: {}", raw))
}
