use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{Error, Result};
use crate::queue::{ActionExecutor, Connectivity, HttpMethod, OfflineQueueItem};

/// Replays queued actions as HTTP requests against the app backend.
#[derive(Clone)]
pub struct HttpActionExecutor {
    client: Client,
    base_url: Url,
}

impl HttpActionExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|_| Error::InvalidUrl(base_url.to_string()))?;
        // Url::join drops the last path segment without a trailing slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("salamene-storage/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Absolute endpoints are used as-is, others are resolved against the base URL.
    pub fn resolve(&self, endpoint: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|_| Error::InvalidUrl(endpoint.to_string()))
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn execute(&self, item: &OfflineQueueItem) -> Result<()> {
        let url = self.resolve(&item.endpoint)?;

        let mut request = match item.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };

        if let Some(data) = &item.data {
            if item.method != HttpMethod::Get {
                request = request.json(data);
            }
        }

        let response = request
            .header("X-Offline-Queue-Id", &item.id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "{} {} returned {}",
                item.method, item.endpoint, status
            )));
        }

        tracing::debug!("Replayed {} {} ({})", item.method, item.endpoint, status);
        Ok(())
    }
}

/// Treats the network as connected when a probe URL answers at all.
#[derive(Clone)]
pub struct HttpConnectivity {
    client: Client,
    probe_url: Url,
}

impl HttpConnectivity {
    pub fn new(probe_url: &str, timeout: Duration) -> Result<Self> {
        let probe_url = Url::parse(probe_url)
            .map_err(|_| Error::InvalidUrl(probe_url.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, probe_url })
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_connected(&self) -> bool {
        match self.client.head(self.probe_url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }
}
