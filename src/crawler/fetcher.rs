//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building HTTP clients, one per proxy, with timeouts and compression
//! - Sending each attempt with the identity's client signature
//! - Reducing the response to status and body for classification

use crate::identity::Identity;
use async_trait::async_trait;
use reqwest::{header, Client, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// What came back from the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: String,
}

/// The request never produced a complete response
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "Request timeout".to_string()
        } else if e.is_connect() {
            format!("Connection failed: {}", e)
        } else {
            e.to_string()
        };
        Self { message }
    }
}

/// Result of one fetch attempt
pub type FetchResponse = Result<FetchOutcome, TransportError>;

/// Network collaborator: fetch `url` through `identity`
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, identity: &Identity) -> FetchResponse;
}

/// Builds an HTTP client, optionally routed through a proxy
///
/// # Arguments
///
/// * `timeout` - Whole-request timeout
/// * `proxy_url` - `http://host:port` of the proxy, `None` for a direct client
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy URL or TLS backend failure
pub fn build_http_client(timeout: Duration, proxy_url: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = proxy_url {
        builder = builder.proxy(Proxy::all(proxy_url)?);
    }

    builder.build()
}

/// reqwest-backed fetcher with a cached client per proxy
pub struct HttpFetcher {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, identity: &Identity) -> Result<Client, TransportError> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(client) = clients.get(&identity.proxy) {
            return Ok(client.clone());
        }

        // Client construction does no network I/O
        let client = build_http_client(self.timeout, identity.proxy_url().as_deref())
            .map_err(|e| TransportError::new(format!("Failed to build client: {}", e)))?;
        clients.insert(identity.proxy.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, identity: &Identity) -> FetchResponse {
        let client = self.client_for(identity)?;

        tracing::debug!("GET {} via {}", url, identity);
        let response = client
            .get(url.clone())
            .header(header::USER_AGENT, identity.user_agent.as_str())
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            )
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::trace!("{} -> HTTP {} ({} bytes)", url, status, body.len());
        Ok(FetchOutcome { status, body })
    }
}
