//! Proxy health probe
//!
//! Sends one request through every proxy to a known endpoint and reports
//! which ones answered with HTTP 200.

use crate::crawler::build_http_client;
use crate::identity::IdentityRotator;
use reqwest::header;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of probing one proxy
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub address: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Probes every proxy in the rotator's pool
///
/// # Arguments
///
/// * `rotator` - Supplies the proxy list and a random client signature per probe
/// * `probe_url` - Endpoint expected to answer 200
/// * `concurrency` - Maximum probes in flight
/// * `timeout` - Per-probe request timeout
///
/// Results come back in pool order.
pub async fn probe_proxies(
    rotator: &IdentityRotator,
    probe_url: &str,
    concurrency: usize,
    timeout: Duration,
) -> Vec<ProbeResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut probes = JoinSet::new();

    for (idx, record) in rotator.pool().snapshot().into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let url = probe_url.to_string();
        let user_agent = rotator.random_signature();
        probes.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            tracing::info!("Testing proxy: {}", record.address);
            (idx, probe_one(record.address, user_agent, url, timeout).await)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("Probe task failed: {}", e),
        }
    }
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, result)| result).collect()
}

async fn probe_one(address: String, user_agent: String, url: String, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let proxy_url = format!("http://{}", address);
    let client = match build_http_client(timeout, Some(&proxy_url)) {
        Ok(client) => client,
        Err(e) => {
            return ProbeResult {
                address,
                ok: false,
                status: None,
                elapsed: start.elapsed(),
                error: Some(e.to_string()),
            }
        }
    };

    match client
        .get(&url)
        .header(header::USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status().as_u16();
            let ok = status == 200;
            if ok {
                tracing::info!("Proxy {} works ({:.2}s)", address, start.elapsed().as_secs_f64());
            } else {
                tracing::warn!("Proxy {} returned status code {}", address, status);
            }
            ProbeResult {
                address,
                ok,
                status: Some(status),
                elapsed: start.elapsed(),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!("Proxy {} failed: {}", address, e);
            ProbeResult {
                address,
                ok: false,
                status: None,
                elapsed: start.elapsed(),
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProxyPool;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_probe_sends_signature_through_each_proxy() {
        // The mock server stands in for a forward proxy
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .and(header_eq("user-agent", "ProbeAgent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&proxy)
            .await;

        let pool = Arc::new(ProxyPool::new(
            vec![proxy.address().to_string(), "127.0.0.1:1".to_string()],
            Duration::from_secs(60),
        ));
        let rotator = IdentityRotator::new(pool, vec!["ProbeAgent".to_string()], false);

        let results =
            probe_proxies(&rotator, "http://probe.test/ip", 2, Duration::from_secs(5)).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].address, proxy.address().to_string());
        assert!(results[0].ok);
        assert_eq!(results[0].status, Some(200));
        assert_eq!(results[1].address, "127.0.0.1:1");
        assert!(!results[1].ok);
        assert!(results[1].error.is_some());
    }
}
