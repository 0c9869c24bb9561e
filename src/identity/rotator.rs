use crate::identity::{IdentityError, ProxyPool};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A (proxy, client signature) pairing used for one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `host:port` of the proxy, `None` for a direct connection
    pub proxy: Option<String>,

    /// Client signature sent as the User-Agent header
    pub user_agent: String,
}

impl Identity {
    /// Proxy URL in the form reqwest expects
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy.as_ref().map(|addr| format!("http://{}", addr))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let agent: String = self.user_agent.chars().take(30).collect();
        write!(
            f,
            "proxy={}, user-agent={}...",
            self.proxy.as_deref().unwrap_or("direct"),
            agent
        )
    }
}

/// Issues a fresh identity per attempt
pub struct IdentityRotator {
    pool: Arc<ProxyPool>,
    signatures: Vec<String>,
    allow_direct: bool,
    /// Attempts sent per client signature
    signature_uses: Mutex<HashMap<String, u64>>,
}

impl IdentityRotator {
    /// Creates a rotator
    ///
    /// # Arguments
    ///
    /// * `pool` - Shared proxy pool
    /// * `signatures` - Client signatures to draw from (must be non-empty)
    /// * `allow_direct` - Degrade to a proxy-less identity when the pool is exhausted
    pub fn new(pool: Arc<ProxyPool>, signatures: Vec<String>, allow_direct: bool) -> Self {
        Self {
            pool,
            signatures,
            allow_direct,
            signature_uses: Mutex::new(HashMap::new()),
        }
    }

    /// Pairs an eligible proxy with a random signature
    pub fn next(&self) -> Result<Identity, IdentityError> {
        let user_agent = self.random_signature();

        match self.pool.acquire() {
            Ok(proxy) => Ok(Identity {
                proxy: Some(proxy.address),
                user_agent,
            }),
            Err(IdentityError::PoolExhausted) if self.allow_direct => {
                tracing::debug!("Proxy pool exhausted, proceeding without proxy");
                Ok(Identity {
                    proxy: None,
                    user_agent,
                })
            }
            Err(_) => Err(IdentityError::NoIdentity),
        }
    }

    /// Draws a client signature uniformly from the configured set
    pub fn random_signature(&self) -> String {
        self.signatures
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    /// Counts one fetch attempt made with `identity`
    pub fn record_use(&self, identity: &Identity) {
        if let Some(proxy) = &identity.proxy {
            self.pool.record_request(proxy);
        }
        let mut uses = self
            .signature_uses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *uses.entry(identity.user_agent.clone()).or_insert(0) += 1;
    }

    /// Most used client signatures with their attempt counts
    pub fn most_used_signatures(&self, top_n: usize) -> Vec<(String, u64)> {
        let uses = self
            .signature_uses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ranked: Vec<(String, u64)> = uses.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_n);
        ranked
    }

    /// The pool the rotator draws from
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rotator(addresses: &[&str], allow_direct: bool) -> IdentityRotator {
        let pool = Arc::new(ProxyPool::new(
            addresses.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(60),
        ));
        IdentityRotator::new(
            pool,
            vec!["AgentA".to_string(), "AgentB".to_string()],
            allow_direct,
        )
    }

    #[test]
    fn test_next_pairs_proxy_and_signature() {
        let rotator = rotator(&["a:1"], false);
        let identity = rotator.next().unwrap();
        assert_eq!(identity.proxy.as_deref(), Some("a:1"));
        assert!(identity.user_agent == "AgentA" || identity.user_agent == "AgentB");
        assert_eq!(identity.proxy_url().as_deref(), Some("http://a:1"));
    }

    #[test]
    fn test_exhausted_without_fallback() {
        let rotator = rotator(&["a:1"], false);
        rotator.pool().report_banned("a:1");
        assert_eq!(rotator.next(), Err(IdentityError::NoIdentity));
    }

    #[test]
    fn test_exhausted_with_direct_fallback() {
        let rotator = rotator(&[], true);
        let identity = rotator.next().unwrap();
        assert_eq!(identity.proxy, None);
        assert_eq!(identity.proxy_url(), None);
        assert!(!identity.user_agent.is_empty());
    }

    #[test]
    fn test_record_use_counts_proxy_and_signature() {
        let rotator = rotator(&["a:1"], true);
        let via_proxy = Identity {
            proxy: Some("a:1".to_string()),
            user_agent: "AgentA".to_string(),
        };
        let direct = Identity {
            proxy: None,
            user_agent: "AgentB".to_string(),
        };
        rotator.record_use(&via_proxy);
        rotator.record_use(&via_proxy);
        rotator.record_use(&direct);

        assert_eq!(rotator.pool().snapshot()[0].requests, 2);
        assert_eq!(
            rotator.most_used_signatures(10),
            vec![("AgentA".to_string(), 2), ("AgentB".to_string(), 1)]
        );
        assert_eq!(rotator.most_used_signatures(1).len(), 1);
    }

    #[test]
    fn test_display_hides_long_signature() {
        let identity = Identity {
            proxy: None,
            user_agent: "x".repeat(100),
        };
        let shown = identity.to_string();
        assert!(shown.starts_with("proxy=direct"));
        assert!(shown.len() < 80);
    }
}
