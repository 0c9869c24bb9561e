//! Identity module: proxies and client signatures
//!
//! This module owns everything that decides *who* a request appears to come
//! from:
//! - `ProxyPool` tracks proxy health (active, cooling, banned)
//! - `IdentityRotator` pairs an eligible proxy with a random client signature
//! - `probe` checks a proxy list against a known endpoint

mod probe;
mod proxy_pool;
mod rotator;

pub use probe::{probe_proxies, ProbeResult};
pub use proxy_pool::{PoolCounts, ProxyPool, ProxyRecord};
pub use rotator::{Identity, IdentityRotator};

use thiserror::Error;

/// Errors raised while handing out identities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("No eligible proxy in the pool")]
    PoolExhausted,

    #[error("No identity available: proxy pool exhausted and direct connections are disabled")]
    NoIdentity,
}
