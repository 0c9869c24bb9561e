//! Proxy pool with cooldown and ban tracking
//!
//! All mutations go through one mutex. Nothing inside the critical section
//! performs I/O, so hold times stay constant regardless of network state.

use crate::identity::IdentityError;
use crate::state::ProxyState;
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A proxy and its health bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    /// `host:port` address
    pub address: String,

    /// Current health state
    pub state: ProxyState,

    /// When the proxy last failed, if ever
    pub last_failure: Option<Instant>,

    /// Fetch attempts sent through the proxy
    pub requests: u64,

    pub successes: u64,

    /// Failures and bans reported against the proxy
    pub failures: u64,
}

impl ProxyRecord {
    fn new(address: String) -> Self {
        Self {
            address,
            state: ProxyState::Active,
            last_failure: None,
            requests: 0,
            successes: 0,
            failures: 0,
        }
    }

    /// Share of reported outcomes that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.successes as f64 / total as f64 * 100.0
        }
    }

    /// Whether the proxy may be handed out at `now`
    ///
    /// A cooling proxy becomes eligible once its cooldown has fully elapsed.
    fn is_eligible(&self, now: Instant, cooldown: Duration) -> bool {
        match self.state {
            ProxyState::Active => true,
            ProxyState::Banned => false,
            ProxyState::Cooling => self
                .last_failure
                .map(|failed_at| now.saturating_duration_since(failed_at) >= cooldown)
                .unwrap_or(true),
        }
    }
}

/// Number of proxies in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub active: usize,
    pub cooling: usize,
    pub banned: usize,
}

/// Tracks proxy health and hands out eligible proxies at random
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Mutex<Vec<ProxyRecord>>,
    cooldown: Duration,
}

impl ProxyPool {
    /// Creates a pool from an ordered list of `host:port` addresses
    pub fn new(addresses: Vec<String>, cooldown: Duration) -> Self {
        let proxies = addresses.into_iter().map(ProxyRecord::new).collect();
        Self {
            proxies: Mutex::new(proxies),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProxyRecord>> {
        self.proxies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Picks a random eligible proxy
    pub fn acquire(&self) -> Result<ProxyRecord, IdentityError> {
        self.acquire_at(Instant::now())
    }

    /// Picks a random eligible proxy as of `now`
    ///
    /// When nothing is eligible but some proxies are cooling, every cooling
    /// proxy is put back to active once and selection is retried. Banned
    /// proxies are never offered.
    pub fn acquire_at(&self, now: Instant) -> Result<ProxyRecord, IdentityError> {
        let mut proxies = self.lock();

        if let Some(record) = choose_eligible(&mut proxies, now, self.cooldown) {
            return Ok(record);
        }

        let cooling = proxies
            .iter()
            .filter(|p| p.state == ProxyState::Cooling)
            .count();
        if cooling == 0 {
            return Err(IdentityError::PoolExhausted);
        }

        tracing::warn!(
            "No available proxies, resetting {} cooling proxies",
            cooling
        );
        for proxy in proxies.iter_mut() {
            if proxy.state == ProxyState::Cooling {
                proxy.state = ProxyState::Active;
            }
        }

        choose_eligible(&mut proxies, now, self.cooldown).ok_or(IdentityError::PoolExhausted)
    }

    /// Counts one fetch attempt sent through `address`
    pub fn record_request(&self, address: &str) {
        let mut proxies = self.lock();
        if let Some(proxy) = proxies.iter_mut().find(|p| p.address == address) {
            proxy.requests += 1;
        }
    }

    /// Records a successful fetch through `address`
    ///
    /// Success does not change state: the proxy was already eligible.
    pub fn report_success(&self, address: &str) {
        let mut proxies = self.lock();
        if let Some(proxy) = proxies.iter_mut().find(|p| p.address == address) {
            proxy.successes += 1;
            tracing::trace!("Proxy {} succeeded ({} so far)", address, proxy.successes);
        }
    }

    /// Moves `address` to cooling, stamped with the current time
    pub fn report_failure(&self, address: &str) {
        self.report_failure_at(address, Instant::now());
    }

    /// Moves `address` to cooling, stamped with `now`
    pub fn report_failure_at(&self, address: &str, now: Instant) {
        let mut proxies = self.lock();
        if let Some(proxy) = proxies.iter_mut().find(|p| p.address == address) {
            proxy.failures += 1;
            if proxy.state == ProxyState::Banned {
                return;
            }
            tracing::warn!("Marking proxy as failed: {}", address);
            proxy.state = ProxyState::Cooling;
            proxy.last_failure = Some(now);
        }
    }

    /// Bans `address` permanently
    pub fn report_banned(&self, address: &str) {
        let mut proxies = self.lock();
        if let Some(proxy) = proxies.iter_mut().find(|p| p.address == address) {
            proxy.failures += 1;
            if proxy.state != ProxyState::Banned {
                tracing::warn!("Marking proxy as banned: {}", address);
            }
            proxy.state = ProxyState::Banned;
        }
    }

    /// Returns the current state of `address`
    pub fn state_of(&self, address: &str) -> Option<ProxyState> {
        self.lock()
            .iter()
            .find(|p| p.address == address)
            .map(|p| p.state)
    }

    /// Counts proxies per state
    pub fn counts(&self) -> PoolCounts {
        let proxies = self.lock();
        let mut counts = PoolCounts::default();
        for proxy in proxies.iter() {
            match proxy.state {
                ProxyState::Active => counts.active += 1,
                ProxyState::Cooling => counts.cooling += 1,
                ProxyState::Banned => counts.banned += 1,
            }
        }
        counts
    }

    /// Returns a copy of every record, in load order
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.lock().clone()
    }

    /// Highest success rates among proxies with at least `min_requests` attempts
    pub fn best(&self, min_requests: u64, top_n: usize) -> Vec<ProxyRecord> {
        let mut ranked = self.ranked(min_requests);
        ranked.reverse();
        ranked.truncate(top_n);
        ranked
    }

    /// Lowest success rates among proxies with at least `min_requests` attempts
    pub fn worst(&self, min_requests: u64, bottom_n: usize) -> Vec<ProxyRecord> {
        let mut ranked = self.ranked(min_requests);
        ranked.truncate(bottom_n);
        ranked
    }

    /// Qualifying records sorted by ascending success rate, ties in load order
    fn ranked(&self, min_requests: u64) -> Vec<ProxyRecord> {
        let mut ranked: Vec<ProxyRecord> = self
            .lock()
            .iter()
            .filter(|p| p.requests >= min_requests && p.requests > 0)
            .cloned()
            .collect();
        ranked.sort_by(|a, b| a.success_rate().total_cmp(&b.success_rate()));
        ranked
    }

    /// Writes every proxy meeting both thresholds to `path`, one per line
    ///
    /// # Returns
    ///
    /// The number of proxies written. Nothing is written when none qualify.
    pub fn save_best(
        &self,
        path: &Path,
        min_requests: u64,
        min_success_rate: f64,
    ) -> std::io::Result<usize> {
        let qualified: Vec<String> = self
            .lock()
            .iter()
            .filter(|p| {
                p.requests >= min_requests
                    && p.requests > 0
                    && p.success_rate() >= min_success_rate
            })
            .map(|p| p.address.clone())
            .collect();

        if qualified.is_empty() {
            tracing::warn!("No proxies meet the criteria for best proxies");
            return Ok(0);
        }

        let mut contents = qualified.join("\n");
        contents.push('\n');
        std::fs::write(path, contents)?;
        tracing::info!("Saved {} best proxies to {}", qualified.len(), path.display());
        Ok(qualified.len())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Chooses uniformly among eligible proxies, reactivating an expired cooldown
fn choose_eligible(
    proxies: &mut [ProxyRecord],
    now: Instant,
    cooldown: Duration,
) -> Option<ProxyRecord> {
    let eligible: Vec<usize> = proxies
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_eligible(now, cooldown))
        .map(|(idx, _)| idx)
        .collect();

    let idx = *eligible.choose(&mut rand::thread_rng())?;
    let proxy = &mut proxies[idx];
    if proxy.state == ProxyState::Cooling {
        proxy.state = ProxyState::Active;
    }
    Some(proxy.clone())
}
