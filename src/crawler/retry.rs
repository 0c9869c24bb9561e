//! Retry decisions
//!
//! `RetryPolicy::decide` is the second stage after classification. It owns
//! the per-task counters and the proxy health reports, and answers with a
//! tagged decision the coordinator acts on. Every retry path is bounded by
//! `max-transient` or `max-blocked`.

use crate::config::RetryConfig;
use crate::crawler::classifier::{Classification, TransientCause};
use crate::crawler::task::FetchTask;
use crate::identity::ProxyPool;
use crate::output::Diagnostics;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// What to do with a task after one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Hand the page to extraction
    Proceed,
    /// Attempt again after `delay`, with a fresh identity when `new_identity`
    Retry { delay: Duration, new_identity: bool },
    /// Abandon the task
    Fatal { reason: String },
}

pub struct RetryPolicy {
    config: RetryConfig,
    pool: Arc<ProxyPool>,
    diagnostics: Arc<Diagnostics>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, pool: Arc<ProxyPool>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            config,
            pool,
            diagnostics,
        }
    }

    /// Transient backoff: base delay plus uniform jitter
    pub fn backoff(&self) -> Duration {
        let jitter = if self.config.jitter_max_ms > self.config.jitter_min_ms {
            rand::thread_rng().gen_range(self.config.jitter_min_ms..=self.config.jitter_max_ms)
        } else {
            self.config.jitter_min_ms
        };
        Duration::from_millis(self.config.base_delay_ms + jitter)
    }

    fn last_proxy(task: &FetchTask) -> Option<String> {
        task.last_identity.as_ref().and_then(|id| id.proxy.clone())
    }

    /// Decides the next step for `task` given the classification of its latest attempt
    ///
    /// Updates the task's counters and reports the proxy it used to the pool.
    pub fn decide(&self, task: &mut FetchTask, classification: &Classification) -> RetryDecision {
        match classification {
            Classification::Success => {
                if let Some(proxy) = Self::last_proxy(task) {
                    self.pool.report_success(&proxy);
                }
                task.transient_attempts = 0;
                task.block_attempts = 0;
                task.last_blocked_proxy = None;
                RetryDecision::Proceed
            }

            Classification::Transient(cause) => {
                task.last_blocked_proxy = None;

                // A dead connection is the proxy's fault; rotate away from it
                let proxy_failed = matches!(cause, TransientCause::Transport(_));
                if proxy_failed {
                    if let Some(proxy) = Self::last_proxy(task) {
                        self.pool.report_failure(&proxy);
                        self.diagnostics.proxy_failures.inc();
                    }
                }

                if task.transient_attempts >= self.config.max_transient {
                    return RetryDecision::Fatal {
                        reason: format!(
                            "{} after {} transient retries",
                            classification, task.transient_attempts
                        ),
                    };
                }

                task.transient_attempts += 1;
                self.diagnostics.retries_scheduled.inc();
                let new_identity = proxy_failed
                    || matches!(cause, TransientCause::NoIdentity)
                    || task.last_identity.is_none()
                    || !self.config.reuse_identity_on_transient;
                RetryDecision::Retry {
                    delay: self.backoff(),
                    new_identity,
                }
            }

            Classification::Blocked { .. } => {
                if let Some(proxy) = Self::last_proxy(task) {
                    if task.last_blocked_proxy.as_deref() == Some(proxy.as_str()) {
                        self.pool.report_banned(&proxy);
                        self.diagnostics.proxy_bans.inc();
                    } else {
                        self.pool.report_failure(&proxy);
                        self.diagnostics.proxy_failures.inc();
                    }
                    task.last_blocked_proxy = Some(proxy);
                }

                if task.block_attempts >= self.config.max_blocked {
                    return RetryDecision::Fatal {
                        reason: format!("blocked {} times", task.block_attempts + 1),
                    };
                }

                task.block_attempts += 1;
                self.diagnostics.retries_scheduled.inc();
                RetryDecision::Retry {
                    delay: Duration::from_millis(self.config.blocked_delay_ms),
                    new_identity: true,
                }
            }

            Classification::Fatal { reason } => RetryDecision::Fatal {
                reason: reason.clone(),
            },
        }
    }
}
