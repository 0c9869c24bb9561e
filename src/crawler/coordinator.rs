//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that coordinates:
//! - Admitting pending tasks from the scheduler into a bounded fetch pool
//! - Issuing identities, pacing requests and fetching pages
//! - Classifying every attempt and applying the retry policy
//! - Handing extracted records to the persistence shards
//! - Honouring the stop signal while letting in-flight work drain

use crate::crawler::classifier::{Classification, FailureClassifier, TransientCause};
use crate::crawler::extractor::{Extraction, Extractor};
use crate::crawler::fetcher::{FetchResponse, Fetcher};
use crate::crawler::retry::{RetryDecision, RetryPolicy};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::task::FetchTask;
use crate::identity::{IdentityError, IdentityRotator};
use crate::output::{Diagnostics, DropReason};
use crate::persistence::PersistenceWriter;
use crate::state::{RequestPacer, RetryKind, TaskState};
use crate::storage::Store;
use crate::HarvestError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// How often (in finished tasks) progress is logged
const PROGRESS_EVERY: u64 = 50;

/// Task outcome counts of one crawl
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub succeeded: u64,
    pub fatal: u64,
    /// Tasks left unfinished because the run was stopped
    pub interrupted: u64,
    pub stopped: bool,
}

enum AttemptOutcome {
    Response(FetchResponse),
    NoIdentity(IdentityError),
}

enum AttemptResult {
    Fetched {
        task: FetchTask,
        outcome: AttemptOutcome,
        fresh: bool,
    },
    /// The stop signal arrived before the task could enter flight
    Cancelled { task: FetchTask, fresh: bool },
}

enum LoopEvent {
    Joined(Option<Result<AttemptResult, tokio::task::JoinError>>),
    Stop,
    StopClosed,
}

/// Main crawler coordinator structure
pub struct Coordinator<F: Fetcher + 'static, E: Extractor> {
    scheduler: Scheduler,
    fetcher: Arc<F>,
    extractor: E,
    rotator: Arc<IdentityRotator>,
    classifier: FailureClassifier,
    policy: RetryPolicy,
    pacer: Arc<RequestPacer>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    diagnostics: Arc<Diagnostics>,
    stop: watch::Receiver<bool>,
}

impl<F: Fetcher + 'static, E: Extractor> Coordinator<F, E> {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Traversal state, not yet seeded
    /// * `fetcher` - Network collaborator
    /// * `extractor` - Site-specific parsing collaborator
    /// * `rotator` - Identity source
    /// * `classifier` - Outcome labelling
    /// * `policy` - Retry decisions
    /// * `pacer` - Spacing of fetch starts
    /// * `concurrency` - Maximum fetches in flight
    /// * `diagnostics` - Shared counters and failure ledger
    /// * `stop` - Flips to `true` when new work must no longer be admitted
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Scheduler,
        fetcher: Arc<F>,
        extractor: E,
        rotator: Arc<IdentityRotator>,
        classifier: FailureClassifier,
        policy: RetryPolicy,
        pacer: Arc<RequestPacer>,
        concurrency: usize,
        diagnostics: Arc<Diagnostics>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            scheduler,
            fetcher,
            extractor,
            rotator,
            classifier,
            policy,
            pacer,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            diagnostics,
            stop,
        }
    }

    /// Runs the crawl loop until no pending or in-flight task remains
    ///
    /// Records go to `writer`; the caller shuts the writer down afterwards.
    pub async fn run<S: Store + 'static>(
        &mut self,
        writer: &PersistenceWriter<S>,
    ) -> Result<CrawlSummary, HarvestError> {
        self.scheduler.seed()?;

        let mut attempts: JoinSet<AttemptResult> = JoinSet::new();
        let mut summary = CrawlSummary::default();
        let mut stop = self.stop.clone();
        let mut stopped = *stop.borrow();
        let mut watching = true;
        let mut fresh_in_flight = 0usize;
        let mut finished = 0u64;
        let start = Instant::now();

        loop {
            if !stopped {
                while fresh_in_flight < self.concurrency {
                    let Some(task) = self.scheduler.next_task() else {
                        break;
                    };
                    self.spawn_attempt(&mut attempts, task, Duration::ZERO, false, true);
                    fresh_in_flight += 1;
                }
            }

            if attempts.is_empty() {
                break;
            }

            let event = tokio::select! {
                joined = attempts.join_next() => LoopEvent::Joined(joined),
                changed = stop.changed(), if watching => {
                    if changed.is_err() {
                        LoopEvent::StopClosed
                    } else {
                        LoopEvent::Stop
                    }
                }
            };

            match event {
                LoopEvent::Joined(None) => break,
                LoopEvent::Joined(Some(Err(e))) => {
                    // The task is lost with the panic; there is nothing to retry
                    tracing::error!("Fetch task failed: {}", e);
                    fresh_in_flight = fresh_in_flight.saturating_sub(1);
                }
                LoopEvent::Joined(Some(Ok(result))) => {
                    let fresh = match &result {
                        AttemptResult::Fetched { fresh, .. } | AttemptResult::Cancelled { fresh, .. } => *fresh,
                    };
                    if fresh {
                        fresh_in_flight = fresh_in_flight.saturating_sub(1);
                    }
                    let done =
                        self.handle_result(result, &mut attempts, writer, &mut summary, stopped)?;
                    if done {
                        finished += 1;
                        if finished % PROGRESS_EVERY == 0 {
                            let rate = finished as f64 / start.elapsed().as_secs_f64().max(0.001);
                            tracing::info!(
                                "Progress: {} tasks finished, {} pending, {} in flight, {} records queued, {:.2} tasks/sec",
                                finished,
                                self.scheduler.pending_count(),
                                attempts.len(),
                                writer.backlog(),
                                rate
                            );
                        }
                    }
                }
                LoopEvent::Stop => {
                    if *stop.borrow() && !stopped {
                        stopped = true;
                        tracing::warn!(
                            "Stop requested: draining {} in-flight task(s), {} pending task(s) will not start",
                            attempts.len(),
                            self.scheduler.pending_count()
                        );
                    }
                }
                LoopEvent::StopClosed => watching = false,
            }
        }

        if stopped {
            summary.stopped = true;
            summary.interrupted += self.scheduler.drain_pending().len() as u64;
        }

        tracing::info!(
            "Crawl loop finished in {:?}: {} succeeded, {} fatal, {} interrupted",
            start.elapsed(),
            summary.succeeded,
            summary.fatal,
            summary.interrupted
        );
        Ok(summary)
    }

    /// Spawns one attempt of `task` after `delay`
    fn spawn_attempt(
        &self,
        attempts: &mut JoinSet<AttemptResult>,
        mut task: FetchTask,
        delay: Duration,
        reuse_identity: bool,
        fresh: bool,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let rotator = Arc::clone(&self.rotator);
        let pacer = Arc::clone(&self.pacer);
        let semaphore = Arc::clone(&self.semaphore);
        let stop = self.stop.clone();

        attempts.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return AttemptResult::Cancelled { task, fresh },
            };
            if *stop.borrow() {
                return AttemptResult::Cancelled { task, fresh };
            }

            let identity = match task.last_identity.clone().filter(|_| reuse_identity) {
                Some(identity) => Ok(identity),
                None => rotator.next(),
            };

            task.transition(TaskState::InFlight);
            task.attempts += 1;

            match identity {
                Ok(identity) => {
                    pacer.wait_turn().await;
                    rotator.record_use(&identity);
                    let response = fetcher.fetch(&task.url, &identity).await;
                    task.last_identity = Some(identity);
                    AttemptResult::Fetched {
                        task,
                        outcome: AttemptOutcome::Response(response),
                        fresh,
                    }
                }
                Err(e) => {
                    task.last_identity = None;
                    AttemptResult::Fetched {
                        task,
                        outcome: AttemptOutcome::NoIdentity(e),
                        fresh,
                    }
                }
            }
        });
    }

    /// Classifies one attempt and acts on the retry decision
    ///
    /// Returns true when the task reached a terminal state or was interrupted.
    fn handle_result<S: Store + 'static>(
        &mut self,
        result: AttemptResult,
        attempts: &mut JoinSet<AttemptResult>,
        writer: &PersistenceWriter<S>,
        summary: &mut CrawlSummary,
        stopped: bool,
    ) -> Result<bool, HarvestError> {
        let (mut task, outcome) = match result {
            AttemptResult::Cancelled { task, .. } => {
                tracing::debug!("Task {} ({}) not started: run stopping", task.id, task.url);
                summary.interrupted += 1;
                return Ok(true);
            }
            AttemptResult::Fetched { task, outcome, .. } => (task, outcome),
        };

        let (classification, extraction) = self.classify(&task, outcome);
        self.record_outcome(&classification);
        tracing::debug!(
            "Task {} {} attempt {} via {}: {}",
            task.id,
            task.url,
            task.attempts,
            task.last_identity
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "no identity".to_string()),
            classification
        );

        match self.policy.decide(&mut task, &classification) {
            RetryDecision::Proceed => {
                task.transition(TaskState::Success);
                summary.succeeded += 1;
                let records = self
                    .scheduler
                    .complete(&task, extraction.unwrap_or_default());
                for record in records {
                    writer.submit(record)?;
                }
                Ok(true)
            }

            RetryDecision::Retry { delay, new_identity } => {
                let kind = if matches!(classification, Classification::Blocked { .. }) {
                    RetryKind::Blocked
                } else {
                    RetryKind::Transient
                };
                task.transition(TaskState::Retryable(kind));

                if stopped {
                    tracing::debug!("Task {} ({}) not retried: run stopping", task.id, task.url);
                    summary.interrupted += 1;
                    return Ok(true);
                }

                if kind == RetryKind::Blocked {
                    tracing::warn!(
                        "Blocked on {} (attempt {}), retrying with a new identity",
                        task.url,
                        task.attempts
                    );
                }
                task.transition(TaskState::Pending);
                self.spawn_attempt(attempts, task, delay, !new_identity, false);
                Ok(false)
            }

            RetryDecision::Fatal { reason } => {
                task.transition(TaskState::Fatal);
                summary.fatal += 1;
                self.diagnostics.record_drop(
                    DropReason::FatalTask,
                    task.url.to_string(),
                    format!("{} after {} attempt(s): {}", task.kind, task.attempts, reason),
                );
                Ok(true)
            }
        }
    }

    /// Labels an attempt; a successful fetch is only a success once extraction succeeds
    fn classify(&self, task: &FetchTask, outcome: AttemptOutcome) -> (Classification, Option<Extraction>) {
        match outcome {
            AttemptOutcome::NoIdentity(e) => {
                self.diagnostics.identities_exhausted.inc();
                tracing::warn!("No identity for {}: {}", task.url, e);
                (Classification::Transient(TransientCause::NoIdentity), None)
            }
            AttemptOutcome::Response(response) => {
                let classification = self.classifier.classify(&response);
                match (classification, response) {
                    (Classification::Success, Ok(page)) => {
                        match self.extractor.extract(&page.body, task) {
                            Ok(extraction) => (Classification::Success, Some(extraction)),
                            Err(e) => {
                                tracing::warn!("Extraction failed for {}: {}", task.url, e);
                                (
                                    Classification::Transient(TransientCause::Malformed(e.to_string())),
                                    None,
                                )
                            }
                        }
                    }
                    (classification, _) => (classification, None),
                }
            }
        }
    }

    fn record_outcome(&self, classification: &Classification) {
        let counter = match classification {
            Classification::Success => &self.diagnostics.attempts_success,
            Classification::Transient(_) => &self.diagnostics.attempts_transient,
            Classification::Blocked { .. } => &self.diagnostics.attempts_blocked,
            Classification::Fatal { .. } => &self.diagnostics.attempts_fatal,
        };
        counter.inc();
    }
}
