use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use parley_core::config::QueueConfig;
use parley_core::domain::webhook::{QueueItem, QueueItemStatus, WebhookEvent};
use parley_core::queue::RetryPolicy;
use parley_db::EnqueueOutcome;

use super::{PipelineDeps, PipelineError, RunController};

const STALE_SCAN_LIMIT: u32 = 500;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Items processed at once across distinct conversations.
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub stale_scan_interval: Duration,
    pub worker_id: String,
}

impl WorkerConfig {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            stale_scan_interval: Duration::from_secs((config.claim_timeout_secs / 2).max(1)),
            worker_id: format!("worker-{}", std::process::id()),
        }
    }
}

/// Bounded worker pool over the webhook queue.
///
/// The queue only offers the head item of each conversation and every item is
/// processed under the conversation lock, so one conversation is handled in
/// enqueue order while distinct conversations proceed in parallel.
#[derive(Clone)]
pub struct Dispatcher {
    deps: PipelineDeps,
    controller: RunController,
    notify: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    config: WorkerConfig,
}

impl Dispatcher {
    pub fn new(deps: PipelineDeps, config: WorkerConfig) -> Self {
        Self {
            controller: RunController::new(deps.clone()),
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            notify: Arc::new(Notify::new()),
            deps,
            config,
        }
    }

    /// Atomically enqueues an inbound event; a redelivered event id is a duplicate.
    pub async fn enqueue(&self, event: WebhookEvent) -> Result<EnqueueOutcome, PipelineError> {
        let created = self.deps.engine.create_item(event)?;
        let outcome = self.deps.queue.enqueue(created.item, created.transition).await?;
        match &outcome {
            EnqueueOutcome::Enqueued(item) => {
                info!(
                    event_name = "queue.item.enqueued",
                    correlation_id = %item.id,
                    event_id = %item.event_id(),
                    conversation_id = item.conversation_id().0,
                    "webhook event enqueued"
                );
                self.notify.notify_one();
            }
            EnqueueOutcome::Duplicate { existing } => {
                debug!(
                    event_name = "queue.item.duplicate",
                    existing = existing.as_ref().map(|id| id.0.as_str()).unwrap_or_default(),
                    "duplicate webhook event ignored"
                );
            }
        }
        Ok(outcome)
    }

    /// Returns abandoned processing claims to pending.
    pub async fn recover_stale(&self) -> Result<usize, PipelineError> {
        let now = Utc::now();
        let processing =
            self.deps.queue.list_by_status(QueueItemStatus::Processing, STALE_SCAN_LIMIT).await?;
        let mut released = 0;
        for item in self.deps.engine.stale_items(processing, now) {
            let expected = item.state_version;
            let result = self.deps.engine.release_stale(item, now)?;
            if self.deps.queue.apply_transition(&result.item, expected, result.transition).await? {
                warn!(
                    event_name = "queue.item.stale_released",
                    correlation_id = %result.item.id,
                    conversation_id = result.item.conversation_id().0,
                    "released abandoned claim"
                );
                released += 1;
            }
        }
        if released > 0 {
            self.notify.notify_one();
        }
        Ok(released)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "worker.started",
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            "dispatcher started"
        );
        if let Err(error) = self.recover_stale().await {
            warn!(event_name = "worker.recovery_failed", error = %error, "stale claim recovery failed");
        }
        let mut last_scan = Instant::now();
        let mut tasks = JoinSet::new();

        while !*shutdown.borrow() {
            if let Err(error) = self.dispatch_ready(&mut tasks).await {
                warn!(event_name = "worker.dispatch_failed", error = %error, "dispatch pass failed");
            }
            if last_scan.elapsed() >= self.config.stale_scan_interval {
                if let Err(error) = self.recover_stale().await {
                    warn!(event_name = "worker.recovery_failed", error = %error, "stale claim recovery failed");
                }
                last_scan = Instant::now();
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }

        info!(event_name = "worker.draining", in_flight = tasks.len(), "dispatcher draining");
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        info!(event_name = "worker.stopped", "dispatcher stopped");
    }

    /// Claims what the free slots allow and spawns one task per item.
    async fn dispatch_ready(&self, tasks: &mut JoinSet<()>) -> Result<usize, PipelineError> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }
        let now = Utc::now();
        let limit = u32::try_from(available).unwrap_or(u32::MAX);
        let ready = self.deps.queue.list_dispatchable(now, limit).await?;

        let mut dispatched = 0;
        for item in ready {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            let expected = item.state_version;
            let claimed = match self.deps.engine.claim(item, self.config.worker_id.as_str(), now) {
                Ok(claimed) => claimed,
                Err(error) => {
                    debug!(event_name = "queue.item.claim_skipped", error = %error, "item not claimable");
                    continue;
                }
            };
            if !self.deps.queue.apply_transition(&claimed.item, expected, claimed.transition).await? {
                debug!(
                    event_name = "queue.item.claim_lost",
                    correlation_id = %claimed.item.id,
                    "another worker claimed the item"
                );
                continue;
            }

            let worker = self.clone();
            let item = claimed.item;
            tasks.spawn(async move {
                let _permit = permit;
                worker.process(item).await;
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }

    async fn process(&self, item: QueueItem) {
        let conversation_id = item.conversation_id();
        let guard = self.deps.locks.acquire(conversation_id).await;
        let result = self.controller.handle_item(&item).await;

        let item_id = item.id.clone();
        let expected = item.state_version;
        let finished = match &result {
            Ok(outcome) => {
                info!(
                    event_name = "queue.item.processed",
                    correlation_id = %item_id,
                    conversation_id = conversation_id.0,
                    outcome = outcome.as_str(),
                    "queue item processed"
                );
                self.deps.engine.complete(item)
            }
            Err(failure) => {
                let class = failure.class();
                let policy =
                    if class.is_retryable() { RetryPolicy::Retry } else { RetryPolicy::FailTerminal };
                self.deps.engine.fail(item, failure.to_string(), class.as_str(), policy)
            }
        };

        match finished {
            Ok(finished) => {
                if let Err(failure) = &result {
                    if finished.item.is_dead_lettered() {
                        error!(
                            event_name = "queue.item.dead_lettered",
                            correlation_id = %item_id,
                            conversation_id = conversation_id.0,
                            attempts = finished.item.attempts,
                            error = %failure,
                            "queue item dead-lettered"
                        );
                    } else {
                        warn!(
                            event_name = "queue.item.retry_scheduled",
                            correlation_id = %item_id,
                            conversation_id = conversation_id.0,
                            attempts = finished.item.attempts,
                            available_at = %finished.item.available_at,
                            error = %failure,
                            "queue item failed; retry scheduled"
                        );
                    }
                }
                match self.deps.queue.apply_transition(&finished.item, expected, finished.transition).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        event_name = "queue.item.finish_lost",
                        correlation_id = %item_id,
                        "item changed while processing; result not recorded"
                    ),
                    Err(failure) => error!(
                        event_name = "queue.item.finish_failed",
                        correlation_id = %item_id,
                        error = %failure,
                        "could not persist queue item result"
                    ),
                }
            }
            Err(failure) => error!(
                event_name = "queue.item.transition_rejected",
                correlation_id = %item_id,
                error = %failure,
                "queue item could not be finished"
            ),
        }

        drop(guard);
        self.deps.locks.prune();
        self.notify.notify_one();
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(failure) = joined {
        error!(event_name = "worker.task_panicked", error = %failure, "worker task aborted");
    }
}
