//! Deterministic webhook queue state machine.
//!
//! Pure transition logic for queue items: creation, claiming, completion,
//! bounded retry with capped exponential backoff, dead-lettering and stale-claim
//! recovery. Every transition yields an audit row; persistence is the caller's job.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::webhook::{
    QueueItem, QueueItemId, QueueItemStatus, QueueTransition, QueueTransitionId, WebhookEvent,
};

#[derive(Clone, Debug)]
pub struct QueueEngineConfig {
    /// Failures allowed before an item is dead-lettered.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long before a processing claim is considered abandoned.
    pub claim_timeout_secs: i64,
}

impl Default for QueueEngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            claim_timeout_secs: 300,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("invalid queue transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: QueueItemStatus, to: QueueItemStatus, reason: String },
    #[error("queue item {0} is already claimed by {1}")]
    ClaimConflict(QueueItemId, String),
    #[error("queue item {0} is not yet available")]
    NotYetAvailable(QueueItemId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub item: QueueItem,
    pub transition: QueueTransition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Return to pending after backoff while attempts remain.
    Retry,
    /// Dead-letter immediately.
    FailTerminal,
}

#[derive(Clone, Debug, Default)]
pub struct QueueEngine {
    config: QueueEngineConfig,
}

impl QueueEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: QueueEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueueEngineConfig {
        &self.config
    }

    /// Builds a pending item for an inbound event. Fails only on caller misuse.
    pub fn create_item(&self, event: WebhookEvent) -> Result<TransitionResult, QueueError> {
        if event.event_id.0.trim().is_empty() {
            return Err(QueueError::MalformedEvent("event id must not be empty".to_string()));
        }
        if !event.is_incoming {
            return Err(QueueError::MalformedEvent(
                "only incoming customer messages are enqueued".to_string(),
            ));
        }

        let now = Utc::now();
        let payload_hash = hash_payload(&event);
        let item = QueueItem {
            id: QueueItemId(Uuid::new_v4().to_string()),
            sequence: 0,
            payload: event,
            payload_hash,
            status: QueueItemStatus::Pending,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            state_version: 1,
            enqueued_at: now,
            updated_at: now,
        };
        let transition =
            Self::transition(&item, None, "item_enqueued", None, "ingress".to_string(), now);

        Ok(TransitionResult { item, transition })
    }

    /// pending -> processing. A stale processing claim may be stolen.
    pub fn claim(
        &self,
        mut item: QueueItem,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, QueueError> {
        let worker_id = worker_id.into();

        match item.status {
            QueueItemStatus::Pending => {}
            QueueItemStatus::Processing => {
                if !self.is_stale(&item, now) {
                    return Err(QueueError::ClaimConflict(
                        item.id.clone(),
                        item.claimed_by.clone().unwrap_or_default(),
                    ));
                }
            }
            QueueItemStatus::Done | QueueItemStatus::Failed => {
                return Err(QueueError::InvalidTransition {
                    from: item.status,
                    to: QueueItemStatus::Processing,
                    reason: "item already in terminal state".to_string(),
                });
            }
        }

        if now < item.available_at {
            return Err(QueueError::NotYetAvailable(item.id.clone()));
        }

        let from = item.status;
        item.status = QueueItemStatus::Processing;
        item.claimed_by = Some(worker_id.clone());
        item.claimed_at = Some(now);
        item.state_version += 1;
        item.updated_at = now;

        let transition = Self::transition(&item, Some(from), "item_claimed", None, worker_id, now);
        Ok(TransitionResult { item, transition })
    }

    /// processing -> done.
    pub fn complete(&self, mut item: QueueItem) -> Result<TransitionResult, QueueError> {
        self.validate_transition(&item, QueueItemStatus::Done)?;

        let now = Utc::now();
        let from = item.status;
        let actor = item.claimed_by.take().unwrap_or_else(|| "system".to_string());
        item.status = QueueItemStatus::Done;
        item.claimed_at = None;
        item.state_version += 1;
        item.updated_at = now;

        let transition = Self::transition(&item, Some(from), "item_completed", None, actor, now);
        Ok(TransitionResult { item, transition })
    }

    /// processing -> pending (retry after backoff) or processing -> failed (dead-letter).
    ///
    /// Every failure counts as an attempt. Once `attempts` reaches `max_attempts`,
    /// or the policy is terminal, the item is dead-lettered and never retried.
    pub fn fail(
        &self,
        mut item: QueueItem,
        error: impl Into<String>,
        error_class: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Result<TransitionResult, QueueError> {
        self.validate_transition(&item, QueueItemStatus::Failed)?;

        let now = Utc::now();
        let error = error.into();
        let error_class = error_class.into();
        let from = item.status;
        let actor = item.claimed_by.take().unwrap_or_else(|| "system".to_string());

        item.attempts += 1;
        item.last_error = Some(error);
        item.claimed_at = None;
        item.state_version += 1;
        item.updated_at = now;

        let should_retry =
            matches!(retry_policy, RetryPolicy::Retry) && item.attempts < item.max_attempts;

        let reason = if should_retry {
            item.status = QueueItemStatus::Pending;
            item.available_at = now + self.backoff_delay(item.attempts);
            "item_failed_retryable"
        } else {
            item.status = QueueItemStatus::Failed;
            "item_dead_lettered"
        };

        let transition =
            Self::transition(&item, Some(from), reason, Some(error_class), actor, now);
        Ok(TransitionResult { item, transition })
    }

    /// Returns an abandoned processing item to pending without counting an attempt.
    pub fn release_stale(
        &self,
        mut item: QueueItem,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, QueueError> {
        if item.status != QueueItemStatus::Processing || !self.is_stale(&item, now) {
            return Err(QueueError::InvalidTransition {
                from: item.status,
                to: QueueItemStatus::Pending,
                reason: "only stale processing claims can be released".to_string(),
            });
        }

        let from = item.status;
        item.status = QueueItemStatus::Pending;
        item.claimed_by = None;
        item.claimed_at = None;
        item.available_at = now;
        item.state_version += 1;
        item.updated_at = now;

        let transition = Self::transition(
            &item,
            Some(from),
            "stale_claim_released",
            None,
            "recovery".to_string(),
            now,
        );
        Ok(TransitionResult { item, transition })
    }

    pub fn stale_items(&self, items: Vec<QueueItem>, reference_time: DateTime<Utc>) -> Vec<QueueItem> {
        items.into_iter().filter(|item| self.is_stale(item, reference_time)).collect()
    }

    pub fn stale_threshold(&self, reference_time: DateTime<Utc>) -> DateTime<Utc> {
        reference_time - Duration::seconds(self.config.claim_timeout_secs)
    }

    /// `min(base * 2^(attempts - 1), max)`; zero attempts means no delay.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::zero();
        }
        let exponent = (attempts - 1).min(32);
        let raw = self.config.retry_base_delay_ms.saturating_mul(1_u64 << exponent);
        let capped = raw.min(self.config.retry_max_delay_ms);
        Duration::milliseconds(i64::try_from(capped).unwrap_or(i64::MAX))
    }

    fn is_stale(&self, item: &QueueItem, reference_time: DateTime<Utc>) -> bool {
        item.status == QueueItemStatus::Processing
            && item.claimed_at.is_some_and(|claimed_at| claimed_at < self.stale_threshold(reference_time))
    }

    fn validate_transition(&self, item: &QueueItem, to: QueueItemStatus) -> Result<(), QueueError> {
        if item.status == QueueItemStatus::Processing {
            return Ok(());
        }

        Err(QueueError::InvalidTransition {
            from: item.status,
            to,
            reason: format!("cannot transition from {:?} to {:?}", item.status, to),
        })
    }

    fn transition(
        item: &QueueItem,
        from: Option<QueueItemStatus>,
        reason: &str,
        error_class: Option<String>,
        actor_id: String,
        now: DateTime<Utc>,
    ) -> QueueTransition {
        QueueTransition {
            id: QueueTransitionId(Uuid::new_v4().to_string()),
            item_id: item.id.clone(),
            event_id: item.payload.event_id.clone(),
            from_status: from,
            to_status: item.status,
            reason: reason.to_string(),
            error_class,
            attempts: item.attempts,
            actor_id,
            state_version: item.state_version,
            occurred_at: now,
        }
    }
}

fn hash_payload(event: &WebhookEvent) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(event.event_id.0.as_bytes());
    hasher.update(event.conversation_id.0.to_be_bytes());
    hasher.update(event.message_text.as_bytes());
    format!("{:x}", hasher.finalize())
}
