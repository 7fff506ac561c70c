use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use parley_core::domain::approval::{ApprovalId, SuspendedRun};
use parley_core::domain::conversation::ConversationId;
use parley_core::domain::escalation::{EscalationStats, HumanAlert};
use parley_core::domain::feedback::FeedbackRecord;
use parley_core::domain::webhook::{
    QueueItem, QueueItemId, QueueItemStatus, QueueStats, QueueTransition,
};

pub mod alert;
pub mod approval;
pub mod feedback;
pub mod memory;
pub mod queue;

pub use alert::SqlHumanAlertRepository;
pub use approval::SqlApprovalRepository;
pub use feedback::SqlFeedbackRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryFeedbackRepository, InMemoryHumanAlertRepository,
    InMemoryWebhookQueueRepository,
};
pub use queue::SqlWebhookQueueRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending item; `sequence` is assigned.
    Enqueued(QueueItem),
    /// A live or completed item already exists for the event id.
    Duplicate { existing: Option<QueueItemId> },
}

impl EnqueueOutcome {
    pub fn item(&self) -> Option<&QueueItem> {
        match self {
            Self::Enqueued(item) => Some(item),
            Self::Duplicate { .. } => None,
        }
    }
}

#[async_trait]
pub trait WebhookQueueRepository: Send + Sync {
    /// Atomic check-and-insert keyed by event id. Dead-lettered items do not block.
    async fn enqueue(
        &self,
        item: QueueItem,
        transition: QueueTransition,
    ) -> Result<EnqueueOutcome, RepositoryError>;

    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>, RepositoryError>;

    /// Pending, available items that are at the head of their conversation's line,
    /// in enqueue order.
    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueueItem>, RepositoryError>;

    async fn list_by_status(
        &self,
        status: QueueItemStatus,
        limit: u32,
    ) -> Result<Vec<QueueItem>, RepositoryError>;

    /// Compare-and-swap on `state_version`. Returns `false` when another writer won.
    async fn apply_transition(
        &self,
        item: &QueueItem,
        expected_version: u32,
        transition: QueueTransition,
    ) -> Result<bool, RepositoryError>;

    async fn list_transitions(
        &self,
        item_id: &QueueItemId,
    ) -> Result<Vec<QueueTransition>, RepositoryError>;

    async fn stats(&self) -> Result<QueueStats, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Upserts `run`. Saving a pending run supersedes any other pending run for
    /// the same conversation; the superseded ids are returned.
    async fn save(&self, run: SuspendedRun) -> Result<Vec<ApprovalId>, RepositoryError>;

    async fn load(&self, id: &ApprovalId) -> Result<Option<SuspendedRun>, RepositoryError>;

    async fn find_pending_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<SuspendedRun>, RepositoryError>;

    /// Pending runs ordered by creation time.
    async fn list_pending(&self) -> Result<Vec<SuspendedRun>, RepositoryError>;

    /// Completed runs whose reply still has to be sent, oldest first.
    async fn list_undelivered(&self) -> Result<Vec<SuspendedRun>, RepositoryError>;
}

/// Append-only.
#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn append(&self, record: FeedbackRecord) -> Result<(), RepositoryError>;

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError>;
}

#[async_trait]
pub trait HumanAlertRepository: Send + Sync {
    /// Returns `false` when an alert for the same event was already recorded.
    async fn record(&self, alert: HumanAlert) -> Result<bool, RepositoryError>;

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<HumanAlert>, RepositoryError>;

    async fn stats(&self) -> Result<EscalationStats, RepositoryError>;
}

/// Fixed-width UTC encoding so that string order is chronological order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn decode_json<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn encode_json<T>(column: &str, value: &T) -> Result<String, RepositoryError>
where
    T: serde::Serialize + ?Sized,
{
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}
