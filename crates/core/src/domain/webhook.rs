use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalId;
use crate::domain::conversation::ConversationId;

const FOLLOW_UP_PREFIX: &str = "follow_up:";

/// Platform-provided identity of an inbound event. Globally unique; the dedup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Internal event answering the messages deferred behind `approval_id`.
    pub fn follow_up(approval_id: &ApprovalId) -> Self {
        Self(format!("{FOLLOW_UP_PREFIX}{approval_id}"))
    }

    pub fn is_follow_up(&self) -> bool {
        self.0.starts_with(FOLLOW_UP_PREFIX)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(pub String);

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueTransitionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: EventId,
    pub conversation_id: ConversationId,
    pub message_text: String,
    pub is_incoming: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Statuses that make a redelivery of the same event a duplicate.
    /// Dead-lettered items do not block a fresh delivery.
    pub fn blocks_redelivery(&self) -> bool {
        !matches!(self, Self::Failed)
    }

    /// Pending and processing items hold their conversation's place in line.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    /// Monotonic enqueue order; assigned by the repository on insert.
    pub sequence: i64,
    pub payload: WebhookEvent,
    pub payload_hash: String,
    pub status: QueueItemStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub state_version: u32,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn event_id(&self) -> &EventId {
        &self.payload.event_id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.payload.conversation_id
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.status == QueueItemStatus::Failed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTransition {
    pub id: QueueTransitionId,
    pub item_id: QueueItemId,
    pub event_id: EventId,
    pub from_status: Option<QueueItemStatus>,
    pub to_status: QueueItemStatus,
    pub reason: String,
    pub error_class: Option<String>,
    pub attempts: u32,
    pub actor_id: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.done + self.failed
    }

    pub fn record(&mut self, status: QueueItemStatus, count: u64) {
        match status {
            QueueItemStatus::Pending => self.pending += count,
            QueueItemStatus::Processing => self.processing += count,
            QueueItemStatus::Done => self.done += count,
            QueueItemStatus::Failed => self.failed += count,
        }
    }
}
