use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::domain::approval::{ApprovalId, SuspendedRun, SuspendedRunStatus};
use parley_core::domain::conversation::ConversationId;
use parley_core::domain::escalation::{EscalationStats, HumanAlert};
use parley_core::domain::feedback::FeedbackRecord;
use parley_core::domain::webhook::{
    QueueItem, QueueItemId, QueueItemStatus, QueueStats, QueueTransition,
};

use super::{
    ApprovalRepository, EnqueueOutcome, FeedbackRepository, HumanAlertRepository,
    RepositoryError, WebhookQueueRepository,
};

#[derive(Default)]
struct QueueState {
    items: Vec<QueueItem>,
    transitions: Vec<QueueTransition>,
}

#[derive(Default)]
pub struct InMemoryWebhookQueueRepository {
    state: RwLock<QueueState>,
}

#[async_trait::async_trait]
impl WebhookQueueRepository for InMemoryWebhookQueueRepository {
    async fn enqueue(
        &self,
        mut item: QueueItem,
        transition: QueueTransition,
    ) -> Result<EnqueueOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .items
            .iter()
            .rev()
            .find(|stored| stored.event_id() == item.event_id() && stored.status.blocks_redelivery())
        {
            return Ok(EnqueueOutcome::Duplicate { existing: Some(existing.id.clone()) });
        }

        item.sequence = state.items.last().map_or(1, |last| last.sequence + 1);
        state.items.push(item.clone());
        state.transitions.push(transition);
        Ok(EnqueueOutcome::Enqueued(item))
    }

    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.items.iter().find(|item| &item.id == id).cloned())
    }

    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueueItem>, RepositoryError> {
        let state = self.state.read().await;
        let mut seen_conversations = Vec::new();
        let mut ready = Vec::new();

        for item in &state.items {
            if !item.status.is_open() {
                continue;
            }
            let conversation_id = item.conversation_id();
            if seen_conversations.contains(&conversation_id) {
                continue;
            }
            seen_conversations.push(conversation_id);
            if item.status == QueueItemStatus::Pending && item.available_at <= now {
                ready.push(item.clone());
            }
        }

        ready.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(ready)
    }

    async fn list_by_status(
        &self,
        status: QueueItemStatus,
        limit: u32,
    ) -> Result<Vec<QueueItem>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .iter()
            .filter(|item| item.status == status)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn apply_transition(
        &self,
        item: &QueueItem,
        expected_version: u32,
        transition: QueueTransition,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.items.iter_mut().find(|stored| stored.id == item.id) else {
            return Ok(false);
        };
        if stored.state_version != expected_version {
            return Ok(false);
        }

        let sequence = stored.sequence;
        *stored = item.clone();
        stored.sequence = sequence;
        state.transitions.push(transition);
        Ok(true)
    }

    async fn list_transitions(
        &self,
        item_id: &QueueItemId,
    ) -> Result<Vec<QueueTransition>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.transitions.iter().filter(|transition| &transition.item_id == item_id).cloned().collect())
    }

    async fn stats(&self) -> Result<QueueStats, RepositoryError> {
        let state = self.state.read().await;
        let mut stats = QueueStats::default();
        for item in &state.items {
            stats.record(item.status, 1);
        }
        Ok(stats)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    runs: RwLock<HashMap<String, SuspendedRun>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn save(&self, run: SuspendedRun) -> Result<Vec<ApprovalId>, RepositoryError> {
        let mut runs = self.runs.write().await;
        let mut superseded = Vec::new();

        if run.is_pending() {
            for other in runs.values_mut() {
                if other.conversation_id == run.conversation_id
                    && other.is_pending()
                    && other.id != run.id
                {
                    other.status = SuspendedRunStatus::Superseded;
                    other.updated_at = run.updated_at;
                    superseded.push(other.id.clone());
                }
            }
        }

        runs.insert(run.id.0.clone(), run);
        Ok(superseded)
    }

    async fn load(&self, id: &ApprovalId) -> Result<Option<SuspendedRun>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&id.0).cloned())
    }

    async fn find_pending_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<SuspendedRun>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .find(|run| run.conversation_id == conversation_id && run.is_pending())
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<SuspendedRun>, RepositoryError> {
        let runs = self.runs.read().await;
        let mut pending: Vec<_> = runs.values().filter(|run| run.is_pending()).cloned().collect();
        pending.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(pending)
    }

    async fn list_undelivered(&self) -> Result<Vec<SuspendedRun>, RepositoryError> {
        let runs = self.runs.read().await;
        let mut undelivered: Vec<_> = runs
            .values()
            .filter(|run| run.status == SuspendedRunStatus::Undelivered)
            .cloned()
            .collect();
        undelivered.sort_by(|left, right| {
            left.updated_at.cmp(&right.updated_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(undelivered)
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl InMemoryFeedbackRepository {
    pub async fn all(&self) -> Vec<FeedbackRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn append(&self, record: FeedbackRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.iter().any(|existing| existing.id == record.id) {
            return Err(RepositoryError::Decode(format!(
                "feedback record `{}` already exists",
                record.id.0
            )));
        }
        records.push(record);
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| record.conversation_id == conversation_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryHumanAlertRepository {
    alerts: RwLock<Vec<HumanAlert>>,
}

#[async_trait::async_trait]
impl HumanAlertRepository for InMemoryHumanAlertRepository {
    async fn record(&self, alert: HumanAlert) -> Result<bool, RepositoryError> {
        let mut alerts = self.alerts.write().await;
        if alerts.iter().any(|existing| existing.event_id == alert.event_id) {
            return Ok(false);
        }
        alerts.push(alert);
        Ok(true)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<HumanAlert>, RepositoryError> {
        let alerts = self.alerts.read().await;
        Ok(alerts.iter().filter(|alert| alert.conversation_id == conversation_id).cloned().collect())
    }

    async fn stats(&self) -> Result<EscalationStats, RepositoryError> {
        let alerts = self.alerts.read().await;
        Ok(EscalationStats::from_alerts(alerts.iter()))
    }
}
