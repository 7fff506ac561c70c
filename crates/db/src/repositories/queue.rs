use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use parley_core::domain::conversation::ConversationId;
use parley_core::domain::webhook::{
    EventId, QueueItem, QueueItemId, QueueItemStatus, QueueStats, QueueTransition,
    QueueTransitionId, WebhookEvent,
};

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, EnqueueOutcome,
    RepositoryError, WebhookQueueRepository,
};
use crate::DbPool;

const ITEM_COLUMNS: &str = "seq,
                id,
                event_id,
                conversation_id,
                message_text,
                is_incoming,
                received_at,
                payload_hash,
                status,
                attempts,
                max_attempts,
                available_at,
                claimed_by,
                claimed_at,
                last_error,
                state_version,
                enqueued_at,
                updated_at";

pub struct SqlWebhookQueueRepository {
    pool: DbPool,
}

impl SqlWebhookQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WebhookQueueRepository for SqlWebhookQueueRepository {
    async fn enqueue(
        &self,
        mut item: QueueItem,
        transition: QueueTransition,
    ) -> Result<EnqueueOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO webhook_queue_item (
                id,
                event_id,
                conversation_id,
                message_text,
                is_incoming,
                received_at,
                payload_hash,
                status,
                attempts,
                max_attempts,
                available_at,
                claimed_by,
                claimed_at,
                last_error,
                state_version,
                enqueued_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&item.id.0)
        .bind(&item.payload.event_id.0)
        .bind(item.payload.conversation_id.0)
        .bind(&item.payload.message_text)
        .bind(item.payload.is_incoming)
        .bind(format_timestamp(item.payload.received_at))
        .bind(&item.payload_hash)
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(i64::from(item.max_attempts))
        .bind(format_timestamp(item.available_at))
        .bind(item.claimed_by.as_deref())
        .bind(item.claimed_at.map(format_timestamp))
        .bind(item.last_error.as_deref())
        .bind(i64::from(item.state_version))
        .bind(format_timestamp(item.enqueued_at))
        .bind(format_timestamp(item.updated_at))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let existing = sqlx::query(
                "SELECT id
                 FROM webhook_queue_item
                 WHERE event_id = ? AND status != 'failed'
                 ORDER BY seq DESC
                 LIMIT 1",
            )
            .bind(&item.payload.event_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.try_get::<String, _>("id").map(QueueItemId))
            .transpose()?;
            tx.commit().await?;
            return Ok(EnqueueOutcome::Duplicate { existing });
        }

        item.sequence = inserted.last_insert_rowid();
        insert_transition(&mut tx, &transition).await?;
        tx.commit().await?;

        Ok(EnqueueOutcome::Enqueued(item))
    }

    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT
                {ITEM_COLUMNS}
             FROM webhook_queue_item
             WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueueItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {ITEM_COLUMNS}
             FROM webhook_queue_item AS item
             WHERE item.status = 'pending'
               AND item.available_at <= ?
               AND NOT EXISTS (
                   SELECT 1
                   FROM webhook_queue_item AS earlier
                   WHERE earlier.conversation_id = item.conversation_id
                     AND earlier.seq < item.seq
                     AND earlier.status IN ('pending', 'processing')
               )
             ORDER BY item.seq ASC
             LIMIT ?"
        ))
        .bind(format_timestamp(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn list_by_status(
        &self,
        status: QueueItemStatus,
        limit: u32,
    ) -> Result<Vec<QueueItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {ITEM_COLUMNS}
             FROM webhook_queue_item
             WHERE status = ?
             ORDER BY seq ASC
             LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn apply_transition(
        &self,
        item: &QueueItem,
        expected_version: u32,
        transition: QueueTransition,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE webhook_queue_item SET
                status = ?,
                attempts = ?,
                available_at = ?,
                claimed_by = ?,
                claimed_at = ?,
                last_error = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(format_timestamp(item.available_at))
        .bind(item.claimed_by.as_deref())
        .bind(item.claimed_at.map(format_timestamp))
        .bind(item.last_error.as_deref())
        .bind(i64::from(item.state_version))
        .bind(format_timestamp(item.updated_at))
        .bind(&item.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_transition(&mut tx, &transition).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_transitions(
        &self,
        item_id: &QueueItemId,
    ) -> Result<Vec<QueueTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                item_id,
                event_id,
                from_status,
                to_status,
                reason,
                error_class,
                attempts,
                actor_id,
                state_version,
                occurred_at
             FROM webhook_queue_transition
             WHERE item_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(&item_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }

    async fn stats(&self) -> Result<QueueStats, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count
             FROM webhook_queue_item
             GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status_raw = row.try_get::<String, _>("status")?;
            let status = QueueItemStatus::parse(&status_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown queue status `{status_raw}`"))
            })?;
            let count = row.try_get::<i64, _>("count")?;
            stats.record(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }
}

async fn insert_transition(
    tx: &mut Transaction<'_, Sqlite>,
    transition: &QueueTransition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO webhook_queue_transition (
            id,
            item_id,
            event_id,
            from_status,
            to_status,
            reason,
            error_class,
            attempts,
            actor_id,
            state_version,
            occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transition.id.0)
    .bind(&transition.item_id.0)
    .bind(&transition.event_id.0)
    .bind(transition.from_status.as_ref().map(QueueItemStatus::as_str))
    .bind(transition.to_status.as_str())
    .bind(&transition.reason)
    .bind(transition.error_class.as_deref())
    .bind(i64::from(transition.attempts))
    .bind(&transition.actor_id)
    .bind(i64::from(transition.state_version))
    .bind(format_timestamp(transition.occurred_at))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn parse_status(column: &str, value: &str) -> Result<QueueItemStatus, RepositoryError> {
    QueueItemStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown {column} `{value}`")))
}

fn item_from_row(row: SqliteRow) -> Result<QueueItem, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;

    Ok(QueueItem {
        id: QueueItemId(row.try_get("id")?),
        sequence: row.try_get("seq")?,
        payload: WebhookEvent {
            event_id: EventId(row.try_get("event_id")?),
            conversation_id: ConversationId(row.try_get("conversation_id")?),
            message_text: row.try_get("message_text")?,
            is_incoming: row.try_get("is_incoming")?,
            received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
        },
        payload_hash: row.try_get("payload_hash")?,
        status: parse_status("queue status", &status_raw)?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        enqueued_at: parse_timestamp("enqueued_at", row.try_get("enqueued_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<QueueTransition, RepositoryError> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|value| parse_status("from_status", &value))
        .transpose()?;
    let to_status_raw = row.try_get::<String, _>("to_status")?;

    Ok(QueueTransition {
        id: QueueTransitionId(row.try_get("id")?),
        item_id: QueueItemId(row.try_get("item_id")?),
        event_id: EventId(row.try_get("event_id")?),
        from_status,
        to_status: parse_status("to_status", &to_status_raw)?,
        reason: row.try_get("reason")?,
        error_class: row.try_get("error_class")?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        actor_id: row.try_get("actor_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use parley_core::domain::webhook::QueueItemStatus;
    use parley_core::queue::{QueueEngine, QueueEngineConfig, RetryPolicy};

    use super::SqlWebhookQueueRepository;
    use crate::repositories::test_support::{event, parse_ts, setup_pool};
    use crate::repositories::{EnqueueOutcome, WebhookQueueRepository};

    async fn enqueue(
        repo: &SqlWebhookQueueRepository,
        engine: &QueueEngine,
        event_id: &str,
        conversation_id: i64,
    ) -> EnqueueOutcome {
        let created = engine.create_item(event(event_id, conversation_id, "Where is my order?")).unwrap();
        repo.enqueue(created.item, created.transition).await.expect("enqueue")
    }

    #[tokio::test]
    async fn enqueue_deduplicates_by_event_id() {
        let pool = setup_pool().await;
        let repo = SqlWebhookQueueRepository::new(pool.clone());
        let engine = QueueEngine::new();

        let first = enqueue(&repo, &engine, "message_created:1", 42).await;
        let item = first.item().cloned().expect("first delivery enqueues");
        assert!(item.sequence > 0);

        let second = enqueue(&repo, &engine, "message_created:1", 42).await;
        assert_eq!(second, EnqueueOutcome::Duplicate { existing: Some(item.id.clone()) });

        let stats = repo.stats().await.expect("stats");
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total(), 1);

        let transitions = repo.list_transitions(&item.id).await.expect("transitions");
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].reason, "item_enqueued");

        pool.close().await;
    }

    #[tokio::test]
    async fn concurrent_redeliveries_create_exactly_one_item() {
        let pool = setup_pool().await;
        let repo = std::sync::Arc::new(SqlWebhookQueueRepository::new(pool.clone()));
        let engine = QueueEngine::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let created = engine.create_item(event("message_created:7", 7, "hi")).unwrap();
            handles.push(tokio::spawn(async move {
                repo.enqueue(created.item, created.transition).await.expect("enqueue")
            }));
        }

        let mut enqueued = 0;
        for handle in handles {
            if handle.await.expect("join").item().is_some() {
                enqueued += 1;
            }
        }

        assert_eq!(enqueued, 1);
        assert_eq!(repo.stats().await.expect("stats").total(), 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn dead_lettered_event_can_be_redelivered() {
        let pool = setup_pool().await;
        let repo = SqlWebhookQueueRepository::new(pool.clone());
        let engine = QueueEngine::with_config(QueueEngineConfig { max_attempts: 1, ..Default::default() });

        let item = enqueue(&repo, &engine, "message_created:9", 9).await.item().cloned().unwrap();
        let claimed = engine.claim(item.clone(), "worker-1", chrono::Utc::now()).unwrap();
        assert!(repo
            .apply_transition(&claimed.item, item.state_version, claimed.transition)
            .await
            .unwrap());
        let failed = engine
            .fail(claimed.item.clone(), "runtime timeout", "transient", RetryPolicy::Retry)
            .unwrap();
        assert_eq!(failed.item.status, QueueItemStatus::Failed);
        assert!(repo
            .apply_transition(&failed.item, claimed.item.state_version, failed.transition)
            .await
            .unwrap());

        let again = enqueue(&repo, &engine, "message_created:9", 9).await;
        assert!(again.item().is_some());

        let dead = repo.list_by_status(QueueItemStatus::Failed, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("runtime timeout"));
        pool.close().await;
    }

    #[tokio::test]
    async fn stale_version_loses_compare_and_swap() {
        let pool = setup_pool().await;
        let repo = SqlWebhookQueueRepository::new(pool.clone());
        let engine = QueueEngine::new();

        let item = enqueue(&repo, &engine, "message_created:2", 2).await.item().cloned().unwrap();
        let now = chrono::Utc::now();
        let first = engine.claim(item.clone(), "worker-1", now).unwrap();
        let second = engine.claim(item.clone(), "worker-2", now).unwrap();

        assert!(repo.apply_transition(&first.item, item.state_version, first.transition).await.unwrap());
        assert!(!repo
            .apply_transition(&second.item, item.state_version, second.transition)
            .await
            .unwrap());

        let stored = repo.find_by_id(&item.id).await.unwrap().expect("stored");
        assert_eq!(stored.claimed_by.as_deref(), Some("worker-1"));
        assert_eq!(stored.status, QueueItemStatus::Processing);
        pool.close().await;
    }

    #[tokio::test]
    async fn dispatch_only_offers_the_head_of_each_conversation() {
        let pool = setup_pool().await;
        let repo = SqlWebhookQueueRepository::new(pool.clone());
        let engine = QueueEngine::new();

        let a1 = enqueue(&repo, &engine, "message_created:a1", 1).await.item().cloned().unwrap();
        let _a2 = enqueue(&repo, &engine, "message_created:a2", 1).await.item().cloned().unwrap();
        let b1 = enqueue(&repo, &engine, "message_created:b1", 2).await.item().cloned().unwrap();

        let later = chrono::Utc::now() + Duration::seconds(1);
        let ready = repo.list_dispatchable(later, 10).await.unwrap();
        let ids: Vec<_> = ready.iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, vec![a1.id.clone(), b1.id.clone()]);

        let claimed = engine.claim(a1.clone(), "worker-1", later).unwrap();
        repo.apply_transition(&claimed.item, a1.state_version, claimed.transition).await.unwrap();

        let ready = repo.list_dispatchable(later, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, b1.id);
        pool.close().await;
    }

    #[tokio::test]
    async fn items_in_backoff_are_not_dispatchable_yet() {
        let pool = setup_pool().await;
        let repo = SqlWebhookQueueRepository::new(pool.clone());
        let engine = QueueEngine::new();

        let item = enqueue(&repo, &engine, "message_created:3", 3).await.item().cloned().unwrap();
        let claimed = engine.claim(item.clone(), "worker-1", chrono::Utc::now()).unwrap();
        repo.apply_transition(&claimed.item, item.state_version, claimed.transition).await.unwrap();
        let retry = engine.fail(claimed.item.clone(), "boom", "transient", RetryPolicy::Retry).unwrap();
        repo.apply_transition(&retry.item, claimed.item.state_version, retry.transition).await.unwrap();

        assert!(repo.list_dispatchable(parse_ts("2026-01-01T00:00:00Z"), 10).await.unwrap().is_empty());
        let ready = repo.list_dispatchable(retry.item.available_at, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].attempts, 1);
        pool.close().await;
    }
}
