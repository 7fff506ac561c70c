use parley_core::domain::webhook::QueueItemStatus;
use parley_db::{SqlWebhookQueueRepository, WebhookQueueRepository};
use serde_json::{json, Value};

use crate::commands::{with_store, CommandResult};

pub fn stats() -> CommandResult {
    let result = with_store("queue-stats", |pool| async move {
        let repository = SqlWebhookQueueRepository::new(pool);
        repository.stats().await.map_err(|error| ("store", error.to_string(), 6u8))
    });

    match result {
        Ok(stats) => CommandResult::success_with(
            "queue-stats",
            format!(
                "{} pending, {} processing, {} done, {} dead-lettered",
                stats.pending, stats.processing, stats.done, stats.failed
            ),
            serde_json::to_value(stats).ok(),
        ),
        Err(failure) => failure,
    }
}

pub fn dead_letters(limit: u32) -> CommandResult {
    let result = with_store("dead-letters", |pool| async move {
        let repository = SqlWebhookQueueRepository::new(pool);
        repository
            .list_by_status(QueueItemStatus::Failed, limit.max(1))
            .await
            .map_err(|error| ("store", error.to_string(), 6u8))
    });

    match result {
        Ok(items) => {
            let rows: Vec<Value> = items
                .iter()
                .map(|item| {
                    json!({
                        "queueId": item.id.0,
                        "eventId": item.payload.event_id.0,
                        "conversationId": item.payload.conversation_id.0,
                        "attempts": item.attempts,
                        "lastError": item.last_error,
                        "updatedAt": item.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            CommandResult::success_with(
                "dead-letters",
                format!("{} dead-lettered item(s)", rows.len()),
                Some(Value::Array(rows)),
            )
        }
        Err(failure) => failure,
    }
}
