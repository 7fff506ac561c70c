use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use parley_core::domain::conversation::ConversationId;
use parley_core::domain::webhook::{EventId, QueueItemStatus, WebhookEvent};
use parley_core::queue::{QueueEngine, QueueEngineConfig, RetryPolicy};
use parley_db::repositories::InMemoryWebhookQueueRepository;
use parley_db::{connect_with_settings, migrations, SqlWebhookQueueRepository, WebhookQueueRepository};

fn event(event_id: &str, conversation_id: i64) -> WebhookEvent {
    WebhookEvent {
        event_id: EventId(event_id.to_owned()),
        conversation_id: ConversationId(conversation_id),
        message_text: "Where is my order?".to_owned(),
        is_incoming: true,
        received_at: Utc::now(),
    }
}

async fn repositories() -> Vec<Arc<dyn WebhookQueueRepository>> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    vec![
        Arc::new(SqlWebhookQueueRepository::new(pool)),
        Arc::new(InMemoryWebhookQueueRepository::default()),
    ]
}

async fn claim_and_fail(
    repo: &dyn WebhookQueueRepository,
    engine: &QueueEngine,
    now: DateTime<Utc>,
) -> QueueItemStatus {
    let item = repo.list_dispatchable(now, 1).await.expect("dispatchable").remove(0);
    let claimed = engine.claim(item.clone(), "worker-1", now).expect("claim");
    assert!(repo.apply_transition(&claimed.item, item.state_version, claimed.transition).await.expect("claim cas"));
    let failed = engine
        .fail(claimed.item.clone(), "runtime timed out", "transient", RetryPolicy::Retry)
        .expect("fail");
    assert!(repo
        .apply_transition(&failed.item, claimed.item.state_version, failed.transition)
        .await
        .expect("fail cas"));
    failed.item.status
}

#[tokio::test]
async fn retry_budget_ends_in_dead_letter_for_every_backend() {
    let engine = QueueEngine::with_config(QueueEngineConfig {
        max_attempts: 3,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 20,
        claim_timeout_secs: 300,
    });

    for repo in repositories().await {
        let created = engine.create_item(event("message_created:100", 100)).expect("create");
        repo.enqueue(created.item, created.transition).await.expect("enqueue");

        let mut now = Utc::now() + Duration::seconds(1);
        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(claim_and_fail(repo.as_ref(), &engine, now).await);
            now += Duration::seconds(1);
        }

        assert_eq!(
            statuses,
            vec![QueueItemStatus::Pending, QueueItemStatus::Pending, QueueItemStatus::Failed]
        );
        assert!(repo.list_dispatchable(now + Duration::hours(1), 10).await.expect("list").is_empty());

        let stats = repo.stats().await.expect("stats");
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 1);

        let dead = repo.list_by_status(QueueItemStatus::Failed, 10).await.expect("dead letters");
        assert_eq!(dead[0].attempts, 3);
        let reasons: Vec<_> = repo
            .list_transitions(&dead[0].id)
            .await
            .expect("transitions")
            .into_iter()
            .map(|transition| transition.reason)
            .collect();
        assert_eq!(reasons.first().map(String::as_str), Some("item_enqueued"));
        assert_eq!(reasons.last().map(String::as_str), Some("item_dead_lettered"));
    }
}

#[tokio::test]
async fn conversations_dispatch_in_enqueue_order_for_every_backend() {
    let engine = QueueEngine::new();

    for repo in repositories().await {
        for (index, conversation) in [(1, 5), (2, 5), (3, 6), (4, 5)] {
            let created =
                engine.create_item(event(&format!("message_created:{index}"), conversation)).expect("create");
            repo.enqueue(created.item, created.transition).await.expect("enqueue");
        }

        let mut processed = Vec::new();
        let now = Utc::now() + Duration::seconds(1);
        loop {
            let ready = repo.list_dispatchable(now, 10).await.expect("dispatchable");
            if ready.is_empty() {
                break;
            }
            for item in ready {
                let claimed = engine.claim(item.clone(), "worker-1", now).expect("claim");
                repo.apply_transition(&claimed.item, item.state_version, claimed.transition)
                    .await
                    .expect("claim cas");
                let done = engine.complete(claimed.item.clone()).expect("complete");
                repo.apply_transition(&done.item, claimed.item.state_version, done.transition)
                    .await
                    .expect("done cas");
                processed.push(item.event_id().0.clone());
            }
        }

        let conversation_five: Vec<_> = processed
            .iter()
            .filter(|id| !id.ends_with(":3"))
            .cloned()
            .collect();
        assert_eq!(
            conversation_five,
            vec!["message_created:1", "message_created:2", "message_created:4"]
        );
        assert_eq!(repo.stats().await.expect("stats").done, 4);
    }
}
