//! HTTP API.
//!
//! - `POST /webhooks/platform`                          - verify, filter and enqueue a platform event
//! - `GET  /approvals`                                  - pending suspended runs
//! - `POST /approvals/{id}/{index}/{approve|reject}`    - resolve one interruption
//! - `GET  /approvals/undelivered`                      - completed runs whose reply was not sent
//! - `POST /approvals/{id}/redeliver`                   - re-send a kept reply
//! - `GET  /queue/stats`                                - queue counters by status
//! - `GET  /queue/dead-letters`                         - dead-lettered items
//! - `GET  /escalations/stats`                          - human alert totals

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use parley_core::domain::approval::{ApprovalId, Decision, DecisionAction, SuspendedRun};
use parley_core::domain::escalation::EscalationStats;
use parley_core::domain::webhook::{QueueItem, QueueItemStatus, QueueStats};
use parley_core::errors::{ApplicationError, InterfaceError};
use parley_db::{EnqueueOutcome, RepositoryError};
use parley_platform::{parse_webhook, WebhookParseOutcome, WebhookVerifier, SIGNATURE_HEADER};

use crate::pipeline::{
    DecisionError, DecisionHandler, DecisionOutcome, Dispatcher, PendingInterruptionView,
    PipelineDeps,
};

const DEFAULT_DEAD_LETTER_LIMIT: u32 = 50;
const MAX_DEAD_LETTER_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct AppState {
    pub deps: PipelineDeps,
    pub dispatcher: Dispatcher,
    pub decisions: DecisionHandler,
    pub verifier: WebhookVerifier,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalView {
    pub approval_id: String,
    pub conversation_id: i64,
    pub created_at: String,
    pub last_input: String,
    pub model_draft: Option<String>,
    pub pending: Vec<PendingInterruptionView>,
}

impl From<&SuspendedRun> for ApprovalView {
    fn from(run: &SuspendedRun) -> Self {
        Self {
            approval_id: run.id.0.clone(),
            conversation_id: run.conversation_id.0,
            created_at: run.created_at.to_rfc3339(),
            last_input: run.last_input.clone(),
            model_draft: run.model_draft.clone(),
            pending: PendingInterruptionView::unresolved(run),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeliveredView {
    pub approval_id: String,
    pub conversation_id: i64,
    pub final_output: Option<String>,
    pub updated_at: String,
}

impl From<&SuspendedRun> for UndeliveredView {
    fn from(run: &SuspendedRun) -> Self {
        Self {
            approval_id: run.id.0.clone(),
            conversation_id: run.conversation_id.0,
            final_output: run.final_output.clone(),
            updated_at: run.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeliverRequest {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub actor_id: String,
    #[serde(default)]
    pub edited_content: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecisionResponse {
    MorePending {
        #[serde(rename = "approvalId")]
        approval_id: String,
        pending: Vec<PendingInterruptionView>,
    },
    Complete {
        #[serde(rename = "finalOutput")]
        final_output: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterView {
    pub queue_id: String,
    pub event_id: String,
    pub conversation_id: i64,
    pub message_text: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl From<QueueItem> for DeadLetterView {
    fn from(item: QueueItem) -> Self {
        Self {
            queue_id: item.id.0,
            event_id: item.payload.event_id.0,
            conversation_id: item.payload.conversation_id.0,
            message_text: item.payload.message_text,
            attempts: item.attempts,
            last_error: item.last_error,
            updated_at: item.updated_at.to_rfc3339(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/platform", post(receive_webhook))
        .route("/approvals", get(list_approvals))
        .route("/approvals/undelivered", get(list_undelivered))
        .route("/approvals/{id}/redeliver", post(redeliver_reply))
        .route("/approvals/{id}/{index}/{action}", post(resolve_approval))
        .route("/queue/stats", get(queue_stats))
        .route("/queue/dead-letters", get(dead_letters))
        .route("/escalations/stats", get(escalation_stats))
        .with_state(state)
}

pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiFailure> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    if let Err(error) = state.verifier.verify(&body, signature) {
        warn!(event_name = "http.webhook.unauthorized", error = %error, "webhook signature rejected");
        return Err(failure(StatusCode::UNAUTHORIZED, error.to_string()));
    }

    let event = match parse_webhook(&body) {
        Ok(WebhookParseOutcome::Accepted(event)) => event,
        Ok(WebhookParseOutcome::Ignored { reason }) => {
            return Ok(Json(WebhookResponse {
                ignored: Some(true),
                reason: Some(reason),
                ..WebhookResponse::default()
            }));
        }
        Err(error) => return Err(failure(StatusCode::BAD_REQUEST, error.to_string())),
    };

    let event_id = event.event_id.clone();
    let enqueued = state
        .dispatcher
        .enqueue(event)
        .await
        .map_err(|error| interface_failure(ApplicationError::from(error).into_interface(event_id.0)))?;
    match enqueued {
        EnqueueOutcome::Enqueued(item) => Ok(Json(WebhookResponse {
            queued: Some(true),
            queue_id: Some(item.id.0),
            ..WebhookResponse::default()
        })),
        EnqueueOutcome::Duplicate { .. } => {
            Ok(Json(WebhookResponse { duplicate: Some(true), ..WebhookResponse::default() }))
        }
    }
}

pub async fn list_approvals(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApprovalView>>, ApiFailure> {
    let pending = state.deps.approvals.list_pending().await.map_err(repository_failure)?;
    Ok(Json(pending.iter().map(ApprovalView::from).collect()))
}

pub async fn resolve_approval(
    Path((id, index, action)): Path<(String, usize, String)>,
    State(state): State<AppState>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, ApiFailure> {
    let action = DecisionAction::parse(&action).ok_or_else(|| {
        failure(StatusCode::BAD_REQUEST, format!("unknown action `{action}`; expected approve or reject"))
    })?;
    let actor_id = body.actor_id.trim();
    if actor_id.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "actorId is required".to_owned()));
    }

    let decision = Decision {
        approval_id: ApprovalId(id),
        interruption_index: index,
        action,
        edited_content: body.edited_content.filter(|content| !content.trim().is_empty()),
        rejection_reason: body.rejection_reason,
        actor_id: actor_id.to_owned(),
    };
    let approval_id = decision.approval_id.clone();
    decision_response(&approval_id, state.decisions.apply(decision).await)
}

pub async fn list_undelivered(
    State(state): State<AppState>,
) -> Result<Json<Vec<UndeliveredView>>, ApiFailure> {
    let runs = state.deps.approvals.list_undelivered().await.map_err(repository_failure)?;
    Ok(Json(runs.iter().map(UndeliveredView::from).collect()))
}

pub async fn redeliver_reply(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RedeliverRequest>,
) -> Result<Json<DecisionResponse>, ApiFailure> {
    let actor_id = body.actor_id.trim();
    if actor_id.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "actorId is required".to_owned()));
    }
    let approval_id = ApprovalId(id);
    decision_response(&approval_id, state.decisions.redeliver(&approval_id, actor_id).await)
}

fn decision_response(
    approval_id: &ApprovalId,
    result: Result<DecisionOutcome, DecisionError>,
) -> Result<Json<DecisionResponse>, ApiFailure> {
    match result {
        Ok(DecisionOutcome::MorePending { approval_id, pending }) => {
            Ok(Json(DecisionResponse::MorePending { approval_id: approval_id.0, pending }))
        }
        Ok(DecisionOutcome::Complete { final_output }) => {
            Ok(Json(DecisionResponse::Complete { final_output }))
        }
        Err(error) => {
            let status = decision_status(&error);
            info!(
                event_name = "http.approval.rejected",
                correlation_id = %approval_id,
                status = status.as_u16(),
                error = %error,
                "decision not applied"
            );
            Err(failure(status, error.to_string()))
        }
    }
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiFailure> {
    state.deps.queue.stats().await.map(Json).map_err(repository_failure)
}

pub async fn dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeadLetterView>>, ApiFailure> {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT).clamp(1, MAX_DEAD_LETTER_LIMIT);
    let items = state
        .deps
        .queue
        .list_by_status(QueueItemStatus::Failed, limit)
        .await
        .map_err(repository_failure)?;
    Ok(Json(items.into_iter().map(DeadLetterView::from).collect()))
}

pub async fn escalation_stats(
    State(state): State<AppState>,
) -> Result<Json<EscalationStats>, ApiFailure> {
    state.deps.alerts.stats().await.map(Json).map_err(repository_failure)
}

fn decision_status(error: &DecisionError) -> StatusCode {
    match error {
        DecisionError::NotFound(_) => StatusCode::NOT_FOUND,
        DecisionError::Stale(_)
        | DecisionError::AlreadyResolved(_)
        | DecisionError::NothingToRedeliver(_)
        | DecisionError::InterruptionResolved { .. } => StatusCode::CONFLICT,
        DecisionError::InvalidIndex { .. } => StatusCode::BAD_REQUEST,
        DecisionError::Unauthorized(_) => StatusCode::FORBIDDEN,
        DecisionError::Delivery(_) => StatusCode::BAD_GATEWAY,
        DecisionError::Pipeline(error) if error.class().is_retryable() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DecisionError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn repository_failure(error: RepositoryError) -> ApiFailure {
    interface_failure(ApplicationError::Persistence(error.to_string()).into_interface("store"))
}

fn interface_failure(error: InterfaceError) -> ApiFailure {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "http.request.failed",
        correlation_id = error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "request failed"
    );
    failure(status, error.to_string())
}

fn failure(status: StatusCode, error: String) -> ApiFailure {
    (status, Json(ApiError { error }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body, Bytes},
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
        Json,
    };
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use parley_core::queue::QueueEngine;
    use parley_platform::{WebhookVerifier, SIGNATURE_HEADER};

    use super::{
        dead_letters, list_approvals, queue_stats, receive_webhook, resolve_approval, router,
        AppState, DeadLetterQuery, DecisionRequest, DecisionResponse,
    };
    use crate::pipeline::test_support::{event, harness, Harness, Step};
    use crate::pipeline::{
        DecisionHandler, Dispatcher, RunController, TurnOutcome, WorkerConfig,
    };

    fn state(harness: &Harness, verifier: WebhookVerifier) -> AppState {
        AppState {
            deps: harness.deps.clone(),
            dispatcher: Dispatcher::new(
                harness.deps.clone(),
                WorkerConfig {
                    concurrency: 1,
                    poll_interval: Duration::from_millis(10),
                    stale_scan_interval: Duration::from_secs(60),
                    worker_id: "test".to_owned(),
                },
            ),
            decisions: DecisionHandler::new(harness.deps.clone()),
            verifier,
        }
    }

    fn message_created(id: u64, conversation_id: i64, content: &str) -> Bytes {
        Bytes::from(
            json!({
                "event": "message_created",
                "id": id,
                "message_type": "incoming",
                "content": content,
                "conversation": { "id": conversation_id },
                "sender": { "type": "contact" }
            })
            .to_string(),
        )
    }

    async fn suspend(harness: &Harness) -> String {
        let item = QueueEngine::new().create_item(event("evt-1", 42, "Where is my order?")).unwrap().item;
        match RunController::new(harness.deps.clone()).handle_item(&item).await.unwrap() {
            TurnOutcome::Suspended { approval_id, .. } => approval_id.0,
            other => panic!("expected suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn webhook_enqueues_once_and_reports_duplicates() {
        let harness = harness(Vec::new());
        let app = state(&harness, WebhookVerifier::default());

        let first = receive_webhook(State(app.clone()), HeaderMap::new(), message_created(101, 42, "Hi"))
            .await
            .expect("accepted");
        assert_eq!(first.0.queued, Some(true));
        assert!(first.0.queue_id.is_some());

        let second = receive_webhook(State(app), HeaderMap::new(), message_created(101, 42, "Hi"))
            .await
            .expect("accepted");
        assert_eq!(second.0.duplicate, Some(true));
        assert_eq!(harness.deps.queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn outgoing_messages_are_ignored() {
        let harness = harness(Vec::new());
        let body = Bytes::from(
            json!({
                "event": "message_created",
                "id": 7,
                "message_type": "outgoing",
                "content": "Agent reply",
                "conversation": { "id": 42 },
                "sender": { "type": "user" }
            })
            .to_string(),
        );

        let response = receive_webhook(State(state(&harness, WebhookVerifier::default())), HeaderMap::new(), body)
            .await
            .expect("ignored is not an error");

        assert_eq!(response.0.ignored, Some(true));
        assert_eq!(response.0.reason, Some("not_incoming"));
        assert_eq!(harness.deps.queue.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_bad_request() {
        let harness = harness(Vec::new());
        let result = receive_webhook(
            State(state(&harness, WebhookVerifier::default())),
            HeaderMap::new(),
            message_created(5, 42, "   "),
        )
        .await;

        let (status, _) = result.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signature_is_enforced_when_a_secret_is_configured() {
        let harness = harness(Vec::new());
        let verifier = WebhookVerifier::new(Some(SecretString::from("s3cret".to_owned())));
        let app = state(&harness, verifier.clone());
        let body = message_created(101, 42, "Hi");

        let (status, _) = receive_webhook(State(app.clone()), HeaderMap::new(), body.clone())
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        let signature = verifier.sign(&body).expect("signature");
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
        let accepted = receive_webhook(State(app), headers, body).await.expect("signed");
        assert_eq!(accepted.0.queued, Some(true));
    }

    #[tokio::test]
    async fn approvals_are_listed_and_resolved() {
        let harness = harness(vec![Step::Interrupt(vec!["send_reply"]), Step::Reply("On its way!")]);
        let approval_id = suspend(&harness).await;
        let app = state(&harness, WebhookVerifier::default());

        let Json(listed) = list_approvals(State(app.clone())).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].approval_id, approval_id);
        assert_eq!(listed[0].conversation_id, 42);
        assert_eq!(listed[0].pending[0].tool_name, "send_reply");

        let Json(response) = resolve_approval(
            Path((approval_id, 0, "approve".to_owned())),
            State(app),
            Json(DecisionRequest {
                actor_id: "agent-7".to_owned(),
                edited_content: None,
                rejection_reason: None,
            }),
        )
        .await
        .expect("resolved");

        assert_eq!(response, DecisionResponse::Complete { final_output: Some("On its way!".to_owned()) });
        assert_eq!(harness.messaging.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn decision_errors_map_to_client_statuses() {
        let harness = harness(vec![Step::Interrupt(vec!["send_reply"])]);
        let approval_id = suspend(&harness).await;
        let app = state(&harness, WebhookVerifier::default());
        let request = || {
            Json(DecisionRequest {
                actor_id: "agent-7".to_owned(),
                edited_content: None,
                rejection_reason: None,
            })
        };

        let (status, _) = resolve_approval(
            Path(("apr-missing".to_owned(), 0, "approve".to_owned())),
            State(app.clone()),
            request(),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = resolve_approval(
            Path((approval_id.clone(), 0, "escalate".to_owned())),
            State(app.clone()),
            request(),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            resolve_approval(Path((approval_id, 4, "reject".to_owned())), State(app), request())
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn router_serves_camel_case_responses() {
        let harness = harness(vec![Step::Interrupt(vec!["send_reply"]), Step::Reply("Done.")]);
        let approval_id = suspend(&harness).await;
        let app = router(state(&harness, WebhookVerifier::default()));

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/approvals/{approval_id}/0/approve"))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "actorId": "agent-7" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body, json!({ "status": "complete", "finalOutput": "Done." }));

        let response = app
            .oneshot(Request::get("/queue/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body, json!({ "pending": 0, "processing": 0, "done": 0, "failed": 0 }));
    }

    #[tokio::test]
    async fn undelivered_replies_are_listed_and_resent() {
        let harness = harness(vec![Step::Interrupt(vec!["send_reply"]), Step::Reply("On its way!")]);
        let approval_id = suspend(&harness).await;
        let app = router(state(&harness, WebhookVerifier::default()));
        harness.messaging.fail_replies.store(true, Ordering::SeqCst);

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/approvals/{approval_id}/0/approve"))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "actorId": "agent-7" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = app
            .clone()
            .oneshot(Request::get("/approvals/undelivered").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body[0]["approvalId"], json!(approval_id));
        assert_eq!(body[0]["finalOutput"], json!("On its way!"));

        harness.messaging.fail_replies.store(false, Ordering::SeqCst);
        let redeliver = || {
            Request::post(format!("/approvals/{approval_id}/redeliver"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "actorId": "agent-7" }).to_string()))
                .unwrap()
        };
        let response = app.clone().oneshot(redeliver()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(harness.messaging.replies.lock().unwrap().len(), 1);

        let response = app.oneshot(redeliver()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn stats_endpoints_report_store_counters() {
        let harness = harness(Vec::new());
        let app = state(&harness, WebhookVerifier::default());
        app.dispatcher.enqueue(event("evt-1", 1, "hello")).await.unwrap();

        let Json(stats) = queue_stats(State(app.clone())).await.expect("stats");
        assert_eq!(stats.pending, 1);

        let Json(dead) = dead_letters(State(app), Query(DeadLetterQuery::default())).await.expect("dead letters");
        assert!(dead.is_empty());
    }
}
