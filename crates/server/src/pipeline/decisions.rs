use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_agent::RunOutcome;
use parley_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use parley_core::domain::approval::{
    ApprovalId, Decision, InterruptionResolution, PendingInterruption, SuspendedRun,
    SuspendedRunStatus,
};
use parley_core::domain::feedback::{FeedbackId, FeedbackLabel, FeedbackRecord};
use parley_core::domain::webhook::{EventId, WebhookEvent};
use parley_core::errors::ErrorClass;
use parley_core::flows::{RunEvent, RunState};
use parley_core::learning::{chain_labels, edit_diff};
use parley_platform::DeliveryError;

use super::{PendingInterruptionView, PipelineDeps, PipelineError};

#[derive(Clone, Debug, PartialEq)]
pub enum DecisionOutcome {
    MorePending { approval_id: ApprovalId, pending: Vec<PendingInterruptionView> },
    Complete { final_output: Option<String> },
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("approval `{0}` not found")]
    NotFound(ApprovalId),
    #[error("approval `{0}` was superseded by a newer run")]
    Stale(ApprovalId),
    #[error("approval `{0}` is already resolved")]
    AlreadyResolved(ApprovalId),
    #[error("approval `{0}` has no undelivered reply")]
    NothingToRedeliver(ApprovalId),
    #[error("interruption {index} of approval `{approval_id}` is already resolved")]
    InterruptionResolved { approval_id: ApprovalId, index: usize },
    #[error("interruption index {index} is out of bounds for {len} pending interruptions")]
    InvalidIndex { index: usize, len: usize },
    #[error("actor `{0}` may not review this agent's actions")]
    Unauthorized(String),
    /// The chain is complete and recorded; the reply is kept for a re-send.
    #[error("reply delivery failed after the approval was resolved: {0}")]
    Delivery(DeliveryError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl DecisionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Pipeline(error) => error.class(),
            Self::Delivery(error) if error.is_retryable() => ErrorClass::Transient,
            _ => ErrorClass::Validation,
        }
    }
}

/// Applies one human decision to one interruption of a suspended run.
///
/// Runs on the request path and takes the same conversation lock as the worker.
/// Approved side effects are settled and persisted before the runtime drafts its
/// follow-up, so a retried decision never repeats them.
#[derive(Clone)]
pub struct DecisionHandler {
    deps: PipelineDeps,
}

impl DecisionHandler {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub async fn apply(&self, decision: Decision) -> Result<DecisionOutcome, DecisionError> {
        if !self.deps.profile.may_review(&decision.actor_id) {
            return Err(DecisionError::Unauthorized(decision.actor_id));
        }

        let approval_id = decision.approval_id.clone();
        let conversation_id = self.load(&approval_id).await?.conversation_id;
        let _guard = self.deps.locks.acquire(conversation_id).await;
        let mut run = self.load(&approval_id).await?;

        let status = run.status;
        match status {
            SuspendedRunStatus::Pending => {}
            SuspendedRunStatus::Undelivered => return self.deliver_kept_reply(run, &decision.actor_id).await,
            SuspendedRunStatus::Superseded => return Err(DecisionError::Stale(approval_id)),
            SuspendedRunStatus::Resolved => return Err(DecisionError::AlreadyResolved(approval_id)),
        }

        if run.all_resolved() {
            // An earlier resume stopped after its decisions were persisted.
            info!(
                event_name = "pipeline.decision.resume_retried",
                correlation_id = %approval_id,
                conversation_id = conversation_id.0,
                actor_id = %decision.actor_id,
                "every interruption is decided; resuming again"
            );
            return self.resume(run, &decision.actor_id).await;
        }

        let index = decision.interruption_index;
        let len = run.interruptions.len();
        let Some(slot) = run.interruptions.get_mut(index) else {
            return Err(DecisionError::InvalidIndex { index, len });
        };
        if slot.is_resolved() {
            return Err(DecisionError::InterruptionResolved { approval_id, index });
        }
        slot.resolution =
            Some(InterruptionResolution::from_decision(&decision, slot.interruption.tool_name.clone()));
        run.updated_at = Utc::now();

        let audit = AuditContext::new(Some(conversation_id), approval_id.0.clone(), decision.actor_id.as_str());
        self.deps.audit.emit(
            AuditEvent::new(&audit, "approval.decision_recorded", AuditCategory::Approval, AuditOutcome::Success)
                .with_metadata("index", index.to_string())
                .with_metadata("action", decision.action.as_str())
                .with_metadata("edited", decision.edited_content.is_some().to_string()),
        );
        info!(
            event_name = "pipeline.decision.applied",
            correlation_id = %approval_id,
            conversation_id = conversation_id.0,
            index,
            action = decision.action.as_str(),
            actor_id = %decision.actor_id,
            edited = decision.edited_content.is_some(),
            "decision applied to interruption"
        );

        if !run.all_resolved() {
            let pending = PendingInterruptionView::unresolved(&run);
            self.deps.approvals.save(run).await.map_err(PipelineError::from)?;
            return Ok(DecisionOutcome::MorePending { approval_id, pending });
        }

        self.resume(run, &decision.actor_id).await
    }

    /// Re-sends the reply of an `Undelivered` run.
    pub async fn redeliver(
        &self,
        approval_id: &ApprovalId,
        actor_id: &str,
    ) -> Result<DecisionOutcome, DecisionError> {
        if !self.deps.profile.may_review(actor_id) {
            return Err(DecisionError::Unauthorized(actor_id.to_owned()));
        }
        let conversation_id = self.load(approval_id).await?.conversation_id;
        let _guard = self.deps.locks.acquire(conversation_id).await;
        let run = self.load(approval_id).await?;
        if run.status != SuspendedRunStatus::Undelivered {
            return Err(DecisionError::NothingToRedeliver(approval_id.clone()));
        }
        self.deliver_kept_reply(run, actor_id).await
    }

    async fn resume(&self, mut run: SuspendedRun, actor_id: &str) -> Result<DecisionOutcome, DecisionError> {
        let deps = &self.deps;
        let audit = AuditContext::new(Some(run.conversation_id), run.id.0.clone(), actor_id);
        let state = self.advance(RunState::Suspended, RunEvent::DecisionApplied, &audit)?;

        let resolutions = run.resolutions();
        let settled = tokio::time::timeout(
            deps.runtime_timeout,
            deps.runtime.settle(&run.snapshot, &resolutions),
        )
        .await
        .map_err(|_| PipelineError::RuntimeTimeout(deps.runtime_timeout))?
        .map_err(PipelineError::from)?;
        if settled != run.snapshot {
            run.snapshot = settled;
            run.updated_at = Utc::now();
            deps.approvals.save(run.clone()).await.map_err(PipelineError::from)?;
            debug!(
                event_name = "pipeline.decision.settled",
                correlation_id = %run.id,
                conversation_id = run.conversation_id.0,
                "approved side effects recorded"
            );
        }

        let outcome = tokio::time::timeout(deps.runtime_timeout, deps.runtime.resume(&run.snapshot))
            .await
            .map_err(|_| PipelineError::RuntimeTimeout(deps.runtime_timeout))?
            .map_err(PipelineError::from)?;

        match outcome {
            RunOutcome::Interrupted { snapshot, interruptions, draft } => {
                let now = Utc::now();
                let next = SuspendedRun {
                    id: ApprovalId(format!("apr-{}", Uuid::new_v4())),
                    conversation_id: run.conversation_id,
                    snapshot,
                    interruptions: interruptions.into_iter().map(PendingInterruption::new).collect(),
                    status: SuspendedRunStatus::Pending,
                    last_input: run.last_input.clone(),
                    model_draft: draft.or_else(|| run.model_draft.clone()),
                    prior_resolutions: run.chain_resolutions(),
                    final_output: None,
                    created_at: now,
                    updated_at: now,
                };
                let next_id = next.id.clone();
                let pending = PendingInterruptionView::unresolved(&next);
                deps.approvals.save(next).await.map_err(PipelineError::from)?;
                run.status = SuspendedRunStatus::Superseded;
                run.updated_at = now;
                deps.approvals.save(run).await.map_err(PipelineError::from)?;
                self.advance(state, RunEvent::RuntimeInterrupted, &audit)?;
                info!(
                    event_name = "pipeline.decision.suspended_again",
                    correlation_id = %next_id,
                    pending = pending.len(),
                    "resumed run requested further approvals"
                );
                Ok(DecisionOutcome::MorePending { approval_id: next_id, pending })
            }
            RunOutcome::Completed { output } => {
                run.status = SuspendedRunStatus::Resolved;
                run.final_output = output.clone();
                run.updated_at = Utc::now();
                deps.approvals.save(run.clone()).await.map_err(PipelineError::from)?;

                let delivery = match &output {
                    Some(text) => self.send(&mut run, text, &audit).await,
                    None => Ok(()),
                };
                let event = match (&output, &delivery) {
                    (Some(_), Ok(())) => RunEvent::ActionsExecuted,
                    _ => RunEvent::RuntimeCompleted,
                };
                self.advance(state, event, &audit)?;

                self.record_feedback(&run, output.clone(), delivery.is_err()).await?;
                self.queue_follow_up(&run).await;
                info!(
                    event_name = "pipeline.decision.completed",
                    correlation_id = %run.id,
                    conversation_id = run.conversation_id.0,
                    delivered = output.is_some() && delivery.is_ok(),
                    "approval chain completed"
                );
                delivery.map_err(DecisionError::Delivery)?;
                Ok(DecisionOutcome::Complete { final_output: output })
            }
        }
    }

    async fn deliver_kept_reply(
        &self,
        mut run: SuspendedRun,
        actor_id: &str,
    ) -> Result<DecisionOutcome, DecisionError> {
        let Some(text) = run.final_output.clone() else {
            return Err(DecisionError::NothingToRedeliver(run.id));
        };
        let audit = AuditContext::new(Some(run.conversation_id), run.id.0.clone(), actor_id);
        run.status = SuspendedRunStatus::Resolved;
        run.updated_at = Utc::now();
        self.deps.approvals.save(run.clone()).await.map_err(PipelineError::from)?;

        self.send(&mut run, &text, &audit).await.map_err(DecisionError::Delivery)?;
        info!(
            event_name = "pipeline.decision.redelivered",
            correlation_id = %run.id,
            conversation_id = run.conversation_id.0,
            actor_id,
            "kept reply delivered"
        );
        Ok(DecisionOutcome::Complete { final_output: Some(text) })
    }

    /// Sends `text` for a run already saved as `Resolved`. On failure the run is
    /// saved as `Undelivered` so the reply can be re-sent.
    async fn send(
        &self,
        run: &mut SuspendedRun,
        text: &str,
        audit: &AuditContext,
    ) -> Result<(), DeliveryError> {
        let deps = &self.deps;
        let Err(error) = deps.messaging.send_reply(run.conversation_id, text).await else {
            deps.audit.emit(AuditEvent::new(
                audit,
                "delivery.reply_sent",
                AuditCategory::Delivery,
                AuditOutcome::Success,
            ));
            return Ok(());
        };

        deps.audit.emit(
            AuditEvent::new(audit, "delivery.reply_failed", AuditCategory::Delivery, AuditOutcome::Failed)
                .with_metadata("retryable", error.is_retryable().to_string()),
        );
        warn!(
            event_name = "pipeline.decision.delivery_failed",
            correlation_id = %run.id,
            conversation_id = run.conversation_id.0,
            error = %error,
            "approved reply was not delivered; kept for re-send"
        );
        run.status = SuspendedRunStatus::Undelivered;
        run.updated_at = Utc::now();
        if let Err(save_error) = deps.approvals.save(run.clone()).await {
            warn!(
                event_name = "pipeline.decision.undelivered_not_saved",
                correlation_id = %run.id,
                error = %save_error,
                "could not mark the run undelivered"
            );
        }
        Err(error)
    }

    async fn record_feedback(
        &self,
        run: &SuspendedRun,
        final_text: Option<String>,
        delivery_failed: bool,
    ) -> Result<(), PipelineError> {
        let chain = run.chain_resolutions();
        let mut labels = chain_labels(&chain);
        let diff = if labels.contains(&FeedbackLabel::Edited) {
            match (&run.model_draft, &final_text) {
                (Some(draft), Some(sent)) => edit_diff(draft, sent),
                _ => None,
            }
        } else {
            None
        };
        if delivery_failed {
            labels.insert(FeedbackLabel::DeliveryFailed);
        }
        let record = FeedbackRecord {
            id: FeedbackId(format!("fb-{}", Uuid::new_v4())),
            conversation_id: run.conversation_id,
            approval_id: Some(run.id.clone()),
            input_text: run.last_input.clone(),
            model_draft: run.model_draft.clone(),
            final_text,
            labels,
            edit_diff: diff,
            recorded_at: Utc::now(),
        };
        self.deps.feedback.append(record).await?;
        Ok(())
    }

    /// Queues one turn for the messages that arrived while the chain was
    /// outstanding. The event id is derived from the approval, so this queues at
    /// most one item per chain.
    async fn queue_follow_up(&self, run: &SuspendedRun) {
        let deferred = self.deps.contexts.deferred_messages(run.conversation_id);
        let Some(latest) = deferred.last() else {
            return;
        };
        let event = WebhookEvent {
            event_id: EventId::follow_up(&run.id),
            conversation_id: run.conversation_id,
            message_text: latest.text.clone(),
            is_incoming: true,
            received_at: latest.received_at,
        };
        let result = match self.deps.engine.create_item(event) {
            Ok(created) => self
                .deps
                .queue
                .enqueue(created.item, created.transition)
                .await
                .map_err(PipelineError::from),
            Err(error) => Err(error.into()),
        };
        match result {
            Ok(outcome) => info!(
                event_name = "pipeline.decision.follow_up_queued",
                correlation_id = %run.id,
                conversation_id = run.conversation_id.0,
                deferred = deferred.len(),
                duplicate = outcome.item().is_none(),
                "deferred messages queued for a follow-up turn"
            ),
            // The messages stay deferred and join the history of the next run.
            Err(error) => warn!(
                event_name = "pipeline.decision.follow_up_failed",
                correlation_id = %run.id,
                conversation_id = run.conversation_id.0,
                error = %error,
                "could not queue a follow-up turn"
            ),
        }
    }

    async fn load(&self, id: &ApprovalId) -> Result<SuspendedRun, DecisionError> {
        self.deps
            .approvals
            .load(id)
            .await
            .map_err(PipelineError::from)?
            .ok_or_else(|| DecisionError::NotFound(id.clone()))
    }

    fn advance(
        &self,
        state: RunState,
        event: RunEvent,
        audit: &AuditContext,
    ) -> Result<RunState, PipelineError> {
        let transition = self.deps.flow.apply_with_audit(state, event, self.deps.audit.as_ref(), audit)?;
        Ok(transition.to)
    }
}
