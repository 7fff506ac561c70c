use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_agent::{AgentInput, RunOutcome};
use parley_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use parley_core::domain::approval::{ApprovalId, PendingInterruption, SuspendedRun, SuspendedRunStatus};
use parley_core::domain::conversation::ContextMessage;
use parley_core::domain::escalation::{EscalationDecision, HumanAlert, HumanAlertId};
use parley_core::domain::feedback::{FeedbackId, FeedbackRecord};
use parley_core::domain::webhook::QueueItem;
use parley_core::flows::{RunEvent, RunState};

use super::{PipelineDeps, PipelineError};

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    /// Urgent escalation; the runtime was not invoked.
    Escalated { alert_id: Option<HumanAlertId> },
    /// An approval is outstanding; the message only joined the context.
    Deferred { pending_approval: ApprovalId },
    /// A follow-up turn found its deferred messages already answered.
    NothingDeferred,
    DraftReady { feedback_id: FeedbackId },
    Suspended { approval_id: ApprovalId, superseded: Vec<ApprovalId> },
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Escalated { .. } => "escalated",
            Self::Deferred { .. } => "deferred",
            Self::NothingDeferred => "nothing_deferred",
            Self::DraftReady { .. } => "draft_ready",
            Self::Suspended { .. } => "suspended",
        }
    }
}

/// Drives one inbound message through triage, escalation and the agent runtime.
///
/// Callers hold the conversation lock for the whole turn.
#[derive(Clone)]
pub struct RunController {
    deps: PipelineDeps,
}

impl RunController {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Follow-up items carry a message that is already in the context and was
    /// already checked for escalation; they only start the deferred run.
    pub async fn handle_item(&self, item: &QueueItem) -> Result<TurnOutcome, PipelineError> {
        let deps = &self.deps;
        let event = &item.payload;
        let conversation_id = event.conversation_id;
        let audit = AuditContext::new(Some(conversation_id), item.id.0.clone(), "worker");
        let follow_up = event.event_id.is_follow_up();

        if follow_up && deps.contexts.deferred_messages(conversation_id).is_empty() {
            debug!(
                event_name = "pipeline.turn.follow_up_skipped",
                correlation_id = %item.id,
                conversation_id = conversation_id.0,
                "deferred messages were answered by a later run"
            );
            return Ok(TurnOutcome::NothingDeferred);
        }

        let appended = follow_up || deps.contexts.add_message(
            conversation_id,
            ContextMessage {
                event_id: event.event_id.clone(),
                text: event.message_text.clone(),
                is_incoming: event.is_incoming,
                received_at: event.received_at,
            },
        );
        if !appended {
            debug!(
                event_name = "pipeline.context.replayed",
                correlation_id = %item.id,
                conversation_id = conversation_id.0,
                "message already in context; continuing retry"
            );
        }

        let mut state = deps.flow.initial_state();
        let context = deps.contexts.snapshot(conversation_id);
        let triage = deps.triage.classify(&event.message_text, context.as_ref());
        deps.contexts.set_sentiment(conversation_id, triage.sentiment);
        deps.contexts.set_urgency(conversation_id, triage.urgency);
        state = self.advance(state, RunEvent::TriageCompleted, &audit)?;

        let decision = deps.escalation.evaluate(&event.message_text, &triage, context.as_ref());
        info!(
            event_name = "pipeline.turn.classified",
            correlation_id = %item.id,
            conversation_id = conversation_id.0,
            sentiment = triage.sentiment.as_str(),
            urgency = triage.urgency,
            confidence = triage.confidence,
            priority = decision.priority.as_str(),
            triggers = decision.triggers.len(),
            "message classified"
        );

        let alert_id = if decision.should_escalate && !follow_up {
            self.record_alert(item, &decision, &audit).await?
        } else {
            None
        };

        if decision.priority.bypasses_agent() {
            self.advance(state, RunEvent::UrgentEscalation, &audit)?;
            warn!(
                event_name = "pipeline.turn.escalated",
                correlation_id = %item.id,
                conversation_id = conversation_id.0,
                severity = decision.severity.as_str(),
                reason = %decision.reason,
                "urgent escalation; agent bypassed"
            );
            return Ok(TurnOutcome::Escalated { alert_id });
        }

        if let Some(pending) = deps.approvals.find_pending_for_conversation(conversation_id).await? {
            info!(
                event_name = "pipeline.turn.deferred",
                correlation_id = %item.id,
                conversation_id = conversation_id.0,
                approval_id = %pending.id,
                "approval outstanding; message added to context only"
            );
            deps.contexts.defer(conversation_id, &event.event_id);
            return Ok(TurnOutcome::Deferred { pending_approval: pending.id });
        }

        state = self.advance(state, RunEvent::RuntimeStarted, &audit)?;
        let input = AgentInput {
            conversation_id,
            message: event.message_text.clone(),
            history: deps.contexts.get_recent_messages(conversation_id, deps.contexts.window()),
            sentiment: triage.sentiment,
            urgency: triage.urgency,
        };
        let outcome = tokio::time::timeout(deps.runtime_timeout, deps.runtime.run(&input))
            .await
            .map_err(|_| PipelineError::RuntimeTimeout(deps.runtime_timeout))??;
        // The run's history covered every message deferred so far.
        deps.contexts.clear_deferred(conversation_id);

        match outcome {
            RunOutcome::Completed { output } => {
                let now = Utc::now();
                let record = FeedbackRecord {
                    id: FeedbackId(format!("fb-{}", Uuid::new_v4())),
                    conversation_id,
                    approval_id: None,
                    input_text: event.message_text.clone(),
                    model_draft: output,
                    final_text: None,
                    labels: BTreeSet::new(),
                    edit_diff: None,
                    recorded_at: now,
                };
                let feedback_id = record.id.clone();
                deps.feedback.append(record).await?;
                self.advance(state, RunEvent::RuntimeCompleted, &audit)?;
                info!(
                    event_name = "pipeline.turn.draft_ready",
                    correlation_id = %item.id,
                    conversation_id = conversation_id.0,
                    "draft recorded without side effects"
                );
                Ok(TurnOutcome::DraftReady { feedback_id })
            }
            RunOutcome::Interrupted { snapshot, interruptions, draft } => {
                let now = Utc::now();
                let run = SuspendedRun {
                    id: ApprovalId(format!("apr-{}", Uuid::new_v4())),
                    conversation_id,
                    snapshot,
                    interruptions: interruptions.into_iter().map(PendingInterruption::new).collect(),
                    status: SuspendedRunStatus::Pending,
                    last_input: event.message_text.clone(),
                    model_draft: draft,
                    prior_resolutions: Vec::new(),
                    final_output: None,
                    created_at: now,
                    updated_at: now,
                };
                let approval_id = run.id.clone();
                let pending = run.interruptions.len();
                let superseded = deps.approvals.save(run).await?;
                self.advance(state, RunEvent::RuntimeInterrupted, &audit)?;
                info!(
                    event_name = "pipeline.turn.suspended",
                    correlation_id = %item.id,
                    conversation_id = conversation_id.0,
                    approval_id = %approval_id,
                    pending,
                    superseded = superseded.len(),
                    "run suspended for human approval"
                );
                Ok(TurnOutcome::Suspended { approval_id, superseded })
            }
        }
    }

    /// Appends a human alert once per event and posts a private hand-off note.
    async fn record_alert(
        &self,
        item: &QueueItem,
        decision: &EscalationDecision,
        audit: &AuditContext,
    ) -> Result<Option<HumanAlertId>, PipelineError> {
        let conversation_id = item.conversation_id();
        let now = Utc::now();
        let alert = HumanAlert {
            id: HumanAlertId(format!("alert-{}", Uuid::new_v4())),
            conversation_id,
            event_id: item.event_id().clone(),
            priority: decision.priority,
            severity: decision.severity,
            triggers: decision.triggers.clone(),
            reason: decision.reason.clone(),
            assignee: decision.assignee,
            recommended_action: decision.recommended_action.clone(),
            confidence: decision.confidence,
            created_at: now,
        };
        let alert_id = alert.id.clone();
        if !self.deps.alerts.record(alert).await? {
            debug!(
                event_name = "pipeline.alert.duplicate",
                correlation_id = %item.id,
                conversation_id = conversation_id.0,
                "alert already recorded for this event"
            );
            return Ok(None);
        }
        self.deps.contexts.record_escalation(conversation_id, now);
        self.deps.audit.emit(
            AuditEvent::new(audit, "escalation.alert_recorded", AuditCategory::Escalation, AuditOutcome::Success)
                .with_metadata("alert_id", alert_id.0.clone())
                .with_metadata("priority", decision.priority.as_str())
                .with_metadata("severity", decision.severity.as_str())
                .with_metadata("assignee", decision.assignee.as_str()),
        );

        let note = format!(
            "[{} escalation] {} Assigned to {}. Recommended: {}",
            decision.priority.as_str(),
            decision.reason,
            decision.assignee.as_str(),
            decision.recommended_action
        );
        if let Err(error) = self.deps.messaging.post_private_note(conversation_id, &note).await {
            self.deps.audit.emit(
                AuditEvent::new(audit, "delivery.note_failed", AuditCategory::Delivery, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            warn!(
                event_name = "pipeline.alert.note_failed",
                correlation_id = %item.id,
                conversation_id = conversation_id.0,
                error = %error,
                "escalation recorded but hand-off note was not posted"
            );
        }
        Ok(Some(alert_id))
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
