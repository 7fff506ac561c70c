use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{RunAction, RunEvent, RunState, RunTransition};

pub trait FlowDefinition {
    fn initial_state(&self) -> RunState;
    fn transition(&self, current: RunState, event: RunEvent) -> Result<RunTransition, RunFlowError>;
}

/// Turn lifecycle: received, classified, then either escalated or run by the agent,
/// which suspends for approval or produces a draft. Decisions resume suspended runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AgentRunFlow;

impl FlowDefinition for AgentRunFlow {
    fn initial_state(&self) -> RunState {
        RunState::Received
    }

    fn transition(&self, current: RunState, event: RunEvent) -> Result<RunTransition, RunFlowError> {
        transition_agent_run(current, event)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> RunState {
        self.flow.initial_state()
    }

    pub fn apply(&self, current: RunState, event: RunEvent) -> Result<RunTransition, RunFlowError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: RunState,
        event: RunEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<RunTransition, RunFlowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunFlowError {
    #[error("invalid run transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RunState, event: RunEvent },
}

fn transition_agent_run(current: RunState, event: RunEvent) -> Result<RunTransition, RunFlowError> {
    use RunAction::{
        DeliverReply, InvokeRuntime, PersistSuspendedRun, RecordFeedback, RecordHumanAlert,
        ResumeRuntime,
    };
    use RunEvent::{
        ActionsExecuted, DecisionApplied, RuntimeCompleted, RuntimeInterrupted, RuntimeStarted,
        TriageCompleted, UrgentEscalation,
    };
    use RunState::{
        Classified, DraftReady, Escalated, Executed, Received, Resuming, Running, Suspended,
    };

    let (to, actions) = match (current, event) {
        (Received, TriageCompleted) => (Classified, Vec::new()),
        (Classified, UrgentEscalation) => (Escalated, vec![RecordHumanAlert]),
        (Classified, RuntimeStarted) => (Running, vec![InvokeRuntime]),
        (Running, RuntimeInterrupted) | (Resuming, RuntimeInterrupted) => {
            (Suspended, vec![PersistSuspendedRun])
        }
        (Running, RuntimeCompleted) | (Resuming, RuntimeCompleted) => {
            (DraftReady, vec![RecordFeedback])
        }
        (Suspended, DecisionApplied) => (Resuming, vec![ResumeRuntime]),
        (Resuming, ActionsExecuted) => (Executed, vec![DeliverReply, RecordFeedback]),
        _ => return Err(RunFlowError::InvalidTransition { state: current, event }),
    };

    Ok(RunTransition { from: current, to, event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::conversation::ConversationId;
    use crate::flows::engine::{AgentRunFlow, FlowEngine, RunFlowError};
    use crate::flows::states::{RunAction, RunEvent, RunState};

    fn walk(engine: &FlowEngine<AgentRunFlow>, events: &[RunEvent]) -> RunState {
        let mut state = engine.initial_state();
        for event in events {
            state = engine.apply(state, *event).expect("valid transition").to;
        }
        state
    }

    #[test]
    fn first_turn_can_draft_or_suspend() {
        let engine = FlowEngine::new(AgentRunFlow);

        let drafted = walk(
            &engine,
            &[RunEvent::TriageCompleted, RunEvent::RuntimeStarted, RunEvent::RuntimeCompleted],
        );
        assert_eq!(drafted, RunState::DraftReady);
        assert!(drafted.is_terminal());

        let suspended = walk(
            &engine,
            &[RunEvent::TriageCompleted, RunEvent::RuntimeStarted, RunEvent::RuntimeInterrupted],
        );
        assert_eq!(suspended, RunState::Suspended);
        assert!(!suspended.is_terminal());
    }

    #[test]
    fn urgent_escalation_never_reaches_the_runtime() {
        let engine = FlowEngine::new(AgentRunFlow);
        let escalated = engine
            .apply(RunState::Classified, RunEvent::UrgentEscalation)
            .expect("classified -> escalated");

        assert_eq!(escalated.to, RunState::Escalated);
        assert_eq!(escalated.actions, vec![RunAction::RecordHumanAlert]);

        let error = engine.apply(RunState::Escalated, RunEvent::RuntimeStarted).unwrap_err();
        assert_eq!(
            error,
            RunFlowError::InvalidTransition {
                state: RunState::Escalated,
                event: RunEvent::RuntimeStarted
            }
        );
    }

    #[test]
    fn resume_can_suspend_again_or_execute() {
        let engine = FlowEngine::new(AgentRunFlow);

        let resuming = engine.apply(RunState::Suspended, RunEvent::DecisionApplied).unwrap();
        assert_eq!(resuming.to, RunState::Resuming);
        assert_eq!(resuming.actions, vec![RunAction::ResumeRuntime]);

        let again = engine.apply(RunState::Resuming, RunEvent::RuntimeInterrupted).unwrap();
        assert_eq!(again.to, RunState::Suspended);

        let executed = engine.apply(RunState::Resuming, RunEvent::ActionsExecuted).unwrap();
        assert_eq!(executed.to, RunState::Executed);
        assert!(executed.actions.contains(&RunAction::DeliverReply));

        let rejected = engine.apply(RunState::Resuming, RunEvent::RuntimeCompleted).unwrap();
        assert_eq!(rejected.to, RunState::DraftReady);
    }

    #[test]
    fn decisions_only_apply_to_suspended_runs() {
        let engine = FlowEngine::new(AgentRunFlow);
        assert!(engine.apply(RunState::DraftReady, RunEvent::DecisionApplied).is_err());
        assert!(engine.apply(RunState::Running, RunEvent::DecisionApplied).is_err());
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::new(AgentRunFlow);
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(ConversationId(42)), "item-42", "worker-1");

        engine
            .apply_with_audit(RunState::Received, RunEvent::TriageCompleted, &sink, &audit)
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(RunState::Executed, RunEvent::DecisionApplied, &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("classified"));
        assert_eq!(events[1].event_type, "flow.transition_rejected");
        assert_eq!(events[1].conversation_id, Some(ConversationId(42)));
    }
}
