//! Inbound message pipeline: queue dispatch, triage and escalation, agent runs and
//! human decisions on suspended runs.

pub mod controller;
pub mod decisions;
pub mod locks;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use parley_agent::{AgentProfile, AgentRuntime, RuntimeError};
use parley_core::audit::AuditSink;
use parley_core::domain::approval::SuspendedRun;
use parley_core::errors::{ApplicationError, DomainError, ErrorClass};
use parley_core::flows::{AgentRunFlow, FlowEngine, RunFlowError};
use parley_core::queue::{QueueEngine, QueueError};
use parley_core::{ConversationContextStore, EscalationEvaluator, TriageClassifier};
use parley_db::{
    ApprovalRepository, FeedbackRepository, HumanAlertRepository, RepositoryError,
    WebhookQueueRepository,
};
use parley_platform::{DeliveryError, MessagingClient};

pub use controller::{RunController, TurnOutcome};
pub use decisions::{DecisionError, DecisionHandler, DecisionOutcome};
pub use locks::ConversationLocks;
pub use worker::{Dispatcher, WorkerConfig};

/// Everything the pipeline touches, constructed once at startup.
#[derive(Clone)]
pub struct PipelineDeps {
    pub queue: Arc<dyn WebhookQueueRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub feedback: Arc<dyn FeedbackRepository>,
    pub alerts: Arc<dyn HumanAlertRepository>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub messaging: Arc<dyn MessagingClient>,
    pub audit: Arc<dyn AuditSink>,
    pub contexts: ConversationContextStore,
    pub locks: ConversationLocks,
    pub engine: QueueEngine,
    pub flow: FlowEngine<AgentRunFlow>,
    pub triage: TriageClassifier,
    pub escalation: EscalationEvaluator,
    pub profile: AgentProfile,
    /// Bound on one runtime `run`, `settle` or `resume` call.
    pub runtime_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("agent runtime timed out after {0:?}")]
    RuntimeTimeout(Duration),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Flow(#[from] RunFlowError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Repository(RepositoryError::Database(_)) | Self::RuntimeTimeout(_) => {
                ErrorClass::Transient
            }
            Self::Repository(RepositoryError::Decode(_)) | Self::Queue(_) | Self::Flow(_) => {
                ErrorClass::Validation
            }
            Self::Runtime(error) if error.is_retryable() => ErrorClass::Transient,
            Self::Runtime(_) => ErrorClass::Validation,
            Self::Delivery(error) if error.is_retryable() => ErrorClass::Transient,
            Self::Delivery(_) => ErrorClass::Validation,
        }
    }
}

impl From<PipelineError> for ApplicationError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Queue(error) => DomainError::Queue(error).into(),
            PipelineError::Flow(error) => DomainError::RunFlow(error).into(),
            PipelineError::Repository(error @ RepositoryError::Decode(_)) => {
                Self::Corrupt(error.to_string())
            }
            PipelineError::Repository(error) => Self::Persistence(error.to_string()),
            other => Self::Integration(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInterruptionView {
    pub index: usize,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub agent_name: String,
}

impl PendingInterruptionView {
    pub fn unresolved(run: &SuspendedRun) -> Vec<Self> {
        run.unresolved()
            .map(|(index, interruption)| Self {
                index,
                tool_name: interruption.tool_name.clone(),
                arguments: interruption.arguments.clone(),
                agent_name: interruption.agent_name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use parley_agent::{AgentInput, AgentProfile, AgentRuntime, RunOutcome, RuntimeError};
    use parley_core::audit::InMemoryAuditSink;
    use parley_core::domain::approval::{Interruption, InterruptionResolution, RunSnapshot};
    use parley_core::domain::conversation::ConversationId;
    use parley_core::domain::webhook::{EventId, WebhookEvent};
    use parley_core::flows::{AgentRunFlow, FlowEngine};
    use parley_core::queue::{QueueEngine, QueueEngineConfig};
    use parley_core::{ConversationContextStore, EscalationEvaluator, TriageClassifier};
    use parley_db::repositories::{
        InMemoryApprovalRepository, InMemoryFeedbackRepository, InMemoryHumanAlertRepository,
        InMemoryWebhookQueueRepository,
    };
    use parley_platform::{DeliveryError, MessagingClient};

    use super::{ConversationLocks, PipelineDeps};

    pub enum Step {
        Reply(&'static str),
        Interrupt(Vec<&'static str>),
        Fail(RuntimeError),
        Hang,
    }

    const SETTLED: &str = "settled:";

    /// Runtime double: plays scripted steps for `run` and `resume` in order and
    /// records every call. Settling only marks the snapshot.
    #[derive(Default)]
    pub struct ScriptedRuntime {
        steps: Mutex<VecDeque<Step>>,
        pub runs: Mutex<Vec<AgentInput>>,
        pub settled: Mutex<Vec<Vec<InterruptionResolution>>>,
        calls: AtomicUsize,
    }

    impl ScriptedRuntime {
        pub fn new(steps: Vec<Step>) -> Self {
            Self { steps: Mutex::new(steps.into()), ..Self::default() }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn run_messages(&self) -> Vec<String> {
            self.runs.lock().unwrap().iter().map(|input| input.message.clone()).collect()
        }

        async fn next(&self) -> Result<RunOutcome, RuntimeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(RunOutcome::Completed { output: Some(text.to_owned()) }),
                Some(Step::Interrupt(tools)) => Ok(RunOutcome::Interrupted {
                    snapshot: RunSnapshot(json!({ "tools": tools }).to_string()),
                    interruptions: tools
                        .iter()
                        .map(|tool| Interruption {
                            tool_name: (*tool).to_owned(),
                            arguments: json!({ "content": format!("draft for {tool}") }),
                            agent_name: "support-agent".to_owned(),
                        })
                        .collect(),
                    draft: Some("Model draft".to_owned()),
                }),
                Some(Step::Fail(error)) => Err(error),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(RunOutcome::Completed { output: None })
                }
                None => Ok(RunOutcome::Completed { output: None }),
            }
        }
    }

    #[async_trait]
    impl AgentRuntime for ScriptedRuntime {
        async fn run(&self, input: &AgentInput) -> Result<RunOutcome, RuntimeError> {
            self.runs.lock().unwrap().push(input.clone());
            self.next().await
        }

        async fn settle(
            &self,
            snapshot: &RunSnapshot,
            resolutions: &[InterruptionResolution],
        ) -> Result<RunSnapshot, RuntimeError> {
            if snapshot.0.starts_with(SETTLED) {
                return Ok(snapshot.clone());
            }
            self.settled.lock().unwrap().push(resolutions.to_vec());
            Ok(RunSnapshot(format!("{SETTLED}{}", snapshot.0)))
        }

        async fn resume(&self, snapshot: &RunSnapshot) -> Result<RunOutcome, RuntimeError> {
            if !snapshot.0.starts_with(SETTLED) {
                return Err(RuntimeError::InvalidSnapshot("not settled".to_owned()));
            }
            self.next().await
        }
    }

    #[derive(Default)]
    pub struct RecordingMessagingClient {
        pub replies: Mutex<Vec<(ConversationId, String)>>,
        pub notes: Mutex<Vec<(ConversationId, String)>>,
        /// While set, `send_reply` fails with a transport error.
        pub fail_replies: AtomicBool,
    }

    #[async_trait]
    impl MessagingClient for RecordingMessagingClient {
        async fn send_reply(
            &self,
            conversation_id: ConversationId,
            content: &str,
        ) -> Result<(), DeliveryError> {
            if self.fail_replies.load(Ordering::SeqCst) {
                return Err(DeliveryError::Transport("connection reset".to_owned()));
            }
            self.replies.lock().unwrap().push((conversation_id, content.to_owned()));
            Ok(())
        }

        async fn post_private_note(
            &self,
            conversation_id: ConversationId,
            content: &str,
        ) -> Result<(), DeliveryError> {
            self.notes.lock().unwrap().push((conversation_id, content.to_owned()));
            Ok(())
        }
    }

    pub struct Harness {
        pub deps: PipelineDeps,
        pub runtime: Arc<ScriptedRuntime>,
        pub messaging: Arc<RecordingMessagingClient>,
        pub feedback: Arc<InMemoryFeedbackRepository>,
        pub audit: InMemoryAuditSink,
    }

    pub fn harness(steps: Vec<Step>) -> Harness {
        harness_with(steps, QueueEngineConfig {
            max_attempts: 3,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            claim_timeout_secs: 300,
        })
    }

    pub fn harness_with(steps: Vec<Step>, queue: QueueEngineConfig) -> Harness {
        let runtime = Arc::new(ScriptedRuntime::new(steps));
        let messaging = Arc::new(RecordingMessagingClient::default());
        let feedback = Arc::new(InMemoryFeedbackRepository::default());
        let audit = InMemoryAuditSink::default();
        let deps = PipelineDeps {
            queue: Arc::new(InMemoryWebhookQueueRepository::default()),
            approvals: Arc::new(InMemoryApprovalRepository::default()),
            feedback: feedback.clone(),
            alerts: Arc::new(InMemoryHumanAlertRepository::default()),
            runtime: runtime.clone(),
            messaging: messaging.clone(),
            audit: Arc::new(audit.clone()),
            contexts: ConversationContextStore::new(20),
            locks: ConversationLocks::default(),
            engine: QueueEngine::with_config(queue),
            flow: FlowEngine::new(AgentRunFlow),
            triage: TriageClassifier::new(),
            escalation: EscalationEvaluator::default(),
            profile: AgentProfile {
                agent_name: "support-agent".to_owned(),
                human_review: true,
                reviewers: Vec::new(),
            },
            runtime_timeout: Duration::from_millis(200),
        };
        Harness { deps, runtime, messaging, feedback, audit }
    }

    pub fn event(id: &str, conversation_id: i64, text: &str) -> WebhookEvent {
        WebhookEvent {
            event_id: EventId(id.to_owned()),
            conversation_id: ConversationId(conversation_id),
            message_text: text.to_owned(),
            is_incoming: true,
            received_at: Utc::now(),
        }
    }
}
