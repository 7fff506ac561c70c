pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod flows;
pub mod learning;
pub mod queue;
pub mod triage;

pub use context::ConversationContextStore;
pub use domain::approval::{
    ApprovalId, Decision, DecisionAction, Interruption, InterruptionResolution,
    PendingInterruption, RunSnapshot, SuspendedRun, SuspendedRunStatus,
};
pub use domain::conversation::{
    ContextMessage, ConversationContext, ConversationId, ConversationSummary, Sentiment,
};
pub use domain::escalation::{
    Assignee, EscalationDecision, EscalationStats, EscalationTrigger, HumanAlert, HumanAlertId,
    Priority, Severity,
};
pub use domain::feedback::{EditDiff, EditType, FeedbackId, FeedbackLabel, FeedbackRecord};
pub use domain::webhook::{
    EventId, QueueItem, QueueItemId, QueueItemStatus, QueueStats, QueueTransition, WebhookEvent,
};
pub use errors::{ApplicationError, DomainError, ErrorClass, InterfaceError};
pub use escalation::{EscalationEvaluator, EscalationThresholds};
pub use flows::{AgentRunFlow, FlowEngine, RunEvent, RunFlowError, RunState};
pub use queue::{QueueEngine, QueueEngineConfig, QueueError, RetryPolicy};
pub use triage::{TriageClassifier, TriageResult};
