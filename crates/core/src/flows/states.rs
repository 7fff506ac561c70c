use serde::{Deserialize, Serialize};

/// Per-turn state of an agent run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Received,
    Classified,
    Escalated,
    Running,
    Suspended,
    DraftReady,
    Resuming,
    Executed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Classified => "classified",
            Self::Escalated => "escalated",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::DraftReady => "draft_ready",
            Self::Resuming => "resuming",
            Self::Executed => "executed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated | Self::DraftReady | Self::Executed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    TriageCompleted,
    UrgentEscalation,
    RuntimeStarted,
    RuntimeInterrupted,
    RuntimeCompleted,
    DecisionApplied,
    /// The chain ended with an approved action carried out.
    ActionsExecuted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    ClassifyMessage,
    RecordHumanAlert,
    InvokeRuntime,
    PersistSuspendedRun,
    RecordFeedback,
    ResumeRuntime,
    DeliverReply,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTransition {
    pub from: RunState,
    pub to: RunState,
    pub event: RunEvent,
    pub actions: Vec<RunAction>,
}
