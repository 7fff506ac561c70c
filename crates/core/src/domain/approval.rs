use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque agent run state. Only the agent runtime interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot(pub String);

/// A side-effecting tool invocation the agent wants to perform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub agent_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Human input applied to exactly one interruption of one suspended run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub approval_id: ApprovalId,
    pub interruption_index: usize,
    pub action: DecisionAction,
    pub edited_content: Option<String>,
    pub rejection_reason: Option<String>,
    pub actor_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptionResolution {
    pub index: usize,
    pub tool_name: String,
    pub action: DecisionAction,
    pub edited_content: Option<String>,
    pub rejection_reason: Option<String>,
    pub actor_id: String,
    pub resolved_at: DateTime<Utc>,
}

impl InterruptionResolution {
    pub fn from_decision(decision: &Decision, tool_name: impl Into<String>) -> Self {
        Self {
            index: decision.interruption_index,
            tool_name: tool_name.into(),
            action: decision.action,
            edited_content: decision.edited_content.clone(),
            rejection_reason: decision.rejection_reason.clone(),
            actor_id: decision.actor_id.clone(),
            resolved_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.action == DecisionAction::Approve
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingInterruption {
    pub interruption: Interruption,
    pub resolution: Option<InterruptionResolution>,
}

impl PendingInterruption {
    pub fn new(interruption: Interruption) -> Self {
        Self { interruption, resolution: None }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendedRunStatus {
    Pending,
    Superseded,
    Resolved,
    /// The chain completed but the approved reply was not delivered.
    Undelivered,
}

impl SuspendedRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Superseded => "superseded",
            Self::Resolved => "resolved",
            Self::Undelivered => "undelivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "superseded" => Some(Self::Superseded),
            "resolved" => Some(Self::Resolved),
            "undelivered" => Some(Self::Undelivered),
            _ => None,
        }
    }
}

/// A persisted, externally resumable agent run awaiting human decisions.
///
/// At most one run per conversation is `Pending`; saving a new one supersedes the
/// previous. `prior_resolutions` carries decisions from earlier runs in the same
/// approval chain so the final feedback record can label the whole chain.
///
/// `final_output` holds the reply the completed chain produced, kept so an
/// `Undelivered` run can be re-sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuspendedRun {
    pub id: ApprovalId,
    pub conversation_id: ConversationId,
    pub snapshot: RunSnapshot,
    pub interruptions: Vec<PendingInterruption>,
    pub status: SuspendedRunStatus,
    pub last_input: String,
    pub model_draft: Option<String>,
    pub prior_resolutions: Vec<InterruptionResolution>,
    #[serde(default)]
    pub final_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SuspendedRun {
    pub fn is_pending(&self) -> bool {
        self.status == SuspendedRunStatus::Pending
    }

    pub fn unresolved(&self) -> impl Iterator<Item = (usize, &Interruption)> {
        self.interruptions
            .iter()
            .enumerate()
            .filter(|(_, pending)| !pending.is_resolved())
            .map(|(index, pending)| (index, &pending.interruption))
    }

    pub fn all_resolved(&self) -> bool {
        self.interruptions.iter().all(PendingInterruption::is_resolved)
    }

    pub fn resolutions(&self) -> Vec<InterruptionResolution> {
        self.interruptions.iter().filter_map(|pending| pending.resolution.clone()).collect()
    }

    /// Resolutions across the whole chain, oldest first.
    pub fn chain_resolutions(&self) -> Vec<InterruptionResolution> {
        let mut chain = self.prior_resolutions.clone();
        chain.extend(self.resolutions());
        chain
    }
}
