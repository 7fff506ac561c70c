use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ConversationId, Sentiment};
use crate::domain::webhook::EventId;

/// Trigger kinds in the fixed order used for reason text and statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationTrigger {
    LegalThreat,
    PolicyViolation,
    RefundRequest,
    ReturnRequest,
    NegativeSentiment,
    ComplexIssue,
    RepeatedContact,
}

impl EscalationTrigger {
    pub const ALL: [Self; 7] = [
        Self::LegalThreat,
        Self::PolicyViolation,
        Self::RefundRequest,
        Self::ReturnRequest,
        Self::NegativeSentiment,
        Self::ComplexIssue,
        Self::RepeatedContact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegalThreat => "legal-threat",
            Self::PolicyViolation => "policy-violation",
            Self::RefundRequest => "refund-request",
            Self::ReturnRequest => "return-request",
            Self::NegativeSentiment => "negative-sentiment",
            Self::ComplexIssue => "complex-issue",
            Self::RepeatedContact => "repeated-contact",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|trigger| trigger.as_str() == value.trim())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Self::Critical => Priority::Urgent,
            Self::High => Priority::High,
            Self::Medium => Priority::Medium,
            Self::Low => Priority::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Only urgent escalations bypass the agent runtime.
    pub fn bypasses_agent(&self) -> bool {
        matches!(self, Self::Urgent)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    Manager,
    SupportLead,
    SupportTeam,
}

impl Assignee {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::SupportLead => "support_lead",
            Self::SupportTeam => "support_team",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "support_lead" => Some(Self::SupportLead),
            "support_team" => Some(Self::SupportTeam),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub priority: Priority,
    pub severity: Severity,
    pub triggers: Vec<EscalationTrigger>,
    pub sentiment: Sentiment,
    pub reason: String,
    pub recommended_action: String,
    pub assignee: Assignee,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

impl EscalationDecision {
    pub fn has_trigger(&self, trigger: EscalationTrigger) -> bool {
        self.triggers.contains(&trigger)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanAlertId(pub String);

/// Operator-facing record of an escalation; one per inbound event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HumanAlert {
    pub id: HumanAlertId,
    pub conversation_id: ConversationId,
    pub event_id: EventId,
    pub priority: Priority,
    pub severity: Severity,
    pub triggers: Vec<EscalationTrigger>,
    pub reason: String,
    pub assignee: Assignee,
    pub recommended_action: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStats {
    pub total: u64,
    pub by_trigger: std::collections::BTreeMap<String, u64>,
    pub by_severity: std::collections::BTreeMap<String, u64>,
}

impl EscalationStats {
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a HumanAlert>) -> Self {
        let mut stats = Self::default();
        for alert in alerts {
            stats.total += 1;
            *stats.by_severity.entry(alert.severity.as_str().to_owned()).or_default() += 1;
            for trigger in &alert.triggers {
                *stats.by_trigger.entry(trigger.as_str().to_owned()).or_default() += 1;
            }
        }
        stats
    }
}
