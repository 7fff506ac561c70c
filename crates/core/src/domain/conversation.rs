use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::webhook::EventId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentiment classes in severity order; the first matching class wins during triage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Angry,
    Frustrated,
    Disappointed,
    #[default]
    Neutral,
    Satisfied,
    Happy,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Angry => "angry",
            Self::Frustrated => "frustrated",
            Self::Disappointed => "disappointed",
            Self::Neutral => "neutral",
            Self::Satisfied => "satisfied",
            Self::Happy => "happy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "angry" => Some(Self::Angry),
            "frustrated" => Some(Self::Frustrated),
            "disappointed" => Some(Self::Disappointed),
            "neutral" => Some(Self::Neutral),
            "satisfied" => Some(Self::Satisfied),
            "happy" => Some(Self::Happy),
            _ => None,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Angry | Self::Frustrated)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub event_id: EventId,
    pub text: String,
    pub is_incoming: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationHistory {
    pub count: u32,
    pub occurred_at: Vec<DateTime<Utc>>,
}

/// Rolling per-conversation state: bounded message window, latest triage signals
/// and escalation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: ConversationId,
    pub recent_messages: VecDeque<ContextMessage>,
    pub sentiment: Sentiment,
    pub urgency: f64,
    pub escalation_history: EscalationHistory,
    /// Customer-authored messages ever seen, independent of the window bound.
    pub customer_message_count: u32,
    /// Recently appended event ids, kept longer than the message window.
    #[serde(default)]
    pub seen_event_ids: VecDeque<EventId>,
    /// Messages that arrived while an approval was outstanding, oldest first.
    #[serde(default)]
    pub deferred: Vec<ContextMessage>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            recent_messages: VecDeque::new(),
            sentiment: Sentiment::Neutral,
            urgency: 0.0,
            escalation_history: EscalationHistory::default(),
            customer_message_count: 0,
            seen_event_ids: VecDeque::new(),
            deferred: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn message_count(&self) -> usize {
        self.recent_messages.len()
    }

    /// Customer messages that arrived before the latest one.
    pub fn prior_contact_count(&self) -> u32 {
        self.customer_message_count.saturating_sub(1)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub message_count: usize,
    pub customer_message_count: u32,
    pub sentiment: Sentiment,
    pub urgency: f64,
    pub escalation_count: u32,
    pub last_escalated_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}
