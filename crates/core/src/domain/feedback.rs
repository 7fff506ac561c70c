use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalId;
use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedbackId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    Approved,
    Rejected,
    Edited,
    /// The approved reply could not be sent when the chain completed.
    DeliveryFailed,
}

impl FeedbackLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Edited => "edited",
            Self::DeliveryFailed => "delivery_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "edited" => Some(Self::Edited),
            "delivery_failed" => Some(Self::DeliveryFailed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    Minor,
    Moderate,
    Major,
    CompleteRewrite,
}

impl EditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
            Self::CompleteRewrite => "complete_rewrite",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditDiff {
    pub distance: usize,
    pub ratio: f64,
    pub edit_type: EditType,
}

/// Append-only training signal for one finished turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: FeedbackId,
    pub conversation_id: ConversationId,
    pub approval_id: Option<ApprovalId>,
    pub input_text: String,
    pub model_draft: Option<String>,
    pub final_text: Option<String>,
    pub labels: BTreeSet<FeedbackLabel>,
    pub edit_diff: Option<EditDiff>,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn has_label(&self, label: FeedbackLabel) -> bool {
        self.labels.contains(&label)
    }
}
