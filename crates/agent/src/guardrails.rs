use std::collections::BTreeSet;

pub const SEND_REPLY: &str = "send_reply";

/// Tools that change something outside the conversation transcript.
pub const APPROVAL_REQUIRED_TOOLS: &[&str] =
    &[SEND_REPLY, "issue_refund", "cancel_order", "update_order"];

/// Read-only lookups the agent may run without a human.
pub const READ_ONLY_TOOLS: &[&str] = &["lookup_order", "lookup_customer"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolDecision {
    Allow,
    RequireApproval,
    Deny { reason_code: &'static str, tool_name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolGuardrails {
    approval_required: BTreeSet<String>,
    read_only: BTreeSet<String>,
    /// Every customer-facing reply goes through `send_reply` approval.
    pub human_review: bool,
}

impl Default for ToolGuardrails {
    fn default() -> Self {
        Self {
            approval_required: APPROVAL_REQUIRED_TOOLS.iter().map(|tool| tool.to_string()).collect(),
            read_only: READ_ONLY_TOOLS.iter().map(|tool| tool.to_string()).collect(),
            human_review: true,
        }
    }
}

impl ToolGuardrails {
    pub fn new(human_review: bool) -> Self {
        Self { human_review, ..Self::default() }
    }

    pub fn evaluate(&self, tool_name: &str) -> ToolDecision {
        let tool_name = tool_name.trim();
        if self.approval_required.contains(tool_name) {
            ToolDecision::RequireApproval
        } else if self.read_only.contains(tool_name) {
            ToolDecision::Allow
        } else {
            ToolDecision::Deny { reason_code: "unknown_tool", tool_name: tool_name.to_owned() }
        }
    }
}
