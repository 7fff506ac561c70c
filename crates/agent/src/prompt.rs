use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use parley_core::domain::conversation::{ContextMessage, Sentiment};

use crate::guardrails::{APPROVAL_REQUIRED_TOOLS, READ_ONLY_TOOLS, SEND_REPLY};
use crate::llm::ChatPrompt;

const ACTION_PREFIX: &str = "ACTION:";

#[derive(Clone, Debug, PartialEq)]
pub struct ProposedAction {
    pub tool_name: String,
    pub arguments: Value,
}

/// A model completion split into customer-facing text and tool requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelOutput {
    pub reply: String,
    pub actions: Vec<ProposedAction>,
}

pub fn system_prompt(agent_name: &str) -> String {
    let mut prompt = format!(
        "You are {agent_name}, a customer support agent. Reply to the customer's latest \
         message politely and concisely. Never promise refunds, cancellations or order \
         changes in the reply text; request them as actions instead.\n\n\
         To request an action, put it on its own line as:\n\
         ACTION: <tool_name> <json arguments>\n\nAvailable tools:\n"
    );
    for tool in APPROVAL_REQUIRED_TOOLS.iter().filter(|tool| **tool != SEND_REPLY) {
        let _ = writeln!(prompt, "- {tool} (reviewed by a human before it runs)");
    }
    for tool in READ_ONLY_TOOLS {
        let _ = writeln!(prompt, "- {tool}");
    }
    prompt
}

pub fn first_turn_prompt(
    agent_name: &str,
    message: &str,
    history: &[ContextMessage],
    sentiment: Sentiment,
    urgency: f64,
) -> ChatPrompt {
    let mut user = String::new();
    let _ = writeln!(user, "Customer sentiment: {} (urgency {urgency:.2})", sentiment.as_str());
    let earlier: Vec<&ContextMessage> =
        history.iter().filter(|entry| entry.text != message).collect();
    if !earlier.is_empty() {
        user.push_str("\nConversation so far:\n");
        for entry in earlier {
            let speaker = if entry.is_incoming { "customer" } else { "agent" };
            let _ = writeln!(user, "{speaker}: {}", entry.text);
        }
    }
    let _ = write!(user, "\nLatest customer message:\n{message}");

    ChatPrompt { system: system_prompt(agent_name), user }
}

/// Prompt for the reply that follows reviewed tool calls.
pub fn follow_up_prompt(base: &ChatPrompt, outcomes: &[ToolOutcomeLine]) -> ChatPrompt {
    let mut user = base.user.clone();
    user.push_str("\n\nTool results:\n");
    for outcome in outcomes {
        let _ = writeln!(user, "- {}: {}", outcome.tool_name, outcome.summary);
    }
    user.push_str("\nWrite the reply to the customer now. Do not request further actions.");
    ChatPrompt { system: base.system.clone(), user }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcomeLine {
    pub tool_name: String,
    pub summary: String,
}

pub fn parse_model_output(text: &str) -> ModelOutput {
    let mut reply_lines = Vec::new();
    let mut actions = Vec::new();

    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix(ACTION_PREFIX) else {
            reply_lines.push(line);
            continue;
        };
        let rest = rest.trim();
        let (tool_name, raw_arguments) = match rest.split_once(char::is_whitespace) {
            Some((tool, arguments)) => (tool.trim(), arguments.trim()),
            None => (rest, ""),
        };
        if tool_name.is_empty() {
            warn!(line = %line, "ignoring action line without a tool name");
            continue;
        }
        let arguments = if raw_arguments.is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str::<Value>(raw_arguments) {
                Ok(value) => value,
                Err(error) => {
                    warn!(tool = tool_name, error = %error, "ignoring action with malformed arguments");
                    continue;
                }
            }
        };
        actions.push(ProposedAction { tool_name: tool_name.to_owned(), arguments });
    }

    ModelOutput { reply: reply_lines.join("\n").trim().to_owned(), actions }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use parley_core::domain::conversation::{ContextMessage, Sentiment};
    use parley_core::domain::webhook::EventId;

    use super::{first_turn_prompt, parse_model_output, ProposedAction};

    #[test]
    fn action_lines_are_split_from_reply_text() {
        let output = parse_model_output(
            "I'm sorry about the delay.\nACTION: issue_refund {\"order_id\": \"A-17\"}\n\
             ACTION: lookup_order\nWe'll sort it out.",
        );

        assert_eq!(output.reply, "I'm sorry about the delay.\nWe'll sort it out.");
        assert_eq!(
            output.actions,
            vec![
                ProposedAction {
                    tool_name: "issue_refund".to_owned(),
                    arguments: json!({ "order_id": "A-17" })
                },
                ProposedAction { tool_name: "lookup_order".to_owned(), arguments: json!({}) },
            ]
        );
    }

    #[test]
    fn malformed_action_arguments_are_dropped() {
        let output = parse_model_output("Hello\nACTION: cancel_order {oops");
        assert_eq!(output.reply, "Hello");
        assert!(output.actions.is_empty());
    }

    #[test]
    fn prompt_carries_history_and_triage_signals() {
        let history = vec![
            ContextMessage {
                event_id: EventId("message_created:1".to_owned()),
                text: "Hi, I ordered a lamp".to_owned(),
                is_incoming: true,
                received_at: Utc::now(),
            },
            ContextMessage {
                event_id: EventId("message_created:2".to_owned()),
                text: "Where is my order?".to_owned(),
                is_incoming: true,
                received_at: Utc::now(),
            },
        ];
        let prompt =
            first_turn_prompt("support-agent", "Where is my order?", &history, Sentiment::Neutral, 0.2);

        assert!(prompt.system.starts_with("You are support-agent"));
        assert!(prompt.system.contains("issue_refund"));
        assert!(prompt.user.contains("customer: Hi, I ordered a lamp"));
        assert!(prompt.user.contains("neutral (urgency 0.20)"));
        assert!(prompt.user.ends_with("Where is my order?"));
    }
}
