use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use parley_core::domain::conversation::ConversationId;
use parley_core::domain::webhook::{EventId, WebhookEvent};

pub const MESSAGE_CREATED: &str = "message_created";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("webhook body is not valid json: {0}")]
    InvalidJson(String),
    #[error("webhook payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("incoming message has no text content")]
    EmptyContent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookParseOutcome {
    Accepted(WebhookEvent),
    /// Well-formed but not an incoming customer message.
    Ignored { reason: &'static str },
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    event: Option<String>,
    id: Option<Value>,
    message_type: Option<Value>,
    content: Option<String>,
    #[serde(default)]
    private: bool,
    conversation: Option<RawConversation>,
    sender: Option<RawSender>,
    created_at: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawConversation {
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawSender {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Parses a raw platform webhook body.
///
/// Event identity is `"{event}:{id}"`, stable across redeliveries of the same message.
pub fn parse_webhook(body: &[u8]) -> Result<WebhookParseOutcome, PayloadError> {
    let raw: RawPayload =
        serde_json::from_slice(body).map_err(|error| PayloadError::InvalidJson(error.to_string()))?;

    let event = raw.event.as_deref().unwrap_or_default();
    if event != MESSAGE_CREATED {
        return Ok(WebhookParseOutcome::Ignored { reason: "unsupported_event" });
    }
    if !is_incoming(raw.message_type.as_ref()) {
        return Ok(WebhookParseOutcome::Ignored { reason: "not_incoming" });
    }
    if raw.private {
        return Ok(WebhookParseOutcome::Ignored { reason: "private_note" });
    }
    let sender_kind = raw.sender.as_ref().and_then(|sender| sender.kind.as_deref());
    if sender_kind.is_some_and(|kind| !kind.eq_ignore_ascii_case("contact")) {
        return Ok(WebhookParseOutcome::Ignored { reason: "not_customer" });
    }

    let message_id = raw.id.as_ref().and_then(value_as_identifier).ok_or(PayloadError::MissingField("id"))?;
    let conversation_id = raw
        .conversation
        .and_then(|conversation| conversation.id)
        .ok_or(PayloadError::MissingField("conversation.id"))?;
    let content = raw.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(PayloadError::EmptyContent);
    }

    Ok(WebhookParseOutcome::Accepted(WebhookEvent {
        event_id: EventId(format!("{event}:{message_id}")),
        conversation_id: ConversationId(conversation_id),
        message_text: content,
        is_incoming: true,
        received_at: raw.created_at.as_ref().and_then(parse_created_at).unwrap_or_else(Utc::now),
    }))
}

/// The platform encodes direction as `"incoming"` or as the integer `0`.
fn is_incoming(message_type: Option<&Value>) -> bool {
    match message_type {
        Some(Value::String(kind)) => kind.eq_ignore_ascii_case("incoming"),
        Some(Value::Number(number)) => number.as_i64() == Some(0),
        _ => false,
    }
}

fn value_as_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_created_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            DateTime::parse_from_rfc3339(text).ok().map(|timestamp| timestamp.with_timezone(&Utc))
        }
        Value::Number(number) => number.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use parley_core::domain::conversation::ConversationId;

    use super::{parse_webhook, PayloadError, WebhookParseOutcome};

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).expect("serialize")
    }

    fn incoming() -> serde_json::Value {
        json!({
            "event": "message_created",
            "id": 981,
            "message_type": "incoming",
            "content": "Where is my order?",
            "conversation": { "id": 42 },
            "sender": { "type": "contact" },
            "created_at": "2026-10-16T09:00:00Z"
        })
    }

    #[test]
    fn accepts_incoming_customer_message() {
        let outcome = parse_webhook(&body(incoming())).expect("parse");
        let WebhookParseOutcome::Accepted(event) = outcome else {
            panic!("expected accepted event, got {outcome:?}");
        };

        assert_eq!(event.event_id.0, "message_created:981");
        assert_eq!(event.conversation_id, ConversationId(42));
        assert_eq!(event.message_text, "Where is my order?");
        assert!(event.is_incoming);
        assert_eq!(event.received_at.to_rfc3339(), "2026-10-16T09:00:00+00:00");
    }

    #[test]
    fn accepts_numeric_message_type_and_epoch_timestamps() {
        let mut payload = incoming();
        payload["message_type"] = json!(0);
        payload["created_at"] = json!(1_792_141_200);

        assert!(matches!(
            parse_webhook(&body(payload)).expect("parse"),
            WebhookParseOutcome::Accepted(_)
        ));
    }

    #[test]
    fn ignores_everything_that_is_not_an_incoming_customer_message() {
        let mut outgoing = incoming();
        outgoing["message_type"] = json!("outgoing");
        let mut agent = incoming();
        agent["sender"] = json!({ "type": "user" });
        let mut other_event = incoming();
        other_event["event"] = json!("conversation_status_changed");
        let mut note = incoming();
        note["private"] = json!(true);

        let reasons: Vec<_> = [outgoing, agent, other_event, note]
            .into_iter()
            .map(|payload| match parse_webhook(&body(payload)).expect("parse") {
                WebhookParseOutcome::Ignored { reason } => reason,
                accepted => panic!("expected ignored, got {accepted:?}"),
            })
            .collect();

        assert_eq!(reasons, vec!["not_incoming", "not_customer", "unsupported_event", "private_note"]);
    }

    #[test]
    fn malformed_payloads_are_validation_errors() {
        assert!(matches!(parse_webhook(b"{not json"), Err(PayloadError::InvalidJson(_))));

        let mut no_conversation = incoming();
        no_conversation["conversation"] = json!({});
        assert_eq!(
            parse_webhook(&body(no_conversation)),
            Err(PayloadError::MissingField("conversation.id"))
        );

        let mut blank = incoming();
        blank["content"] = json!("   ");
        assert_eq!(parse_webhook(&body(blank)), Err(PayloadError::EmptyContent));

        let mut no_id = incoming();
        no_id.as_object_mut().expect("object").remove("id");
        assert_eq!(parse_webhook(&body(no_id)), Err(PayloadError::MissingField("id")));
    }
}
