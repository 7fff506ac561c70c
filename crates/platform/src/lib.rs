//! Messaging platform edge.
//!
//! - **Webhook payloads** (`webhook`) - parse `message_created` events and keep only
//!   incoming customer messages
//! - **Signatures** (`signature`) - HMAC-SHA256 verification of raw webhook bodies
//! - **Delivery** (`delivery`) - outbound replies and private notes with bounded retry

pub mod delivery;
pub mod signature;
pub mod webhook;

pub use delivery::{
    DeliveryError, DeliveryPolicy, HttpMessagingClient, MessagingClient, NoopMessagingClient,
};
pub use signature::{SignatureError, WebhookVerifier, SIGNATURE_HEADER};
pub use webhook::{parse_webhook, PayloadError, WebhookParseOutcome};
