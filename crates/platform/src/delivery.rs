use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::PlatformConfig;
use parley_core::domain::conversation::ConversationId;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("messaging platform is not configured: {0}")]
    NotConfigured(String),
    #[error("messaging platform request failed: {0}")]
    Transport(String),
    #[error("messaging platform rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl DeliveryError {
    /// Server-side and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConfigured(_) => false,
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }

    /// A transport failure may have happened after the platform stored the
    /// message, so only an explicit rejection proves nothing was posted.
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(self, Self::Rejected { .. }) && self.is_retryable()
    }
}

/// Whether a message may be posted twice without the customer noticing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resend {
    Always,
    OnRejection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Bound on a single HTTP request, connect through response body.
    pub request_timeout_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 250, max_delay_ms: 5_000, request_timeout_ms: 10_000 }
    }
}

impl DeliveryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Sends a customer-visible reply.
    async fn send_reply(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), DeliveryError>;

    /// Posts an agent-only note, used for escalation hand-offs.
    async fn post_private_note(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), DeliveryError>;
}

/// Logs instead of sending. Used when no platform credentials are configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMessagingClient;

#[async_trait]
impl MessagingClient for NoopMessagingClient {
    async fn send_reply(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), DeliveryError> {
        info!(
            event_name = "delivery.reply.skipped",
            conversation_id = conversation_id.0,
            chars = content.chars().count(),
            "platform delivery disabled; reply not sent"
        );
        Ok(())
    }

    async fn post_private_note(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), DeliveryError> {
        info!(
            event_name = "delivery.note.skipped",
            conversation_id = conversation_id.0,
            chars = content.chars().count(),
            "platform delivery disabled; private note not sent"
        );
        Ok(())
    }
}

pub struct HttpMessagingClient {
    http: reqwest::Client,
    base_url: String,
    account_id: u64,
    api_token: SecretString,
    policy: DeliveryPolicy,
}

impl HttpMessagingClient {
    pub fn new(
        base_url: impl Into<String>,
        account_id: u64,
        api_token: SecretString,
        policy: DeliveryPolicy,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(policy.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| DeliveryError::NotConfigured(format!("http client: {error}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url, account_id, api_token, policy })
    }

    pub fn from_config(config: &PlatformConfig) -> Result<Self, DeliveryError> {
        let base_url = config
            .api_base_url
            .clone()
            .ok_or_else(|| DeliveryError::NotConfigured("platform.api_base_url".to_owned()))?;
        let account_id = config
            .account_id
            .ok_or_else(|| DeliveryError::NotConfigured("platform.account_id".to_owned()))?;
        let api_token = config
            .api_token
            .clone()
            .ok_or_else(|| DeliveryError::NotConfigured("platform.api_token".to_owned()))?;
        Self::new(base_url, account_id, api_token, DeliveryPolicy::default())
    }

    pub fn messages_url(&self, conversation_id: ConversationId) -> String {
        format!(
            "{}/api/v1/accounts/{}/conversations/{}/messages",
            self.base_url, self.account_id, conversation_id.0
        )
    }

    async fn post_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        private: bool,
        resend: Resend,
    ) -> Result<(), DeliveryError> {
        let url = self.messages_url(conversation_id);
        let body = json!({
            "content": content,
            "message_type": "outgoing",
            "private": private,
        });

        for attempt in 0..=self.policy.max_retries {
            match self.post_once(&url, &body).await {
                Ok(()) => return Ok(()),
                Err(error) if self.may_retry(&error, resend) && attempt < self.policy.max_retries => {
                    warn!(
                        event_name = "delivery.attempt_failed",
                        conversation_id = conversation_id.0,
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %error,
                        "platform delivery failed; retrying"
                    );
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }

        Err(DeliveryError::Transport("delivery retries exhausted".to_owned()))
    }

    fn may_retry(&self, error: &DeliveryError, resend: Resend) -> bool {
        match resend {
            Resend::Always => error.is_retryable(),
            Resend::OnRejection => error.is_safe_to_resend(),
        }
    }

    async fn post_once(&self, url: &str, body: &serde_json::Value) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(url)
            .header("api_access_token", self.api_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected { status: status.as_u16(), body })
    }
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn send_reply(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), DeliveryError> {
        // Replies carry no idempotency key; a duplicate is customer-visible.
        self.post_message(conversation_id, content, false, Resend::OnRejection).await?;
        info!(
            event_name = "delivery.reply.sent",
            conversation_id = conversation_id.0,
            "reply delivered to platform"
        );
        Ok(())
    }

    async fn post_private_note(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), DeliveryError> {
        self.post_message(conversation_id, content, true, Resend::Always).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parley_core::config::AppConfig;
    use parley_core::domain::conversation::ConversationId;
    use secrecy::SecretString;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::{DeliveryError, DeliveryPolicy, HttpMessagingClient, MessagingClient, NoopMessagingClient};

    fn quick_policy() -> DeliveryPolicy {
        DeliveryPolicy { max_retries: 2, base_delay_ms: 1, max_delay_ms: 1, request_timeout_ms: 200 }
    }

    /// Accepts connections and reads requests without ever answering.
    async fn silent_platform() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("local addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buffer = [0_u8; 1024];
                    while matches!(socket.read(&mut buffer).await, Ok(read) if read > 0) {}
                });
            }
        });
        (format!("http://{address}"), accepted)
    }

    fn client_for(base_url: &str) -> HttpMessagingClient {
        HttpMessagingClient::new(base_url, 1, SecretString::from("token".to_owned()), quick_policy())
            .expect("client builds")
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = DeliveryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 500, ..DeliveryPolicy::default() };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
    }

    #[test]
    fn only_transport_and_server_errors_are_retryable() {
        assert!(DeliveryError::Transport("reset".to_owned()).is_retryable());
        assert!(DeliveryError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(DeliveryError::Rejected { status: 429, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Rejected { status: 422, body: String::new() }.is_retryable());
        assert!(!DeliveryError::NotConfigured("platform.api_token".to_owned()).is_retryable());
    }

    #[test]
    fn only_explicit_rejections_are_safe_to_resend() {
        assert!(!DeliveryError::Transport("timed out".to_owned()).is_safe_to_resend());
        assert!(DeliveryError::Rejected { status: 503, body: String::new() }.is_safe_to_resend());
        assert!(!DeliveryError::Rejected { status: 400, body: String::new() }.is_safe_to_resend());
    }

    #[tokio::test]
    async fn hung_platform_times_out_and_reply_is_posted_once() {
        let (base_url, accepted) = silent_platform().await;
        let client = client_for(&base_url);

        let started = Instant::now();
        let result = client.send_reply(ConversationId(5), "your refund is on its way").await;

        assert!(matches!(result, Err(DeliveryError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn private_notes_are_retried_after_transport_failures() {
        let (base_url, accepted) = silent_platform().await;
        let client = client_for(&base_url);

        let result = client.post_private_note(ConversationId(5), "escalated").await;

        assert!(matches!(result, Err(DeliveryError::Transport(_))));
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn http_client_builds_account_scoped_message_urls() {
        let client = HttpMessagingClient::new(
            "https://chat.example.com/",
            7,
            SecretString::from("token".to_owned()),
            DeliveryPolicy::default(),
        )
        .expect("client builds");
        assert_eq!(
            client.messages_url(ConversationId(42)),
            "https://chat.example.com/api/v1/accounts/7/conversations/42/messages"
        );
    }

    #[test]
    fn from_config_requires_credentials() {
        let config = AppConfig::default().platform;
        assert!(matches!(
            HttpMessagingClient::from_config(&config),
            Err(DeliveryError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn noop_client_always_succeeds() {
        let client = NoopMessagingClient;
        assert_eq!(client.send_reply(ConversationId(1), "hi").await, Ok(()));
        assert_eq!(client.post_private_note(ConversationId(1), "note").await, Ok(()));
    }
}
