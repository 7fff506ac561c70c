use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-parley-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing x-parley-signature header")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature does not match request body")]
    Mismatch,
}

/// Verifies lowercase-hex HMAC-SHA256 signatures over raw webhook bodies.
/// Without a configured secret every request is accepted.
#[derive(Clone, Debug, Default)]
pub struct WebhookVerifier {
    secret: Option<SecretString>,
}

impl WebhookVerifier {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    pub fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let signature = signature.map(str::trim).filter(|value| !value.is_empty());
        let signature = signature.ok_or(SignatureError::Missing)?;
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::Malformed)?;
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
    }

    /// Signs `body` the way the platform does. Used by tests and local tooling.
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()?;
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}
