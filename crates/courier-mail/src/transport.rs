use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::TransportError;

/// Tokens are treated as expired this long before they actually are.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Bearer token issued by the transport's identity provider.
#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in_secs: i64) -> Self {
        Self {
            value: value.into(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// File attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// One invoice email: a single recipient, the document attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Attachment,
}

/// Anything that can deliver an [`OutgoingMail`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name for logs and health reporting.
    fn name(&self) -> &str;

    /// Whether credentials are present at all.
    fn is_configured(&self) -> bool {
        true
    }

    /// Obtain a fresh access token.
    async fn authenticate(&self) -> Result<AccessToken, TransportError>;

    /// Submit one message. `Ok` means the provider accepted it.
    async fn send_mail(&self, token: &AccessToken, mail: &OutgoingMail)
        -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_freshness_has_margin() {
        let token = AccessToken::new("t", 3600);
        assert!(token.is_fresh());
        assert!(!token.is_fresh_at(token.expires_at - Duration::seconds(30)));
        assert!(token.is_fresh_at(token.expires_at - Duration::seconds(61)));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = AccessToken::new("secret-value", 10);
        assert!(!format!("{token:?}").contains("secret-value"));
    }
}
