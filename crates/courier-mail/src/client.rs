use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, TransportError};
use crate::health::{TransportHealth, TransportHealthEntry};
use crate::transport::{AccessToken, MailTransport, OutgoingMail};

/// Delivers messages through a [`MailTransport`].
///
/// Holds one cached access token (refreshed shortly before expiry and
/// dropped on any authorization failure) and bounds every call with a
/// timeout. There are no retries: a failed message is reported once and
/// picked up again by a later run.
pub struct DeliveryClient {
    transport: Arc<dyn MailTransport>,
    token: Mutex<Option<AccessToken>>,
    timeout: Duration,
    health: TransportHealth,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn MailTransport>, timeout: Duration) -> Self {
        let health = TransportHealth::new(transport.name(), transport.is_configured());
        Self {
            transport,
            token: Mutex::new(None),
            timeout,
            health,
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn health(&self) -> TransportHealthEntry {
        self.health.snapshot()
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, TransportError>
    where
        F: std::future::Future<Output = Result<T, TransportError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn token(&self) -> Result<AccessToken, TransportError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }
        debug!(transport = self.transport.name(), "acquiring access token");
        let token = match self.bounded(self.transport.authenticate()).await {
            Ok(token) => token,
            Err(e) => {
                *cached = None;
                return Err(e);
            }
        };
        self.health.record_auth_success();
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send one message. `DeliveryError::Fatal` means the caller should stop
    /// the run.
    pub async fn deliver(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let started = Instant::now();
        let token = match self.token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "could not obtain access token");
                self.health.record_error(&e);
                return Err(e.into());
            }
        };

        match self.bounded(self.transport.send_mail(&token, mail)).await {
            Ok(()) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.health.record_success(latency_ms);
                info!(to = %mail.to, attachment = %mail.attachment.name, latency_ms, "message accepted");
                Ok(())
            }
            Err(e) => {
                if matches!(e, TransportError::Unauthorized(_)) {
                    self.invalidate_token().await;
                }
                warn!(to = %mail.to, error = %e, kind = e.kind(), "message not delivered");
                self.health.record_error(&e);
                Err(e.into())
            }
        }
    }

    /// Verify credentials by acquiring a token. Sends nothing, and a
    /// failure here does not count against the delivery health window.
    pub async fn check_connectivity(&self) -> Result<(), TransportError> {
        self.invalidate_token().await;
        self.token().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::TransportStatus;
    use crate::mock::ScriptedTransport;
    use crate::transport::Attachment;

    fn mail(to: &str) -> OutgoingMail {
        OutgoingMail {
            to: to.into(),
            subject: "RE-1".into(),
            body: "body".into(),
            attachment: Attachment {
                name: "RE-1.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: vec![1, 2, 3],
            },
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> DeliveryClient {
        DeliveryClient::new(transport, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn token_is_reused_across_messages() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        client.deliver(&mail("a@example.com")).await.unwrap();
        client.deliver(&mail("b@example.com")).await.unwrap();
        assert_eq!(transport.auth_calls(), 1);
        assert_eq!(transport.sent_count(), 2);
        assert_eq!(client.health().status, TransportStatus::Ok);
    }

    #[tokio::test]
    async fn unauthorized_send_is_fatal_and_drops_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_result(Err(TransportError::Unauthorized("401".into())));
        let client = client(transport.clone());

        let err = client.deliver(&mail("a@example.com")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Fatal(_)));
        assert_eq!(client.health().status, TransportStatus::AuthFailed);

        client.deliver(&mail("a@example.com")).await.unwrap();
        assert_eq!(transport.auth_calls(), 2);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_auth(TransportError::Unauthorized("invalid_client".into()));
        let client = client(transport.clone());
        let err = client.deliver(&mail("a@example.com")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Fatal(_)));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn rejection_is_per_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_result(Err(TransportError::Rejected {
            status: 413,
            message: "too large".into(),
        }));
        let client = client(transport.clone());
        let err = client.deliver(&mail("a@example.com")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Message(_)));
        client.deliver(&mail("b@example.com")).await.unwrap();
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out() {
        let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_secs(60)));
        let client = client(transport.clone());
        let err = client.deliver(&mail("a@example.com")).await.unwrap_err();
        assert_eq!(err, DeliveryError::Message(TransportError::Timeout(5)));
    }

    #[tokio::test]
    async fn connectivity_check_authenticates_only() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        client.check_connectivity().await.unwrap();
        assert_eq!(transport.auth_calls(), 1);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn failed_connectivity_check_leaves_delivery_health_alone() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_auth(TransportError::Unauthorized("invalid_client".into()));
        let client = client(transport.clone());

        let err = client.check_connectivity().await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
        let health = client.health();
        assert_eq!(health.status, TransportStatus::Unknown);
        assert_eq!(health.total_attempts, 0);
        assert_eq!(health.sent_err, 0);
        assert!(health.last_error.is_none());
    }
}
