//! Microsoft Graph mail transport.
//!
//! Auth: OAuth2 client-credentials grant against the tenant's v2.0 token
//! endpoint. Send: `POST /users/{sender}/sendMail` with the document as a
//! base64 `fileAttachment`; Graph answers `202 Accepted` on success.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use courier_core::config::MailConfig;

use crate::error::TransportError;
use crate::transport::{AccessToken, MailTransport, OutgoingMail};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Default token lifetime when the endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Clone)]
struct Credentials {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    sender: String,
}

pub struct GraphTransport {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    login_base_url: String,
    graph_base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Deserialize)]
struct GraphErrorResponse {
    error: GraphErrorBody,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl GraphTransport {
    /// Build from the `[mail]` config section. Missing or placeholder
    /// credentials give a transport that reports `NotConfigured`.
    pub fn from_config(config: &MailConfig) -> Self {
        let credentials = match (
            config.tenant_id(),
            config.client_id(),
            config.client_secret(),
            config.sender_address(),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret), Some(sender)) => {
                Some(Credentials {
                    tenant_id: tenant_id.to_string(),
                    client_id: client_id.to_string(),
                    client_secret: client_secret.to_string(),
                    sender: sender.to_string(),
                })
            }
            _ => {
                warn!("mail credentials incomplete; delivery disabled until configured");
                None
            }
        };
        Self {
            client: reqwest::Client::new(),
            credentials,
            login_base_url: config.login_base_url.trim_end_matches('/').to_string(),
            graph_base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    fn credentials(&self) -> Result<&Credentials, TransportError> {
        self.credentials.as_ref().ok_or_else(|| {
            TransportError::NotConfigured(
                "tenant_id, client_id, client_secret and sender_address are required".into(),
            )
        })
    }

    fn network_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout.as_secs())
        } else {
            TransportError::Transient(format!("network error: {e}"))
        }
    }
}

/// Graph `sendMail` request body.
pub fn send_mail_body(mail: &OutgoingMail) -> serde_json::Value {
    let content = base64::engine::general_purpose::STANDARD.encode(&mail.attachment.bytes);
    json!({
        "message": {
            "subject": mail.subject,
            "body": { "contentType": "Text", "content": mail.body },
            "toRecipients": [
                { "emailAddress": { "address": mail.to } }
            ],
            "attachments": [{
                "@odata.type": "#microsoft.graph.fileAttachment",
                "name": mail.attachment.name,
                "contentType": mail.attachment.content_type,
                "contentBytes": content,
            }],
        },
        "saveToSentItems": true,
    })
}

#[async_trait]
impl MailTransport for GraphTransport {
    fn name(&self) -> &str {
        "microsoft-graph"
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn authenticate(&self) -> Result<AccessToken, TransportError> {
        let creds = self.credentials()?;
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base_url, creds.tenant_id
        );
        debug!(tenant = %creds.tenant_id, "requesting Graph access token");

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<OAuthErrorResponse>(&text)
                .map(|e| format!("{} - {}", e.error, e.error_description))
                .unwrap_or(text);
            warn!(status, "Graph token request failed");
            return Err(if status >= 500 {
                TransportError::Transient(format!("token endpoint HTTP {status}: {detail}"))
            } else {
                TransportError::Unauthorized(format!("token request HTTP {status}: {detail}"))
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Unauthorized(format!("invalid token response: {e}")))?;
        info!("Graph access token acquired");
        Ok(AccessToken::new(
            token.access_token,
            token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
        ))
    }

    async fn send_mail(
        &self,
        token: &AccessToken,
        mail: &OutgoingMail,
    ) -> Result<(), TransportError> {
        let creds = self.credentials()?;
        let url = format!("{}/users/{}/sendMail", self.graph_base_url, creds.sender);
        let body = send_mail_body(mail);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(&token.value)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            debug!(status, to = %mail.to, "Graph accepted message");
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GraphErrorResponse>(&text)
            .map(|e| format!("{}: {}", e.error.code, e.error.message))
            .unwrap_or(text);
        warn!(status, to = %mail.to, error = %message, "Graph sendMail failed");
        Err(TransportError::from_status(status, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Attachment;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            to: "kunde@example.com".into(),
            subject: "RE-1001".into(),
            body: "Anbei die Rechnung.".into(),
            attachment: Attachment {
                name: "RE-1001.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: b"%PDF-1.7".to_vec(),
            },
        }
    }

    #[test]
    fn body_has_graph_shape() {
        let body = send_mail_body(&mail());
        assert_eq!(body["saveToSentItems"], true);
        assert_eq!(
            body["message"]["toRecipients"][0]["emailAddress"]["address"],
            "kunde@example.com"
        );
        let att = &body["message"]["attachments"][0];
        assert_eq!(att["@odata.type"], "#microsoft.graph.fileAttachment");
        assert_eq!(att["name"], "RE-1001.pdf");
        assert_eq!(att["contentBytes"], "JVBERi0xLjc=");
    }

    #[tokio::test]
    async fn unconfigured_transport_refuses_to_authenticate() {
        let transport = GraphTransport::from_config(&MailConfig::default());
        assert!(!transport.is_configured());
        let err = transport.authenticate().await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let config = MailConfig {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            sender_address: "rechnung@example.com".into(),
            login_base_url: "http://127.0.0.1:9".into(),
            graph_base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
        };
        let transport = GraphTransport::from_config(&config);
        assert!(transport.is_configured());
        let err = transport.authenticate().await.unwrap_err();
        assert!(!err.is_fatal(), "got {err:?}");
    }
}
