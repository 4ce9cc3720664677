use async_trait::async_trait;
use serde::Serialize;

use crate::configuration::EmailClientSettings;
use crate::error::EmailError;
use crate::validators::is_valid_email;

/// Outbound mail seam used by the forgot-password flow.
///
/// Callers treat delivery as fire-and-forget: failures are logged by the
/// caller and never surfaced to the requester.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), EmailError>;
}

/// HTTP email API client
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
}

#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: String) -> Result<Self, EmailError> {
        let email = is_valid_email(&s).map_err(|e| EmailError::InvalidRecipient(e.to_string()))?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "TextBody")]
    text_body: &'a str,
}

impl EmailClient {
    pub fn new(base_url: String, sender: SenderEmail, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url,
            sender,
        }
    }

    pub fn from_settings(settings: &EmailClientSettings) -> Result<Self, EmailError> {
        let sender = SenderEmail::parse(settings.sender_email.clone())?;
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| EmailError::ServiceUnavailable(e.to_string()))?;
        Ok(Self::new(settings.base_url.clone(), sender, http_client))
    }
}

#[async_trait]
impl EmailDispatcher for EmailClient {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        let recipient =
            is_valid_email(recipient).map_err(|e| EmailError::InvalidRecipient(e.to_string()))?;

        let url = format!("{}/email", self.base_url);
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: &recipient,
            subject,
            text_body: body,
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmailError::ServiceUnavailable(e.to_string()))?;

        tracing::debug!(subject = subject, "Email dispatched");
        Ok(())
    }
}
