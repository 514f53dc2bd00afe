//! Email channel.
//!
//! Provider-pluggable outbound email. Template rendering happens upstream;
//! this channel receives the template name and data payload and composes a
//! minimal subject/body around them.

use async_trait::async_trait;
use atcloud_common::config::EmailConfig as EmailSection;
use atcloud_common::{AppError, AppResult};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Email send priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmailPriority {
    /// Background mail (digests).
    Low,
    /// Default.
    Normal,
    /// Time-sensitive mail (assignments, auth changes).
    High,
}

/// Outbound email message.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Recipient address.
    pub to: String,
    /// Template name, rendered upstream.
    pub template: String,
    /// Template data payload.
    pub data: serde_json::Value,
    /// Send priority.
    pub priority: EmailPriority,
}

/// Email delivery result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDeliveryResult {
    /// Whether the email was sent successfully.
    pub success: bool,
    /// Message ID from provider (if available).
    pub message_id: Option<String>,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// Trait for the outbound email channel.
#[async_trait]
pub trait EmailChannel: Send + Sync {
    /// Send one email.
    async fn send(&self, message: EmailMessage) -> AppResult<EmailDeliveryResult>;
}

/// Wrapper for boxed `EmailChannel` trait object.
pub type EmailChannelHandle = Arc<dyn EmailChannel>;

/// Email provider configuration.
#[derive(Debug, Clone)]
pub enum EmailProvider {
    /// SMTP configuration
    Smtp(SmtpConfig),
    /// SendGrid
    SendGrid(SendGridConfig),
    /// Mailgun
    Mailgun(MailgunConfig),
}

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP host
    pub host: String,
    /// SMTP port
    pub port: u16,
    /// Username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
}

/// SendGrid configuration.
#[derive(Debug, Clone)]
pub struct SendGridConfig {
    /// SendGrid API key
    pub api_key: String,
}

/// Mailgun configuration.
#[derive(Debug, Clone)]
pub struct MailgunConfig {
    /// Mailgun API key
    pub api_key: String,
    /// Mailgun domain
    pub domain: String,
}

/// Email service.
#[derive(Clone)]
pub struct EmailService {
    provider: Option<EmailProvider>,
    from_address: String,
    from_name: String,
    http_client: reqwest::Client,
}

impl EmailService {
    /// Create a new email service.
    #[must_use]
    pub fn new(provider: Option<EmailProvider>, from_address: String, from_name: String) -> Self {
        Self {
            provider,
            from_address,
            from_name,
            http_client: reqwest::Client::new(),
        }
    }

    /// Build from the configuration section, if present.
    pub fn from_config(section: Option<&EmailSection>) -> AppResult<Self> {
        let Some(section) = section else {
            return Ok(Self::new(None, String::new(), String::new()));
        };

        let provider = match section.provider.as_str() {
            "smtp" => EmailProvider::Smtp(SmtpConfig {
                host: section
                    .smtp_host
                    .clone()
                    .ok_or_else(|| AppError::Config("email.smtp_host is required".to_string()))?,
                port: section.smtp_port.unwrap_or(587),
                username: section.smtp_username.clone(),
                password: section.smtp_password.clone(),
            }),
            "sendgrid" => EmailProvider::SendGrid(SendGridConfig {
                api_key: section
                    .api_key
                    .clone()
                    .ok_or_else(|| AppError::Config("email.api_key is required".to_string()))?,
            }),
            "mailgun" => EmailProvider::Mailgun(MailgunConfig {
                api_key: section
                    .api_key
                    .clone()
                    .ok_or_else(|| AppError::Config("email.api_key is required".to_string()))?,
                domain: section
                    .domain
                    .clone()
                    .ok_or_else(|| AppError::Config("email.domain is required".to_string()))?,
            }),
            other => {
                return Err(AppError::Config(format!("unknown email provider: {other}")));
            }
        };

        Ok(Self::new(
            Some(provider),
            section.from_address.clone(),
            section.from_name.clone(),
        ))
    }

    /// Check if the email channel is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    // Provider-specific implementations

    async fn send_smtp(
        &self,
        smtp: &SmtpConfig,
        message: EmailMessage,
    ) -> AppResult<EmailDeliveryResult> {
        let (subject, body) = compose(&message);

        let from: Mailbox = format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid from address: {e}")))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| AppError::Validation(format!("invalid recipient address: {e}")))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body)
            .map_err(|e| AppError::Internal(format!("failed to build email: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| AppError::ChannelUnavailable {
                channel: "email".to_string(),
                reason: e.to_string(),
            })?
            .port(smtp.port);
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let transport = builder.build();

        match transport.send(email).await {
            Ok(_) => Ok(EmailDeliveryResult {
                success: true,
                message_id: Some(format!("smtp-{}", uuid::Uuid::new_v4())),
                error: None,
            }),
            Err(e) => Ok(EmailDeliveryResult {
                success: false,
                message_id: None,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn send_sendgrid(
        &self,
        sg: &SendGridConfig,
        message: EmailMessage,
    ) -> AppResult<EmailDeliveryResult> {
        let (subject, body) = compose(&message);

        let payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": message.to}]
            }],
            "from": {
                "email": self.from_address,
                "name": self.from_name
            },
            "subject": subject,
            "content": [
                {"type": "text/plain", "value": body}
            ]
        });

        let response = self
            .http_client
            .post("https://api.sendgrid.com/v3/mail/send")
            .header("Authorization", format!("Bearer {}", sg.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::ChannelUnavailable {
                channel: "email".to_string(),
                reason: format!("SendGrid request failed: {e}"),
            })?;

        if response.status().is_success() {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            Ok(EmailDeliveryResult {
                success: true,
                message_id,
                error: None,
            })
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Ok(EmailDeliveryResult {
                success: false,
                message_id: None,
                error: Some(error_text),
            })
        }
    }

    async fn send_mailgun(
        &self,
        mg: &MailgunConfig,
        message: EmailMessage,
    ) -> AppResult<EmailDeliveryResult> {
        let (subject, body) = compose(&message);

        let form_params = vec![
            (
                "from",
                format!("{} <{}>", self.from_name, self.from_address),
            ),
            ("to", message.to),
            ("subject", subject),
            ("text", body),
        ];

        let response = self
            .http_client
            .post(format!("https://api.mailgun.net/v3/{}/messages", mg.domain))
            .basic_auth("api", Some(&mg.api_key))
            .form(&form_params)
            .send()
            .await
            .map_err(|e| AppError::ChannelUnavailable {
                channel: "email".to_string(),
                reason: format!("Mailgun request failed: {e}"),
            })?;

        if response.status().is_success() {
            #[derive(Deserialize)]
            struct MailgunResponse {
                id: Option<String>,
            }
            let result: MailgunResponse = response
                .json()
                .await
                .unwrap_or(MailgunResponse { id: None });
            Ok(EmailDeliveryResult {
                success: true,
                message_id: result.id,
                error: None,
            })
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Ok(EmailDeliveryResult {
                success: false,
                message_id: None,
                error: Some(error_text),
            })
        }
    }
}

#[async_trait]
impl EmailChannel for EmailService {
    async fn send(&self, message: EmailMessage) -> AppResult<EmailDeliveryResult> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AppError::ChannelUnavailable {
                channel: "email".to_string(),
                reason: "email channel not configured".to_string(),
            })?;

        match provider {
            EmailProvider::Smtp(smtp) => self.send_smtp(smtp, message).await,
            EmailProvider::SendGrid(sg) => self.send_sendgrid(sg, message).await,
            EmailProvider::Mailgun(mg) => self.send_mailgun(mg, message).await,
        }
    }
}

/// Compose the subject line and plain-text body for a templated message.
///
/// Rendering proper lives upstream; the payload's `subject` and `body`
/// fields win when present, otherwise the template name is humanized.
fn compose(message: &EmailMessage) -> (String, String) {
    let subject = message
        .data
        .get("subject")
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || format!("[atCloud] {}", message.template.replace('_', " ")),
            ToString::to_string,
        );

    let body = message
        .data
        .get("body")
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || {
                serde_json::to_string_pretty(&message.data)
                    .unwrap_or_else(|_| message.template.clone())
            },
            ToString::to_string,
        );

    (subject, body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prefers_payload_fields() {
        let message = EmailMessage {
            to: "guest@example.com".to_string(),
            template: "event_reminder".to_string(),
            data: serde_json::json!({
                "subject": "Reminder: Sunday service",
                "body": "The service starts at 10am."
            }),
            priority: EmailPriority::Normal,
        };
        let (subject, body) = compose(&message);
        assert_eq!(subject, "Reminder: Sunday service");
        assert_eq!(body, "The service starts at 10am.");
    }

    #[test]
    fn test_compose_falls_back_to_template_name() {
        let message = EmailMessage {
            to: "guest@example.com".to_string(),
            template: "role_assignment".to_string(),
            data: serde_json::json!({"role": "greeter"}),
            priority: EmailPriority::High,
        };
        let (subject, body) = compose(&message);
        assert_eq!(subject, "[atCloud] role assignment");
        assert!(body.contains("greeter"));
    }

    #[test]
    fn test_from_config_rejects_unknown_provider() {
        let section = EmailSection {
            provider: "pigeon".to_string(),
            from_address: "noreply@example.com".to_string(),
            from_name: "atCloud".to_string(),
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            api_key: None,
            domain: None,
        };
        assert!(EmailService::from_config(Some(&section)).is_err());
    }

    #[test]
    fn test_unconfigured_service_is_disabled() {
        let service = EmailService::from_config(None).unwrap();
        assert!(!service.is_enabled());
    }
}
