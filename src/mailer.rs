//! Outbound email delivery.
//!
//! Delivery is an external, fallible collaborator. Callers that issue an
//! email token roll it back when `send` fails.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail rejected: {0}")]
    Rejected(String),
}

/// A rendered email.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    /// The call-to-action URL embedded in the body
    pub link: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Writes emails to the log instead of sending them. Used in development.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, link = %message.link, "Email (not sent)");
        Ok(())
    }
}

/// Posts each email as JSON to an HTTP relay.
pub struct WebhookMailer {
    client: reqwest::Client,
    url: Url,
    from: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

impl WebhookMailer {
    pub fn new(url: Url, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            from: from.into(),
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(&WebhookPayload {
                from: &self.from,
                to: &message.to,
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Rejected(format!("HTTP {status}: {body}")));
        }

        debug!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Email asking a new user to confirm their address.
pub fn verification_email(to: &str, client_url: &str, token: &str) -> EmailMessage {
    let link = format!("{}/verify-email/{}", client_url.trim_end_matches('/'), token);
    let html = format!(
        "<h2>Welcome to QuillJot!</h2>\
         <p>Please verify your email address by following this link:</p>\
         <p><a href=\"{link}\">{link}</a></p>\
         <p>This link expires in 24 hours.</p>\
         <p>If you didn't create an account with QuillJot, please ignore this email.</p>"
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Verify Your Email Address".to_string(),
        html,
        link,
    }
}

/// Email carrying a password reset link.
pub fn password_reset_email(to: &str, client_url: &str, token: &str) -> EmailMessage {
    let link = format!("{}/reset-password/{}", client_url.trim_end_matches('/'), token);
    let html = format!(
        "<h2>Reset Your Password</h2>\
         <p>You recently requested to reset your password. Follow this link to choose a new one:</p>\
         <p><a href=\"{link}\">{link}</a></p>\
         <p>This link expires in 10 minutes.</p>\
         <p>If you didn't request a password reset, please ignore this email.</p>"
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Password Reset Request".to_string(),
        html,
        link,
    }
}
