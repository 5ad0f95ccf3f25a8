use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::http::{client_with_timeout, ensure_success, ExternalError};

/// An email to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl Notification {
    /// "Your image is ready" message pointing at the stored result.
    pub fn image_generated(to: &str, result_url: &str) -> Self {
        let href = escape_html(result_url);
        Self {
            to: to.to_string(),
            subject: "Your image has been generated".to_string(),
            text: format!("Your image has been generated: {result_url}"),
            html: format!(
                "<h1>Your image has been generated</h1><p><a href=\"{href}\">{href}</a></p>"
            ),
        }
    }
}

/// Escape text for use in HTML content and quoted attribute values.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Delivers notifications to requesters.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), ExternalError>;
}

/// Transactional email through the MailerSend REST API.
pub struct MailerSendNotifier {
    http: Client,
    api_url: String,
    api_token: String,
    from_email: String,
    from_name: String,
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: Address<'a>,
    to: [Address<'a>; 1],
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

impl MailerSendNotifier {
    pub fn new(
        api_url: &str,
        api_token: &str,
        from_email: &str,
        from_name: &str,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        Ok(Self {
            http: client_with_timeout(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for MailerSendNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ExternalError> {
        let request = EmailRequest {
            from: Address {
                email: &self.from_email,
                name: Some(&self.from_name),
            },
            to: [Address {
                email: &notification.to,
                name: None,
            }],
            subject: &notification.subject,
            text: &notification.text,
            html: &notification.html,
        };

        let response = self
            .http
            .post(format!("{}/email", self.api_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        ensure_success("notification", response).await?;
        Ok(())
    }
}
