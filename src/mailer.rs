// ============================================================================
// Outbound Mail Collaborator
// ============================================================================
//
// The relay's delivery edge. The visitor's sanitized name and address ride
// as the visible reply-to identity; the coach's real address is the hidden
// destination and exists only inside this payload.
//
// Delivery is a single bounded attempt: the HTTP client carries the
// configured timeout, and an expiry or provider error surfaces to the
// dispatcher as a delivery failure. Retries are the visitor's job (and
// cost them another rate-limit slot).
//
// ============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::MailConfig;

/// One relayed message, addressed for delivery
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    /// The coach's real address (hidden from the visitor)
    pub to: String,
    /// The visitor's address, exposed to the coach as reply-to
    pub reply_to: String,
    /// The visitor's sanitized display name
    pub reply_to_name: String,
    pub subject: String,
    pub text_body: String,
}

/// External mail provider seam
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundEmail) -> Result<()>;
}

/// Mailer speaking the provider's JSON send API over HTTPS
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build mail HTTP client")?;

        Ok(Self { client, config })
    }

    fn provider_payload(&self, mail: &OutboundEmail) -> serde_json::Value {
        json!({
            "from": {
                "email": self.config.from_address,
                "name": self.config.from_name,
            },
            "to": [{ "email": mail.to }],
            "reply_to": {
                "email": mail.reply_to,
                "name": mail.reply_to_name,
            },
            "subject": mail.subject,
            "text": mail.text_body,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: &OutboundEmail) -> Result<()> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_token)
            .json(&self.provider_payload(mail))
            .send()
            .await
            .context("Mail provider request failed")?;

        let status = response.status();
        if !status.is_success() {
            // The provider body may echo addresses; log only the status
            anyhow::bail!("Mail provider returned status {}", status);
        }

        tracing::debug!(status = %status, "Mail provider accepted message");
        Ok(())
    }
}
