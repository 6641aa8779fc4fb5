use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serenity::builder::{CreateEmbed, CreateEmbedFooter};
use serenity::model::Timestamp;
use tracing::debug;

use super::{Channel, MessageSink};
use crate::error::SinkError;
use crate::format::NotificationPayload;

/// Body of a Discord "execute webhook" request.
#[derive(Debug, Serialize)]
struct WebhookMessage {
    username: String,
    embeds: Vec<CreateEmbed>,
}

/// Posts notifications to one Discord webhook per channel.
pub struct DiscordWebhookSink {
    client: reqwest::Client,
    earnings_url: String,
    news_url: String,
}

impl DiscordWebhookSink {
    pub fn new(earnings_url: &str, news_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            earnings_url: earnings_url.to_string(),
            news_url: news_url.to_string(),
        })
    }

    fn url_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Earnings => &self.earnings_url,
            Channel::News => &self.news_url,
        }
    }
}

#[async_trait]
impl MessageSink for DiscordWebhookSink {
    async fn deliver(&self, channel: Channel, payload: &NotificationPayload) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(self.url_for(channel))
            .json(&webhook_message(payload))
            .send()
            .await
            .map_err(|e| SinkError::transient(format!("webhook request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            debug!(%channel, status = status.as_u16(), "Webhook accepted message");
            return Ok(());
        }

        let retry_after = retry_after(resp.headers());
        let body: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
        Err(classify_status(status, retry_after, body))
    }
}

fn webhook_message(payload: &NotificationPayload) -> WebhookMessage {
    let mut embed = CreateEmbed::new()
        .title(payload.title.as_str())
        .description(payload.description.as_str())
        .colour(payload.color)
        .footer(CreateEmbedFooter::new(payload.footer.as_str()))
        .fields(
            payload
                .fields
                .iter()
                .map(|f| (f.name.as_str(), f.value.as_str(), f.inline)),
        );
    if let Some(url) = &payload.url {
        embed = embed.url(url.as_str());
    }
    if let Some(ts) = payload
        .timestamp
        .and_then(|ts| Timestamp::from_unix_timestamp(ts.timestamp()).ok())
    {
        embed = embed.timestamp(ts);
    }

    WebhookMessage {
        username: payload.username.clone(),
        embeds: vec![embed],
    }
}

/// Seconds from a `Retry-After` header; Discord may send fractions.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> SinkError {
    let reason = format!("HTTP {}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SinkError::Transient { reason, retry_after }
    } else {
        SinkError::Rejected { reason }
    }
}
