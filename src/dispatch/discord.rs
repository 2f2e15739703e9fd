use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::db::models::NotificationTask;
use crate::error::{AppError, AppResult, DeliveryFailure};

use super::{DispatchResult, Dispatcher};

#[derive(Debug, Clone, Serialize)]
struct MessagePayload {
    content: String,
}

/// Sends queued notifications to Discord, either through the integration's
/// webhook URL or, when none is stored, as a bot message to the channel.
#[derive(Clone)]
pub struct DiscordDispatcher {
    client: reqwest::Client,
    bot_token: Option<String>,
}

impl DiscordDispatcher {
    pub fn new(bot_token: Option<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Discord(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, bot_token })
    }

    fn api_url(endpoint: &str) -> String {
        format!("https://discord.com/api/v10{}", endpoint)
    }

    async fn post_webhook(&self, webhook_url: &str, payload: &MessagePayload) -> DispatchResult {
        let response = self
            .client
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryFailure::transient(format!("Failed to send webhook: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }

    async fn post_channel_message(
        &self,
        token: &str,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> DispatchResult {
        let url = Self::api_url(&format!("/channels/{}/messages", channel_id));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", token))
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryFailure::transient(format!("Failed to send message: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }
}

#[async_trait]
impl Dispatcher for DiscordDispatcher {
    async fn send(&self, task: &NotificationTask) -> DispatchResult {
        let payload = MessagePayload {
            content: task.message.clone(),
        };

        if let Some(ref webhook_url) = task.webhook_url {
            return self.post_webhook(webhook_url, &payload).await;
        }

        match self.bot_token {
            Some(ref token) => {
                self.post_channel_message(token, &task.destination_id, &payload)
                    .await
            }
            // The integration was stored as a bot-channel destination but this
            // deployment has no bot token yet; retry until the TTL gives up.
            None => Err(DeliveryFailure::transient(
                "Discord bot token not configured",
            )),
        }
    }
}

/// Classify a non-success Discord response.
///
/// 429 and 5xx are retried (429 with the wait the platform asked for); any
/// other 4xx means the channel or webhook is invalid, revoked, or rejecting
/// the payload, and retrying would just burn the budget.
fn classify_response(status: StatusCode, body: &str) -> DeliveryFailure {
    let reason = format!("Discord API error ({}): {}", status, body);

    if status == StatusCode::TOO_MANY_REQUESTS {
        return DeliveryFailure::Transient {
            reason,
            retry_after: parse_retry_after(body),
        };
    }
    if status.is_server_error() {
        return DeliveryFailure::Transient {
            reason,
            retry_after: None,
        };
    }
    DeliveryFailure::permanent(reason)
}

/// Pull `retry_after` (seconds, possibly fractional) out of a Discord rate
/// limit response body.
fn parse_retry_after(body: &str) -> Option<Duration> {
    let json: Value = serde_json::from_str(body).ok()?;
    let secs = json.get("retry_after")?.as_f64()?;
    Some(Duration::from_secs_f64(secs.max(0.0)))
}
