use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use teloxide::{ApiError, RequestError};

use crate::db::models::NotificationTask;
use crate::error::{AppError, AppResult, DeliveryFailure};

use super::{DispatchResult, Dispatcher};

/// Sends queued notifications to Telegram chats via the bot API.
#[derive(Clone)]
pub struct TelegramDispatcher {
    bot: Bot,
}

impl TelegramDispatcher {
    /// Create the dispatcher, verifying the token with a `getMe` call.
    pub async fn new(token: String) -> AppResult<Self> {
        let bot = Bot::new(token);

        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self { bot })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }
}

#[async_trait]
impl Dispatcher for TelegramDispatcher {
    async fn send(&self, task: &NotificationTask) -> DispatchResult {
        // A destination id that doesn't parse can never succeed.
        let chat_id: i64 = task.destination_id.parse().map_err(|_| {
            DeliveryFailure::permanent(format!("Invalid chat_id: {}", task.destination_id))
        })?;

        let result = self
            .bot
            .send_message(ChatId(chat_id), &task.message)
            .parse_mode(ParseMode::Html)
            .await;

        match result {
            Ok(sent) => {
                tracing::debug!(
                    "Telegram message sent to {}: message_id={}",
                    task.destination_id,
                    sent.id.0
                );
                Ok(())
            }
            Err(e) => Err(classify_request_error(&e)),
        }
    }
}

/// Classify a teloxide request error into transient vs permanent.
///
/// Network and IO problems, and explicit rate-limit responses, warrant a
/// retry. API-level rejections (chat not found, bot blocked, kicked, ...)
/// mean the destination is gone or unwritable and a retry can't help.
fn classify_request_error(err: &RequestError) -> DeliveryFailure {
    match err {
        RequestError::Network(e) => DeliveryFailure::transient(format!("Network error: {}", e)),
        RequestError::Io(e) => DeliveryFailure::transient(format!("IO error: {}", e)),
        RequestError::RetryAfter(duration) => DeliveryFailure::Transient {
            reason: format!("Rate limited, retry after {:?}", duration),
            retry_after: Some(*duration),
        },
        RequestError::Api(api) => classify_api_error(api),
        other => DeliveryFailure::permanent(format!("Telegram error: {}", other)),
    }
}

fn classify_api_error(err: &ApiError) -> DeliveryFailure {
    match err {
        // Unknown errors arrive as raw response text; Telegram occasionally
        // reports server-side trouble this way.
        ApiError::Unknown(text) => {
            let t = text.to_lowercase();
            if t.contains("too many requests")
                || t.contains("internal server error")
                || t.contains("bad gateway")
                || t.contains("service unavailable")
            {
                DeliveryFailure::transient(format!("Telegram API error: {}", text))
            } else {
                DeliveryFailure::permanent(format!("Telegram API error: {}", text))
            }
        }
        _ => DeliveryFailure::permanent(format!("Telegram API error: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_not_found_is_permanent() {
        let failure = classify_api_error(&ApiError::ChatNotFound);
        assert!(failure.is_permanent());
    }

    #[test]
    fn bot_blocked_is_permanent() {
        let failure = classify_api_error(&ApiError::BotBlocked);
        assert!(failure.is_permanent());
    }

    #[test]
    fn unknown_server_errors_are_transient() {
        let failure =
            classify_api_error(&ApiError::Unknown("Bad Gateway".to_string()));
        assert!(!failure.is_permanent());

        let failure = classify_api_error(&ApiError::Unknown(
            "Too Many Requests: retry after 5".to_string(),
        ));
        assert!(!failure.is_permanent());
    }

    #[test]
    fn unknown_client_errors_are_permanent() {
        let failure = classify_api_error(&ApiError::Unknown(
            "Bad Request: message text is empty".to_string(),
        ));
        assert!(failure.is_permanent());
    }

    #[test]
    fn retry_after_carries_the_wait_hint() {
        let failure =
            classify_request_error(&RequestError::RetryAfter(std::time::Duration::from_secs(7)));
        match failure {
            DeliveryFailure::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)));
            }
            DeliveryFailure::Permanent { .. } => unreachable!("rate limit must be transient"),
        }
    }
}
