use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of event a queued notification describes.
///
/// Stored as snake_case TEXT; the expiration policy keys per-kind TTLs off
/// this value so time-sensitive kinds (stream_online) can expire quickly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    StreamOnline,
    StreamOffline,
    TitleChange,
    CategoryChange,
    RewardRedemption,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::StreamOnline => "stream_online",
            NotificationKind::StreamOffline => "stream_offline",
            NotificationKind::TitleChange => "title_change",
            NotificationKind::CategoryChange => "category_change",
            NotificationKind::RewardRedemption => "reward_redemption",
        }
    }
}

/// Where a notification is delivered. Selects the dispatcher implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DestinationKind {
    Telegram,
    Discord,
}

impl DestinationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DestinationKind::Telegram => "telegram",
            DestinationKind::Discord => "discord",
        }
    }
}

/// Queue task state.
///
/// Transitions form a DAG: pending -> processing -> {pending (retry),
/// succeeded, dead}. `Succeeded` and `Dead` are terminal; expired tasks move
/// straight to `Dead` without a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Succeeded,
    Dead,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Dead => "dead",
        }
    }

    #[allow(dead_code)]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Dead)
    }
}

/// A queued notification delivery task.
///
/// Each row is one (destination, notification instance) pair. The entry stores
/// the serialized payload (`content_json`, opaque to the queue) and the
/// rendered `message`, so retransmits send identical text even if templates
/// change after the task was created.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationTask {
    /// Primary key (UUID)
    pub id: String,

    /// Weak reference to the originating delivery record; cleared (not
    /// cascaded) if that record is deleted. The task must work without it.
    pub notification_log_id: Option<String>,

    /// Owning user id
    pub user_id: String,

    pub notification_kind: NotificationKind,

    /// JSON-serialized payload for the specific notification variant.
    /// The queue never inspects it; kept for audit and downstream consumers.
    pub content_json: String,

    /// The rendered message, expanded at enqueue time. Sent verbatim.
    pub message: String,

    pub destination_kind: DestinationKind,

    /// Destination id (chat_id for Telegram, channel_id for Discord)
    pub destination_id: String,

    /// Optional webhook URL (webhook-style Discord integrations).
    pub webhook_url: Option<String>,

    /// Number of delivery attempts already made.
    pub attempts: i32,

    /// Maximum attempts permitted before the task is dead-lettered.
    pub max_attempts: i32,

    /// When the task next becomes eligible for claiming. Non-decreasing
    /// across retries of the same task.
    pub next_attempt_at: NaiveDateTime,

    /// Deadline after which the task must not be dispatched. Always set:
    /// the store assigns a policy default when the producer omits it.
    pub expires_at: Option<NaiveDateTime>,

    /// Last error observed on a failed attempt, if any.
    pub last_error: Option<String>,

    pub status: TaskStatus,

    pub created_at: NaiveDateTime,

    /// Bumped on every state change, including claiming. Stale-claim
    /// recovery keys off this value.
    pub updated_at: NaiveDateTime,
}

/// Data required to enqueue a new delivery task.
///
/// `max_attempts`, `next_attempt_at` and `expires_at` may be omitted; the
/// store defaults them (`expires_at` from the expiration policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationTask {
    pub notification_log_id: Option<String>,
    pub user_id: String,
    pub notification_kind: NotificationKind,
    pub content_json: String,
    pub message: String,
    pub destination_kind: DestinationKind,
    pub destination_id: String,
    pub webhook_url: Option<String>,

    /// Optional override for maximum attempts.
    pub max_attempts: Option<i32>,

    /// Optional explicit schedule for the first attempt; defaults to now.
    pub next_attempt_at: Option<NaiveDateTime>,

    /// Optional explicit deadline; defaults to enqueue time plus the
    /// per-kind TTL.
    pub expires_at: Option<NaiveDateTime>,
}
