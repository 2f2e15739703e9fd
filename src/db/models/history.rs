use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::task::{DestinationKind, NotificationKind};

/// A delivery history record, created by the event producer alongside the
/// queue task. The worker updates `status`/`error_message` on terminal
/// outcomes; history views surface them to operators.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub user_id: String,
    pub notification_kind: NotificationKind,
    pub destination_kind: DestinationKind,
    pub destination_id: String,
    pub content: String,
    /// 'pending', 'sent', 'failed' or 'expired'
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeliveryRecord {
    pub user_id: String,
    pub notification_kind: NotificationKind,
    pub destination_kind: DestinationKind,
    pub destination_id: String,
    pub content: String,
    pub status: String,
    pub error_message: Option<String>,
}
