use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{DeliveryRecord, NewDeliveryRecord};
use crate::error::{AppError, AppResult};

const RECORD_COLUMNS: &str = "\
    id, \
    user_id, \
    notification_kind, \
    destination_kind, \
    destination_id, \
    content, \
    status, \
    error_message, \
    created_at";

/// Repository for delivery history records.
///
/// Producers create a record per delivery attempt they hand to the queue; the
/// worker reflects terminal task outcomes back into it ("sent", "failed",
/// "expired") so operator history views show each notification's fate.
pub struct DeliveryLogRepository;

impl DeliveryLogRepository {
    pub async fn create(
        pool: &SqlitePool,
        record: NewDeliveryRecord,
    ) -> AppResult<DeliveryRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let sql = format!(
            "INSERT INTO notification_history ({RECORD_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {RECORD_COLUMNS}"
        );

        sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(id)
            .bind(record.user_id)
            .bind(record.notification_kind)
            .bind(record.destination_kind)
            .bind(record.destination_id)
            .bind(record.content)
            .bind(record.status)
            .bind(record.error_message)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Update status and error message of a record. Missing rows are ignored:
    /// the task's back-reference is weak, and the record may have been pruned.
    pub async fn update_status(
        pool: &SqlitePool,
        id: &str,
        status: &str,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE notification_history \
             SET status = ?, error_message = ? \
             WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    #[allow(dead_code)]
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<DeliveryRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM notification_history WHERE id = ?");

        sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DestinationKind, NotificationKind};
    use crate::db::testing::memory_pool;

    fn record() -> NewDeliveryRecord {
        NewDeliveryRecord {
            user_id: "user-1".to_string(),
            notification_kind: NotificationKind::StreamOnline,
            destination_kind: DestinationKind::Telegram,
            destination_id: "12345".to_string(),
            content: "HafMC is live!".to_string(),
            status: "pending".to_string(),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn create_and_update_status() {
        let pool = memory_pool().await;
        let created = DeliveryLogRepository::create(&pool, record()).await.unwrap();
        assert_eq!(created.status, "pending");

        DeliveryLogRepository::update_status(&pool, &created.id, "failed", Some("chat not found"))
            .await
            .unwrap();

        let updated = DeliveryLogRepository::find_by_id(&pool, &created.id)
            .await
            .unwrap();
        assert_eq!(updated.status, "failed");
        assert_eq!(updated.error_message.as_deref(), Some("chat not found"));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_a_no_op() {
        let pool = memory_pool().await;
        DeliveryLogRepository::update_status(&pool, "no-such-id", "sent", None)
            .await
            .unwrap();
    }
}
