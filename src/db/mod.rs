pub mod models;
pub mod repository;

pub use models::*;
pub use repository::{DeliveryLogRepository, QueueRepository};

#[cfg(test)]
pub(crate) mod testing {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    use super::models::{DestinationKind, NewNotificationTask, NotificationKind};

    /// Fresh shared-cache in-memory database with migrations applied. Each
    /// call gets its own database; shared cache lets every pool connection
    /// see the same one.
    pub async fn memory_pool() -> SqlitePool {
        let url = format!(
            "sqlite:file:test_{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        );
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .connect(&url)
            .await
            .expect("open in-memory database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        pool
    }

    /// A plausible task draft with every optional scheduling field left to
    /// the store's defaults.
    pub fn draft_task() -> NewNotificationTask {
        NewNotificationTask {
            notification_log_id: None,
            user_id: "user-1".to_string(),
            notification_kind: NotificationKind::StreamOnline,
            content_json: r#"{"streamer_name":"HafMC"}"#.to_string(),
            message: "HafMC is live!".to_string(),
            destination_kind: DestinationKind::Telegram,
            destination_id: "12345".to_string(),
            webhook_url: None,
            max_attempts: None,
            next_attempt_at: None,
            expires_at: None,
        }
    }
}
