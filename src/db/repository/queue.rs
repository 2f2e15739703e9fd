use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::db::models::{NewNotificationTask, NotificationTask, TaskStatus};
use crate::error::{AppError, AppResult};
use crate::policy::ExpirationPolicy;

const TASK_COLUMNS: &str = "\
    id, \
    notification_log_id, \
    user_id, \
    notification_kind, \
    content_json, \
    message, \
    destination_kind, \
    destination_id, \
    webhook_url, \
    attempts, \
    max_attempts, \
    next_attempt_at, \
    expires_at, \
    last_error, \
    status, \
    created_at, \
    updated_at";

/// Task id pair returned by the expiry sweep so the delivery log can be
/// updated without refetching rows.
#[derive(Debug, Clone, FromRow)]
pub struct ExpiredTask {
    pub id: String,
    pub notification_log_id: Option<String>,
}

/// Repository for the persistent notification delivery queue.
///
/// The durable table is the single source of truth and the synchronization
/// point between workers; every mutation goes through the operations here.
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE status = 'pending' AND id = (SELECT id ... LIMIT 1)
///   RETURNING ...`. The outer status guard is the compare-and-swap: a row
///   claimed by a concurrent worker between subselect and update no longer
///   matches, so no task is ever handed to two claimers.
/// - All operations take an explicit `now` where scheduling is involved, so
///   tests control time instead of racing `CURRENT_TIMESTAMP`.
pub struct QueueRepository;

impl QueueRepository {
    /// Insert a new pending task.
    ///
    /// `max_attempts` and `next_attempt_at` default to the configured attempt
    /// budget (`delivery.max_attempts`) and `now`. When `expires_at` is
    /// omitted the deadline is computed here, explicitly, from the expiration
    /// policy — tasks never reach the table without one.
    pub async fn enqueue(
        pool: &SqlitePool,
        expiration: &ExpirationPolicy,
        default_max_attempts: i32,
        task: NewNotificationTask,
    ) -> AppResult<NotificationTask> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let next_attempt_at = task.next_attempt_at.unwrap_or(now);
        let max_attempts = task.max_attempts.unwrap_or(default_max_attempts);
        let expires_at = task
            .expires_at
            .unwrap_or_else(|| expiration.deadline(task.notification_kind, now));

        let sql = format!(
            "INSERT INTO notification_queue ({TASK_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {TASK_COLUMNS}"
        );

        let row = sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(id)
            .bind(task.notification_log_id)
            .bind(task.user_id)
            .bind(task.notification_kind)
            .bind(task.content_json)
            .bind(task.message)
            .bind(task.destination_kind)
            .bind(task.destination_id)
            .bind(task.webhook_url)
            .bind(0i32) // attempts
            .bind(max_attempts)
            .bind(next_attempt_at)
            .bind(expires_at)
            .bind::<Option<String>>(None) // last_error
            .bind(TaskStatus::Pending)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Atomically claim up to `limit` due, non-expired tasks, transitioning
    /// them pending -> processing.
    ///
    /// One row is claimed per statement, in `next_attempt_at` order, to avoid
    /// holding a long transaction that would block other writers. A task with
    /// `expires_at <= now` is never returned.
    pub async fn claim_batch(
        pool: &SqlitePool,
        now: NaiveDateTime,
        limit: i64,
    ) -> AppResult<Vec<NotificationTask>> {
        let mut tasks: Vec<NotificationTask> = Vec::new();
        if limit <= 0 {
            return Ok(tasks);
        }

        let sql = format!(
            "UPDATE notification_queue \
             SET status = 'processing', updated_at = ? \
             WHERE status = 'pending' AND id = ( \
                 SELECT id FROM notification_queue \
                 WHERE status = 'pending' \
                   AND next_attempt_at <= ? \
                   AND (expires_at IS NULL OR expires_at > ?) \
                 ORDER BY next_attempt_at ASC \
                 LIMIT 1 \
             ) \
             RETURNING {TASK_COLUMNS}"
        );

        for _ in 0..(limit as usize) {
            let opt = sqlx::query_as::<_, NotificationTask>(&sql)
                .bind(now)
                .bind(now)
                .bind(now)
                .fetch_optional(pool)
                .await
                .map_err(AppError::Database)?;

            match opt {
                Some(task) => tasks.push(task),
                None => break,
            }
        }

        Ok(tasks)
    }

    /// Mark a task as succeeded (terminal).
    ///
    /// Guarded on the processing state: a dispatch racing the expiry sweep
    /// (or another worker) must not resurrect a row that has already been
    /// finalized. Returns `None` when the guard did not match.
    pub async fn mark_succeeded(
        pool: &SqlitePool,
        id: &str,
    ) -> AppResult<Option<NotificationTask>> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            "UPDATE notification_queue \
             SET status = 'succeeded', updated_at = ? \
             WHERE id = ? AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Record a failed attempt: attempts += 1, reschedule at
    /// `next_attempt_at` with `last_error`. When the incremented count
    /// reaches `max_attempts` the task goes to 'dead' instead of 'pending',
    /// so attempts can never exceed the budget.
    ///
    /// Only applies while the row is still processing; returns `None` when
    /// the task was finalized out from under the caller.
    pub async fn schedule_retry(
        pool: &SqlitePool,
        id: &str,
        next_attempt_at: NaiveDateTime,
        last_error: Option<String>,
    ) -> AppResult<Option<NotificationTask>> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            "UPDATE notification_queue \
             SET attempts = attempts + 1, \
                 next_attempt_at = ?, \
                 last_error = ?, \
                 status = CASE WHEN attempts + 1 >= max_attempts \
                          THEN 'dead' ELSE 'pending' END, \
                 updated_at = ? \
             WHERE id = ? AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(next_attempt_at)
            .bind(last_error)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Dead-letter a claimed task immediately (permanent error, expiry
    /// observed between claim and dispatch) and record the reason. Carries
    /// the same processing guard as `mark_succeeded`; returns `None` when
    /// the row is no longer in flight.
    pub async fn mark_dead(
        pool: &SqlitePool,
        id: &str,
        last_error: Option<String>,
    ) -> AppResult<Option<NotificationTask>> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            "UPDATE notification_queue \
             SET status = 'dead', last_error = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(last_error)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Bulk-transition pending/processing tasks whose deadline has passed to
    /// 'dead' with reason "expired", without dispatching them. Runs on every
    /// worker tick so expired tasks leave the ready set even when nothing is
    /// being claimed.
    pub async fn sweep_expired(
        pool: &SqlitePool,
        now: NaiveDateTime,
    ) -> AppResult<Vec<ExpiredTask>> {
        let rows = sqlx::query_as::<_, ExpiredTask>(
            "UPDATE notification_queue \
             SET status = 'dead', last_error = 'expired', updated_at = ? \
             WHERE status IN ('pending', 'processing') \
               AND expires_at IS NOT NULL \
               AND expires_at <= ? \
             RETURNING id, notification_log_id",
        )
        .bind(now)
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Return tasks stuck in 'processing' longer than `threshold` to
    /// 'pending', without touching `attempts` — the claiming worker crashed
    /// before acking, so the attempt may not have happened at all.
    pub async fn reclaim_stale(
        pool: &SqlitePool,
        now: NaiveDateTime,
        threshold: Duration,
    ) -> AppResult<u64> {
        let cutoff = now - chrono::Duration::seconds(threshold.as_secs() as i64);
        let result = sqlx::query(
            "UPDATE notification_queue \
             SET status = 'pending', updated_at = ? \
             WHERE status = 'processing' AND updated_at <= ?",
        )
        .bind(now)
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Fetch a task by id.
    #[allow(dead_code)]
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<NotificationTask> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM notification_queue WHERE id = ?");

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Number of tasks currently in `status`. Logged by the worker for
    /// operator visibility.
    pub async fn count_by_status(pool: &SqlitePool, status: TaskStatus) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notification_queue WHERE status = ?")
                .bind(status)
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(count)
    }
}
