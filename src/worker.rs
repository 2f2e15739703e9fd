//! The delivery worker pool: turns pending, due, non-expired tasks into
//! dispatch attempts and applies the outcomes through the queue store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use sqlx::SqlitePool;

use crate::config::DeliveryConfig;
use crate::db::models::{NotificationTask, TaskStatus};
use crate::db::{DeliveryLogRepository, QueueRepository};
use crate::dispatch::DispatcherSet;
use crate::error::{AppResult, DeliveryFailure};
use crate::policy::BackoffPolicy;

/// Converts claimed tasks into dispatch attempts.
///
/// Workers hold no authoritative task state — only local copies of claimed
/// rows. Every mutation goes through `QueueRepository`, so any number of
/// worker instances can run against the same database.
pub struct DeliveryWorker {
    pool: SqlitePool,
    config: DeliveryConfig,
    backoff: BackoffPolicy,
    dispatchers: Arc<DispatcherSet>,
}

impl DeliveryWorker {
    pub fn new(pool: SqlitePool, config: DeliveryConfig, dispatchers: Arc<DispatcherSet>) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self {
            pool,
            config,
            backoff,
            dispatchers,
        }
    }

    /// One poll cycle: sweep expired tasks, recover stale claims, then claim
    /// and dispatch a batch with bounded parallelism. Returns the number of
    /// tasks claimed this tick.
    pub async fn run_tick(&self) -> AppResult<usize> {
        let now = Utc::now().naive_utc();

        let swept = QueueRepository::sweep_expired(&self.pool, now).await?;
        if !swept.is_empty() {
            tracing::info!("Expired {} queued notification(s) without dispatch", swept.len());
        }
        for expired in &swept {
            if let Some(ref log_id) = expired.notification_log_id {
                if let Err(e) = DeliveryLogRepository::update_status(
                    &self.pool,
                    log_id,
                    "expired",
                    Some("Notification expired"),
                )
                .await
                {
                    tracing::warn!("Failed to mark delivery record {} expired: {:?}", log_id, e);
                }
            }
        }

        let reclaimed = QueueRepository::reclaim_stale(
            &self.pool,
            now,
            Duration::from_secs(self.config.stale_after_seconds),
        )
        .await?;
        if reclaimed > 0 {
            tracing::warn!(
                "Reclaimed {} task(s) stuck in processing (worker crash?)",
                reclaimed
            );
        }

        let batch =
            QueueRepository::claim_batch(&self.pool, now, self.config.worker_concurrency as i64)
                .await?;
        let claimed = batch.len();
        if claimed > 0 {
            tracing::debug!("Claimed {} due notification task(s)", claimed);
        }

        futures::stream::iter(batch)
            .for_each_concurrent(self.config.worker_concurrency as usize, |task| async move {
                let task_id = task.id.clone();
                if let Err(e) = self.process_task(task).await {
                    // Storage-layer failure; the claim will be reclaimed as
                    // stale and the task retried on a later tick.
                    tracing::warn!("Processing of task {} failed: {:?}", task_id, e);
                }
            })
            .await;

        Ok(claimed)
    }

    /// Dispatch a single claimed task and apply the outcome.
    pub async fn process_task(&self, task: NotificationTask) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        // The deadline may have passed between claim and dispatch. An expired
        // task is never sent.
        if let Some(expires_at) = task.expires_at {
            if expires_at <= now {
                tracing::info!(
                    "Task {} expired before dispatch (expires_at={})",
                    task.id,
                    expires_at
                );
                if QueueRepository::mark_dead(&self.pool, &task.id, Some("expired".to_string()))
                    .await?
                    .is_some()
                {
                    self.update_log(&task, "expired", Some("Notification expired"))
                        .await;
                }
                return Ok(());
            }
        }

        let dispatcher = match self.dispatchers.get(task.destination_kind) {
            Some(d) => d,
            None => {
                // No integration configured for this destination yet. Retry
                // later; the TTL bounds how long we keep hoping.
                let failure = DeliveryFailure::transient(format!(
                    "No dispatcher configured for {}",
                    task.destination_kind.as_str()
                ));
                return self.handle_failure(&task, failure).await;
            }
        };

        match dispatcher.send(&task).await {
            Ok(()) => {
                match QueueRepository::mark_succeeded(&self.pool, &task.id).await? {
                    Some(_) => {
                        self.update_log(&task, "sent", None).await;
                        tracing::info!("Queued notification {} delivered", task.id);
                    }
                    None => {
                        // The expiry sweep (or another worker) finalized the
                        // row while the dispatch was in flight.
                        tracing::warn!(
                            "Task {} was finalized during dispatch; leaving its state alone",
                            task.id
                        );
                    }
                }
                Ok(())
            }
            Err(failure) => self.handle_failure(&task, failure).await,
        }
    }

    async fn handle_failure(
        &self,
        task: &NotificationTask,
        failure: DeliveryFailure,
    ) -> AppResult<()> {
        let reason = failure.reason().to_string();

        if failure.is_permanent() {
            if QueueRepository::mark_dead(&self.pool, &task.id, Some(reason.clone()))
                .await?
                .is_some()
            {
                self.update_log(task, "failed", Some(&reason)).await;
                tracing::warn!("Queued notification {} dead-lettered: {}", task.id, reason);
            }
            return Ok(());
        }

        let mut delay = self.backoff.delay(task.attempts as u32);
        if let DeliveryFailure::Transient {
            retry_after: Some(hint),
            ..
        } = &failure
        {
            // Honor the platform's wait hint when it is longer than ours.
            delay = delay.max(*hint);
        }
        let next_attempt_at = Utc::now().naive_utc()
            + chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(self.config.max_backoff_seconds as i64));

        let Some(updated) = QueueRepository::schedule_retry(
            &self.pool,
            &task.id,
            next_attempt_at,
            Some(reason.clone()),
        )
        .await?
        else {
            tracing::warn!("Task {} was finalized during dispatch; not rescheduling", task.id);
            return Ok(());
        };

        if updated.status == TaskStatus::Dead {
            self.update_log(task, "failed", Some(&reason)).await;
            tracing::warn!(
                "Queued notification {} exhausted its retry budget ({} attempts)",
                task.id,
                updated.attempts
            );
        } else {
            self.update_log(task, "pending", Some(&reason)).await;
            tracing::info!(
                "Queued notification {} rescheduled after error: {}",
                task.id,
                reason
            );
        }

        Ok(())
    }

    /// Reflect a task outcome into the originating delivery record, if the
    /// task still references one. Log failures are not escalated: the record
    /// is observability, not source of truth.
    async fn update_log(&self, task: &NotificationTask, status: &str, error: Option<&str>) {
        let Some(ref log_id) = task.notification_log_id else {
            return;
        };
        if let Err(e) = DeliveryLogRepository::update_status(&self.pool, log_id, status, error).await
        {
            tracing::warn!("Failed to update delivery record {}: {:?}", log_id, e);
        }
    }
}

/// Spawn the delivery worker loop.
///
/// The loop polls every `poll_interval_seconds`, exits promptly on the
/// shutdown broadcast, and idles (without exiting) while delivery is
/// disabled. In-flight dispatches of a hard-killed worker are recovered by
/// `reclaim_stale` on a later tick.
pub fn spawn_delivery_worker(
    worker: DeliveryWorker,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        match QueueRepository::count_by_status(&worker.pool, TaskStatus::Pending).await {
            Ok(depth) => tracing::info!("Delivery worker started, {} task(s) pending", depth),
            Err(e) => tracing::warn!("Failed to read queue depth at startup: {:?}", e),
        }

        loop {
            if shutdown_rx.try_recv().is_ok() {
                tracing::info!("Delivery worker received shutdown signal");
                break;
            }

            if !worker.config.enabled {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Delivery worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
                continue;
            }

            if let Err(e) = worker.run_tick().await {
                tracing::warn!("Delivery tick failed: {:?}", e);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Delivery worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(worker.config.poll_interval_seconds)) => {}
            }
        }
    })
}
