//! Pure retry-scheduling policies: exponential backoff and TTL deadlines.

use std::time::Duration;

use chrono::NaiveDateTime;
use rand::Rng;

use crate::config::DeliveryConfig;
use crate::db::models::NotificationKind;

/// Default time-to-live for a queued notification when the producer supplies
/// no deadline and no per-kind TTL overrides it.
///
/// Picked over the 1-hour figure that floats around in older notes: stream
/// notifications are useless well before an hour passes, and 5 minutes is
/// what the service has always shipped with. Override via
/// `NOTIFICATION_TTL_DEFAULT_SECONDS`.
pub const DEFAULT_TASK_TTL_SECS: u64 = 300;

/// Exponential backoff with a cap: `min(base * 2^attempts, cap)`, optionally
/// jittered to spread retries out after a destination-wide outage.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay randomized in both directions (0.0 disables).
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        BackoffPolicy {
            base: Duration::from_secs(cfg.initial_backoff_seconds),
            cap: Duration::from_secs(cfg.max_backoff_seconds),
            jitter_factor: cfg.backoff_jitter_factor,
        }
    }

    /// Delay before the next attempt, given the number of attempts already
    /// made. Non-decreasing in `attempts` (with jitter disabled) and never
    /// above `cap`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(30);
        let multiplier = 2u64.saturating_pow(exponent);
        let secs = self.base.as_secs().saturating_mul(multiplier);
        let capped = Duration::from_secs(secs).min(self.cap);
        apply_jitter(capped, self.jitter_factor).min(self.cap)
    }
}

/// Randomize a delay by ±`jitter_factor` so simultaneous failures don't all
/// retry at the same instant.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::thread_rng().gen_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Maps a notification kind to the TTL applied when the producer enqueues a
/// task without an explicit deadline.
#[derive(Debug, Clone)]
pub struct ExpirationPolicy {
    default_ttl: Duration,
    stream_online: Duration,
    stream_offline: Duration,
    title_change: Duration,
    category_change: Duration,
    reward_redemption: Duration,
}

impl ExpirationPolicy {
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        ExpirationPolicy {
            default_ttl: Duration::from_secs(cfg.default_ttl_seconds),
            stream_online: Duration::from_secs(cfg.stream_online_ttl_seconds),
            stream_offline: Duration::from_secs(cfg.stream_offline_ttl_seconds),
            title_change: Duration::from_secs(cfg.title_change_ttl_seconds),
            category_change: Duration::from_secs(cfg.category_change_ttl_seconds),
            reward_redemption: Duration::from_secs(cfg.reward_redemption_ttl_seconds),
        }
    }

    pub fn ttl(&self, kind: NotificationKind) -> Duration {
        match kind {
            NotificationKind::StreamOnline => self.stream_online,
            NotificationKind::StreamOffline => self.stream_offline,
            NotificationKind::TitleChange => self.title_change,
            NotificationKind::CategoryChange => self.category_change,
            NotificationKind::RewardRedemption => self.reward_redemption,
        }
    }

    /// Effective deadline for a task created at `created_at`.
    pub fn deadline(&self, kind: NotificationKind, created_at: NaiveDateTime) -> NaiveDateTime {
        let ttl = self.ttl(kind);
        created_at + chrono::Duration::seconds(ttl.as_secs() as i64)
    }

    /// Policy with every kind at the global default TTL.
    pub fn uniform_default() -> Self {
        let d = Duration::from_secs(DEFAULT_TASK_TTL_SECS);
        ExpirationPolicy {
            default_ttl: d,
            stream_online: d,
            stream_offline: d,
            title_change: d,
            category_change: d,
            reward_redemption: d,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(3600),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = no_jitter();
        assert_eq!(policy.delay(0), Duration::from_secs(30));
        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(2), Duration::from_secs(120));
        assert_eq!(policy.delay(3), Duration::from_secs(240));
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let policy = no_jitter();
        let mut previous = Duration::ZERO;
        for attempts in 0..64 {
            let delay = policy.delay(attempts);
            assert!(delay >= previous, "delay decreased at attempt {attempts}");
            assert!(delay <= policy.cap, "delay exceeded cap at attempt {attempts}");
            previous = delay;
        }
        assert_eq!(policy.delay(63), policy.cap);
    }

    #[test]
    fn jittered_backoff_never_exceeds_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(120),
            jitter_factor: 0.5,
        };
        for attempts in 0..10 {
            for _ in 0..50 {
                assert!(policy.delay(attempts) <= policy.cap);
            }
        }
    }

    #[test]
    fn jitter_varies_the_delay() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            seen.insert(apply_jitter(Duration::from_secs(10), 0.5).as_millis());
        }
        assert!(seen.len() > 1, "jitter should create variation");
    }

    #[test]
    fn deadline_uses_per_kind_ttl() {
        let cfg = DeliveryConfig {
            stream_online_ttl_seconds: 60,
            default_ttl_seconds: 900,
            ..DeliveryConfig::default()
        };
        let policy = ExpirationPolicy::from_config(&cfg);
        let created = Utc::now().naive_utc();

        assert_eq!(
            policy.deadline(NotificationKind::StreamOnline, created),
            created + chrono::Duration::seconds(60)
        );
        // Kinds without explicit env overrides sit at the shipped default.
        assert_eq!(
            policy.deadline(NotificationKind::StreamOffline, created),
            created + chrono::Duration::seconds(DEFAULT_TASK_TTL_SECS as i64)
        );
        assert_eq!(policy.default_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn uniform_default_policy_uses_named_constant() {
        let policy = ExpirationPolicy::uniform_default();
        assert_eq!(
            policy.ttl(NotificationKind::RewardRedemption),
            Duration::from_secs(DEFAULT_TASK_TTL_SECS)
        );
    }
}
