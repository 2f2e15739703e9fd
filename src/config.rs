use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Whether the delivery worker is enabled.
    pub enabled: bool,
    /// How often (seconds) the worker polls for due tasks.
    pub poll_interval_seconds: u64,
    /// Maximum parallel dispatches per tick (claim batch size).
    pub worker_concurrency: u32,
    /// Maximum delivery attempts before a task is dead-lettered.
    pub max_attempts: u32,
    /// Backoff for the first retry attempt (seconds).
    pub initial_backoff_seconds: u64,
    /// Cap for exponential backoff (seconds).
    pub max_backoff_seconds: u64,
    /// Jitter applied to backoff delays, as a fraction of the delay
    /// (0.0 disables jitter).
    pub backoff_jitter_factor: f64,
    /// Tasks stuck in 'processing' longer than this (seconds) are assumed
    /// abandoned by a crashed worker and returned to 'pending'.
    pub stale_after_seconds: u64,
    /// Default TTL (seconds) for queued notifications when no per-kind TTL
    /// applies and the producer supplied no deadline.
    pub default_ttl_seconds: u64,
    /// Per-notification-kind TTLs (seconds) for time-sensitive events.
    pub stream_online_ttl_seconds: u64,
    pub stream_offline_ttl_seconds: u64,
    pub title_change_ttl_seconds: u64,
    pub category_change_ttl_seconds: u64,
    pub reward_redemption_ttl_seconds: u64,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let jitter = match env::var("NOTIFICATION_DELIVERY_BACKOFF_JITTER_FACTOR") {
            Ok(v) => {
                let parsed: f64 = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(
                        "NOTIFICATION_DELIVERY_BACKOFF_JITTER_FACTOR".to_string(),
                    )
                })?;
                if !(0.0..=1.0).contains(&parsed) {
                    return Err(ConfigError::InvalidValue(
                        "NOTIFICATION_DELIVERY_BACKOFF_JITTER_FACTOR".to_string(),
                    ));
                }
                parsed
            }
            Err(_) => 0.0,
        };

        // Per-kind TTLs fall back to the configured default, which itself
        // falls back to the shipped constant.
        let default_ttl = env_u64(
            "NOTIFICATION_TTL_DEFAULT_SECONDS",
            crate::policy::DEFAULT_TASK_TTL_SECS,
        );

        Ok(Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/relay.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            },
            discord: DiscordConfig {
                bot_token: env::var("DISCORD_BOT_TOKEN").ok(),
            },
            delivery: DeliveryConfig {
                enabled: env_bool("NOTIFICATION_DELIVERY_ENABLED", true),
                poll_interval_seconds: env_u64("NOTIFICATION_DELIVERY_POLL_INTERVAL_SECONDS", 5),
                worker_concurrency: env::var("NOTIFICATION_DELIVERY_WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u32),
                max_attempts: env::var("NOTIFICATION_DELIVERY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u32),
                initial_backoff_seconds: env_u64(
                    "NOTIFICATION_DELIVERY_INITIAL_BACKOFF_SECONDS",
                    30,
                ),
                max_backoff_seconds: env_u64("NOTIFICATION_DELIVERY_MAX_BACKOFF_SECONDS", 3600),
                backoff_jitter_factor: jitter,
                stale_after_seconds: env_u64("NOTIFICATION_DELIVERY_STALE_AFTER_SECONDS", 600),

                // TTLs: bound how long retries are attempted before the event
                // is considered stale.
                default_ttl_seconds: default_ttl,
                stream_online_ttl_seconds: env_u64(
                    "NOTIFICATION_TTL_STREAM_ONLINE_SECONDS",
                    default_ttl,
                ),
                stream_offline_ttl_seconds: env_u64(
                    "NOTIFICATION_TTL_STREAM_OFFLINE_SECONDS",
                    default_ttl,
                ),
                title_change_ttl_seconds: env_u64(
                    "NOTIFICATION_TTL_TITLE_CHANGE_SECONDS",
                    default_ttl,
                ),
                category_change_ttl_seconds: env_u64(
                    "NOTIFICATION_TTL_CATEGORY_CHANGE_SECONDS",
                    default_ttl,
                ),
                reward_redemption_ttl_seconds: env_u64(
                    "NOTIFICATION_TTL_REWARD_REDEMPTION_SECONDS",
                    default_ttl,
                ),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                url: "sqlite://data/relay.db".to_string(),
                max_connections: 5,
            },
            telegram: TelegramConfig { bot_token: None },
            discord: DiscordConfig { bot_token: None },
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            enabled: true,
            poll_interval_seconds: 5,
            worker_concurrency: 10,
            max_attempts: 5,
            initial_backoff_seconds: 30,
            max_backoff_seconds: 3600,
            backoff_jitter_factor: 0.0,
            stale_after_seconds: 600,
            default_ttl_seconds: crate::policy::DEFAULT_TASK_TTL_SECS,
            stream_online_ttl_seconds: crate::policy::DEFAULT_TASK_TTL_SECS,
            stream_offline_ttl_seconds: crate::policy::DEFAULT_TASK_TTL_SECS,
            title_change_ttl_seconds: crate::policy::DEFAULT_TASK_TTL_SECS,
            category_change_ttl_seconds: crate::policy::DEFAULT_TASK_TTL_SECS,
            reward_redemption_ttl_seconds: crate::policy::DEFAULT_TASK_TTL_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::models::NotificationKind;
    use crate::policy::ExpirationPolicy;

    // Each test owns its environment variables so parallel runs can't
    // observe each other's overrides.

    #[test]
    fn max_attempts_env_override_is_parsed() {
        env::set_var("NOTIFICATION_DELIVERY_MAX_ATTEMPTS", "2");
        let config = Config::from_env().unwrap();
        env::remove_var("NOTIFICATION_DELIVERY_MAX_ATTEMPTS");

        assert_eq!(config.delivery.max_attempts, 2);
    }

    #[test]
    fn default_ttl_env_override_reaches_every_kind() {
        env::set_var("NOTIFICATION_TTL_DEFAULT_SECONDS", "900");
        let config = Config::from_env().unwrap();

        assert_eq!(config.delivery.default_ttl_seconds, 900);
        assert_eq!(config.delivery.stream_online_ttl_seconds, 900);
        assert_eq!(config.delivery.stream_offline_ttl_seconds, 900);
        assert_eq!(config.delivery.title_change_ttl_seconds, 900);
        assert_eq!(config.delivery.category_change_ttl_seconds, 900);
        assert_eq!(config.delivery.reward_redemption_ttl_seconds, 900);

        let policy = ExpirationPolicy::from_config(&config.delivery);
        assert_eq!(
            policy.ttl(NotificationKind::StreamOnline),
            Duration::from_secs(900)
        );

        // An explicit per-kind override still beats the default.
        env::set_var("NOTIFICATION_TTL_TITLE_CHANGE_SECONDS", "60");
        let config = Config::from_env().unwrap();
        env::remove_var("NOTIFICATION_TTL_TITLE_CHANGE_SECONDS");
        env::remove_var("NOTIFICATION_TTL_DEFAULT_SECONDS");

        assert_eq!(config.delivery.title_change_ttl_seconds, 60);
        assert_eq!(config.delivery.stream_online_ttl_seconds, 900);
    }
}
