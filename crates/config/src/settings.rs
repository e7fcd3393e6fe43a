use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub redis: RedisSettings,
    pub push: PushSettings,
    pub slack: SlackSettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushSettings {
    /// VAPID subject, usually a mailto: URI. Push is disabled when the
    /// private key is absent.
    pub vapid_subject: String,
    pub vapid_private_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackSettings {
    /// Signing secret for inbound interaction callbacks. Unset means
    /// the interactions endpoint rejects everything.
    pub signing_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    /// Outbound provider request timeout, seconds.
    pub webhook_timeout_secs: u64,
    /// Sliding-window cap per channel target.
    pub rate_limit_per_minute: usize,
    /// Attempt ceiling for the send-notification job.
    pub retry_max_attempts: u32,
    /// Base delay for exponential retry backoff, seconds.
    pub retry_backoff_secs: u64,
    /// Cron expression for the batch flush sweep.
    pub batch_flush_cron: String,
    /// Cron expression for the quiet-hours flush sweep.
    pub quiet_hours_flush_cron: String,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::default().separator("__").prefix("BEACON"))
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 4000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "beacon")?
            .set_default("jwt.secret", "change-me-in-production")?
            .set_default("jwt.issuer", "beacon")?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("push.vapid_subject", "mailto:ops@beacon.dev")?
            .set_default("push.vapid_private_key", None::<String>)?
            .set_default("slack.signing_secret", None::<String>)?
            .set_default("notifications.webhook_timeout_secs", 10)?
            .set_default("notifications.rate_limit_per_minute", 30)?
            .set_default("notifications.retry_max_attempts", 3)?
            .set_default("notifications.retry_backoff_secs", 5)?
            .set_default("notifications.batch_flush_cron", "0 */5 * * * *")?
            .set_default("notifications.quiet_hours_flush_cron", "0 2/5 * * * *")?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
