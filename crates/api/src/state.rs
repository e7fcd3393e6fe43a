use std::sync::Arc;
use std::time::Duration;

use mongodb::Database;
use tracing::{info, warn};

use beacon_config::Settings;
use beacon_engine::batch::BatchQueue;
use beacon_engine::channel::{ChannelAdapter, PushChannel};
use beacon_engine::dedup::InteractionDeduplicator;
use beacon_engine::dispatch::DispatchOrchestrator;
use beacon_engine::preferences::PreferenceService;
use beacon_engine::queue::{
    EnqueueOptions, FLUSH_BATCHES_JOB, FLUSH_QUIET_HOURS_JOB, SEND_NOTIFICATION_JOB, TokioJobQueue,
};
use beacon_engine::quiet_hours::QuietHoursEngine;
use beacon_engine::rate_limit::RateLimiter;
use beacon_engine::recipients::RecipientResolver;
use beacon_engine::retry::RetryProcessor;
use beacon_engine::store::KvStore;
use beacon_engine::sweep::{BatchSweep, QuietHoursSweep};
use beacon_services::{
    DiscordWebhookChannel, IntegrationDao, MemberDao, NotificationDao, PreferenceDao,
    PushSubscriptionDao, RedisKvStore, SlackWebhookChannel, WebPushChannel,
};

use crate::auth::AuthService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub settings: Settings,
    pub auth: Arc<AuthService>,
    pub notifications: Arc<NotificationDao>,
    pub integrations: Arc<IntegrationDao>,
    pub push_subscriptions: Arc<PushSubscriptionDao>,
    pub preferences: Arc<PreferenceService>,
    pub quiet_hours: Arc<QuietHoursEngine>,
    pub dedup: Arc<InteractionDeduplicator>,
    pub resolver: Arc<RecipientResolver>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub queue: Arc<TokioJobQueue>,
}

impl AppState {
    pub async fn new(db: Database, settings: Settings) -> anyhow::Result<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&settings.redis.url).await?);

        let auth = Arc::new(AuthService::new(settings.jwt.clone()));
        let notifications = Arc::new(NotificationDao::new(&db));
        let preference_dao = Arc::new(PreferenceDao::new(&db));
        let members = Arc::new(MemberDao::new(&db));
        let integrations = Arc::new(IntegrationDao::new(&db));
        let push_subscriptions = Arc::new(PushSubscriptionDao::new(&db));

        let preferences = Arc::new(PreferenceService::new(preference_dao, kv.clone()));
        let quiet_hours = Arc::new(QuietHoursEngine::new(kv.clone()));
        let batch = Arc::new(BatchQueue::new(kv.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(kv.clone()));
        let dedup = Arc::new(InteractionDeduplicator::new(kv.clone()));
        let resolver = Arc::new(RecipientResolver::new(members));

        let push: Option<Arc<dyn PushChannel>> = match &settings.push.vapid_private_key {
            Some(key) => match WebPushChannel::new(
                push_subscriptions.clone(),
                key.clone(),
                settings.push.vapid_subject.clone(),
            ) {
                Ok(channel) => Some(Arc::new(channel)),
                Err(error) => {
                    warn!(%error, "Web push disabled, failed to build client");
                    None
                }
            },
            None => {
                info!("Web push disabled, no VAPID private key configured");
                None
            }
        };

        let timeout = Duration::from_secs(settings.notifications.webhook_timeout_secs);
        let webhooks: Vec<Arc<dyn ChannelAdapter>> = vec![
            Arc::new(SlackWebhookChannel::new(integrations.clone(), timeout)),
            Arc::new(DiscordWebhookChannel::new(integrations.clone(), timeout)),
        ];

        let limit = settings.notifications.rate_limit_per_minute;
        let retry_options = EnqueueOptions {
            attempts: settings.notifications.retry_max_attempts,
            backoff: Duration::from_secs(settings.notifications.retry_backoff_secs),
        };

        let queue = TokioJobQueue::new();
        queue.process(
            SEND_NOTIFICATION_JOB,
            Arc::new(RetryProcessor::new(
                webhooks,
                integrations.clone(),
                rate_limiter.clone(),
                limit,
                settings.notifications.retry_max_attempts,
            )),
        );
        queue.process(
            FLUSH_BATCHES_JOB,
            Arc::new(BatchSweep::new(
                batch.clone(),
                preferences.clone(),
                quiet_hours.clone(),
                push.clone(),
                rate_limiter.clone(),
                limit,
            )),
        );
        queue.process(
            FLUSH_QUIET_HOURS_JOB,
            Arc::new(QuietHoursSweep::new(
                quiet_hours.clone(),
                preferences.clone(),
                push.clone(),
                rate_limiter.clone(),
                limit,
            )),
        );

        let orchestrator = Arc::new(DispatchOrchestrator::new(
            preferences.clone(),
            quiet_hours.clone(),
            batch,
            rate_limiter,
            notifications.clone(),
            push,
            queue.clone(),
            limit,
            retry_options,
        ));

        Ok(Self {
            db,
            settings,
            auth,
            notifications,
            integrations,
            push_subscriptions,
            preferences,
            quiet_hours,
            dedup,
            resolver,
            orchestrator,
            queue,
        })
    }
}
