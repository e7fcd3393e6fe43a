use std::sync::Arc;

use bson::oid::ObjectId;
use tracing::{debug, error, warn};

use crate::batch::BatchQueue;
use crate::channel::{InAppSink, PushChannel, PushMessage};
use crate::event::{NotificationEvent, Recipient};
use crate::preferences::{Preferences, PreferenceService};
use crate::queue::{EnqueueOptions, JobQueue, RetryJob, SEND_NOTIFICATION_JOB};
use crate::quiet_hours::{QuietHoursEngine, should_bypass_quiet_hours};
use crate::rate_limit::RateLimiter;

/// Rate-limiter target for one user's push stream.
pub fn push_target(user_id: ObjectId) -> String {
    format!("push:{}", user_id.to_hex())
}

/// Entry point for every triggered event. Dispatch never surfaces an
/// error to the producer: each step degrades independently and every
/// recipient and channel is isolated from the others' failures.
pub struct DispatchOrchestrator {
    preferences: Arc<PreferenceService>,
    quiet_hours: Arc<QuietHoursEngine>,
    batch: Arc<BatchQueue>,
    rate_limiter: Arc<RateLimiter>,
    in_app: Arc<dyn InAppSink>,
    push: Option<Arc<dyn PushChannel>>,
    queue: Arc<dyn JobQueue>,
    rate_limit_per_minute: usize,
    retry_options: EnqueueOptions,
}

impl DispatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preferences: Arc<PreferenceService>,
        quiet_hours: Arc<QuietHoursEngine>,
        batch: Arc<BatchQueue>,
        rate_limiter: Arc<RateLimiter>,
        in_app: Arc<dyn InAppSink>,
        push: Option<Arc<dyn PushChannel>>,
        queue: Arc<dyn JobQueue>,
        rate_limit_per_minute: usize,
        retry_options: EnqueueOptions,
    ) -> Self {
        Self {
            preferences,
            quiet_hours,
            batch,
            rate_limiter,
            in_app,
            push,
            queue,
            rate_limit_per_minute,
            retry_options,
        }
    }

    pub async fn dispatch(&self, event: NotificationEvent) {
        if event.recipients.is_empty() {
            debug!(notification_type = event.notification_type.as_str(), "No recipients, nothing to dispatch");
            return;
        }

        let survivors = self.filter_by_preferences(&event).await;
        if survivors.is_empty() {
            debug!(
                notification_type = event.notification_type.as_str(),
                "All recipients opted out"
            );
            return;
        }
        let event = event.with_recipients(survivors);

        // The in-app record always lands, per recipient, regardless of
        // what happens on the other channels.
        for recipient in &event.recipients {
            if let Err(error) = self.in_app.create(recipient, &event).await {
                error!(
                    user_id = %recipient.user_id,
                    workspace_id = %recipient.workspace_id,
                    %error,
                    "Failed to create in-app notification"
                );
            }
        }

        if event.is_immediate() {
            for recipient in &event.recipients {
                self.push_immediate(recipient, &event).await;
            }
        } else if let Err(error) = self.batch.queue(&event).await {
            error!(
                notification_type = event.notification_type.as_str(),
                %error,
                "Failed to queue event for batching"
            );
        }

        // Webhook fan-out goes through the durable queue, one job per
        // distinct workspace, so provider flakiness gets retries.
        for workspace_id in event.distinct_workspaces() {
            let job = RetryJob {
                workspace_id,
                notification: event.clone(),
                attempt: 0,
            };
            match serde_json::to_value(&job) {
                Ok(payload) => {
                    if let Err(error) = self
                        .queue
                        .enqueue(SEND_NOTIFICATION_JOB, payload, self.retry_options)
                        .await
                    {
                        error!(%workspace_id, %error, "Failed to enqueue webhook delivery");
                    }
                }
                Err(error) => error!(%workspace_id, %error, "Failed to serialize webhook delivery job"),
            }
        }
    }

    /// Drops recipients who disabled this type. Critical types skip the
    /// filter entirely; a failed preference lookup keeps the recipient
    /// (fail open: an over-notification beats a silent drop).
    async fn filter_by_preferences(&self, event: &NotificationEvent) -> Vec<Recipient> {
        if event.notification_type.is_critical() {
            return event.recipients.clone();
        }

        let mut survivors = Vec::with_capacity(event.recipients.len());
        for recipient in &event.recipients {
            match self
                .preferences
                .is_type_enabled(
                    recipient.user_id,
                    recipient.workspace_id,
                    event.notification_type,
                )
                .await
            {
                Ok(true) => survivors.push(*recipient),
                Ok(false) => debug!(
                    user_id = %recipient.user_id,
                    notification_type = event.notification_type.as_str(),
                    "Recipient opted out of this type"
                ),
                Err(error) => {
                    warn!(
                        user_id = %recipient.user_id,
                        %error,
                        "Preference lookup failed, failing open"
                    );
                    survivors.push(*recipient);
                }
            }
        }
        survivors
    }

    async fn push_immediate(&self, recipient: &Recipient, event: &NotificationEvent) {
        let prefs = match self
            .preferences
            .get_or_create(recipient.user_id, recipient.workspace_id)
            .await
        {
            Ok(prefs) => prefs,
            Err(error) => {
                warn!(
                    user_id = %recipient.user_id,
                    %error,
                    "Preference lookup failed, assuming defaults"
                );
                Preferences::defaults(recipient.user_id, recipient.workspace_id)
            }
        };

        if !prefs.channels.push {
            debug!(user_id = %recipient.user_id, "Push channel disabled");
            return;
        }

        if !should_bypass_quiet_hours(event.notification_type, prefs.quiet_hours.except_critical)
            && self.quiet_hours.is_in_quiet_hours(&prefs.quiet_hours)
        {
            if let Err(error) = self.quiet_hours.queue_for_later(recipient, event).await {
                error!(
                    user_id = %recipient.user_id,
                    %error,
                    "Failed to hold notification for quiet hours"
                );
            }
            return;
        }

        deliver_push(
            self.push.as_ref(),
            &self.rate_limiter,
            self.rate_limit_per_minute,
            recipient,
            &PushMessage::from_event(event),
        )
        .await;
    }
}

/// Rate-limited push send shared by immediate dispatch and the sweeps.
/// A missing push channel (no VAPID keys configured) is a quiet no-op;
/// a rate-limiter error fails open and sends anyway.
pub(crate) async fn deliver_push(
    push: Option<&Arc<dyn PushChannel>>,
    rate_limiter: &RateLimiter,
    limit_per_minute: usize,
    recipient: &Recipient,
    message: &PushMessage,
) {
    let Some(push) = push else {
        return;
    };

    let target = push_target(recipient.user_id);
    match rate_limiter.is_rate_limited(&target, limit_per_minute).await {
        Ok(true) => {
            warn!(user_id = %recipient.user_id, "Push rate limit reached, dropping send");
            return;
        }
        Ok(false) => {}
        Err(error) => {
            warn!(user_id = %recipient.user_id, %error, "Rate limiter unavailable, sending anyway");
        }
    }

    let outcome = push.send(recipient, message).await;
    if outcome.sent {
        if let Err(error) = rate_limiter.record_send(&target).await {
            warn!(user_id = %recipient.user_id, %error, "Failed to record push send");
        }
    } else {
        warn!(
            user_id = %recipient.user_id,
            failure = ?outcome.failure,
            "Push delivery failed"
        );
    }
}
