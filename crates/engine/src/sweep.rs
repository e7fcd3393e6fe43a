use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use tracing::{debug, error, warn};

use crate::batch::{BatchQueue, BatchedNotification};
use crate::channel::{PushChannel, PushMessage};
use crate::dispatch::deliver_push;
use crate::error::EngineResult;
use crate::event::Recipient;
use crate::preferences::{PreferenceService, Preferences};
use crate::queue::{JobError, JobHandler};
use crate::quiet_hours::QuietHoursEngine;
use crate::rate_limit::RateLimiter;

/// Periodic flush of the per-recipient batch buffers: consolidates each
/// user's accumulated events and pushes the summaries. Registered as the
/// `flush-batches` job so the scheduler can drive it.
///
/// Push gating is re-checked here, not just at dispatch time: the
/// recipient may have disabled push or entered quiet hours while the
/// buffer was accumulating.
pub struct BatchSweep {
    batch: Arc<BatchQueue>,
    preferences: Arc<PreferenceService>,
    quiet_hours: Arc<QuietHoursEngine>,
    push: Option<Arc<dyn PushChannel>>,
    rate_limiter: Arc<RateLimiter>,
    rate_limit_per_minute: usize,
}

impl BatchSweep {
    pub fn new(
        batch: Arc<BatchQueue>,
        preferences: Arc<PreferenceService>,
        quiet_hours: Arc<QuietHoursEngine>,
        push: Option<Arc<dyn PushChannel>>,
        rate_limiter: Arc<RateLimiter>,
        rate_limit_per_minute: usize,
    ) -> Self {
        Self {
            batch,
            preferences,
            quiet_hours,
            push,
            rate_limiter,
            rate_limit_per_minute,
        }
    }

    pub async fn run(&self) {
        let users = match self.batch.users_with_batches().await {
            Ok(users) => users,
            Err(error) => {
                error!(%error, "Failed to scan batch buffers");
                return;
            }
        };
        for user_id in users {
            if let Err(error) = self.flush_user(user_id).await {
                error!(%user_id, %error, "Failed to flush batch buffer");
            }
        }
    }

    async fn flush_user(&self, user_id: ObjectId) -> EngineResult<()> {
        let items = self.batch.flush(user_id).await?;
        if items.is_empty() {
            return Ok(());
        }
        debug!(%user_id, count = items.len(), "Flushing batched notifications");

        // Consolidation counts must not merge across workspaces.
        let mut by_workspace: Vec<(ObjectId, Vec<BatchedNotification>)> = Vec::new();
        for item in items {
            match by_workspace
                .iter_mut()
                .find(|(ws, _)| *ws == item.workspace_id)
            {
                Some((_, group)) => group.push(item),
                None => by_workspace.push((item.workspace_id, vec![item])),
            }
        }

        for (workspace_id, group) in by_workspace {
            let recipient = Recipient {
                user_id,
                workspace_id,
            };

            let prefs = match self.preferences.get_or_create(user_id, workspace_id).await {
                Ok(prefs) => prefs,
                Err(error) => {
                    warn!(
                        %user_id,
                        %workspace_id,
                        %error,
                        "Preference lookup failed, assuming defaults"
                    );
                    Preferences::defaults(user_id, workspace_id)
                }
            };

            // The in-app records already landed at dispatch time; a
            // disabled push channel just drops the summaries.
            if !prefs.channels.push {
                debug!(%user_id, %workspace_id, "Push channel disabled, skipping batch summaries");
                continue;
            }

            // Mid-window flush: park the items for the quiet-hours
            // digest instead of pushing. Batchable types are never
            // critical, so there is no bypass to consider.
            if self.quiet_hours.is_in_quiet_hours(&prefs.quiet_hours) {
                debug!(%user_id, %workspace_id, "Inside quiet hours, holding batch items");
                for item in group {
                    if let Err(error) = self
                        .quiet_hours
                        .hold(&recipient, item.notification_type, item.payload, item.timestamp)
                        .await
                    {
                        error!(%user_id, %error, "Failed to hold batched notification");
                    }
                }
                continue;
            }

            for item in self.batch.consolidate(group) {
                deliver_push(
                    self.push.as_ref(),
                    &self.rate_limiter,
                    self.rate_limit_per_minute,
                    &recipient,
                    &PushMessage::from_consolidated(&item),
                )
                .await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for BatchSweep {
    // Sweep failures are per-user and already logged; the job itself
    // never retries.
    async fn handle(&self, _payload: serde_json::Value) -> Result<(), JobError> {
        self.run().await;
        Ok(())
    }
}

/// Periodic release of notifications held by quiet hours: once a user's
/// window has ended, everything held is folded into one digest push.
/// Registered as the `flush-quiet-hours` job.
pub struct QuietHoursSweep {
    quiet_hours: Arc<QuietHoursEngine>,
    preferences: Arc<PreferenceService>,
    push: Option<Arc<dyn PushChannel>>,
    rate_limiter: Arc<RateLimiter>,
    rate_limit_per_minute: usize,
}

impl QuietHoursSweep {
    pub fn new(
        quiet_hours: Arc<QuietHoursEngine>,
        preferences: Arc<PreferenceService>,
        push: Option<Arc<dyn PushChannel>>,
        rate_limiter: Arc<RateLimiter>,
        rate_limit_per_minute: usize,
    ) -> Self {
        Self {
            quiet_hours,
            preferences,
            push,
            rate_limiter,
            rate_limit_per_minute,
        }
    }

    pub async fn run(&self) {
        let users = match self.quiet_hours.users_with_queued().await {
            Ok(users) => users,
            Err(error) => {
                error!(%error, "Failed to scan held notifications");
                return;
            }
        };
        for user_id in users {
            if let Err(error) = self.flush_user(user_id).await {
                error!(%user_id, %error, "Failed to flush held notifications");
            }
        }
    }

    async fn flush_user(&self, user_id: ObjectId) -> EngineResult<()> {
        let Some(oldest) = self.quiet_hours.first_queued(user_id).await? else {
            return Ok(());
        };

        // The workspace of the oldest held item decides whose window we
        // consult; a failed lookup fails open and releases the queue.
        let still_quiet = match self
            .preferences
            .get_or_create(user_id, oldest.workspace_id)
            .await
        {
            Ok(prefs) => self.quiet_hours.is_in_quiet_hours(&prefs.quiet_hours),
            Err(error) => {
                warn!(%user_id, %error, "Preference lookup failed, releasing held notifications");
                false
            }
        };
        if still_quiet {
            return Ok(());
        }

        let items = self.quiet_hours.flush_queued(user_id).await?;
        if items.is_empty() {
            return Ok(());
        }
        debug!(%user_id, count = items.len(), "Quiet hours ended, sending digest");

        let digest = self.quiet_hours.build_digest_summary(&items);
        let recipient = Recipient {
            user_id,
            workspace_id: oldest.workspace_id,
        };
        deliver_push(
            self.push.as_ref(),
            &self.rate_limiter,
            self.rate_limit_per_minute,
            &recipient,
            &PushMessage::from_digest(&digest),
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for QuietHoursSweep {
    async fn handle(&self, _payload: serde_json::Value) -> Result<(), JobError> {
        self.run().await;
        Ok(())
    }
}
