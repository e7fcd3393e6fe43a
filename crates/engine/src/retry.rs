use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::channel::{ChannelAdapter, IntegrationStatusStore, SendFailure};
use crate::queue::{JobError, JobHandler, RetryJob};
use crate::rate_limit::RateLimiter;

/// Consecutive failures before an integration flips to `error`.
const FAILURE_CEILING: u32 = 3;

/// Handler for `send-notification` jobs: delivers one event to every
/// configured chat webhook of one workspace. Adapters run in their
/// configured order; one provider's failure never blocks the next.
pub struct RetryProcessor {
    webhooks: Vec<Arc<dyn ChannelAdapter>>,
    integrations: Arc<dyn IntegrationStatusStore>,
    rate_limiter: Arc<RateLimiter>,
    rate_limit_per_minute: usize,
    max_attempts: u32,
}

impl RetryProcessor {
    pub fn new(
        webhooks: Vec<Arc<dyn ChannelAdapter>>,
        integrations: Arc<dyn IntegrationStatusStore>,
        rate_limiter: Arc<RateLimiter>,
        rate_limit_per_minute: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            webhooks,
            integrations,
            rate_limiter,
            rate_limit_per_minute,
            max_attempts,
        }
    }

    /// Rate-limiter target for one workspace's webhook on one provider.
    fn target(&self, adapter: &dyn ChannelAdapter, job: &RetryJob) -> String {
        format!("{}:{}", adapter.name(), job.workspace_id.to_hex())
    }
}

#[async_trait]
impl JobHandler for RetryProcessor {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), JobError> {
        let job: RetryJob = serde_json::from_value(payload)
            .map_err(|error| JobError::Terminal(format!("malformed job payload: {error}")))?;

        let mut failures: Vec<String> = Vec::new();

        for adapter in &self.webhooks {
            let target = self.target(adapter.as_ref(), &job);
            match self
                .rate_limiter
                .is_rate_limited(&target, self.rate_limit_per_minute)
                .await
            {
                Ok(true) => {
                    warn!(%target, "Webhook rate limit reached, will retry");
                    failures.push(format!("{}: rate limit window full", adapter.name()));
                    continue;
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(%target, %error, "Rate limiter unavailable, sending anyway");
                }
            }

            let outcome = adapter.send(job.workspace_id, &job.notification).await;
            if outcome.sent {
                if let Err(error) = self.rate_limiter.record_send(&target).await {
                    warn!(%target, %error, "Failed to record webhook send");
                }
                if let Err(error) = self
                    .integrations
                    .record_success(job.workspace_id, adapter.name())
                    .await
                {
                    warn!(
                        workspace_id = %job.workspace_id,
                        provider = adapter.name(),
                        %error,
                        "Failed to record integration success"
                    );
                }
                continue;
            }

            match outcome.failure {
                // Not configured for this workspace: nothing to deliver,
                // nothing to retry.
                Some(SendFailure::Unavailable) | None => {
                    debug!(
                        workspace_id = %job.workspace_id,
                        provider = adapter.name(),
                        "Channel not configured, skipping"
                    );
                }
                // The webhook itself is gone; retrying the same URL is
                // pointless, so this does not count toward the job retry.
                Some(failure) if failure.invalidates_webhook() => {
                    error!(
                        workspace_id = %job.workspace_id,
                        provider = adapter.name(),
                        %failure,
                        "Webhook rejected as invalid, disabling integration"
                    );
                    if let Err(error) = self
                        .integrations
                        .mark_invalid(job.workspace_id, adapter.name())
                        .await
                    {
                        warn!(
                            workspace_id = %job.workspace_id,
                            provider = adapter.name(),
                            %error,
                            "Failed to mark integration invalid"
                        );
                    }
                }
                Some(failure) => {
                    let message = failure.to_string();
                    warn!(
                        workspace_id = %job.workspace_id,
                        provider = adapter.name(),
                        attempt = job.attempt,
                        %failure,
                        "Webhook delivery failed"
                    );
                    match self
                        .integrations
                        .record_failure(job.workspace_id, adapter.name(), &message)
                        .await
                    {
                        Ok(consecutive) if consecutive >= FAILURE_CEILING => {
                            if let Err(error) = self
                                .integrations
                                .mark_error(job.workspace_id, adapter.name())
                                .await
                            {
                                warn!(
                                    workspace_id = %job.workspace_id,
                                    provider = adapter.name(),
                                    %error,
                                    "Failed to mark integration errored"
                                );
                            }
                        }
                        Ok(_) => {}
                        Err(error) => warn!(
                            workspace_id = %job.workspace_id,
                            provider = adapter.name(),
                            %error,
                            "Failed to record integration failure"
                        ),
                    }
                    failures.push(format!("{}: {message}", adapter.name()));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        if job.attempt + 1 >= self.max_attempts {
            error!(
                workspace_id = %job.workspace_id,
                notification_type = job.notification.notification_type.as_str(),
                attempt = job.attempt,
                failures = failures.join("; "),
                "Webhook delivery exhausted all attempts, dropping"
            );
            return Ok(());
        }
        Err(JobError::Retryable(failures.join("; ")))
    }
}
