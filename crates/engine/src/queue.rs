use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};
use crate::event::NotificationEvent;

pub const SEND_NOTIFICATION_JOB: &str = "send-notification";
pub const FLUSH_BATCHES_JOB: &str = "flush-batches";
pub const FLUSH_QUIET_HOURS_JOB: &str = "flush-quiet-hours";

/// Durable job payload for the webhook fan-out. Re-created with an
/// incremented `attempt` by the queue's backoff mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryJob {
    pub workspace_id: ObjectId,
    pub notification: NotificationEvent,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    /// Total attempts before the queue gives up.
    pub attempts: u32,
    /// Base delay, doubled per attempt.
    pub backoff: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    /// The queue should reschedule with backoff, attempts permitting.
    #[error("retryable job failure: {0}")]
    Retryable(String),
    /// No amount of retrying will help; log and complete.
    #[error("terminal job failure: {0}")]
    Terminal(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), JobError>;
}

/// Generic durable-queue seam, independent of any specific queue
/// product.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> EngineResult<()>;
}

struct QueuedJob {
    job_type: String,
    payload: serde_json::Value,
    attempt: u32,
    options: EnqueueOptions,
}

/// In-process queue over an mpsc channel. Each job runs on its own task
/// so a slow handler never stalls the others; retryable failures are
/// re-sent after an exponential, lightly jittered delay.
pub struct TokioJobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    handlers: Arc<DashMap<String, Arc<dyn JobHandler>>>,
}

impl TokioJobQueue {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers: Arc<DashMap<String, Arc<dyn JobHandler>>> = Arc::new(DashMap::new());
        tokio::spawn(worker(rx, handlers.clone(), tx.clone()));
        Arc::new(Self { tx, handlers })
    }

    /// Registers the handler for a job type, replacing any previous one.
    pub fn process(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.to_string(), handler);
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> EngineResult<()> {
        self.tx
            .send(QueuedJob {
                job_type: job_type.to_string(),
                payload,
                attempt: 0,
                options,
            })
            .map_err(|_| EngineError::Queue("job queue worker is gone".to_string()))
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    handlers: Arc<DashMap<String, Arc<dyn JobHandler>>>,
    tx: mpsc::UnboundedSender<QueuedJob>,
) {
    while let Some(job) = rx.recv().await {
        let handlers = handlers.clone();
        let tx = tx.clone();
        tokio::spawn(run_job(job, handlers, tx));
    }
}

async fn run_job(
    mut job: QueuedJob,
    handlers: Arc<DashMap<String, Arc<dyn JobHandler>>>,
    tx: mpsc::UnboundedSender<QueuedJob>,
) {
    let Some(handler) = handlers.get(&job.job_type).map(|h| h.clone()) else {
        warn!(job_type = %job.job_type, "No handler registered for job");
        return;
    };

    match handler.handle(job.payload.clone()).await {
        Ok(()) => debug!(job_type = %job.job_type, attempt = job.attempt, "Job completed"),
        Err(JobError::Terminal(error)) => {
            error!(job_type = %job.job_type, attempt = job.attempt, %error, "Job failed terminally");
        }
        Err(JobError::Retryable(error)) => {
            let next = job.attempt + 1;
            if next >= job.options.attempts {
                error!(
                    job_type = %job.job_type,
                    attempts = job.options.attempts,
                    %error,
                    "Job failed after final attempt, giving up"
                );
                return;
            }
            let delay = job.options.backoff * 2u32.pow(job.attempt)
                + Duration::from_millis(rand::rng().random_range(0..250));
            warn!(
                job_type = %job.job_type,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Job failed, rescheduling"
            );
            tokio::time::sleep(delay).await;
            job.attempt = next;
            if let Some(object) = job.payload.as_object_mut() {
                object.insert("attempt".to_string(), serde_json::json!(next));
            }
            let _ = tx.send(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, payload: serde_json::Value) -> Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            // The queue stamps the incremented attempt back into the
            // payload object on every retry.
            let attempt = payload.get("attempt").and_then(|a| a.as_u64()).unwrap_or(0);
            assert_eq!(attempt as u32, call);
            if call < self.fail_first {
                Err(JobError::Retryable("not yet".to_string()))
            } else {
                Ok(())
            }
        }
    }

    async fn wait_for_calls(calls: &Arc<AtomicU32>, expected: u32) {
        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} calls, saw {}",
            calls.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn retries_with_backoff_until_success() {
        let queue = TokioJobQueue::new();
        let calls = Arc::new(AtomicU32::new(0));
        queue.process(
            "test-job",
            Arc::new(FlakyHandler {
                calls: calls.clone(),
                fail_first: 2,
            }),
        );
        queue
            .enqueue(
                "test-job",
                serde_json::json!({"attempt": 0}),
                EnqueueOptions {
                    attempts: 3,
                    backoff: Duration::from_millis(1),
                },
            )
            .await
            .unwrap();

        wait_for_calls(&calls, 3).await;
    }

    #[tokio::test]
    async fn gives_up_at_the_attempt_ceiling() {
        let queue = TokioJobQueue::new();
        let calls = Arc::new(AtomicU32::new(0));
        queue.process(
            "test-job",
            Arc::new(FlakyHandler {
                calls: calls.clone(),
                fail_first: u32::MAX,
            }),
        );
        queue
            .enqueue(
                "test-job",
                serde_json::json!({"attempt": 0}),
                EnqueueOptions {
                    attempts: 3,
                    backoff: Duration::from_millis(1),
                },
            )
            .await
            .unwrap();

        wait_for_calls(&calls, 3).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
