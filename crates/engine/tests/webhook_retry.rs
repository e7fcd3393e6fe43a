use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::oid::ObjectId;

use beacon_engine::EngineResult;
use beacon_engine::channel::{
    ChannelAdapter, IntegrationStatusStore, SendFailure, SendOutcome,
};
use beacon_engine::event::{EventType, NotificationEvent, Recipient};
use beacon_engine::queue::{JobError, JobHandler, RetryJob};
use beacon_engine::rate_limit::RateLimiter;
use beacon_engine::retry::RetryProcessor;
use beacon_engine::store::MemoryKvStore;

struct ScriptedAdapter {
    name: &'static str,
    outcomes: Mutex<Vec<SendOutcome>>,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    fn new(name: &'static str, outcomes: Vec<SendOutcome>) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcomes: Mutex::new(outcomes),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, _workspace_id: ObjectId, _event: &NotificationEvent) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            SendOutcome::ok(self.name)
        } else {
            outcomes.remove(0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StatusCall {
    Failure(String),
    MarkError,
    MarkInvalid,
    Success,
}

#[derive(Default)]
struct RecordingStatusStore {
    calls: Mutex<Vec<(String, StatusCall)>>,
    consecutive: AtomicU32,
}

impl RecordingStatusStore {
    fn calls_for(&self, provider: &str) -> Vec<StatusCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == provider)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl IntegrationStatusStore for RecordingStatusStore {
    async fn record_failure(
        &self,
        _workspace_id: ObjectId,
        provider: &str,
        error: &str,
    ) -> EngineResult<u32> {
        self.calls
            .lock()
            .unwrap()
            .push((provider.to_string(), StatusCall::Failure(error.to_string())));
        Ok(self.consecutive.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn mark_error(&self, _workspace_id: ObjectId, provider: &str) -> EngineResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((provider.to_string(), StatusCall::MarkError));
        Ok(())
    }

    async fn mark_invalid(&self, _workspace_id: ObjectId, provider: &str) -> EngineResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((provider.to_string(), StatusCall::MarkInvalid));
        Ok(())
    }

    async fn record_success(&self, _workspace_id: ObjectId, provider: &str) -> EngineResult<()> {
        self.consecutive.store(0, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((provider.to_string(), StatusCall::Success));
        Ok(())
    }
}

fn job(attempt: u32) -> serde_json::Value {
    let ws = ObjectId::new();
    let event = NotificationEvent::new(
        EventType::DeploymentSucceeded,
        serde_json::json!({"title": "v1.2.0"}),
        vec![Recipient {
            user_id: ObjectId::new(),
            workspace_id: ws,
        }],
    );
    serde_json::to_value(RetryJob {
        workspace_id: ws,
        notification: event,
        attempt,
    })
    .unwrap()
}

fn processor(
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    store: Arc<RecordingStatusStore>,
) -> RetryProcessor {
    RetryProcessor::new(
        adapters,
        store,
        Arc::new(RateLimiter::new(Arc::new(MemoryKvStore::new()))),
        30,
        3,
    )
}

#[tokio::test]
async fn successful_delivery_resets_integration_health() {
    let slack = ScriptedAdapter::new("slack", vec![]);
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![slack.clone()], store.clone());

    processor.handle(job(0)).await.unwrap();

    assert_eq!(slack.calls(), 1);
    assert_eq!(store.calls_for("slack"), vec![StatusCall::Success]);
}

#[tokio::test]
async fn transient_failure_requests_a_retry() {
    let slack = ScriptedAdapter::new(
        "slack",
        vec![SendOutcome::failed(
            "slack",
            SendFailure::Other("503 from provider".to_string()),
        )],
    );
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![slack.clone()], store.clone());

    let result = processor.handle(job(0)).await;
    assert!(matches!(result, Err(JobError::Retryable(_))));
    assert_eq!(
        store.calls_for("slack"),
        vec![StatusCall::Failure("503 from provider".to_string())]
    );
}

#[tokio::test]
async fn final_attempt_drops_instead_of_retrying() {
    let slack = ScriptedAdapter::new(
        "slack",
        vec![SendOutcome::failed(
            "slack",
            SendFailure::Other("timeout".to_string()),
        )],
    );
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![slack.clone()], store.clone());

    // attempt 2 of max 3: failure is terminal for the job but still
    // recorded against the integration.
    processor.handle(job(2)).await.unwrap();
    assert_eq!(store.calls_for("slack").len(), 1);
}

#[tokio::test]
async fn third_consecutive_failure_marks_the_integration_errored() {
    let store = Arc::new(RecordingStatusStore::default());
    for _ in 0..3 {
        let slack = ScriptedAdapter::new(
            "slack",
            vec![SendOutcome::failed(
                "slack",
                SendFailure::Other("timeout".to_string()),
            )],
        );
        let processor = processor(vec![slack], store.clone());
        let _ = processor.handle(job(0)).await;
    }

    let calls = store.calls_for("slack");
    assert_eq!(calls.last(), Some(&StatusCall::MarkError));
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, StatusCall::Failure(_)))
            .count(),
        3
    );
}

#[tokio::test]
async fn revoked_webhook_is_invalidated_and_not_retried() {
    let slack = ScriptedAdapter::new(
        "slack",
        vec![SendOutcome::failed("slack", SendFailure::Unauthorized)],
    );
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![slack.clone()], store.clone());

    processor.handle(job(0)).await.unwrap();
    assert_eq!(store.calls_for("slack"), vec![StatusCall::MarkInvalid]);
}

#[tokio::test]
async fn unconfigured_channel_is_not_a_failure() {
    let slack = ScriptedAdapter::new(
        "slack",
        vec![SendOutcome::failed("slack", SendFailure::Unavailable)],
    );
    let discord = ScriptedAdapter::new("discord", vec![]);
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![slack.clone(), discord.clone()], store.clone());

    processor.handle(job(0)).await.unwrap();

    assert!(store.calls_for("slack").is_empty());
    assert_eq!(store.calls_for("discord"), vec![StatusCall::Success]);
}

#[tokio::test]
async fn one_provider_failing_does_not_block_the_next() {
    let slack = ScriptedAdapter::new(
        "slack",
        vec![SendOutcome::failed(
            "slack",
            SendFailure::RateLimited {
                retry_after_secs: Some(30),
            },
        )],
    );
    let discord = ScriptedAdapter::new("discord", vec![]);
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![slack.clone(), discord.clone()], store.clone());

    let result = processor.handle(job(0)).await;
    assert!(matches!(result, Err(JobError::Retryable(_))));
    assert_eq!(discord.calls(), 1);
    assert_eq!(store.calls_for("discord"), vec![StatusCall::Success]);
}

#[tokio::test]
async fn malformed_payload_is_terminal() {
    let store = Arc::new(RecordingStatusStore::default());
    let processor = processor(vec![], store);
    let result = processor.handle(serde_json::json!({"nope": true})).await;
    assert!(matches!(result, Err(JobError::Terminal(_))));
}
