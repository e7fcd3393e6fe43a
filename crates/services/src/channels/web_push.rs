use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, URL_SAFE_NO_PAD,
    VapidSignatureBuilder, WebPushClient, WebPushError, WebPushMessageBuilder,
};

use beacon_engine::channel::{PushChannel, PushMessage, SendFailure, SendOutcome};
use beacon_engine::event::Recipient;

use crate::dao::PushSubscriptionDao;

const CHANNEL_NAME: &str = "web_push";

/// Web Push delivery across all of a user's registered devices. Built
/// only when VAPID keys are configured; otherwise the engine runs with
/// the push channel absent.
pub struct WebPushChannel {
    subscriptions: Arc<PushSubscriptionDao>,
    client: IsahcWebPushClient,
    vapid_private_key: String,
    vapid_subject: String,
}

impl WebPushChannel {
    pub fn new(
        subscriptions: Arc<PushSubscriptionDao>,
        vapid_private_key: String,
        vapid_subject: String,
    ) -> Result<Self, WebPushError> {
        Ok(Self {
            subscriptions,
            client: IsahcWebPushClient::new()?,
            vapid_private_key,
            vapid_subject,
        })
    }

    async fn send_to_subscription(
        &self,
        info: &SubscriptionInfo,
        payload: &[u8],
    ) -> Result<(), WebPushError> {
        let mut signature = VapidSignatureBuilder::from_base64(
            &self.vapid_private_key,
            URL_SAFE_NO_PAD,
            info,
        )?;
        signature.add_claim("sub", self.vapid_subject.as_str());

        let mut builder = WebPushMessageBuilder::new(info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature.build()?);

        self.client.send(builder.build()?).await
    }
}

#[async_trait]
impl PushChannel for WebPushChannel {
    async fn send(&self, recipient: &Recipient, message: &PushMessage) -> SendOutcome {
        let subscriptions = match self.subscriptions.list_for_user(recipient.user_id).await {
            Ok(subscriptions) => subscriptions,
            Err(error) => {
                warn!(user_id = %recipient.user_id, %error, "Failed to load push subscriptions");
                return SendOutcome::failed(CHANNEL_NAME, SendFailure::Other(error.to_string()));
            }
        };
        if subscriptions.is_empty() {
            return SendOutcome::failed(CHANNEL_NAME, SendFailure::Unavailable);
        }

        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(error) => {
                return SendOutcome::failed(CHANNEL_NAME, SendFailure::Other(error.to_string()));
            }
        };

        let mut delivered = 0usize;
        let mut last_failure = None;
        for subscription in subscriptions {
            let info = SubscriptionInfo::new(
                subscription.endpoint.clone(),
                subscription.p256dh.clone(),
                subscription.auth.clone(),
            );
            match self.send_to_subscription(&info, &payload).await {
                Ok(()) => delivered += 1,
                Err(WebPushError::EndpointNotValid) | Err(WebPushError::EndpointNotFound) => {
                    // The push service says this device is gone.
                    debug!(endpoint = %subscription.endpoint, "Removing stale push subscription");
                    if let Err(error) = self
                        .subscriptions
                        .remove_stale(&subscription.endpoint)
                        .await
                    {
                        warn!(endpoint = %subscription.endpoint, %error, "Failed to remove stale subscription");
                    }
                    last_failure = Some(SendFailure::NotFound);
                }
                Err(WebPushError::Unauthorized) => {
                    last_failure = Some(SendFailure::Unauthorized);
                }
                Err(error) => {
                    warn!(endpoint = %subscription.endpoint, %error, "Web push delivery failed");
                    last_failure = Some(SendFailure::Other(error.to_string()));
                }
            }
        }

        if delivered > 0 {
            SendOutcome::ok(CHANNEL_NAME)
        } else {
            SendOutcome::failed(
                CHANNEL_NAME,
                last_failure.unwrap_or(SendFailure::Unavailable),
            )
        }
    }
}
