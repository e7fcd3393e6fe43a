pub mod discord;
pub mod format;
pub mod slack;
pub mod web_push;

pub use discord::DiscordWebhookChannel;
pub use slack::SlackWebhookChannel;
pub use web_push::WebPushChannel;

use std::time::Duration;

use beacon_engine::channel::SendFailure;

/// HTTP status to delivery-failure mapping shared by the webhook
/// adapters. 401/403 and 404/410 are the statuses providers use for
/// revoked or deleted webhooks.
pub(crate) fn failure_for_status(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
) -> SendFailure {
    match status.as_u16() {
        401 | 403 => SendFailure::Unauthorized,
        404 | 410 => SendFailure::NotFound,
        429 => SendFailure::RateLimited {
            retry_after_secs: retry_after.map(|d| d.as_secs()),
        },
        code => SendFailure::Other(format!("unexpected status {code}")),
    }
}

pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_statuses_invalidate_the_webhook() {
        for code in [401u16, 403, 404, 410] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            assert!(failure_for_status(status, None).invalidates_webhook());
        }
        let server_error = reqwest::StatusCode::from_u16(500).unwrap();
        assert!(!failure_for_status(server_error, None).invalidates_webhook());
    }

    #[test]
    fn throttling_carries_the_providers_delay() {
        let status = reqwest::StatusCode::from_u16(429).unwrap();
        assert_eq!(
            failure_for_status(status, Some(Duration::from_secs(30))),
            SendFailure::RateLimited {
                retry_after_secs: Some(30)
            }
        );
    }
}
