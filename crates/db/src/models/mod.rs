pub mod member;
pub mod notification;
pub mod push_subscription;
pub mod webhook_integration;

pub use member::{ProjectMember, WorkspaceMember};
pub use notification::Notification;
pub use push_subscription::PushSubscription;
pub use webhook_integration::{IntegrationStatus, WebhookIntegration, WebhookProvider};
