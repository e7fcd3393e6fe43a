pub mod base;
pub mod integration;
pub mod member;
pub mod notification;
pub mod preference;
pub mod push_subscription;

pub use base::{BaseDao, DaoError, DaoResult, PaginatedResult, PaginationParams};
pub use integration::IntegrationDao;
pub use member::MemberDao;
pub use notification::NotificationDao;
pub use preference::PreferenceDao;
pub use push_subscription::PushSubscriptionDao;
