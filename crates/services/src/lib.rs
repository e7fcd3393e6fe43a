pub mod channels;
pub mod dao;
pub mod kv;

pub use channels::{DiscordWebhookChannel, SlackWebhookChannel, WebPushChannel};
pub use dao::*;
pub use kv::RedisKvStore;
