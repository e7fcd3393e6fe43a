pub mod batch;
pub mod channel;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod preferences;
pub mod queue;
pub mod quiet_hours;
pub mod rate_limit;
pub mod recipients;
pub mod retry;
pub mod store;
pub mod sweep;

pub use error::{EngineError, EngineResult};
