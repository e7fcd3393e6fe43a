pub mod events;
pub mod integrations;
pub mod interactions;
pub mod notifications;
pub mod preferences;
pub mod push;

use bson::oid::ObjectId;

use crate::error::ApiError;

pub(crate) fn parse_oid(s: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(s).map_err(|_| ApiError::BadRequest(format!("Invalid ObjectId: {s}")))
}
