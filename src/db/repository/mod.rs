pub mod context;
pub mod inference;
pub mod referral;
pub mod report;
pub mod review;
pub mod test;

pub use context::*;
pub use inference::*;
pub use referral::*;
pub use report::*;
pub use review::*;
pub use test::*;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DatabaseError;

// Stored-value parsing shared by the per-entity repositories. Timestamps are
// RFC 3339 strings, ids are canonical UUID strings.

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|_| DatabaseError::InvalidValue {
        field: field.into(),
        value: value.into(),
    })
}

pub(crate) fn parse_opt_uuid(field: &str, value: Option<String>) -> Result<Option<Uuid>, DatabaseError> {
    value.map(|v| parse_uuid(field, &v)).transpose()
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            field: field.into(),
            value: value.into(),
        })
}

pub(crate) fn parse_json(field: &str, value: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(value).map_err(|_| DatabaseError::InvalidValue {
        field: field.into(),
        value: value.into(),
    })
}
