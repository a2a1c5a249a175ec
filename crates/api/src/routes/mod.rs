//! HTTP route handlers.

pub mod bookings;
pub mod bus;
pub mod health;
pub mod seats;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID-backed identifier from a path or body field.
pub(crate) fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {what} '{raw}': {e}")))
}
