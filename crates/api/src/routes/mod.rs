//! HTTP handlers, grouped by resource.

pub mod admin;
pub mod certificates;
pub mod enrollments;
pub mod health;
pub mod metrics;
pub mod progress;

use std::str::FromStr;

use common::AggregateId;

use crate::error::ApiError;

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}

/// Parses a typed identifier, naming the offending field on failure.
fn parse_id<T>(value: &str, field: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    value
        .trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}
