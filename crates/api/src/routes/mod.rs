//! HTTP handlers.

pub mod health;
pub mod loyalty;
pub mod metrics;
pub mod orders;
pub mod products;
pub mod promotions;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use domain::DomainError;

use crate::error::ApiError;

/// Runs `work` under `deadline`.
///
/// When the deadline passes the future is dropped, which rolls back any unit
/// of work it had open.
pub(crate) async fn bounded<T>(
    deadline: Duration,
    work: impl Future<Output = Result<T, DomainError>>,
) -> Result<T, ApiError> {
    tokio::time::timeout(deadline, work)
        .await
        .map_err(|_| ApiError::Timeout)?
        .map_err(ApiError::from)
}

/// Parses a path segment into a typed id.
pub(crate) fn parse_id<T: FromStr>(entity: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {entity} id: {raw}")))
}
