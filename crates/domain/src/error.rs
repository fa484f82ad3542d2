//! Domain error types.

use common::{OrderStatus, ProductId};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
///
/// Every variant except [`DomainError::Store`] is a client error. Any of them
/// aborts the enclosing unit of work in full.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// The referenced entity belongs to another user.
    #[error("{entity} {id} belongs to another user")]
    Forbidden { entity: &'static str, id: i64 },

    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Insufficient loyalty points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    /// Unknown, inactive and out-of-window codes are indistinguishable.
    #[error("Invalid or expired promotion code")]
    InvalidOrExpiredCode,

    #[error("Invalid status transition: cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// A uniqueness rule rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An infrastructure failure in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DomainError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        DomainError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn forbidden(entity: &'static str, id: impl Into<i64>) -> Self {
        DomainError::Forbidden {
            entity,
            id: id.into(),
        }
    }

    /// Short stable label, used as a metric tag.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::NotFound { .. } => "not_found",
            DomainError::Forbidden { .. } => "forbidden",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::InsufficientPoints { .. } => "insufficient_points",
            DomainError::InvalidOrExpiredCode => "invalid_promotion",
            DomainError::InvalidStatusTransition { .. } => "invalid_transition",
            DomainError::Conflict(_) => "conflict",
            DomainError::Store(_) => "storage",
        }
    }
}
