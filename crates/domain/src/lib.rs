//! Domain layer for the order service.
//!
//! This crate provides the business rules on top of the store:
//! - Catalog stock operations (conditional take, unbounded return)
//! - Promotion Evaluator for percentage-off codes
//! - Loyalty Ledger with earn and locked redeem
//! - Order Transaction Coordinator, which runs placement and cancellation
//!   as single units of work

pub mod catalog;
pub mod error;
pub mod loyalty;
pub mod order;
pub mod promotion;
mod unit_of_work;

pub use catalog::Catalog;
pub use error::DomainError;
pub use loyalty::{LoyaltyLedger, Redemption};
pub use order::{DraftLine, OrderCoordinator, OrderDraft};
pub use promotion::{Discount, PromotionEvaluator};
