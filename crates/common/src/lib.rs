//! Shared types used by every layer of the order service.

pub mod money;
pub mod order;
pub mod types;

pub use money::Money;
pub use order::{OrderStatus, OrderType, ParseEnumError};
pub use types::{LoyaltyTransactionId, OrderId, OrderLineId, ProductId, PromotionId, UserId};
