pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{
    LoyaltyTransactionId, Money, OrderId, OrderLineId, OrderStatus, OrderType, ProductId,
    PromotionId, UserId,
};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    LoyaltyBalance, LoyaltyKind, LoyaltyTransaction, NewLoyaltyTransaction, NewOrder,
    NewOrderLine, NewProduct, NewPromotion, Order, OrderLine, Product, Promotion, StockUpdate,
};
pub use postgres::PostgresStore;
pub use store::{Store, Transaction};
