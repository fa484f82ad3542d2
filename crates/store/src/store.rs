use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    LoyaltyBalance, LoyaltyTransaction, NewLoyaltyTransaction, NewOrder, NewOrderLine, NewProduct,
    NewPromotion, Order, OrderId, OrderLine, OrderStatus, Product, ProductId, Promotion,
    PromotionId, Result, StockUpdate, UserId,
};

/// Core trait for store implementations.
///
/// Point reads and single-statement writes run directly against the store.
/// Anything that must be all-or-nothing runs inside a [`Transaction`]
/// obtained from [`Store::begin`]. All implementations must be thread-safe.
#[async_trait]
pub trait Store: Send + Sync {
    /// The unit-of-work type handed out by [`Store::begin`].
    type Tx: Transaction;

    /// Starts a new unit of work.
    ///
    /// Nothing written through the returned transaction is visible to other
    /// callers until [`Transaction::commit`] succeeds. Dropping it without
    /// committing discards every write.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn create_product(&self, product: NewProduct) -> Result<Product>;

    /// Replaces every mutable field of a product. Returns None if absent.
    ///
    /// `stock_quantity` is written as an absolute value: decrements committed
    /// after the caller last read the product are overwritten.
    async fn update_product(&self, id: ProductId, product: NewProduct) -> Result<Option<Product>>;

    /// Deletes a product. Returns false if absent; fails with `Conflict` if
    /// an order line references it.
    async fn delete_product(&self, id: ProductId) -> Result<bool>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Lists all products ordered by name.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Loads an order header joined with its lines.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists every order of a user with lines, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Creates a promotion. Fails with `Conflict` if the code is taken.
    async fn create_promotion(&self, promotion: NewPromotion) -> Result<Promotion>;

    /// Replaces every field of a promotion. Returns None if absent; fails
    /// with `Conflict` if the new code belongs to another promotion.
    async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: NewPromotion,
    ) -> Result<Option<Promotion>>;

    /// Deletes a promotion. Returns false if absent.
    async fn delete_promotion(&self, id: PromotionId) -> Result<bool>;

    async fn get_promotion(&self, id: PromotionId) -> Result<Option<Promotion>>;

    /// Looks up a promotion by its exact code, regardless of its window.
    async fn find_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>>;

    /// Lists promotions that are active and whose window contains `now`.
    async fn list_active_promotions(&self, now: DateTime<Utc>) -> Result<Vec<Promotion>>;

    async fn get_loyalty_balance(&self, user_id: UserId) -> Result<Option<LoyaltyBalance>>;

    /// Lists a user's loyalty log, newest first.
    async fn list_loyalty_transactions(&self, user_id: UserId) -> Result<Vec<LoyaltyTransaction>>;
}

/// An atomic multi-statement unit of work.
#[async_trait]
pub trait Transaction: Send {
    /// Decrements stock by `quantity` only if at least that much is held.
    ///
    /// The check and the write are a single storage-level operation.
    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32)
    -> Result<StockUpdate>;

    /// Adds `quantity` to a product's stock, with no upper bound.
    ///
    /// Returns the new stock level, or None if the product does not exist.
    async fn increment_stock(&mut self, product_id: ProductId, quantity: u32)
    -> Result<Option<u32>>;

    /// Looks up a promotion by its exact code, regardless of its window.
    async fn find_promotion_by_code(&mut self, code: &str) -> Result<Option<Promotion>>;

    /// Inserts an order header and returns it with an empty line list.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    async fn insert_order_line(&mut self, order_id: OrderId, line: NewOrderLine)
    -> Result<OrderLine>;

    /// Loads an order with its lines and locks the header row until the
    /// unit of work ends.
    async fn get_order_for_update(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    /// Overwrites an order's status. Returns the new `updated_at`, or None if
    /// the order does not exist.
    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Adds points to a user's balance, creating the row on first use.
    /// Returns the new balance.
    async fn credit_loyalty_points(&mut self, user_id: UserId, points: i64) -> Result<i64>;

    /// Reads a user's balance and locks the row until the unit of work ends.
    /// Returns None if the user has no balance row yet.
    async fn lock_loyalty_balance(&mut self, user_id: UserId) -> Result<Option<i64>>;

    /// Subtracts points from a balance locked by [`Self::lock_loyalty_balance`].
    /// Returns the new balance.
    async fn debit_loyalty_points(&mut self, user_id: UserId, points: i64) -> Result<i64>;

    async fn append_loyalty_transaction(
        &mut self,
        entry: NewLoyaltyTransaction,
    ) -> Result<LoyaltyTransaction>;

    /// Makes every write of this unit of work visible atomically.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this unit of work.
    async fn rollback(self) -> Result<()>;
}
