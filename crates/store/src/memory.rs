use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    LoyaltyBalance, LoyaltyTransaction, LoyaltyTransactionId, NewLoyaltyTransaction, NewOrder,
    NewOrderLine, NewProduct, NewPromotion, Order, OrderId, OrderLine, OrderLineId, OrderStatus,
    Product, ProductId, Promotion, PromotionId, Result, StockUpdate, StoreError, UserId,
    store::{Store, Transaction},
};

#[derive(Debug, Clone, Default)]
struct Sequences {
    product: i64,
    order: i64,
    order_line: i64,
    promotion: i64,
    loyalty: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    promotions: BTreeMap<PromotionId, Promotion>,
    balances: HashMap<UserId, LoyaltyBalance>,
    loyalty_log: Vec<LoyaltyTransaction>,
    sequences: Sequences,
}

impl MemoryState {
    fn find_promotion_by_code(&self, code: &str) -> Option<Promotion> {
        self.promotions.values().find(|p| p.code == code).cloned()
    }
}

/// In-memory store implementation for tests and local runs.
///
/// Every unit of work takes an exclusive lock on the whole dataset and
/// writes to a private copy that replaces the shared state on commit, so
/// concurrent transactions are fully serialized. Do not call the store's
/// read methods from the task that holds an open transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_loyalty_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every loyalty balance write fail with `Unavailable` until reset.
    pub fn set_fail_on_loyalty_write(&self, fail: bool) {
        self.fail_loyalty_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the number of loyalty log entries stored.
    pub async fn loyalty_transaction_count(&self) -> usize {
        self.state.lock().await.loyalty_log.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction {
            guard,
            working,
            fail_loyalty_writes: self.fail_loyalty_writes.load(Ordering::SeqCst),
        })
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let id = ProductId::new(next(&mut state.sequences.product));
        let product = Product {
            id,
            name: product.name,
            description: product.description,
            size: product.size,
            price: product.price,
            stock_quantity: product.stock_quantity,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: ProductId, product: NewProduct) -> Result<Option<Product>> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.products.get_mut(&id) else {
            return Ok(None);
        };
        existing.name = product.name;
        existing.description = product.description;
        existing.size = product.size;
        existing.price = product.price;
        existing.stock_quantity = product.stock_quantity;
        existing.updated_at = Utc::now();
        Ok(Some(existing.clone()))
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(&id) {
            return Ok(false);
        }
        let referenced = state
            .orders
            .values()
            .flat_map(|o| o.lines.iter())
            .any(|l| l.product_id == id);
        if referenced {
            return Err(StoreError::Conflict(format!(
                "product {id} is referenced by existing orders"
            )));
        }
        state.products.remove(&id);
        Ok(true)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let state = self.state.lock().await;
        let mut products: Vec<_> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn create_promotion(&self, promotion: NewPromotion) -> Result<Promotion> {
        let mut state = self.state.lock().await;
        if state.find_promotion_by_code(&promotion.code).is_some() {
            return Err(StoreError::Conflict(format!(
                "promotion code {} already exists",
                promotion.code
            )));
        }
        let now = Utc::now();
        let id = PromotionId::new(next(&mut state.sequences.promotion));
        let promotion = Promotion {
            id,
            code: promotion.code,
            description: promotion.description,
            discount_percent: promotion.discount_percent,
            start_date: promotion.start_date,
            end_date: promotion.end_date,
            is_active: promotion.is_active,
            created_at: now,
            updated_at: now,
        };
        state.promotions.insert(id, promotion.clone());
        Ok(promotion)
    }

    async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: NewPromotion,
    ) -> Result<Option<Promotion>> {
        let mut state = self.state.lock().await;
        let taken = state
            .promotions
            .values()
            .any(|p| p.id != id && p.code == promotion.code);
        let Some(existing) = state.promotions.get_mut(&id) else {
            return Ok(None);
        };
        if taken {
            return Err(StoreError::Conflict(format!(
                "promotion code {} already exists",
                promotion.code
            )));
        }
        existing.code = promotion.code;
        existing.description = promotion.description;
        existing.discount_percent = promotion.discount_percent;
        existing.start_date = promotion.start_date;
        existing.end_date = promotion.end_date;
        existing.is_active = promotion.is_active;
        existing.updated_at = Utc::now();
        Ok(Some(existing.clone()))
    }

    async fn delete_promotion(&self, id: PromotionId) -> Result<bool> {
        Ok(self.state.lock().await.promotions.remove(&id).is_some())
    }

    async fn get_promotion(&self, id: PromotionId) -> Result<Option<Promotion>> {
        Ok(self.state.lock().await.promotions.get(&id).cloned())
    }

    async fn find_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>> {
        Ok(self.state.lock().await.find_promotion_by_code(code))
    }

    async fn list_active_promotions(&self, now: DateTime<Utc>) -> Result<Vec<Promotion>> {
        let state = self.state.lock().await;
        let mut promotions: Vec<_> = state
            .promotions
            .values()
            .filter(|p| p.is_redeemable_at(now))
            .cloned()
            .collect();
        promotions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(promotions)
    }

    async fn get_loyalty_balance(&self, user_id: UserId) -> Result<Option<LoyaltyBalance>> {
        Ok(self.state.lock().await.balances.get(&user_id).cloned())
    }

    async fn list_loyalty_transactions(&self, user_id: UserId) -> Result<Vec<LoyaltyTransaction>> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .loyalty_log
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }
}

/// Unit of work over an [`InMemoryStore`].
///
/// Holds the store lock for its whole lifetime.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_loyalty_writes: bool,
}

impl MemoryTransaction {
    fn check_loyalty_write(&self) -> Result<()> {
        if self.fail_loyalty_writes {
            return Err(StoreError::Unavailable(
                "loyalty balance write rejected".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn decrement_stock(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<StockUpdate> {
        let Some(product) = self.working.products.get_mut(&product_id) else {
            return Ok(StockUpdate::Missing);
        };
        if product.stock_quantity < quantity {
            return Ok(StockUpdate::Insufficient {
                available: product.stock_quantity,
            });
        }
        product.stock_quantity -= quantity;
        product.updated_at = Utc::now();
        Ok(StockUpdate::Applied {
            remaining: product.stock_quantity,
        })
    }

    async fn increment_stock(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<u32>> {
        let Some(product) = self.working.products.get_mut(&product_id) else {
            return Ok(None);
        };
        product.stock_quantity = product
            .stock_quantity
            .checked_add(quantity)
            .ok_or_else(|| StoreError::InvalidData(format!("stock overflow for {product_id}")))?;
        product.updated_at = Utc::now();
        Ok(Some(product.stock_quantity))
    }

    async fn find_promotion_by_code(&mut self, code: &str) -> Result<Option<Promotion>> {
        Ok(self.working.find_promotion_by_code(code))
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let now = Utc::now();
        let id = OrderId::new(next(&mut self.working.sequences.order));
        let order = Order {
            id,
            user_id: order.user_id,
            total: order.total,
            status: order.status,
            order_type: order.order_type,
            delivery_address: order.delivery_address,
            created_at: now,
            updated_at: now,
            lines: Vec::new(),
        };
        self.working.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn insert_order_line(
        &mut self,
        order_id: OrderId,
        line: NewOrderLine,
    ) -> Result<OrderLine> {
        if !self.working.products.contains_key(&line.product_id) {
            return Err(StoreError::InvalidData(format!(
                "order line references unknown product {}",
                line.product_id
            )));
        }
        let id = OrderLineId::new(next(&mut self.working.sequences.order_line));
        let order = self.working.orders.get_mut(&order_id).ok_or_else(|| {
            StoreError::InvalidData(format!("order line references unknown order {order_id}"))
        })?;
        if order.lines.iter().any(|l| l.product_id == line.product_id) {
            return Err(StoreError::Conflict(format!(
                "order {order_id} already has a line for product {}",
                line.product_id
            )));
        }
        let line = OrderLine {
            id,
            order_id,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
        };
        order.lines.push(line.clone());
        Ok(line)
    }

    async fn get_order_for_update(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(order) = self.working.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        let now = Utc::now();
        order.status = status;
        order.updated_at = now;
        Ok(Some(now))
    }

    async fn credit_loyalty_points(&mut self, user_id: UserId, points: i64) -> Result<i64> {
        self.check_loyalty_write()?;
        let now = Utc::now();
        let balance = self
            .working
            .balances
            .entry(user_id)
            .or_insert_with(|| LoyaltyBalance {
                user_id,
                points: 0,
                updated_at: now,
            });
        balance.points += points;
        balance.updated_at = now;
        Ok(balance.points)
    }

    async fn lock_loyalty_balance(&mut self, user_id: UserId) -> Result<Option<i64>> {
        Ok(self.working.balances.get(&user_id).map(|b| b.points))
    }

    async fn debit_loyalty_points(&mut self, user_id: UserId, points: i64) -> Result<i64> {
        self.check_loyalty_write()?;
        let balance = self.working.balances.get_mut(&user_id).ok_or_else(|| {
            StoreError::InvalidData(format!("no loyalty balance for user {user_id}"))
        })?;
        if balance.points < points {
            return Err(StoreError::InvalidData(format!(
                "loyalty balance for user {user_id} would go negative"
            )));
        }
        balance.points -= points;
        balance.updated_at = Utc::now();
        Ok(balance.points)
    }

    async fn append_loyalty_transaction(
        &mut self,
        entry: NewLoyaltyTransaction,
    ) -> Result<LoyaltyTransaction> {
        let id = LoyaltyTransactionId::new(next(&mut self.working.sequences.loyalty));
        let entry = LoyaltyTransaction {
            id,
            user_id: entry.user_id,
            order_id: entry.order_id,
            points: entry.points,
            kind: entry.kind,
            created_at: Utc::now(),
        };
        self.working.loyalty_log.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
