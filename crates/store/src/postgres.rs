use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Row, postgres::PgRow};
use tracing::{info, instrument, warn};

use crate::{
    LoyaltyBalance, LoyaltyKind, LoyaltyTransaction, LoyaltyTransactionId, Money,
    NewLoyaltyTransaction, NewOrder, NewOrderLine, NewProduct, NewPromotion, Order, OrderId,
    OrderLine, OrderLineId, OrderStatus, OrderType, Product, ProductId, Promotion, PromotionId,
    Result, StockUpdate, StoreError, UserId,
    store::{Store, Transaction},
};

const ORDER_COLUMNS: &str =
    "id, user_id, total_cents, status, order_type, delivery_address, created_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `url`. Acquiring a connection fails after
    /// `acquire_timeout` instead of waiting indefinitely.
    #[instrument(skip(url))]
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> Result<Self> {
        info!("Connecting to database...");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        info!("Database connection pool created");
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }
}

fn invalid(err: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidData(err.to_string())
}

fn to_db_quantity(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| invalid(format!("quantity {value} exceeds storage range")))
}

fn from_db_quantity(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| invalid(format!("negative quantity {value} in storage")))
}

/// Maps unique-constraint violations to `Conflict`.
fn conflict_or_database(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(message());
    }
    StoreError::Database(err)
}

/// Maps foreign-key violations to `Conflict`.
fn referenced_or_database(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_foreign_key_violation()
    {
        return StoreError::Conflict(message());
    }
    StoreError::Database(err)
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        size: row.try_get("size")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock_quantity: from_db_quantity(row.try_get("stock_quantity")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order_header(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let order_type: String = row.try_get("order_type")?;
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        total: Money::from_cents(row.try_get("total_cents")?),
        status: status.parse::<OrderStatus>().map_err(invalid)?,
        order_type: order_type.parse::<OrderType>().map_err(invalid)?,
        delivery_address: row.try_get("delivery_address")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        lines: Vec::new(),
    })
}

fn row_to_order_line(row: PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        id: OrderLineId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
    })
}

fn row_to_promotion(row: PgRow) -> Result<Promotion> {
    let percent: i16 = row.try_get("discount_percent")?;
    Ok(Promotion {
        id: PromotionId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        discount_percent: u8::try_from(percent)
            .map_err(|_| invalid(format!("discount percent {percent} out of range")))?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_loyalty_transaction(row: PgRow) -> Result<LoyaltyTransaction> {
    let kind: String = row.try_get("kind")?;
    Ok(LoyaltyTransaction {
        id: LoyaltyTransactionId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        points: row.try_get("points")?,
        kind: kind.parse::<LoyaltyKind>().map_err(invalid)?,
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_lines(conn: &mut PgConnection, order_ids: &[i64]) -> Result<Vec<OrderLine>> {
    let rows = sqlx::query(
        r#"
        SELECT id, order_id, product_id, quantity, unit_price_cents
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY id ASC
        "#,
    )
    .bind(order_ids)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(row_to_order_line).collect()
}

async fn fetch_order(conn: &mut PgConnection, id: OrderId, lock: bool) -> Result<Option<Order>> {
    let sql = if lock {
        format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1")
    };
    let row = sqlx::query(&sql)
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut order = row_to_order_header(row)?;
    order.lines = fetch_lines(conn, &[id.as_i64()]).await?;
    Ok(Some(order))
}

async fn fetch_promotion_by_code(conn: &mut PgConnection, code: &str) -> Result<Option<Promotion>> {
    let row = sqlx::query(
        r#"
        SELECT id, code, description, discount_percent, start_date, end_date, is_active,
               created_at, updated_at
        FROM promotions
        WHERE code = $1
        "#,
    )
    .bind(code)
    .fetch_optional(conn)
    .await?;

    row.map(row_to_promotion).transpose()
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(
            r#"
            INSERT INTO products (name, description, size, price_cents, stock_quantity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, description, size, price_cents, stock_quantity, created_at, updated_at
            "#,
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.size)
        .bind(product.price.cents())
        .bind(to_db_quantity(product.stock_quantity)?)
        .fetch_one(&self.pool)
        .await?;

        row_to_product(row)
    }

    async fn update_product(&self, id: ProductId, product: NewProduct) -> Result<Option<Product>> {
        // Absolute write: stock taken by orders since the caller's read is lost.
        // Relative changes go through `increment_stock`.
        let row = sqlx::query(
            r#"
            UPDATE products
            SET name = $1, description = $2, size = $3, price_cents = $4,
                stock_quantity = $5, updated_at = NOW()
            WHERE id = $6
            RETURNING id, name, description, size, price_cents, stock_quantity, created_at, updated_at
            "#,
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.size)
        .bind(product.price.cents())
        .bind(to_db_quantity(product.stock_quantity)?)
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                referenced_or_database(e, || format!("product {id} is referenced by existing orders"))
            });
        match deleted {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(err) => {
                warn!(product_id = %id, error = %err, "product delete rejected");
                Err(err)
            }
        }
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, size, price_cents, stock_quantity, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, size, price_cents, stock_quantity, created_at, updated_at
            FROM products
            ORDER BY name ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_product).collect()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id, false).await
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_i64())
            .fetch_all(&mut *conn)
            .await?;

        let mut orders = rows
            .into_iter()
            .map(row_to_order_header)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id.as_i64()).collect();
        let mut lines_by_order: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
        for line in fetch_lines(&mut conn, &ids).await? {
            lines_by_order.entry(line.order_id).or_default().push(line);
        }
        for order in &mut orders {
            order.lines = lines_by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn create_promotion(&self, promotion: NewPromotion) -> Result<Promotion> {
        let code = promotion.code.clone();
        let row = sqlx::query(
            r#"
            INSERT INTO promotions (code, description, discount_percent, start_date, end_date, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, code, description, discount_percent, start_date, end_date, is_active,
                      created_at, updated_at
            "#,
        )
        .bind(&promotion.code)
        .bind(&promotion.description)
        .bind(i16::from(promotion.discount_percent))
        .bind(promotion.start_date)
        .bind(promotion.end_date)
        .bind(promotion.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or_database(e, || format!("promotion code {code} already exists")))?;

        row_to_promotion(row)
    }

    async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: NewPromotion,
    ) -> Result<Option<Promotion>> {
        let code = promotion.code.clone();
        let row = sqlx::query(
            r#"
            UPDATE promotions
            SET code = $1, description = $2, discount_percent = $3, start_date = $4,
                end_date = $5, is_active = $6, updated_at = NOW()
            WHERE id = $7
            RETURNING id, code, description, discount_percent, start_date, end_date, is_active,
                      created_at, updated_at
            "#,
        )
        .bind(&promotion.code)
        .bind(&promotion.description)
        .bind(i16::from(promotion.discount_percent))
        .bind(promotion.start_date)
        .bind(promotion.end_date)
        .bind(promotion.is_active)
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_or_database(e, || format!("promotion code {code} already exists")))?;

        row.map(row_to_promotion).transpose()
    }

    async fn delete_promotion(&self, id: PromotionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM promotions WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_promotion(&self, id: PromotionId) -> Result<Option<Promotion>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, description, discount_percent, start_date, end_date, is_active,
                   created_at, updated_at
            FROM promotions
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_promotion).transpose()
    }

    async fn find_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>> {
        let mut conn = self.pool.acquire().await?;
        fetch_promotion_by_code(&mut conn, code).await
    }

    async fn list_active_promotions(&self, now: DateTime<Utc>) -> Result<Vec<Promotion>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, description, discount_percent, start_date, end_date, is_active,
                   created_at, updated_at
            FROM promotions
            WHERE is_active = TRUE AND start_date <= $1 AND end_date >= $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_promotion).collect()
    }

    async fn get_loyalty_balance(&self, user_id: UserId) -> Result<Option<LoyaltyBalance>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, points, updated_at
            FROM loyalty_points
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(LoyaltyBalance {
                user_id: UserId::new(row.try_get("user_id")?),
                points: row.try_get("points")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn list_loyalty_transactions(&self, user_id: UserId) -> Result<Vec<LoyaltyTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, order_id, points, kind, created_at
            FROM loyalty_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_loyalty_transaction).collect()
    }
}

/// Unit of work over a [`PostgresStore`], backed by a database transaction.
///
/// Dropping it without committing rolls the database transaction back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn decrement_stock(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<StockUpdate> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $1, updated_at = NOW()
            WHERE id = $2 AND stock_quantity >= $1
            RETURNING stock_quantity
            "#,
        )
        .bind(to_db_quantity(quantity)?)
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(StockUpdate::Applied {
                remaining: from_db_quantity(remaining)?,
            });
        }

        // No row matched: tell a short product apart from a missing one.
        let available: Option<i32> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
                .bind(product_id.as_i64())
                .fetch_optional(&mut *self.tx)
                .await?;

        match available {
            Some(available) => Ok(StockUpdate::Insufficient {
                available: from_db_quantity(available)?,
            }),
            None => Ok(StockUpdate::Missing),
        }
    }

    async fn increment_stock(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<u32>> {
        let stock: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $1, updated_at = NOW()
            WHERE id = $2
            RETURNING stock_quantity
            "#,
        )
        .bind(to_db_quantity(quantity)?)
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        stock.map(from_db_quantity).transpose()
    }

    async fn find_promotion_by_code(&mut self, code: &str) -> Result<Option<Promotion>> {
        fetch_promotion_by_code(&mut self.tx, code).await
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let sql = format!(
            "INSERT INTO orders (user_id, total_cents, status, order_type, delivery_address) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(order.user_id.as_i64())
            .bind(order.total.cents())
            .bind(order.status.as_str())
            .bind(order.order_type.as_str())
            .bind(&order.delivery_address)
            .fetch_one(&mut *self.tx)
            .await?;

        row_to_order_header(row)
    }

    async fn insert_order_line(
        &mut self,
        order_id: OrderId,
        line: NewOrderLine,
    ) -> Result<OrderLine> {
        let product_id = line.product_id;
        let row = sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, unit_price_cents)
            VALUES ($1, $2, $3, $4)
            RETURNING id, order_id, product_id, quantity, unit_price_cents
            "#,
        )
        .bind(order_id.as_i64())
        .bind(product_id.as_i64())
        .bind(to_db_quantity(line.quantity)?)
        .bind(line.unit_price.cents())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            conflict_or_database(e, || {
                format!("order {order_id} already has a line for product {product_id}")
            })
        })?;

        row_to_order_line(row)
    }

    async fn get_order_for_update(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        fetch_order(&mut self.tx, order_id, true).await
    }

    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<DateTime<Utc>>> {
        let updated_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(order_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(updated_at)
    }

    async fn credit_loyalty_points(&mut self, user_id: UserId, points: i64) -> Result<i64> {
        let balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO loyalty_points (user_id, points)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET points = loyalty_points.points + EXCLUDED.points,
                updated_at = NOW()
            RETURNING points
            "#,
        )
        .bind(user_id.as_i64())
        .bind(points)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(balance)
    }

    async fn lock_loyalty_balance(&mut self, user_id: UserId) -> Result<Option<i64>> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT points FROM loyalty_points WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.as_i64())
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(balance)
    }

    async fn debit_loyalty_points(&mut self, user_id: UserId, points: i64) -> Result<i64> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE loyalty_points
            SET points = points - $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING points
            "#,
        )
        .bind(user_id.as_i64())
        .bind(points)
        .fetch_optional(&mut *self.tx)
        .await?;

        balance.ok_or_else(|| invalid(format!("no loyalty balance for user {user_id}")))
    }

    async fn append_loyalty_transaction(
        &mut self,
        entry: NewLoyaltyTransaction,
    ) -> Result<LoyaltyTransaction> {
        let row = sqlx::query(
            r#"
            INSERT INTO loyalty_transactions (user_id, order_id, points, kind)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, order_id, points, kind, created_at
            "#,
        )
        .bind(entry.user_id.as_i64())
        .bind(entry.order_id.as_i64())
        .bind(entry.points)
        .bind(entry.kind.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_loyalty_transaction(row)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
