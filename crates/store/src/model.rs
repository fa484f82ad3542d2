//! Records persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    LoyaltyTransactionId, Money, OrderId, OrderLineId, OrderStatus, OrderType, ProductId,
    PromotionId, UserId,
};

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub size: String,
    pub price: Money,
    /// Never negative; only the order path and restocks change it.
    pub stock_quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating or replacing a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub size: String,
    pub price: Money,
    pub stock_quantity: u32,
}

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockUpdate {
    /// The decrement was applied; `remaining` is the post-update stock.
    Applied { remaining: u32 },
    /// The product exists but holds less than was requested.
    Insufficient { available: u32 },
    /// No product with that id.
    Missing,
}

/// A persisted order header with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub total: Money,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub delivery_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Sum of `quantity * unit_price` over all lines, before any discount.
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(OrderLine::line_total).sum()
    }
}

/// One product line of an order; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price captured when the order was placed.
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Header fields for inserting an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub total: Money,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub delivery_address: Option<String>,
}

/// Fields for inserting an order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// A percentage-off promotion code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub code: String,
    pub description: String,
    /// Whole percent in `0..=100`.
    pub discount_percent: u8,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Promotion {
    /// Returns true if the promotion is active and `now` lies inside
    /// `[start_date, end_date]`.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }
}

/// Fields for creating a promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPromotion {
    pub code: String,
    pub description: String,
    pub discount_percent: u8,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
}

/// Materialized loyalty balance for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyBalance {
    pub user_id: UserId,
    pub points: i64,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a loyalty transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoyaltyKind {
    Earn,
    Redeem,
}

impl LoyaltyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyKind::Earn => "earn",
            LoyaltyKind::Redeem => "redeem",
        }
    }

    /// Signed effect of `points` of this kind on a balance.
    pub fn signed(&self, points: i64) -> i64 {
        match self {
            LoyaltyKind::Earn => points,
            LoyaltyKind::Redeem => -points,
        }
    }
}

impl std::fmt::Display for LoyaltyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoyaltyKind {
    type Err = common::ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "earn" => Ok(LoyaltyKind::Earn),
            "redeem" => Ok(LoyaltyKind::Redeem),
            other => Err(common::ParseEnumError {
                kind: "loyalty transaction kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Append-only loyalty log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyTransaction {
    pub id: LoyaltyTransactionId,
    pub user_id: UserId,
    pub order_id: OrderId,
    /// Always non-negative; `kind` carries the direction.
    pub points: i64,
    pub kind: LoyaltyKind,
    pub created_at: DateTime<Utc>,
}

/// Fields for appending a loyalty transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoyaltyTransaction {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub points: i64,
    pub kind: LoyaltyKind,
}
