//! Order drafts as submitted by a customer, before anything is persisted.

use std::collections::HashSet;

use common::{Money, OrderType, ProductId};
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// One requested line. `unit_price` is the price quoted to the customer and
/// is what the order is charged, whatever the catalog says at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl DraftLine {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// An order as requested, prior to validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub order_type: OrderType,
    pub delivery_address: Option<String>,
    pub lines: Vec<DraftLine>,
}

impl OrderDraft {
    /// A pickup order with the given lines.
    pub fn pickup(lines: Vec<DraftLine>) -> Self {
        Self {
            order_type: OrderType::Pickup,
            delivery_address: None,
            lines,
        }
    }

    /// A delivery order to `address` with the given lines.
    pub fn delivery(address: impl Into<String>, lines: Vec<DraftLine>) -> Self {
        Self {
            order_type: OrderType::Delivery,
            delivery_address: Some(address.into()),
            lines,
        }
    }

    /// Checks the draft and returns its pre-discount total.
    pub fn validate(&self) -> Result<Money, DomainError> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("order must contain at least one line"));
        }
        if self.order_type.requires_address() && self.address().is_none() {
            return Err(DomainError::validation(
                "delivery orders require a delivery address",
            ));
        }

        let mut seen = HashSet::with_capacity(self.lines.len());
        let mut total: i64 = 0;
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be at least 1",
                    line.product_id
                )));
            }
            if line.unit_price.is_negative() {
                return Err(DomainError::validation(format!(
                    "unit price for product {} cannot be negative",
                    line.product_id
                )));
            }
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} is listed more than once",
                    line.product_id
                )));
            }
            total = line
                .unit_price
                .cents()
                .checked_mul(i64::from(line.quantity))
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or_else(|| DomainError::validation("order total is too large"))?;
        }
        Ok(Money::from_cents(total))
    }

    /// The lines ordered by product id.
    ///
    /// Stock rows are always locked in this order so that two orders over
    /// the same products cannot wait on each other.
    pub fn lines_by_product(&self) -> Vec<&DraftLine> {
        let mut lines: Vec<_> = self.lines.iter().collect();
        lines.sort_by_key(|line| line.product_id);
        lines
    }

    /// The trimmed delivery address, if a non-blank one was given.
    pub fn address(&self) -> Option<&str> {
        self.delivery_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product: i64, quantity: u32, cents: i64) -> DraftLine {
        DraftLine::new(ProductId::new(product), quantity, Money::from_cents(cents))
    }

    #[test]
    fn test_subtotal() {
        let draft = OrderDraft::pickup(vec![line(1, 2, 500), line(2, 1, 1000)]);
        assert_eq!(draft.validate().unwrap(), Money::from_cents(2000));
    }

    #[test]
    fn test_rejects_empty_and_zero_quantity() {
        assert!(matches!(
            OrderDraft::pickup(vec![]).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            OrderDraft::pickup(vec![line(1, 0, 500)]).validate(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_products() {
        let draft = OrderDraft::pickup(vec![line(1, 1, 500), line(1, 2, 500)]);
        let err = draft.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: product 1 is listed more than once"
        );
    }

    #[test]
    fn test_delivery_needs_address() {
        let draft = OrderDraft::delivery("   ", vec![line(1, 1, 500)]);
        assert!(draft.validate().is_err());

        let draft = OrderDraft::delivery(" 12 Grove St ", vec![line(1, 1, 500)]);
        assert!(draft.validate().is_ok());
        assert_eq!(draft.address(), Some("12 Grove St"));
    }

    #[test]
    fn test_rejects_negative_price_and_overflow() {
        assert!(
            OrderDraft::pickup(vec![line(1, 1, -1)])
                .validate()
                .is_err()
        );
        assert!(
            OrderDraft::pickup(vec![line(1, u32::MAX, i64::MAX / 2)])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_lines_by_product_ignores_submitted_order() {
        let draft = OrderDraft::pickup(vec![line(9, 1, 100), line(2, 1, 100), line(5, 1, 100)]);
        let ids: Vec<i64> = draft
            .lines_by_product()
            .iter()
            .map(|l| l.product_id.as_i64())
            .collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert_eq!(draft.lines[0].product_id, ProductId::new(9));
    }
}
