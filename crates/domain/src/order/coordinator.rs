//! Order Transaction Coordinator.
//!
//! Placing an order touches stock, promotions, the order tables and the
//! loyalty ledger. All of it happens in one unit of work: either every write
//! lands or none does, and the caller sees exactly one error.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, UserId};
use store::{NewOrder, NewOrderLine, Order, Store, Transaction};

use super::OrderDraft;
use crate::{DomainError, catalog, loyalty, promotion, unit_of_work};

/// Coordinates order placement, status changes and cancellation.
///
/// Every operation takes the authenticated user explicitly; the coordinator
/// never performs retries.
pub struct OrderCoordinator<S: Store> {
    store: S,
}

struct Placed {
    order: Order,
    points: i64,
}

impl<S: Store> OrderCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Places an order for `user_id`, optionally discounted by a promotion code.
    ///
    /// Stock for every line is taken, the promotion (if any) is applied to the
    /// line subtotal, the order and its lines are written, and one point per
    /// whole currency unit of the final total is credited. A bad promotion
    /// code fails the whole order rather than charging full price.
    #[tracing::instrument(skip(self, draft), fields(lines = draft.lines.len()))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        draft: OrderDraft,
        promotion_code: Option<&str>,
    ) -> Result<Order, DomainError> {
        let started = Instant::now();
        let result = self
            .place_order_at(user_id, &draft, promotion_code, Utc::now())
            .await;
        metrics::histogram!("order_placement_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Placed { order, points }) => {
                metrics::counter!("orders_placed_total").increment(1);
                metrics::counter!("loyalty_points_earned_total").increment(points.unsigned_abs());
                tracing::info!(
                    order_id = %order.id,
                    %user_id,
                    total = %order.total,
                    points,
                    "order placed"
                );
                Ok(order)
            }
            Err(err) => {
                metrics::counter!("order_placement_failures_total", "reason" => err.code())
                    .increment(1);
                tracing::warn!(%user_id, error = %err, "order placement failed");
                Err(err)
            }
        }
    }

    async fn place_order_at(
        &self,
        user_id: UserId,
        draft: &OrderDraft,
        promotion_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Placed, DomainError> {
        let subtotal = draft.validate()?;
        let promotion_code = promotion_code.map(str::trim).filter(|c| !c.is_empty());

        let mut tx = self.store.begin().await?;
        let outcome = place_in(&mut tx, user_id, draft, subtotal, promotion_code, now).await;
        unit_of_work::finish(tx, outcome).await
    }

    /// Loads one of the user's orders with its lines.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, DomainError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Order", order_id))?;
        if order.user_id != user_id {
            return Err(DomainError::forbidden("Order", order_id));
        }
        Ok(order)
    }

    /// Lists every order of the user, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, DomainError> {
        Ok(self.store.list_orders_for_user(user_id).await?)
    }

    /// Moves an order to `status` if the transition table allows it.
    ///
    /// Moving to `cancelled` goes through [`Self::cancel_order`] so the stock
    /// is always returned.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, DomainError> {
        if status == OrderStatus::Cancelled {
            return self.cancel_order(user_id, order_id).await;
        }

        let mut tx = self.store.begin().await?;
        let outcome = transition_in(&mut tx, user_id, order_id, status).await;
        let order = unit_of_work::finish(tx, outcome).await?;
        tracing::info!(%order_id, %status, "order status updated");
        Ok(order)
    }

    /// Cancels a pending order and returns every line's quantity to stock.
    ///
    /// Loyalty points earned by the order are kept. Cancelling an order that
    /// is already cancelled or completed fails and changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let mut tx = self.store.begin().await?;
        let outcome = cancel_in(&mut tx, user_id, order_id).await;
        let order = unit_of_work::finish(tx, outcome).await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, lines = order.lines.len(), "order cancelled");
        Ok(order)
    }
}

async fn place_in<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    draft: &OrderDraft,
    subtotal: Money,
    promotion_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Placed, DomainError> {
    for line in draft.lines_by_product() {
        catalog::take_stock(tx, line.product_id, line.quantity).await?;
    }

    let total = match promotion_code {
        Some(code) => promotion::apply_in(tx, code, subtotal, now).await?.final_total,
        None => subtotal,
    };

    let mut order = tx
        .insert_order(NewOrder {
            user_id,
            total,
            status: OrderStatus::Pending,
            order_type: draft.order_type,
            delivery_address: draft.address().map(str::to_owned),
        })
        .await?;
    for line in &draft.lines {
        let line = tx
            .insert_order_line(
                order.id,
                NewOrderLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                },
            )
            .await?;
        order.lines.push(line);
    }

    let points = loyalty::points_for(total);
    loyalty::earn_in(tx, user_id, order.id, points).await?;

    Ok(Placed { order, points })
}

async fn lock_owned_order<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
) -> Result<Order, DomainError> {
    let order = tx
        .get_order_for_update(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Order", order_id))?;
    if order.user_id != user_id {
        return Err(DomainError::forbidden("Order", order_id));
    }
    Ok(order)
}

async fn set_status<T: Transaction>(
    tx: &mut T,
    mut order: Order,
    status: OrderStatus,
) -> Result<Order, DomainError> {
    if !order.status.can_transition_to(status) {
        return Err(DomainError::InvalidStatusTransition {
            from: order.status,
            to: status,
        });
    }
    order.updated_at = tx
        .update_order_status(order.id, status)
        .await?
        .ok_or_else(|| DomainError::not_found("Order", order.id))?;
    order.status = status;
    Ok(order)
}

async fn transition_in<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
    status: OrderStatus,
) -> Result<Order, DomainError> {
    let order = lock_owned_order(tx, user_id, order_id).await?;
    set_status(tx, order, status).await
}

async fn cancel_in<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
) -> Result<Order, DomainError> {
    let order = lock_owned_order(tx, user_id, order_id).await?;
    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(DomainError::InvalidStatusTransition {
            from: order.status,
            to: OrderStatus::Cancelled,
        });
    }
    let mut lines: Vec<_> = order.lines.iter().collect();
    lines.sort_by_key(|line| line.product_id);
    for line in lines {
        catalog::return_stock(tx, line.product_id, line.quantity).await?;
    }
    set_status(tx, order, OrderStatus::Cancelled).await
}
