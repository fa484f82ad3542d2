//! Loyalty Ledger: per-user point balance backed by an append-only log.
//!
//! The materialized balance always equals the sum of `earn` entries minus the
//! sum of `redeem` entries, because both are written in the same unit of work.

use common::{Money, OrderId, UserId};
use serde::Serialize;
use store::{LoyaltyKind, LoyaltyTransaction, NewLoyaltyTransaction, Store, Transaction};

use crate::{DomainError, unit_of_work};

/// Points earned for an order of the given final total: one point per whole
/// currency unit, truncated.
pub fn points_for(total: Money) -> i64 {
    total.whole_units().max(0)
}

/// Outcome of a redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub points: i64,
    pub balance: i64,
    pub transaction: LoyaltyTransaction,
}

/// Credits `points` to a user and logs an `earn` entry.
///
/// The balance row is created on first use.
pub async fn earn_in<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
    points: i64,
) -> Result<i64, DomainError> {
    if points < 0 {
        return Err(DomainError::validation("earned points cannot be negative"));
    }
    let balance = tx.credit_loyalty_points(user_id, points).await?;
    tx.append_loyalty_transaction(NewLoyaltyTransaction {
        user_id,
        order_id,
        points,
        kind: LoyaltyKind::Earn,
    })
    .await?;
    Ok(balance)
}

/// Debits `points` from a user and logs a `redeem` entry.
///
/// The balance row stays locked from the check until the unit of work ends,
/// so concurrent redemptions for the same user cannot both pass the check.
pub async fn redeem_in<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
    points: i64,
) -> Result<Redemption, DomainError> {
    let available = tx.lock_loyalty_balance(user_id).await?.unwrap_or(0);
    if available < points {
        return Err(DomainError::InsufficientPoints {
            requested: points,
            available,
        });
    }
    let balance = tx.debit_loyalty_points(user_id, points).await?;
    let transaction = tx
        .append_loyalty_transaction(NewLoyaltyTransaction {
            user_id,
            order_id,
            points,
            kind: LoyaltyKind::Redeem,
        })
        .await?;
    Ok(Redemption {
        points,
        balance,
        transaction,
    })
}

async fn redeem_against_order<T: Transaction>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
    points: i64,
) -> Result<Redemption, DomainError> {
    let order = tx
        .get_order_for_update(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Order", order_id))?;
    if order.user_id != user_id {
        return Err(DomainError::forbidden("Order", order_id));
    }
    redeem_in(tx, user_id, order_id, points).await
}

/// Service for loyalty reads and redemptions.
pub struct LoyaltyLedger<S: Store> {
    store: S,
}

impl<S: Store> LoyaltyLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Credits points for an order in a unit of work of its own.
    #[tracing::instrument(skip(self))]
    pub async fn earn(
        &self,
        user_id: UserId,
        order_id: OrderId,
        points: i64,
    ) -> Result<i64, DomainError> {
        let mut tx = self.store.begin().await?;
        let outcome = earn_in(&mut tx, user_id, order_id, points).await;
        let balance = unit_of_work::finish(tx, outcome).await?;
        metrics::counter!("loyalty_points_earned_total").increment(points.unsigned_abs());
        Ok(balance)
    }

    /// Redeems points against one of the user's orders.
    #[tracing::instrument(skip(self))]
    pub async fn redeem(
        &self,
        user_id: UserId,
        order_id: OrderId,
        points: i64,
    ) -> Result<Redemption, DomainError> {
        if points < 1 {
            return Err(DomainError::validation("points to redeem must be at least 1"));
        }

        let mut tx = self.store.begin().await?;
        let outcome = redeem_against_order(&mut tx, user_id, order_id, points).await;
        let redemption = unit_of_work::finish(tx, outcome).await?;

        metrics::counter!("loyalty_points_redeemed_total").increment(points.unsigned_abs());
        tracing::info!(
            %user_id,
            %order_id,
            points,
            balance = redemption.balance,
            "loyalty points redeemed"
        );
        Ok(redemption)
    }

    /// Current balance; a user who never earned has zero.
    #[tracing::instrument(skip(self))]
    pub async fn balance(&self, user_id: UserId) -> Result<i64, DomainError> {
        Ok(self
            .store
            .get_loyalty_balance(user_id)
            .await?
            .map_or(0, |b| b.points))
    }

    /// The user's loyalty log, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn transactions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoyaltyTransaction>, DomainError> {
        Ok(self.store.list_loyalty_transactions(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderStatus, OrderType};
    use store::{InMemoryStore, NewOrder};

    use super::*;

    async fn seed_order(store: &InMemoryStore, user_id: UserId, earned: i64) -> OrderId {
        let mut tx = store.begin().await.unwrap();
        let order = tx
            .insert_order(NewOrder {
                user_id,
                total: Money::from_units(earned),
                status: OrderStatus::Pending,
                order_type: OrderType::Pickup,
                delivery_address: None,
            })
            .await
            .unwrap();
        earn_in(&mut tx, user_id, order.id, earned).await.unwrap();
        tx.commit().await.unwrap();
        order.id
    }

    #[test]
    fn test_points_truncate() {
        assert_eq!(points_for(Money::from_cents(1899)), 18);
        assert_eq!(points_for(Money::from_cents(99)), 0);
        assert_eq!(points_for(Money::zero()), 0);
    }

    #[tokio::test]
    async fn test_redeem_exact_balance() {
        let store = InMemoryStore::new();
        let ledger = LoyaltyLedger::new(store.clone());
        let user = UserId::new(1);
        let order = seed_order(&store, user, 18).await;

        let redemption = ledger.redeem(user, order, 18).await.unwrap();
        assert_eq!(redemption.balance, 0);
        assert_eq!(redemption.transaction.kind, LoyaltyKind::Redeem);
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_redeem_too_many_leaves_balance() {
        let store = InMemoryStore::new();
        let ledger = LoyaltyLedger::new(store.clone());
        let user = UserId::new(1);
        let order = seed_order(&store, user, 10).await;

        let err = ledger.redeem(user, order, 11).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientPoints {
                requested: 11,
                available: 10
            }
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), 10);
        assert_eq!(ledger.transactions(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redeem_requires_owned_order() {
        let store = InMemoryStore::new();
        let ledger = LoyaltyLedger::new(store.clone());
        let owner = UserId::new(1);
        let order = seed_order(&store, owner, 10).await;

        assert!(matches!(
            ledger.redeem(UserId::new(2), order, 1).await,
            Err(DomainError::Forbidden { .. })
        ));
        assert!(matches!(
            ledger.redeem(owner, OrderId::new(404), 1).await,
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.redeem(owner, order, 0).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_user_without_balance() {
        let store = InMemoryStore::new();
        let ledger = LoyaltyLedger::new(store.clone());
        let user = UserId::new(9);
        let order = seed_order(&store, user, 0).await;
        let stranger = UserId::new(10);

        assert_eq!(ledger.balance(stranger).await.unwrap(), 0);
        assert!(matches!(
            ledger.redeem(user, order, 1).await,
            Err(DomainError::InsufficientPoints { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_balance_matches_log() {
        let store = InMemoryStore::new();
        let ledger = LoyaltyLedger::new(store.clone());
        let user = UserId::new(3);
        let order = seed_order(&store, user, 40).await;
        ledger.earn(user, order, 5).await.unwrap();
        ledger.redeem(user, order, 12).await.unwrap();

        let log = ledger.transactions(user).await.unwrap();
        let derived: i64 = log.iter().map(|t| t.kind.signed(t.points)).sum();
        assert_eq!(derived, ledger.balance(user).await.unwrap());
        assert_eq!(derived, 33);
        assert_eq!(log[0].kind, LoyaltyKind::Redeem);
    }
}
