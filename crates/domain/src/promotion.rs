//! Promotion Evaluator: validates percentage-off codes.

use chrono::{DateTime, Utc};
use common::{Money, PromotionId};
use serde::Serialize;
use store::{NewPromotion, Promotion, Store, StoreError, Transaction};

use crate::DomainError;

/// Result of applying a promotion to an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discount {
    pub percent: u8,
    pub amount: Money,
    pub final_total: Money,
}

/// Applies an already loaded promotion to `total` at instant `now`.
///
/// A missing, inactive or out-of-window promotion all produce the same
/// `InvalidOrExpiredCode` error.
pub fn evaluate(
    promotion: Option<&Promotion>,
    total: Money,
    now: DateTime<Utc>,
) -> Result<Discount, DomainError> {
    let promotion = promotion
        .filter(|p| p.is_redeemable_at(now))
        .ok_or(DomainError::InvalidOrExpiredCode)?;
    let amount = total.percentage(promotion.discount_percent);
    Ok(Discount {
        percent: promotion.discount_percent,
        amount,
        final_total: total - amount,
    })
}

/// Resolves `code` inside a unit of work and applies it to `total`.
pub async fn apply_in<T: Transaction>(
    tx: &mut T,
    code: &str,
    total: Money,
    now: DateTime<Utc>,
) -> Result<Discount, DomainError> {
    let promotion = tx.find_promotion_by_code(code).await?;
    evaluate(promotion.as_ref(), total, now)
}

fn validate_promotion(promotion: &NewPromotion) -> Result<(), DomainError> {
    if promotion.code.trim().is_empty() {
        return Err(DomainError::validation("promotion code is required"));
    }
    if promotion.discount_percent > 100 {
        return Err(DomainError::validation(
            "discount percent must be between 0 and 100",
        ));
    }
    if promotion.start_date > promotion.end_date {
        return Err(DomainError::validation(
            "promotion start date must not be after its end date",
        ));
    }
    Ok(())
}

fn code_conflict(err: StoreError, code: &str) -> DomainError {
    match err {
        StoreError::Conflict(_) => {
            DomainError::Conflict(format!("promotion code {code} already exists"))
        }
        err => err.into(),
    }
}

/// Service for promotion lookups and administration.
pub struct PromotionEvaluator<S: Store> {
    store: S,
}

impl<S: Store> PromotionEvaluator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Computes the discount `code` would give on `total` at `now`.
    ///
    /// Read-only: nothing is recorded.
    #[tracing::instrument(skip(self))]
    pub async fn apply(
        &self,
        code: &str,
        total: Money,
        now: DateTime<Utc>,
    ) -> Result<Discount, DomainError> {
        if total.is_negative() {
            return Err(DomainError::validation("total amount cannot be negative"));
        }
        let promotion = self.store.find_promotion_by_code(code).await?;
        evaluate(promotion.as_ref(), total, now)
    }

    #[tracing::instrument(skip(self, promotion), fields(code = %promotion.code))]
    pub async fn create_promotion(
        &self,
        promotion: NewPromotion,
    ) -> Result<Promotion, DomainError> {
        validate_promotion(&promotion)?;
        let code = promotion.code.clone();
        self.store
            .create_promotion(promotion)
            .await
            .map_err(|err| code_conflict(err, &code))
    }

    /// Replaces every field of a promotion. Setting `is_active` to false
    /// pauses it without deleting it.
    #[tracing::instrument(skip(self, promotion), fields(code = %promotion.code))]
    pub async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: NewPromotion,
    ) -> Result<Promotion, DomainError> {
        validate_promotion(&promotion)?;
        let code = promotion.code.clone();
        let updated = self
            .store
            .update_promotion(id, promotion)
            .await
            .map_err(|err| code_conflict(err, &code))?
            .ok_or_else(|| DomainError::not_found("Promotion", id))?;
        tracing::info!(promotion_id = %id, active = updated.is_active, "promotion updated");
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_promotion(&self, id: PromotionId) -> Result<(), DomainError> {
        if !self.store.delete_promotion(id).await? {
            return Err(DomainError::not_found("Promotion", id));
        }
        tracing::info!(promotion_id = %id, "promotion deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_promotion(&self, id: PromotionId) -> Result<Promotion, DomainError> {
        self.store
            .get_promotion(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Promotion", id))
    }

    /// Lists promotions redeemable at `now`.
    #[tracing::instrument(skip(self))]
    pub async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Promotion>, DomainError> {
        Ok(self.store.list_active_promotions(now).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use store::InMemoryStore;

    use super::*;

    fn promotion(code: &str, percent: u8, now: DateTime<Utc>) -> NewPromotion {
        NewPromotion {
            code: code.to_string(),
            description: "Test promotion".to_string(),
            discount_percent: percent,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_apply_valid_code() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        evaluator
            .create_promotion(promotion("TENOFF", 10, now))
            .await
            .unwrap();

        let discount = evaluator
            .apply("TENOFF", Money::from_cents(2000), now)
            .await
            .unwrap();
        assert_eq!(discount.amount, Money::from_cents(200));
        assert_eq!(discount.final_total, Money::from_cents(1800));
    }

    #[tokio::test]
    async fn test_window_is_inclusive() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        let created = evaluator
            .create_promotion(promotion("EDGE", 25, now))
            .await
            .unwrap();

        let total = Money::from_cents(400);
        assert!(evaluator.apply("EDGE", total, created.start_date).await.is_ok());
        assert!(evaluator.apply("EDGE", total, created.end_date).await.is_ok());
        assert!(matches!(
            evaluator
                .apply("EDGE", total, created.end_date + Duration::seconds(1))
                .await,
            Err(DomainError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_codes_look_the_same() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        let mut inactive = promotion("PAUSED", 50, now);
        inactive.is_active = false;
        evaluator.create_promotion(inactive).await.unwrap();

        let total = Money::from_cents(1000);
        let unknown = evaluator.apply("NOPE", total, now).await.unwrap_err();
        let paused = evaluator.apply("PAUSED", total, now).await.unwrap_err();
        assert_eq!(unknown.to_string(), paused.to_string());
    }

    #[test]
    fn test_discount_rounds_half_up() {
        let now = Utc::now();
        let promo = Promotion {
            id: PromotionId::new(1),
            code: "ODD".to_string(),
            description: String::new(),
            discount_percent: 15,
            start_date: now,
            end_date: now,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        // 15% of 0.99 is 14.85 cents
        let discount = evaluate(Some(&promo), Money::from_cents(99), now).unwrap();
        assert_eq!(discount.amount, Money::from_cents(15));
        assert_eq!(discount.final_total, Money::from_cents(84));
    }

    #[tokio::test]
    async fn test_create_validation_and_conflict() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());

        assert!(matches!(
            evaluator.create_promotion(promotion("BIG", 101, now)).await,
            Err(DomainError::Validation(_))
        ));

        let mut backwards = promotion("BACK", 5, now);
        backwards.end_date = backwards.start_date - Duration::days(1);
        assert!(matches!(
            evaluator.create_promotion(backwards).await,
            Err(DomainError::Validation(_))
        ));

        evaluator
            .create_promotion(promotion("ONCE", 5, now))
            .await
            .unwrap();
        assert!(matches!(
            evaluator.create_promotion(promotion("ONCE", 5, now)).await,
            Err(DomainError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_paused_promotion_stops_applying() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        let created = evaluator
            .create_promotion(promotion("SPRING", 20, now))
            .await
            .unwrap();

        let mut paused = promotion("SPRING", 20, now);
        paused.is_active = false;
        let updated = evaluator.update_promotion(created.id, paused).await.unwrap();
        assert!(!updated.is_active);
        assert!(matches!(
            evaluator.apply("SPRING", Money::from_cents(1000), now).await,
            Err(DomainError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_update_validation_conflict_and_missing() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        evaluator
            .create_promotion(promotion("TAKEN", 5, now))
            .await
            .unwrap();
        let other = evaluator
            .create_promotion(promotion("OTHER", 5, now))
            .await
            .unwrap();

        assert!(matches!(
            evaluator
                .update_promotion(other.id, promotion("OTHER", 150, now))
                .await,
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            evaluator
                .update_promotion(other.id, promotion("TAKEN", 5, now))
                .await,
            Err(DomainError::Conflict(_))
        ));
        assert!(matches!(
            evaluator
                .update_promotion(PromotionId::new(999), promotion("FREE", 5, now))
                .await,
            Err(DomainError::NotFound { entity: "Promotion", id: 999 })
        ));

        // keeping its own code is not a clash
        let renamed = evaluator
            .update_promotion(other.id, promotion("OTHER", 30, now))
            .await
            .unwrap();
        assert_eq!(renamed.discount_percent, 30);
    }

    #[tokio::test]
    async fn test_delete_promotion() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        let created = evaluator
            .create_promotion(promotion("GONE", 10, now))
            .await
            .unwrap();

        evaluator.delete_promotion(created.id).await.unwrap();
        assert!(matches!(
            evaluator.get_promotion(created.id).await,
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            evaluator.delete_promotion(created.id).await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_active() {
        let now = Utc::now();
        let evaluator = PromotionEvaluator::new(InMemoryStore::new());
        evaluator
            .create_promotion(promotion("NOW", 5, now))
            .await
            .unwrap();
        let mut later = promotion("LATER", 5, now);
        later.start_date = now + Duration::days(2);
        later.end_date = now + Duration::days(3);
        evaluator.create_promotion(later).await.unwrap();

        let active = evaluator.list_active(now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].code, "NOW");
    }
}
