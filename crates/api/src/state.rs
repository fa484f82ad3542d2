//! Shared application state.

use std::time::Duration;

use domain::{Catalog, LoyaltyLedger, OrderCoordinator, PromotionEvaluator};
use store::Store;

/// Services accessible from all handlers.
pub struct AppState<S: Store> {
    pub orders: OrderCoordinator<S>,
    pub catalog: Catalog<S>,
    pub promotions: PromotionEvaluator<S>,
    pub loyalty: LoyaltyLedger<S>,
    /// Deadline applied to the work of every request.
    pub request_timeout: Duration,
}

impl<S: Store + Clone> AppState<S> {
    /// Builds every service over one shared store.
    pub fn new(store: S, request_timeout: Duration) -> Self {
        Self {
            orders: OrderCoordinator::new(store.clone()),
            catalog: Catalog::new(store.clone()),
            promotions: PromotionEvaluator::new(store.clone()),
            loyalty: LoyaltyLedger::new(store),
            request_timeout,
        }
    }
}
