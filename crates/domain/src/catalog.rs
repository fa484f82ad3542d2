//! Catalog: product records and the two stock operations used by orders.
//!
//! Stock only ever changes through [`take_stock`] and [`return_stock`], both
//! of which run inside a caller-owned unit of work.

use common::ProductId;
use store::{NewProduct, Product, StockUpdate, Store, StoreError, Transaction};

use crate::{DomainError, unit_of_work};

/// Atomically takes `quantity` units of a product out of stock.
///
/// Returns the remaining stock. Fails with `InsufficientStock` when less than
/// `quantity` is held, leaving stock untouched, and `NotFound` when the
/// product does not exist.
pub async fn take_stock<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
) -> Result<u32, DomainError> {
    match tx.decrement_stock(product_id, quantity).await? {
        StockUpdate::Applied { remaining } => Ok(remaining),
        StockUpdate::Insufficient { available } => Err(DomainError::InsufficientStock {
            product_id,
            requested: quantity,
            available,
        }),
        StockUpdate::Missing => Err(DomainError::not_found("Product", product_id)),
    }
}

/// Puts `quantity` units of a product back into stock. There is no upper bound.
pub async fn return_stock<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
) -> Result<u32, DomainError> {
    tx.increment_stock(product_id, quantity)
        .await?
        .ok_or_else(|| DomainError::not_found("Product", product_id))
}

fn validate_product(product: &NewProduct) -> Result<(), DomainError> {
    if product.name.trim().is_empty() {
        return Err(DomainError::validation("product name is required"));
    }
    if product.price.is_negative() {
        return Err(DomainError::validation("product price cannot be negative"));
    }
    Ok(())
}

/// Service for catalog reads and administrative writes.
pub struct Catalog<S: Store> {
    store: S,
}

impl<S: Store> Catalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, product), fields(name = %product.name))]
    pub async fn create_product(&self, product: NewProduct) -> Result<Product, DomainError> {
        validate_product(&product)?;
        Ok(self.store.create_product(product).await?)
    }

    /// Overwrites a product. `stock_quantity` is taken as the new absolute
    /// level; use [`Catalog::restock`] to add to it.
    #[tracing::instrument(skip(self, product))]
    pub async fn update_product(
        &self,
        id: ProductId,
        product: NewProduct,
    ) -> Result<Product, DomainError> {
        validate_product(&product)?;
        self.store
            .update_product(id, product)
            .await?
            .ok_or_else(|| DomainError::not_found("Product", id))
    }

    /// Removes a product that no order refers to.
    #[tracing::instrument(skip(self))]
    pub async fn delete_product(&self, id: ProductId) -> Result<(), DomainError> {
        match self.store.delete_product(id).await {
            Ok(true) => {}
            Ok(false) => return Err(DomainError::not_found("Product", id)),
            Err(StoreError::Conflict(_)) => {
                return Err(DomainError::Conflict(format!(
                    "product {id} is part of existing orders"
                )));
            }
            Err(err) => return Err(err.into()),
        }
        tracing::info!(product_id = %id, "product deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product, DomainError> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Product", id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>, DomainError> {
        Ok(self.store.list_products().await?)
    }

    /// Adds stock to a product (returns, deliveries). Returns the new level.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, id: ProductId, quantity: u32) -> Result<u32, DomainError> {
        if quantity == 0 {
            return Err(DomainError::validation("restock quantity must be at least 1"));
        }
        let mut tx = self.store.begin().await?;
        let outcome = return_stock(&mut tx, id, quantity).await;
        let stock = unit_of_work::finish(tx, outcome).await?;
        tracing::info!(product_id = %id, quantity, stock, "product restocked");
        Ok(stock)
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, UserId};
    use store::InMemoryStore;

    use super::*;
    use crate::{DraftLine, OrderCoordinator, OrderDraft};

    fn latte(stock: u32) -> NewProduct {
        NewProduct {
            name: "Oat Latte".to_string(),
            description: "Double shot".to_string(),
            size: "medium".to_string(),
            price: Money::from_cents(525),
            stock_quantity: stock,
        }
    }

    #[tokio::test]
    async fn test_take_stock_outcomes() {
        let store = InMemoryStore::new();
        let product = store.create_product(latte(3)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(take_stock(&mut tx, product.id, 2).await.unwrap(), 1);
        let err = take_stock(&mut tx, product.id, 5).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 5,
                available: 1,
                ..
            }
        ));
        let err = take_stock(&mut tx, ProductId::new(99), 1).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "Product", id: 99 }));
    }

    #[tokio::test]
    async fn test_restock_has_no_upper_bound() {
        let store = InMemoryStore::new();
        let catalog = Catalog::new(store.clone());
        let product = catalog.create_product(latte(0)).await.unwrap();

        assert_eq!(catalog.restock(product.id, 1_000).await.unwrap(), 1_000);
        assert_eq!(catalog.restock(product.id, 5).await.unwrap(), 1_005);
        assert_eq!(
            catalog.get_product(product.id).await.unwrap().stock_quantity,
            1_005
        );
    }

    #[tokio::test]
    async fn test_restock_rejects_zero_and_unknown() {
        let catalog = Catalog::new(InMemoryStore::new());

        assert!(matches!(
            catalog.restock(ProductId::new(1), 0).await,
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            catalog.restock(ProductId::new(1), 3).await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_product_validation() {
        let catalog = Catalog::new(InMemoryStore::new());

        let mut blank = latte(1);
        blank.name = "  ".to_string();
        assert!(matches!(
            catalog.create_product(blank).await,
            Err(DomainError::Validation(_))
        ));

        let mut negative = latte(1);
        negative.price = Money::from_cents(-1);
        assert!(matches!(
            catalog.create_product(negative).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_product() {
        let store = InMemoryStore::new();
        let catalog = Catalog::new(store.clone());
        let ordered = catalog.create_product(latte(5)).await.unwrap();
        let unused = catalog.create_product(latte(5)).await.unwrap();

        let draft = OrderDraft::pickup(vec![DraftLine::new(ordered.id, 1, ordered.price)]);
        OrderCoordinator::new(store)
            .place_order(UserId::new(1), draft, None)
            .await
            .unwrap();

        assert!(matches!(
            catalog.delete_product(ordered.id).await,
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(catalog.get_product(ordered.id).await.unwrap().stock_quantity, 4);

        catalog.delete_product(unused.id).await.unwrap();
        assert!(matches!(
            catalog.delete_product(unused.id).await,
            Err(DomainError::NotFound { entity: "Product", .. })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_product() {
        let catalog = Catalog::new(InMemoryStore::new());
        let result = catalog.update_product(ProductId::new(4), latte(1)).await;
        assert!(matches!(result, Err(DomainError::NotFound { id: 4, .. })));
    }
}
