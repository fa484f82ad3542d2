//! Catalog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};
use store::{NewProduct, Product, Store};

use super::{bounded, parse_id};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size: String,
    pub price_cents: i64,
    pub stock_quantity: u32,
}

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub size: String,
    pub price_cents: i64,
    pub stock_quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct RestockResponse {
    pub product_id: i64,
    pub stock_quantity: u32,
}

impl From<ProductRequest> for NewProduct {
    fn from(req: ProductRequest) -> Self {
        NewProduct {
            name: req.name,
            description: req.description,
            size: req.size,
            price: Money::from_cents(req.price_cents),
            stock_quantity: req.stock_quantity,
        }
    }
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.as_i64(),
            name: product.name,
            description: product.description,
            size: product.size,
            price_cents: product.price.cents(),
            stock_quantity: product.stock_quantity,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

/// GET /products
#[tracing::instrument(skip(state, _user))]
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _user: AuthUser,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = bounded(state.request_timeout, state.catalog.list_products()).await?;
    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

/// POST /products
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let product = bounded(
        state.request_timeout,
        state.catalog.create_product(req.into()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// GET /products/{id}
#[tracing::instrument(skip(state, _user))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id: ProductId = parse_id("product", &id)?;
    let product = bounded(state.request_timeout, state.catalog.get_product(product_id)).await?;
    Ok(Json(product.into()))
}

/// PUT /products/{id}: `stock_quantity` replaces the current level.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id: ProductId = parse_id("product", &id)?;
    let product = bounded(
        state.request_timeout,
        state.catalog.update_product(product_id, req.into()),
    )
    .await?;
    Ok(Json(product.into()))
}

/// DELETE /products/{id}: 409 while any order still lists the product.
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product_id: ProductId = parse_id("product", &id)?;
    bounded(state.request_timeout, state.catalog.delete_product(product_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /products/{id}/restock: add stock, with no upper bound.
#[tracing::instrument(skip(state, req))]
pub async fn restock<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<RestockRequest>,
) -> Result<Json<RestockResponse>, ApiError> {
    let product_id: ProductId = parse_id("product", &id)?;
    let stock_quantity = bounded(
        state.request_timeout,
        state.catalog.restock(product_id, req.quantity),
    )
    .await?;
    Ok(Json(RestockResponse {
        product_id: product_id.as_i64(),
        stock_quantity,
    }))
}
