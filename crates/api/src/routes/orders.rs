//! Order placement, lookup, status and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, OrderType, ProductId};
use domain::{DraftLine, OrderDraft};
use serde::{Deserialize, Serialize};
use store::{Order, OrderLine, Store};

use super::{bounded, parse_id};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub order_type: OrderType,
    pub delivery_address: Option<String>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: i64,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderQuery {
    #[serde(rename = "promotionCode")]
    pub promotion_code: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub user_id: i64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub delivery_address: Option<String>,
    pub total_cents: i64,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub id: i64,
    pub product_id: i64,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub message: String,
    pub order: OrderResponse,
}

impl From<&OrderLine> for OrderItemResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            id: line.id.as_i64(),
            product_id: line.product_id.as_i64(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            line_total_cents: line.line_total().cents(),
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.as_i64(),
            user_id: order.user_id.as_i64(),
            status: order.status,
            order_type: order.order_type,
            delivery_address: order.delivery_address,
            total_cents: order.total.cents(),
            items: order.lines.iter().map(OrderItemResponse::from).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl From<PlaceOrderRequest> for OrderDraft {
    fn from(req: PlaceOrderRequest) -> Self {
        OrderDraft {
            order_type: req.order_type,
            delivery_address: req.delivery_address,
            lines: req
                .items
                .into_iter()
                .map(|item| {
                    DraftLine::new(
                        ProductId::new(item.product_id),
                        item.quantity,
                        Money::from_cents(item.unit_price_cents),
                    )
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order, optionally with `?promotionCode=`.
#[tracing::instrument(skip(state, req))]
pub async fn place<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<PlaceOrderQuery>,
    ApiJson(req): ApiJson<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let draft = OrderDraft::from(req);
    let order = bounded(
        state.request_timeout,
        state
            .orders
            .place_order(user_id, draft, query.promotion_code.as_deref()),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = bounded(state.request_timeout, state.orders.list_orders(user_id)).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: one of the caller's orders.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let order = bounded(
        state.request_timeout,
        state.orders.get_order(user_id, order_id),
    )
    .await?;
    Ok(Json(order.into()))
}

/// PATCH /orders/{id}/status: move an order along its lifecycle.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let status: OrderStatus = req
        .status
        .trim()
        .parse()
        .map_err(|e: common::ParseEnumError| ApiError::BadRequest(e.to_string()))?;

    let order = bounded(
        state.request_timeout,
        state.orders.update_order_status(user_id, order_id, status),
    )
    .await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancel a pending order and restock its lines.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let order = bounded(
        state.request_timeout,
        state.orders.cancel_order(user_id, order_id),
    )
    .await?;

    Ok(Json(CancelResponse {
        message: format!("Order {order_id} cancelled"),
        order: order.into(),
    }))
}
