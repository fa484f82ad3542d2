//! Loyalty balance, history and redemption endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use store::{LoyaltyKind, LoyaltyTransaction, Store};

use super::bounded;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RedeemRequest {
    pub order_id: i64,
    pub points: i64,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub points: i64,
}

#[derive(Serialize)]
pub struct LoyaltyTransactionResponse {
    pub id: i64,
    pub order_id: i64,
    pub points: i64,
    pub kind: LoyaltyKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct RedeemResponse {
    pub message: String,
    pub balance: i64,
}

impl From<LoyaltyTransaction> for LoyaltyTransactionResponse {
    fn from(entry: LoyaltyTransaction) -> Self {
        Self {
            id: entry.id.as_i64(),
            order_id: entry.order_id.as_i64(),
            points: entry.points,
            kind: entry.kind,
            created_at: entry.created_at,
        }
    }
}

/// GET /loyalty/points
#[tracing::instrument(skip(state))]
pub async fn balance<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let points = bounded(state.request_timeout, state.loyalty.balance(user_id)).await?;
    Ok(Json(BalanceResponse {
        user_id: user_id.as_i64(),
        points,
    }))
}

/// GET /loyalty/transactions: newest first.
#[tracing::instrument(skip(state))]
pub async fn transactions<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<LoyaltyTransactionResponse>>, ApiError> {
    let entries = bounded(state.request_timeout, state.loyalty.transactions(user_id)).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(LoyaltyTransactionResponse::from)
            .collect(),
    ))
}

/// POST /loyalty/redeem
#[tracing::instrument(skip(state, req), fields(order_id = req.order_id, points = req.points))]
pub async fn redeem<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let redemption = bounded(
        state.request_timeout,
        state
            .loyalty
            .redeem(user_id, OrderId::new(req.order_id), req.points),
    )
    .await?;

    Ok(Json(RedeemResponse {
        message: format!("Redeemed {} loyalty points", redemption.points),
        balance: redemption.balance,
    }))
}
