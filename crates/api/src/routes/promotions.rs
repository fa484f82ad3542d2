//! Promotion endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, PromotionId};
use serde::{Deserialize, Serialize};
use store::{NewPromotion, Promotion, Store};

use super::{bounded, parse_id};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

fn active_by_default() -> bool {
    true
}

#[derive(Deserialize)]
pub struct PromotionRequest {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub discount_percent: u8,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct ApplyPromotionRequest {
    pub code: String,
    pub total_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct PromotionResponse {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub discount_percent: u8,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Serialize)]
pub struct ApplyPromotionResponse {
    pub code: String,
    pub discount_percent: u8,
    pub discount_cents: i64,
    pub final_cents: i64,
}

impl From<PromotionRequest> for NewPromotion {
    fn from(req: PromotionRequest) -> Self {
        NewPromotion {
            code: req.code.trim().to_string(),
            description: req.description,
            discount_percent: req.discount_percent,
            start_date: req.start_date,
            end_date: req.end_date,
            is_active: req.is_active,
        }
    }
}

impl From<Promotion> for PromotionResponse {
    fn from(promotion: Promotion) -> Self {
        Self {
            id: promotion.id.as_i64(),
            code: promotion.code,
            description: promotion.description,
            discount_percent: promotion.discount_percent,
            start_date: promotion.start_date,
            end_date: promotion.end_date,
            is_active: promotion.is_active,
        }
    }
}

/// GET /promotions: promotions redeemable right now.
#[tracing::instrument(skip(state, _user))]
pub async fn list_active<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _user: AuthUser,
) -> Result<Json<Vec<PromotionResponse>>, ApiError> {
    let promotions = bounded(
        state.request_timeout,
        state.promotions.list_active(Utc::now()),
    )
    .await?;
    Ok(Json(
        promotions.into_iter().map(PromotionResponse::from).collect(),
    ))
}

/// POST /promotions
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<PromotionRequest>,
) -> Result<(StatusCode, Json<PromotionResponse>), ApiError> {
    let created = bounded(
        state.request_timeout,
        state.promotions.create_promotion(req.into()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /promotions/{id}
#[tracing::instrument(skip(state, _user))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PromotionResponse>, ApiError> {
    let promotion_id: PromotionId = parse_id("promotion", &id)?;
    let promotion = bounded(
        state.request_timeout,
        state.promotions.get_promotion(promotion_id),
    )
    .await?;
    Ok(Json(promotion.into()))
}

/// PUT /promotions/{id}: replace a promotion. `is_active: false` pauses it.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PromotionRequest>,
) -> Result<Json<PromotionResponse>, ApiError> {
    let promotion_id: PromotionId = parse_id("promotion", &id)?;
    let updated = bounded(
        state.request_timeout,
        state.promotions.update_promotion(promotion_id, req.into()),
    )
    .await?;
    Ok(Json(updated.into()))
}

/// DELETE /promotions/{id}
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let promotion_id: PromotionId = parse_id("promotion", &id)?;
    bounded(
        state.request_timeout,
        state.promotions.delete_promotion(promotion_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /promotions/apply: preview a discount without recording anything.
#[tracing::instrument(skip(state, req), fields(code = %req.code))]
pub async fn apply<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ApplyPromotionRequest>,
) -> Result<Json<ApplyPromotionResponse>, ApiError> {
    let discount = bounded(
        state.request_timeout,
        state.promotions.apply(
            req.code.trim(),
            Money::from_cents(req.total_cents),
            Utc::now(),
        ),
    )
    .await?;

    Ok(Json(ApplyPromotionResponse {
        code: req.code.trim().to_string(),
        discount_percent: discount.percent,
        discount_cents: discount.amount.cents(),
        final_cents: discount.final_total.cents(),
    }))
}
