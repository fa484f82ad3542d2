//! HTTP API server for the order service.
//!
//! Provides REST endpoints for orders, the catalog, promotions and loyalty
//! behind bearer-token authentication, with structured logging (tracing)
//! and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use auth::{AuthUser, JwtConfig, JwtManager};
pub use config::Config;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
///
/// `/health` and `/metrics` are public; every other route requires a valid
/// bearer token.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    jwt: Arc<JwtManager>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    let protected = Router::new()
        .route(
            "/orders",
            post(routes::orders::place::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/status",
            patch(routes::orders::update_status::<S>),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/products",
            get(routes::products::list::<S>).post(routes::products::create::<S>),
        )
        .route(
            "/products/{id}",
            get(routes::products::get::<S>)
                .put(routes::products::update::<S>)
                .delete(routes::products::delete::<S>),
        )
        .route(
            "/products/{id}/restock",
            post(routes::products::restock::<S>),
        )
        .route(
            "/promotions",
            get(routes::promotions::list_active::<S>).post(routes::promotions::create::<S>),
        )
        .route("/promotions/apply", post(routes::promotions::apply::<S>))
        .route(
            "/promotions/{id}",
            get(routes::promotions::get::<S>)
                .put(routes::promotions::update::<S>)
                .delete(routes::promotions::delete::<S>),
        )
        .route("/loyalty/points", get(routes::loyalty::balance::<S>))
        .route(
            "/loyalty/transactions",
            get(routes::loyalty::transactions::<S>),
        )
        .route("/loyalty/redeem", post(routes::loyalty::redeem::<S>))
        .route_layer(middleware::from_fn_with_state(jwt, auth::require_auth))
        .with_state(state);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(protected)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the application state over `store` using the configured deadline.
pub fn create_state<S: Store + Clone + 'static>(store: S, config: &Config) -> Arc<AppState<S>> {
    Arc::new(AppState::new(store, config.request_timeout))
}
