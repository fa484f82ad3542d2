//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppState, JwtConfig, JwtManager};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::UserId;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: Router,
    jwt: Arc<JwtManager>,
}

impl TestApp {
    fn new() -> Self {
        let jwt = Arc::new(JwtManager::new(JwtConfig {
            secret: "integration-secret".to_string(),
            issuer: "order-service".to_string(),
            ttl_secs: 3600,
        }));
        let state = Arc::new(AppState::new(
            InMemoryStore::new(),
            Duration::from_secs(5),
        ));
        let router = api::create_app(state, jwt.clone(), get_metrics_handle());
        Self { router, jwt }
    }

    fn token(&self, user: i64) -> String {
        self.jwt.issue_token(UserId::new(user)).unwrap()
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send_raw(method, uri, token, body.map(|body| body.to_string()))
            .await
    }

    /// Sends `body` verbatim as `application/json`, valid or not.
    async fn send_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn create_product(&self, token: &str, price_cents: i64, stock: u32) -> i64 {
        let (status, json) = self
            .send(
                "POST",
                "/products",
                Some(token),
                Some(json!({
                    "name": "Flat White",
                    "size": "medium",
                    "price_cents": price_cents,
                    "stock_quantity": stock
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_i64().unwrap()
    }

    async fn create_promotion(&self, token: &str, code: &str, percent: u8) -> StatusCode {
        let now = Utc::now();
        let (status, _) = self
            .send(
                "POST",
                "/promotions",
                Some(token),
                Some(json!({
                    "code": code,
                    "description": "test promotion",
                    "discount_percent": percent,
                    "start_date": now - chrono::Duration::days(1),
                    "end_date": now + chrono::Duration::days(1)
                })),
            )
            .await;
        status
    }

    async fn place_order(
        &self,
        token: &str,
        product_id: i64,
        quantity: u32,
        unit_price_cents: i64,
        code: Option<&str>,
    ) -> (StatusCode, Value) {
        let uri = match code {
            Some(code) => format!("/orders?promotionCode={code}"),
            None => "/orders".to_string(),
        };
        self.send(
            "POST",
            &uri,
            Some(token),
            Some(json!({
                "order_type": "pickup",
                "items": [{
                    "product_id": product_id,
                    "quantity": quantity,
                    "unit_price_cents": unit_price_cents
                }]
            })),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_check_is_public() {
    let app = TestApp::new();

    let (status, json) = app.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::new();

    let (status, json) = app.send("GET", "/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().is_some());

    let (status, _) = app.send("GET", "/orders", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_rejected() {
    let app = TestApp::new();
    let foreign = JwtManager::new(JwtConfig {
        secret: "someone-else".to_string(),
        issuer: "order-service".to_string(),
        ttl_secs: 3600,
    });
    let token = foreign.issue_token(UserId::new(1)).unwrap();

    let (status, _) = app.send("GET", "/orders", Some(&token), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_place_order_with_promotion() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 1000, 10).await;
    assert_eq!(app.create_promotion(&token, "SAVE10", 10).await, StatusCode::CREATED);

    let (status, order) = app
        .place_order(&token, product_id, 2, 1000, Some("SAVE10"))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["total_cents"], 1800);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["user_id"], 1);
    assert_eq!(order["items"][0]["line_total_cents"], 2000);

    let (_, product) = app
        .send("GET", &format!("/products/{product_id}"), Some(&token), None)
        .await;
    assert_eq!(product["stock_quantity"], 8);

    let (_, points) = app.send("GET", "/loyalty/points", Some(&token), None).await;
    assert_eq!(points["points"], 18);
}

#[tokio::test]
async fn test_place_order_rejects_insufficient_stock() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 500, 3).await;

    let (status, json) = app.place_order(&token, product_id, 5, 500, None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("stock"));

    let (_, orders) = app.send("GET", "/orders", Some(&token), None).await;
    assert_eq!(orders.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_place_order_rejects_unknown_promotion() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 500, 3).await;

    let (status, _) = app
        .place_order(&token, product_id, 1, 500, Some("NOPE"))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_place_order_rejects_empty_items() {
    let app = TestApp::new();
    let token = app.token(1);

    let (status, _) = app
        .send("POST", "/orders", Some(&token), Some(json!({ "items": [] })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_negative_quantity_is_bad_request_with_json_error() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 400, 10).await;

    let (status, json) = app
        .send(
            "POST",
            "/orders",
            Some(&token),
            Some(json!({
                "order_type": "pickup",
                "items": [{
                    "product_id": product_id,
                    "quantity": -1,
                    "unit_price_cents": 400
                }]
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
    let (_, product) = app
        .send("GET", &format!("/products/{product_id}"), Some(&token), None)
        .await;
    assert_eq!(product["stock_quantity"], 10);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();
    let token = app.token(1);

    let (status, json) = app
        .send_raw(
            "POST",
            "/products",
            Some(&token),
            Some("{\"name\": \"Cortado\",".to_string()),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_get_order_of_another_user_is_forbidden() {
    let app = TestApp::new();
    let owner = app.token(1);
    let other = app.token(2);
    let product_id = app.create_product(&owner, 300, 5).await;
    let (_, order) = app.place_order(&owner, product_id, 1, 300, None).await;
    let order_id = order["id"].as_i64().unwrap();

    let (status, _) = app
        .send("GET", &format!("/orders/{order_id}"), Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = app
        .send("GET", &format!("/orders/{order_id}"), Some(&owner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], order_id);
}

#[tokio::test]
async fn test_get_missing_order_is_not_found() {
    let app = TestApp::new();
    let token = app.token(1);

    let (status, _) = app.send("GET", "/orders/999", Some(&token), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_id_is_bad_request() {
    let app = TestApp::new();
    let token = app.token(1);

    let (status, json) = app.send("GET", "/orders/abc", Some(&token), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("abc"));
}

#[tokio::test]
async fn test_list_orders_only_returns_own_orders() {
    let app = TestApp::new();
    let first = app.token(1);
    let second = app.token(2);
    let product_id = app.create_product(&first, 100, 10).await;
    app.place_order(&first, product_id, 1, 100, None).await;
    app.place_order(&first, product_id, 2, 100, None).await;
    app.place_order(&second, product_id, 1, 100, None).await;

    let (status, orders) = app.send("GET", "/orders", Some(&first), None).await;

    assert_eq!(status, StatusCode::OK);
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["total_cents"], 200);
}

#[tokio::test]
async fn test_update_status_to_completed() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 100, 10).await;
    let (_, order) = app.place_order(&token, product_id, 1, 100, None).await;
    let order_id = order["id"].as_i64().unwrap();

    let (status, json) = app
        .send(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some(&token),
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");

    let (status, _) = app
        .send("POST", &format!("/orders/{order_id}/cancel"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_status_rejects_unknown_status() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 100, 10).await;
    let (_, order) = app.place_order(&token, product_id, 1, 100, None).await;
    let order_id = order["id"].as_i64().unwrap();

    let (status, _) = app
        .send(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some(&token),
            Some(json!({ "status": "shipped" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_order_restocks() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 250, 4).await;
    let (_, order) = app.place_order(&token, product_id, 3, 250, None).await;
    let order_id = order["id"].as_i64().unwrap();

    let (status, json) = app
        .send("POST", &format!("/orders/{order_id}/cancel"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order"]["status"], "cancelled");

    let (_, product) = app
        .send("GET", &format!("/products/{product_id}"), Some(&token), None)
        .await;
    assert_eq!(product["stock_quantity"], 4);

    let (status, _) = app
        .send("POST", &format!("/orders/{order_id}/cancel"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_product_update_and_restock() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 400, 1).await;

    let (status, json) = app
        .send(
            "PUT",
            &format!("/products/{product_id}"),
            Some(&token),
            Some(json!({
                "name": "Oat Latte",
                "price_cents": 450,
                "stock_quantity": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Oat Latte");
    assert_eq!(json["price_cents"], 450);

    let (status, json) = app
        .send(
            "POST",
            &format!("/products/{product_id}/restock"),
            Some(&token),
            Some(json!({ "quantity": 9 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stock_quantity"], 10);
}

#[tokio::test]
async fn test_create_product_rejects_blank_name() {
    let app = TestApp::new();
    let token = app.token(1);

    let (status, _) = app
        .send(
            "POST",
            "/products",
            Some(&token),
            Some(json!({ "name": "  ", "price_cents": 100, "stock_quantity": 1 })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_apply_promotion_previews_discount() {
    let app = TestApp::new();
    let token = app.token(1);
    app.create_promotion(&token, "QUARTER", 25).await;

    let (status, json) = app
        .send(
            "POST",
            "/promotions/apply",
            Some(&token),
            Some(json!({ "code": "QUARTER", "total_cents": 1000 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["discount_percent"], 25);
    assert_eq!(json["discount_cents"], 250);
    assert_eq!(json["final_cents"], 750);

    let (_, active) = app.send("GET", "/promotions", Some(&token), None).await;
    assert_eq!(active.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_promotion_code_conflicts() {
    let app = TestApp::new();
    let token = app.token(1);

    assert_eq!(app.create_promotion(&token, "DUP", 5).await, StatusCode::CREATED);
    assert_eq!(app.create_promotion(&token, "DUP", 5).await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_pause_then_delete_promotion() {
    let app = TestApp::new();
    let token = app.token(1);
    app.create_promotion(&token, "AUTUMN", 15).await;
    let (_, active) = app.send("GET", "/promotions", Some(&token), None).await;
    let id = active[0]["id"].as_i64().unwrap();
    let uri = format!("/promotions/{id}");

    let now = Utc::now();
    let (status, json) = app
        .send(
            "PUT",
            &uri,
            Some(&token),
            Some(json!({
                "code": "AUTUMN",
                "discount_percent": 15,
                "start_date": now - chrono::Duration::days(1),
                "end_date": now + chrono::Duration::days(1),
                "is_active": false
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], false);

    let (status, _) = app
        .send(
            "POST",
            "/promotions/apply",
            Some(&token),
            Some(json!({ "code": "AUTUMN", "total_cents": 1000 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app.send("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(json, Value::Null);

    let (status, _) = app.send("GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_promotion_to_taken_code_conflicts() {
    let app = TestApp::new();
    let token = app.token(1);
    app.create_promotion(&token, "FIRST", 5).await;
    app.create_promotion(&token, "SECOND", 5).await;
    let (_, active) = app.send("GET", "/promotions", Some(&token), None).await;
    let second = active
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["code"] == "SECOND")
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let now = Utc::now();
    let body = |code: &str, percent: u32| {
        json!({
            "code": code,
            "discount_percent": percent,
            "start_date": now - chrono::Duration::days(1),
            "end_date": now + chrono::Duration::days(1)
        })
    };
    let uri = format!("/promotions/{second}");

    let (status, _) = app
        .send("PUT", &uri, Some(&token), Some(body("FIRST", 5)))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send("PUT", &uri, Some(&token), Some(body("SECOND", 120)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("PUT", "/promotions/404", Some(&token), Some(body("OTHER", 5)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_product() {
    let app = TestApp::new();
    let token = app.token(1);
    let ordered = app.create_product(&token, 300, 5).await;
    let unused = app.create_product(&token, 300, 5).await;
    let (status, _) = app.place_order(&token, ordered, 1, 300, None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = app
        .send("DELETE", &format!("/products/{ordered}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].is_string());

    let uri = format!("/products/{unused}");
    let (status, _) = app.send("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send("GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_redeem_loyalty_points() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 1000, 10).await;
    let (_, order) = app.place_order(&token, product_id, 2, 1000, None).await;
    let order_id = order["id"].as_i64().unwrap();

    let (status, json) = app
        .send(
            "POST",
            "/loyalty/redeem",
            Some(&token),
            Some(json!({ "order_id": order_id, "points": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["balance"], 15);

    let (status, _) = app
        .send(
            "POST",
            "/loyalty/redeem",
            Some(&token),
            Some(json!({ "order_id": order_id, "points": 100 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, history) = app
        .send("GET", "/loyalty/transactions", Some(&token), None)
        .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["kind"], "redeem");
    assert_eq!(history[1]["kind"], "earn");
}

#[tokio::test]
async fn test_redeem_against_another_users_order_is_forbidden() {
    let app = TestApp::new();
    let owner = app.token(1);
    let other = app.token(2);
    let product_id = app.create_product(&owner, 1000, 10).await;
    let (_, order) = app.place_order(&owner, product_id, 1, 1000, None).await;

    let (status, _) = app
        .send(
            "POST",
            "/loyalty/redeem",
            Some(&other),
            Some(json!({ "order_id": order["id"], "points": 1 })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();
    let token = app.token(1);
    let product_id = app.create_product(&token, 100, 1).await;
    app.place_order(&token, product_id, 1, 100, None).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_placed_total"));
}
