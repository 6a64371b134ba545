//! Router

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    cancel_order, capture_payment, check_inventory, confirm_payment, create_order, create_payment,
    create_transaction, health_check, list_orders, list_statuses, list_transactions,
    payment_webhook, update_inventory, update_order_status,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Orders
        .route("/orders", get(list_orders))
        .route("/orders/statuses", get(list_statuses))
        .route("/orders/create", post(create_order))
        .route("/orders/cancel", post(cancel_order))
        .route("/orders/update-status", post(update_order_status))
        // Payments
        .route("/payments/{provider}/create", post(create_payment))
        .route("/payments/{provider}/confirm", post(confirm_payment))
        .route("/payments/{provider}/capture", post(capture_payment))
        .route("/payments/{provider}/webhook", post(payment_webhook))
        // Inventory
        .route("/inventory/update", post(update_inventory))
        .route("/inventory/check", post(check_inventory))
        // Audit log
        .route("/transactions", get(list_transactions))
        .route("/transactions/create", post(create_transaction))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use commerce_core::{SkuRef, db};
    use commerce_payments::gateway::{MockConfig, MockGateway};
    use commerce_payments::{GatewayRegistry, PaymentsConfig};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::auth::Claims;
    use crate::config::AppConfig;

    async fn test_state(config: AppConfig) -> AppState {
        let pool = db::connect_in_memory().await.unwrap();
        db::migrate(&pool).await.unwrap();
        db::seed_demo_catalog(&pool).await.unwrap();
        let gateways = GatewayRegistry::from_config(&PaymentsConfig::mock_only()).unwrap();
        AppState::new(config, pool, gateways)
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(state, request).await
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
        send(state, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn stock(state: &AppState, product_id: &str) -> i64 {
        state
            .ledger
            .stock(&state.pool, &SkuRef::product(product_id))
            .await
            .unwrap()
            .stock_quantity
    }

    /// Two mugs through the mock checkout; returns (order id, payment id)
    async fn checkout_two_mugs(state: &AppState) -> (String, String) {
        let (status, body) = post_json(
            state,
            "/payments/mock/create",
            json!({ "items": [{ "product_id": "FT-MUG", "quantity": 2 }] }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["order_id"].as_str().unwrap().to_string(),
            body["payment_id"].as_str().unwrap().to_string(),
        )
    }

    async fn webhook(state: &AppState, payload: Value) -> (StatusCode, Value) {
        let body = payload.to_string();
        let signer = MockGateway::new(MockConfig::default()).unwrap();
        let request = Request::post("/payments/mock/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header(MockGateway::SIGNATURE_HEADER, signer.sign(&body).unwrap())
            .body(Body::from(body))
            .unwrap();
        send(state, request).await
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state(AppConfig::default()).await;
        let (status, body) = get_json(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], true);
        assert_eq!(body["providers"], json!(["mock"]));
    }

    #[tokio::test]
    async fn test_create_order_starts_pending() {
        let state = test_state(AppConfig::default()).await;
        let (status, body) = post_json(
            &state,
            "/orders/create",
            json!({
                "items": [{ "product_id": "FT-MUG", "quantity": 2, "price": "199.00" }],
                "subtotal": "398.00",
                "payment_method": "mock",
                "payment_status": "pending"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["success"], true);

        let id = body["id"].as_str().unwrap();
        let (status, body) = get_json(&state, &format!("/orders?id={id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["status"], "pendiente");
        assert_eq!(body["order"]["payment_status"], "pending");
        assert_eq!(body["order"]["total"], "461.68");
        assert_eq!(body["order"]["items"].as_array().unwrap().len(), 1);

        // Creating an order does not touch stock
        assert_eq!(stock(&state, "FT-MUG").await, 25);
    }

    #[tokio::test]
    async fn test_order_lookup_by_number() {
        let state = test_state(AppConfig::default()).await;
        let (_, created) = post_json(
            &state,
            "/orders/create",
            json!({ "items": [{ "product_id": "FT-TEE", "quantity": 1 }], "payment_method": "mock" }),
        )
        .await;
        let number = created["order_number"].as_str().unwrap();

        let (status, body) = get_json(&state, &format!("/orders?number={number}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["id"], created["id"]);

        let (status, body) = get_json(&state, "/orders?number=FT-0-NONE").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_order_validation() {
        let state = test_state(AppConfig::default()).await;
        let (status, body) = post_json(
            &state,
            "/orders/create",
            json!({ "items": [], "payment_method": "mock" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = post_json(&state, "/orders/create", json!({ "payment_method": "mock" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_checkout_confirm_settles_once() {
        let state = test_state(AppConfig::default()).await;
        let (order_id, payment_id) = checkout_two_mugs(&state).await;

        let (status, body) = post_json(
            &state,
            "/payments/mock/confirm",
            json!({ "payment_id": payment_id, "orderId": order_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["disposition"], "applied");
        assert_eq!(body["paid"], true);
        assert_eq!(body["order"]["status"], "procesando");
        assert_eq!(stock(&state, "FT-MUG").await, 23);

        // Client retry
        let (status, body) = post_json(&state, "/payments/mock/confirm", json!({ "payment_id": payment_id })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["disposition"], "already_settled");

        // Provider webhook for the same payment
        let (status, body) = webhook(
            &state,
            json!({
                "id": payment_id,
                "status": "approved",
                "order_number": body["order"]["order_number"],
                "amount": "461.68"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["disposition"], "already_settled");
        assert_eq!(stock(&state, "FT-MUG").await, 23);

        let (_, body) = get_json(&state, &format!("/transactions?order_id={order_id}")).await;
        let successes = body["transactions"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|t| t["status"] == "success")
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_capture_settles() {
        let state = test_state(AppConfig::default()).await;
        let (_, payment_id) = checkout_two_mugs(&state).await;

        let (status, body) = post_json(&state, "/payments/mock/capture", json!({ "payment_id": payment_id })).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["outcome"], "approved");
        assert_eq!(stock(&state, "FT-MUG").await, 23);
    }

    #[tokio::test]
    async fn test_confirm_rejects_foreign_order() {
        let state = test_state(AppConfig::default()).await;
        let (first_order, _) = checkout_two_mugs(&state).await;
        let (_, second_payment) = checkout_two_mugs(&state).await;

        let (status, _) = post_json(
            &state,
            "/payments/mock/confirm",
            json!({ "payment_id": second_payment, "orderId": first_order }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(stock(&state, "FT-MUG").await, 25);
    }

    #[tokio::test]
    async fn test_webhook_rejected_for_unknown_order() {
        let state = test_state(AppConfig::default()).await;
        let (status, body) = webhook(
            &state,
            json!({
                "id": "mock_remote_1",
                "status": "rejected",
                "order_number": "FT-WEBHOOK-1",
                "items": [{ "product_id": "FT-MUG", "quantity": 1, "unit_price": "199.00" }]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["order"]["status"], "cancelado");
        assert_eq!(body["order"]["payment_status"], "rejected");
        assert_eq!(stock(&state, "FT-MUG").await, 25);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature() {
        let state = test_state(AppConfig::default()).await;
        let request = Request::post("/payments/mock/webhook")
            .header(MockGateway::SIGNATURE_HEADER, "deadbeef")
            .body(Body::from(r#"{"id":"mock_1","status":"approved"}"#))
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "SIGNATURE_ERROR");
    }

    #[tokio::test]
    async fn test_cancel_paid_order_restores_stock() {
        let state = test_state(AppConfig::default()).await;
        let (order_id, payment_id) = checkout_two_mugs(&state).await;
        post_json(&state, "/payments/mock/confirm", json!({ "payment_id": payment_id })).await;
        assert_eq!(stock(&state, "FT-MUG").await, 23);

        let (status, body) = post_json(
            &state,
            "/orders/cancel",
            json!({ "orderId": order_id, "reason": "customer request" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["order"]["payment_status"], "refund_pending");
        assert_eq!(stock(&state, "FT-MUG").await, 25);
    }

    #[tokio::test]
    async fn test_cancel_requires_known_order() {
        let state = test_state(AppConfig::default()).await;
        let (status, _) = post_json(&state, "/orders/cancel", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_json(
            &state,
            "/orders/cancel",
            json!({ "orderId": uuid::Uuid::new_v4() }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_update_status() {
        let state = test_state(AppConfig::default()).await;
        let (order_id, _) = checkout_two_mugs(&state).await;

        let (status, body) = post_json(
            &state,
            "/orders/update-status",
            json!({ "orderId": order_id, "statusId": 2 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["order"]["status"], "procesando");

        let (status, _) = post_json(
            &state,
            "/orders/update-status",
            json!({ "orderId": order_id, "statusId": 99 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = get_json(&state, "/orders?status=procesando").await;
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_provider_resolution() {
        let state = test_state(AppConfig::default()).await;
        let (status, body) = post_json(&state, "/payments/stripe/confirm", json!({ "payment_id": "pi_1" })).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "PROVIDER_NOT_CONFIGURED");

        let (status, _) = post_json(&state, "/payments/bitcoin/confirm", json!({ "payment_id": "x" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_inventory_update_and_check() {
        let state = test_state(AppConfig::default()).await;
        let (status, body) = post_json(
            &state,
            "/inventory/update",
            json!({ "items": [{ "product_id": "FT-MUG", "quantity": 25 }] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["items"][0]["stock_quantity"], 0);
        let level = state
            .ledger
            .stock(&state.pool, &SkuRef::product("FT-MUG"))
            .await
            .unwrap();
        assert!(!level.is_active);

        let (status, body) = post_json(
            &state,
            "/inventory/check",
            json!({ "items": [{ "product_id": "FT-TEE", "variant_id": "FT-TEE-S", "quantity": 2 }] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["available"], true);
    }

    #[tokio::test]
    async fn test_transactions_create() {
        let state = test_state(AppConfig::default()).await;
        let (order_id, _) = checkout_two_mugs(&state).await;
        let entry = json!({
            "order_id": order_id,
            "transaction_type": "payment",
            "payment_method": "mock",
            "amount": "461.68",
            "status": "success",
            "gateway_reference": "manual-1",
            "gateway_response": { "note": "bank transfer" }
        });

        let (status, body) = post_json(&state, "/transactions/create", entry.clone()).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert!(body["id"].as_i64().is_some());

        let (status, body) = post_json(&state, "/transactions/create", entry).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "DUPLICATE");
    }

    #[tokio::test]
    async fn test_bearer_token_sets_user() {
        let config = AppConfig {
            jwt_secret: Some("test-secret".into()),
            ..AppConfig::default()
        };
        let state = test_state(config).await;
        let claims = Claims {
            sub: "user-42".into(),
            exp: 4_102_444_800,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();

        let order = json!({
            "items": [{ "product_id": "FT-MUG", "quantity": 1 }],
            "payment_method": "mock"
        });
        let request = Request::post("/orders/create")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(order.to_string()))
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        let (_, body) = get_json(&state, "/orders?user_id=user-42").await;
        assert_eq!(body["count"], 1);

        let request = Request::post("/orders/create")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::from(order.to_string()))
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
