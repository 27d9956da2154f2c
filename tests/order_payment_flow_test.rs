//! End-to-end flows: order creation and totals, the order state machine
//! over HTTP, payment initialization, verification and refunds.

mod common;

use axum::http::{Method, StatusCode};
use common::{as_decimal, response_json, TestApp, GATEWAY_KEY_SECRET};
use meallink_api::auth::Role;
use meallink_api::entities::menu_item::{CustomizationGroup, CustomizationOption};
use meallink_api::entities::order::{OrderPaymentStatus, OrderStatus};
use meallink_api::entities::payment::{PaymentStatus, RefundStatus};
use meallink_api::gateway::payment_signature;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, IntoActiveModel};
use serde_json::{json, Value};
use uuid::Uuid;

struct Placed {
    order_id: Uuid,
    customer: Uuid,
    customer_token: String,
    owner_token: String,
    body: Value,
}

/// Seed a restaurant with two items and place a delivery order:
/// 2 x 10.00 + 1 x 5.00, flat 3.00 delivery fee.
async fn place_order(app: &TestApp) -> Placed {
    let customer = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let restaurant = app.seed_restaurant(owner, dec!(3.00)).await;
    let wrap = app
        .seed_menu_item(restaurant.id, "Paneer Wrap", dec!(10.00), vec![])
        .await;
    let fries = app
        .seed_menu_item(restaurant.id, "Masala Fries", dec!(5.00), vec![])
        .await;

    let customer_token = app.token(customer, Role::Customer);
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&customer_token),
            Some(json!({
                "restaurant_id": restaurant.id,
                "items": [
                    { "menu_item_id": wrap.id, "quantity": 2 },
                    { "menu_item_id": fries.id, "quantity": 1 },
                ],
                "order_type": "delivery",
                "payment_method": "upi",
                "contact_phone": "5551234567",
                "delivery_address": {
                    "street": "12 MG Road",
                    "city": "Bengaluru",
                    "state": "KA",
                    "zip_code": "560001"
                }
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let order_id = body["data"]["id"].as_str().unwrap().parse().unwrap();
    Placed {
        order_id,
        customer,
        customer_token,
        owner_token: app.token(owner, Role::RestaurantOwner),
        body,
    }
}

#[tokio::test]
async fn totals_are_computed_server_side() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let data = &placed.body["data"];

    assert_eq!(as_decimal(&data["subtotal"]), dec!(25.00));
    assert_eq!(as_decimal(&data["tax_amount"]), dec!(1.25));
    assert_eq!(as_decimal(&data["delivery_fee"]), dec!(3.00));
    assert_eq!(as_decimal(&data["total_amount"]), dec!(29.25));
    assert_eq!(data["status"], json!("pending"));
    assert_eq!(data["payment_status"], json!("pending"));
    assert_eq!(data["status_history"].as_array().unwrap().len(), 1);
    assert!(data["estimated_delivery_time"].is_string());
}

#[tokio::test]
async fn delivery_orders_require_an_address() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let restaurant = app.seed_restaurant(owner, dec!(3.00)).await;
    let item = app
        .seed_menu_item(restaurant.id, "Dosa", dec!(8.00), vec![])
        .await;
    let token = app.token(Uuid::new_v4(), Role::Customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({
                "restaurant_id": restaurant.id,
                "items": [{ "menu_item_id": item.id, "quantity": 1 }],
                "order_type": "delivery",
                "payment_method": "upi",
                "contact_phone": "5551234567"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn zero_quantity_line_items_are_rejected() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let restaurant = app.seed_restaurant(owner, dec!(0.00)).await;
    let item = app
        .seed_menu_item(restaurant.id, "Samosa", dec!(4.00), vec![])
        .await;
    let token = app.token(Uuid::new_v4(), Role::Customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({
                "restaurant_id": restaurant.id,
                "items": [{ "menu_item_id": item.id, "quantity": 0 }],
                "order_type": "pickup",
                "payment_method": "upi",
                "contact_phone": "5551234567"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn orders_require_at_least_one_item() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let restaurant = app.seed_restaurant(owner, dec!(0.00)).await;
    let token = app.token(Uuid::new_v4(), Role::Customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({
                "restaurant_id": restaurant.id,
                "items": [],
                "order_type": "pickup",
                "payment_method": "upi",
                "contact_phone": "5551234567"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_customizations_are_skipped_not_fatal() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let restaurant = app.seed_restaurant(owner, dec!(0.00)).await;
    let item = app
        .seed_menu_item(
            restaurant.id,
            "Pizza",
            dec!(10.00),
            vec![CustomizationGroup {
                group_name: "Toppings".into(),
                options: vec![CustomizationOption {
                    name: "Extra cheese".into(),
                    price: dec!(2.00),
                }],
            }],
        )
        .await;
    let token = app.token(Uuid::new_v4(), Role::Customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({
                "restaurant_id": restaurant.id,
                "items": [{
                    "menu_item_id": item.id,
                    "quantity": 1,
                    "customizations": [
                        { "group_name": "Toppings", "options": ["Extra cheese", "Pineapple"] },
                        { "group_name": "Sauces", "options": ["Garlic"] }
                    ]
                }],
                "order_type": "pickup",
                "payment_method": "upi",
                "contact_phone": "5551234567"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let line = &body["data"]["items"][0];
    // only the known option survives and is priced in
    assert_eq!(line["customizations"].as_array().unwrap().len(), 1);
    assert_eq!(as_decimal(&line["total_price"]), dec!(12.00));
}

#[tokio::test]
async fn customer_cannot_skip_confirmation() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", placed.order_id),
            Some(&placed.customer_token),
            Some(json!({ "status": "preparing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.order(placed.order_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn restaurant_owner_can_force_any_status() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", placed.order_id),
            Some(&placed.owner_token),
            Some(json!({ "status": "preparing", "note": "kitchen started early" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(placed.order_id).await;
    assert_eq!(order.status, OrderStatus::Preparing);
    let last = order.status_history.0.last().unwrap();
    assert_eq!(last.status, OrderStatus::Preparing);
    assert_eq!(last.note.as_deref(), Some("kitchen started early"));
}

#[tokio::test]
async fn cancellation_is_gated_after_delivery() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;

    // owner forces the order all the way to delivered
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", placed.order_id),
            Some(&placed.owner_token),
            Some(json!({ "status": "delivered" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/cancel", placed.order_id),
            Some(&placed.customer_token),
            Some(json!({ "reason": "too late" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        app.order(placed.order_id).await.status,
        OrderStatus::Delivered
    );
}

#[tokio::test]
async fn cancelling_a_pending_order_records_the_default_reason() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/cancel", placed.order_id),
            Some(&placed.customer_token),
            Some(json!({})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.order(placed.order_id).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancellation_reason.as_deref(), Some("No reason provided"));
    assert_eq!(order.cancelled_by, Some(placed.customer));
    assert!(order.cancellation_time.is_some());
}

#[tokio::test]
async fn orders_are_not_visible_to_strangers() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let stranger = app.token(Uuid::new_v4(), Role::Customer);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.order_id),
            Some(&stranger),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn assigned_courier_can_see_the_order() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let courier = Uuid::new_v4();
    let admin = app.token(Uuid::new_v4(), Role::SuperAdmin);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/assign-delivery-person", placed.order_id),
            Some(&admin),
            Some(json!({ "delivery_person_id": courier })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let courier_token = app.token(courier, Role::DeliveryPerson);
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.order_id),
            Some(&courier_token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cod_initialization_is_an_explicit_two_step_flow() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "cash_on_delivery" }
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let data = &body["data"];
    assert_eq!(data["payment"]["status"], json!("pending"));
    assert_eq!(data["next_step"], json!("/api/v1/payments/verify-cod"));
    assert!(data["checkout"].is_null());

    let payment_id: Uuid = data["payment"]["id"].as_str().unwrap().parse().unwrap();
    let order = app.order(placed.order_id).await;
    assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
    assert_eq!(order.payment_id, Some(payment_id));

    // step two: confirm
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify-cod",
            Some(&placed.customer_token),
            Some(json!({ "payment_id": payment_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = app.order(placed.order_id).await;
    assert_eq!(order.status, OrderStatus::Confirmed);
    // cash stays pending until collected
    assert_eq!(app.payment(payment_id).await.status, PaymentStatus::Pending);

    // confirming again is harmless
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify-cod",
            Some(&placed.customer_token),
            Some(json!({ "payment_id": payment_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.order(placed.order_id).await.status, OrderStatus::Confirmed);
}

async fn initialize_online(app: &TestApp, placed: &Placed) -> (Uuid, String) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "upi" }
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let payment_id = body["data"]["payment"]["id"].as_str().unwrap().parse().unwrap();
    let gateway_order_id = body["data"]["checkout"]["gateway_order_id"]
        .as_str()
        .unwrap()
        .to_string();
    (payment_id, gateway_order_id)
}

#[tokio::test]
async fn verify_with_valid_signature_completes_the_payment() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let (payment_id, gateway_order_id) = initialize_online(&app, &placed).await;

    let signature = payment_signature(GATEWAY_KEY_SECRET, &gateway_order_id, "pay_456");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&placed.customer_token),
            Some(json!({
                "payment_id": payment_id,
                "gateway_payment_id": "pay_456",
                "gateway_signature": signature
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_456"));
    assert_eq!(
        app.order(placed.order_id).await.payment_status,
        OrderPaymentStatus::Paid
    );
}

#[tokio::test]
async fn verify_with_bad_signature_fails_and_leaves_order_unpaid() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let (payment_id, _) = initialize_online(&app, &placed).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&placed.customer_token),
            Some(json!({
                "payment_id": payment_id,
                "gateway_payment_id": "pay_456",
                "gateway_signature": "deadbeef"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.error_code.as_deref(), Some("SIGNATURE_MISMATCH"));
    assert_eq!(
        app.order(placed.order_id).await.payment_status,
        OrderPaymentStatus::Pending
    );
}

#[tokio::test]
async fn missing_signature_is_fatal_in_production() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let (payment_id, _) = initialize_online(&app, &placed).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&placed.customer_token),
            Some(json!({
                "payment_id": payment_id,
                "gateway_payment_id": "pay_456"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.payment(payment_id).await.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn missing_signature_is_derived_outside_production() {
    let app = TestApp::development().await;
    let placed = place_order(&app).await;
    let (payment_id, _) = initialize_online(&app, &placed).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&placed.customer_token),
            Some(json!({
                "payment_id": payment_id,
                "gateway_payment_id": "pay_456"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.metadata.unwrap()["test_signature"].is_string());
}

#[tokio::test]
async fn gateway_outage_leaves_the_payment_pending_and_retryable() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    app.gateway
        .fail_create_order
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "upi" }
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let payment = app.payment_for_order(placed.order_id).await;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.gateway_order_id.is_none());
}

#[tokio::test]
async fn double_payment_is_rejected() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let (payment_id, gateway_order_id) = initialize_online(&app, &placed).await;

    let signature = payment_signature(GATEWAY_KEY_SECRET, &gateway_order_id, "pay_456");
    app.request(
        Method::POST,
        "/api/v1/payments/verify",
        Some(&placed.customer_token),
        Some(json!({
            "payment_id": payment_id,
            "gateway_payment_id": "pay_456",
            "gateway_signature": signature
        })),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "upi" }
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refund_on_pending_payment_is_rejected_in_production() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "cash_on_delivery" }
            })),
        )
        .await;
    let body = response_json(response).await;
    let payment_id = body["data"]["payment"]["id"].as_str().unwrap();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "changed my mind" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["details"]["refundable_statuses"], json!(["completed"]));
}

#[tokio::test]
async fn gateway_backed_refund_settles_payment_and_order() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let (payment_id, gateway_order_id) = initialize_online(&app, &placed).await;
    let signature = payment_signature(GATEWAY_KEY_SECRET, &gateway_order_id, "pay_456");
    app.request(
        Method::POST,
        "/api/v1/payments/verify",
        Some(&placed.customer_token),
        Some(json!({
            "payment_id": payment_id,
            "gateway_payment_id": "pay_456",
            "gateway_signature": signature
        })),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "order arrived cold" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refund_status, RefundStatus::Processed);
    assert_eq!(payment.refund_id.as_deref(), Some("rfnd_pay_456"));
    assert_eq!(payment.refund_reason.as_deref(), Some("order arrived cold"));

    let order = app.order(placed.order_id).await;
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.payment_status, OrderPaymentStatus::Refunded);
    assert!(order.refund_time.is_some());

    // asking again echoes the prior refund
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "again" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["details"]["refund_status"], json!("processed"));
}

#[tokio::test]
async fn failed_gateway_refund_does_not_touch_the_order() {
    let app = TestApp::new().await;
    let placed = place_order(&app).await;
    let (payment_id, gateway_order_id) = initialize_online(&app, &placed).await;
    let signature = payment_signature(GATEWAY_KEY_SECRET, &gateway_order_id, "pay_456");
    app.request(
        Method::POST,
        "/api/v1/payments/verify",
        Some(&placed.customer_token),
        Some(json!({
            "payment_id": payment_id,
            "gateway_payment_id": "pay_456",
            "gateway_signature": signature
        })),
    )
    .await;
    app.gateway
        .fail_refund
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "cold food" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.refund_status, RefundStatus::Failed);
    assert_eq!(payment.status, PaymentStatus::Completed);

    let order = app.order(placed.order_id).await;
    assert_ne!(order.status, OrderStatus::Refunded);
    assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn stale_verify_cannot_resurrect_a_refunded_payment() {
    let app = TestApp::development().await;
    let placed = place_order(&app).await;
    let (payment_id, gateway_order_id) = initialize_online(&app, &placed).await;

    // relaxed mode refunds the still-pending payment immediately
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "gave up on checkout" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.payment(payment_id).await.status, PaymentStatus::Refunded);

    // a checkout that completes afterwards must not reopen the payment
    let signature = payment_signature(GATEWAY_KEY_SECRET, &gateway_order_id, "pay_456");
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&placed.customer_token),
            Some(json!({
                "payment_id": payment_id,
                "gateway_payment_id": "pay_456",
                "gateway_signature": signature
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refund_status, RefundStatus::Processed);
    assert_eq!(app.order(placed.order_id).await.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn relaxed_mode_auto_approves_cod_refunds() {
    let app = TestApp::development().await;
    let placed = place_order(&app).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "cash_on_delivery" }
            })),
        )
        .await;
    let body = response_json(response).await;
    let payment_id: Uuid = body["data"]["payment"]["id"].as_str().unwrap().parse().unwrap();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "ordered twice" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.refund_status, RefundStatus::Processed);
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(app.order(placed.order_id).await.status, OrderStatus::Refunded);
}

/// Drives the manual-review refund path: a completed payment with no
/// gateway capture goes to `pending` review, then an admin decides.
async fn pending_refund_fixture(app: &TestApp) -> (Placed, Uuid) {
    let placed = place_order(app).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/initialize",
            Some(&placed.customer_token),
            Some(json!({
                "order_id": placed.order_id,
                "payment_method": { "type": "cash_on_delivery" }
            })),
        )
        .await;
    let body = response_json(response).await;
    let payment_id: Uuid = body["data"]["payment"]["id"].as_str().unwrap().parse().unwrap();

    // collected in cash at the door
    let mut active = app.payment(payment_id).await.into_active_model();
    active.status = Set(PaymentStatus::Completed);
    active.update(&app.state.db).await.expect("mark collected");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "reason": "wrong order delivered" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.refund_status, RefundStatus::Pending);
    assert_eq!(
        app.order(placed.order_id).await.status,
        OrderStatus::RefundRequested
    );
    (placed, payment_id)
}

#[tokio::test]
async fn admin_approves_a_pending_refund() {
    let app = TestApp::new().await;
    let (placed, payment_id) = pending_refund_fixture(&app).await;
    let admin = app.token(Uuid::new_v4(), Role::SuperAdmin);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&admin),
            Some(json!({ "status": "processed", "refund_id": "manual_rf_1" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.refund_status, RefundStatus::Processed);
    assert_eq!(payment.refund_id.as_deref(), Some("manual_rf_1"));
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(app.order(placed.order_id).await.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn admin_rejects_a_pending_refund() {
    let app = TestApp::new().await;
    let (placed, payment_id) = pending_refund_fixture(&app).await;
    let admin = app.token(Uuid::new_v4(), Role::SubAdmin);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&admin),
            Some(json!({ "status": "failed", "notes": "outside refund window" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment = app.payment(payment_id).await;
    assert_eq!(payment.refund_status, RefundStatus::Failed);
    assert_eq!(payment.notes.as_deref(), Some("outside refund window"));
    assert_eq!(
        app.order(placed.order_id).await.status,
        OrderStatus::RefundFailed
    );
}

#[tokio::test]
async fn refund_processing_is_admin_only() {
    let app = TestApp::new().await;
    let (placed, payment_id) = pending_refund_fixture(&app).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/payments/{payment_id}/refund"),
            Some(&placed.customer_token),
            Some(json!({ "status": "processed" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
