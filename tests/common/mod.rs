#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use meallink_api::{
    app,
    auth::{issue_token, Role},
    config::{AppConfig, GatewayConfig, PaymentConfig},
    db,
    entities::{
        menu_item::{self, CustomizationGroup, Customizations},
        order, payment, restaurant,
    },
    errors::ServiceError,
    events,
    gateway::{GatewayOrder, GatewayRefund, PaymentGateway},
    services::{orders::OrderService, payments::PaymentService},
    AppState,
};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const GATEWAY_KEY_SECRET: &str = "rzp_test_secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Scripted stand-in for the payment provider.
pub struct MockGateway {
    counter: AtomicU64,
    pub fail_create_order: AtomicBool,
    pub fail_refund: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            fail_create_order: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        if self.fail_create_order.load(Ordering::SeqCst) {
            return Err(ServiceError::UpstreamError("gateway unreachable".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("gw_order_{n}"),
            amount: meallink_api::gateway::to_minor_units(amount)?,
            currency: currency.to_string(),
        })
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        _amount: Decimal,
        _reason: Option<&str>,
    ) -> Result<GatewayRefund, ServiceError> {
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(ServiceError::UpstreamError("refund rejected".into()));
        }
        Ok(GatewayRefund {
            id: format!("rfnd_{gateway_payment_id}"),
            status: "processed".to_string(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
}

fn test_config(environment: &str) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: environment.into(),
        log_level: "warn".into(),
        log_json: false,
        jwt_secret: JWT_SECRET.into(),
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        cors_allowed_origins: vec![],
        auto_migrate: true,
        gateway: GatewayConfig {
            base_url: "http://localhost:0".into(),
            key_id: "rzp_test_key".into(),
            key_secret: GATEWAY_KEY_SECRET.into(),
            webhook_secret: WEBHOOK_SECRET.into(),
            timeout_secs: 2,
        },
        payments: PaymentConfig {
            currency: "INR".into(),
            tax_rate: 0.05,
            relaxed_refunds: None,
        },
    }
}

impl TestApp {
    /// Production-mode app: strict refund rules, signatures mandatory.
    pub async fn new() -> Self {
        Self::with_environment("production").await
    }

    /// Non-production app: relaxed refunds, derived test signatures.
    pub async fn development() -> Self {
        Self::with_environment("development").await
    }

    pub async fn with_environment(environment: &str) -> Self {
        let config = test_config(environment);
        let pool = db::establish_connection(&config)
            .await
            .expect("test database");
        db::run_migrations(&pool).await.expect("migrations");

        let (event_sender, event_rx) = events::event_channel(64);
        tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockGateway::new());
        let config = Arc::new(config);
        let orders = OrderService::new(pool.clone(), event_sender.clone(), config.payments.tax_rate);
        let payments = PaymentService::new(
            pool.clone(),
            gateway.clone(),
            event_sender.clone(),
            &config,
        );

        let state = AppState {
            db: pool,
            config,
            orders,
            payments,
            events: event_sender,
        };
        Self {
            router: app(state.clone()),
            state,
            gateway,
        }
    }

    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        issue_token(JWT_SECRET, user_id, role).expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Deliver a gateway webhook with a valid signature over the raw body.
    pub async fn post_webhook(&self, envelope: Value) -> Response {
        let body = envelope.to_string();
        let signature = sign(WEBHOOK_SECRET, body.as_bytes());
        self.post_webhook_raw(body, Some(&signature)).await
    }

    pub async fn post_webhook_raw(&self, body: String, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/gateway")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-signature", signature);
        }
        let request = builder.body(Body::from(body)).expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }

    pub async fn seed_restaurant(&self, owner_id: Uuid, delivery_fee: Decimal) -> restaurant::Model {
        let model = restaurant::Model {
            id: Uuid::new_v4(),
            name: "Test Kitchen".into(),
            owner_id,
            is_active: true,
            is_approved: true,
            delivery_fee,
            free_delivery_min_amount: Decimal::ZERO,
            packaging_fee: Decimal::ZERO,
            prep_time_minutes: Some(25),
            created_at: Utc::now(),
        };
        let active = model.clone().into_active_model().reset_all();
        restaurant::Entity::insert(active)
            .exec(&self.state.db)
            .await
            .expect("seed restaurant");
        model
    }

    pub async fn seed_menu_item(
        &self,
        restaurant_id: Uuid,
        name: &str,
        price: Decimal,
        customizations: Vec<CustomizationGroup>,
    ) -> menu_item::Model {
        let model = menu_item::Model {
            id: Uuid::new_v4(),
            restaurant_id,
            name: name.into(),
            price,
            discounted_price: Decimal::ZERO,
            is_available: true,
            customizations: Customizations(customizations),
            created_at: Utc::now(),
        };
        let active = model.clone().into_active_model().reset_all();
        menu_item::Entity::insert(active)
            .exec(&self.state.db)
            .await
            .expect("seed menu item");
        model
    }

    pub async fn seed_payment(&self, model: payment::Model) -> payment::Model {
        let active = model.clone().into_active_model().reset_all();
        payment::Entity::insert(active)
            .exec(&self.state.db)
            .await
            .expect("seed payment");
        model
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&self.state.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn payment(&self, id: Uuid) -> payment::Model {
        payment::Entity::find_by_id(id)
            .one(&self.state.db)
            .await
            .expect("query payment")
            .expect("payment exists")
    }

    pub async fn payment_for_order(&self, order_id: Uuid) -> payment::Model {
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&self.state.db)
            .await
            .expect("query payment")
            .expect("payment exists")
    }
}

/// Hex HMAC-SHA256, the signing side of the webhook contract.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn as_decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("parse decimal")
}
