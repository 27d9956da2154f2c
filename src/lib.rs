pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{orders::OrderService, payments::PaymentService};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<AppConfig>,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub events: EventSender,
}

/// Standard success envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            errors: None,
        }
    }
}

/// Envelope for list endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let per_page = per_page.max(1);
        Self {
            success: true,
            data,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        }
    }
}

/// Common pagination query parameters.
#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ListQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }
}

async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok = db::check_connection(&state.db).await.is_ok();
    Json(serde_json::json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "database": if db_ok { "up" } else { "down" },
    }))
}

/// The versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::orders::router())
        .merge(handlers::payments::router())
        .merge(handlers::webhooks::router())
}

/// The full application router, including health probes and docs.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .route("/status", get(status))
        .route("/health", get(health))
        .merge(openapi::swagger_router())
        .with_state(state)
}
