use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::services::orders::NewOrder;
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignDeliveryRequest {
    pub delivery_person_id: Uuid,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl OrderListQuery {
    fn pagination(&self) -> (u64, u64) {
        let list = ListQuery {
            page: self.page,
            per_page: self.per_page,
        };
        (list.page(), list.per_page())
    }
}

/// Create a new order.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = NewOrder,
    responses(
        (status = 201, description = "Order created"),
        (status = 400, description = "Invalid input or unavailable item"),
        (status = 404, description = "Restaurant unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<NewOrder>,
) -> Result<(StatusCode, Json<ApiResponse<order::Model>>), ServiceError> {
    let order = state.orders.create_order(user.id, body).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// The caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses((status = 200, description = "Orders for the caller")),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<PaginatedResponse<order::Model>>, ServiceError> {
    let (page, per_page) = query.pagination();
    let (orders, total) = state
        .orders
        .list_user_orders(user.id, query.status, page, per_page)
        .await?;
    Ok(Json(PaginatedResponse::new(orders, total, page, per_page)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "The order"),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "Unknown order"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.orders.get_order_for(id, &user).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Move an order through its lifecycle.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Transition not allowed"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state
        .orders
        .update_status(id, body.status, &user, body.note)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel an order. Gated by the cancellable check for every caller.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled"),
        (status = 400, description = "Order can no longer be cancelled"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelOrderRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.orders.cancel_order(id, &user, body.reason).await?;
    Ok(Json(ApiResponse::success_with_message(
        order,
        "Order cancelled",
    )))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/assign-delivery-person",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = AssignDeliveryRequest,
    responses(
        (status = 200, description = "Courier assigned"),
        (status = 403, description = "Caller may not assign couriers"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn assign_delivery_person(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignDeliveryRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state
        .orders
        .assign_delivery_person(id, body.delivery_person_id, &user)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Orders placed at one restaurant, for its owner or an admin.
#[utoipa::path(
    get,
    path = "/api/v1/restaurants/{id}/orders",
    params(("id" = Uuid, Path, description = "Restaurant id"), OrderListQuery),
    responses((status = 200, description = "Orders for the restaurant")),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_restaurant_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<PaginatedResponse<order::Model>>, ServiceError> {
    let (page, per_page) = query.pagination();
    let (orders, total) = state
        .orders
        .list_restaurant_orders(id, &user, query.status, page, per_page)
        .await?;
    Ok(Json(PaginatedResponse::new(orders, total, page, per_page)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/cancel", put(cancel_order))
        .route(
            "/orders/:id/assign-delivery-person",
            put(assign_delivery_person),
        )
        .route("/restaurants/:id/orders", get(list_restaurant_orders))
}
