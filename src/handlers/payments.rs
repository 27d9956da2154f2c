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
use crate::entities::payment::{self, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::payments::{
    InitializePayment, PaymentInitOutcome, ProcessRefund, RefundRequest, VerifyPayment,
};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyCodRequest {
    pub payment_id: Uuid,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PaymentListQuery {
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Create a Payment for an order and, for online methods, a gateway
/// checkout intent.
#[utoipa::path(
    post,
    path = "/api/v1/payments/initialize",
    request_body = InitializePayment,
    responses(
        (status = 201, description = "Payment initialized"),
        (status = 400, description = "Order already paid"),
        (status = 502, description = "Payment gateway unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn initialize_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<InitializePayment>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentInitOutcome>>), ServiceError> {
    let outcome = state.payments.initialize_payment(&user, body).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome))))
}

/// Verify an online payment with the gateway checkout signature.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPayment,
    responses(
        (status = 200, description = "Payment verified"),
        (status = 400, description = "Signature invalid or input incomplete"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<VerifyPayment>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.payments.verify_payment(&user, body).await?;
    Ok(Json(ApiResponse::success_with_message(
        payment,
        "Payment verified",
    )))
}

/// Confirm a cash-on-delivery order; the payment itself stays pending
/// until collected at the door.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify-cod",
    request_body = VerifyCodRequest,
    responses(
        (status = 200, description = "Order confirmed, cash due on delivery"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn verify_cod(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<VerifyCodRequest>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.payments.verify_cod(&user, body.payment_id).await?;
    Ok(Json(ApiResponse::success_with_message(
        payment,
        "Order confirmed, payment due on delivery",
    )))
}

/// The caller's payments.
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(PaymentListQuery),
    responses((status = 200, description = "Payments for the caller")),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PaymentListQuery>,
) -> Result<Json<PaginatedResponse<payment::Model>>, ServiceError> {
    let list = ListQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let (page, per_page) = (list.page(), list.per_page());
    let (payments, total) = state
        .payments
        .list_payments(&user, query.status, query.payment_method, page, per_page)
        .await?;
    Ok(Json(PaginatedResponse::new(payments, total, page, per_page)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "The payment"),
        (status = 404, description = "Unknown payment"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.payments.get_payment(id, &user).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Request a refund on a payment.
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment id")),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund processed or queued for review"),
        (status = 400, description = "Payment not refundable"),
        (status = 502, description = "Gateway refund failed"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn request_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.payments.request_refund(&user, id, body).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Admin decision on a pending refund request.
#[utoipa::path(
    put,
    path = "/api/v1/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment id")),
    request_body = ProcessRefund,
    responses(
        (status = 200, description = "Refund request decided"),
        (status = 400, description = "No pending refund request"),
        (status = 403, description = "Admin only"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn process_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ProcessRefund>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.payments.process_refund(&user, id, body).await?;
    Ok(Json(ApiResponse::success(payment)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments/initialize", post(initialize_payment))
        .route("/payments/verify", post(verify_payment))
        .route("/payments/verify-cod", post(verify_cod))
        .route("/payments", get(list_payments))
        .route("/payments/:id", get(get_payment))
        .route(
            "/payments/:id/refund",
            post(request_refund).put(process_refund),
        )
}
