use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{menu_item, order, payment};
use crate::errors::ErrorResponse;
use crate::handlers;
use crate::services::{orders as order_svc, payments as payment_svc};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MealLink API",
        description = "Order lifecycle and payment/refund reconciliation for the MealLink food-delivery marketplace",
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::update_order_status,
        handlers::orders::cancel_order,
        handlers::orders::assign_delivery_person,
        handlers::orders::list_restaurant_orders,
        handlers::payments::initialize_payment,
        handlers::payments::verify_payment,
        handlers::payments::verify_cod,
        handlers::payments::list_payments,
        handlers::payments::get_payment,
        handlers::payments::request_refund,
        handlers::payments::process_refund,
        handlers::webhooks::gateway_webhook,
    ),
    components(schemas(
        ErrorResponse,
        order::OrderStatus,
        order::OrderPaymentStatus,
        order::OrderType,
        order::OrderItem,
        order::StatusEntry,
        order::DeliveryAddress,
        order::Coordinates,
        menu_item::CustomizationGroup,
        menu_item::CustomizationOption,
        payment::PaymentStatus,
        payment::RefundStatus,
        payment::Model,
        order_svc::NewOrder,
        order_svc::NewOrderItem,
        order_svc::CustomizationSelection,
        payment_svc::InitializePayment,
        payment_svc::PaymentMethodSpec,
        payment_svc::VerifyPayment,
        payment_svc::RefundRequest,
        payment_svc::ProcessRefund,
        payment_svc::RefundDecision,
        payment_svc::CheckoutParams,
        payment_svc::PaymentInitOutcome,
        handlers::orders::UpdateStatusRequest,
        handlers::orders::CancelOrderRequest,
        handlers::orders::AssignDeliveryRequest,
        handlers::payments::VerifyCodRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Payments and refunds"),
        (name = "webhooks", description = "Gateway reconciliation"),
    )
)]
pub struct ApiDoc;

/// Swagger UI at `/docs`, spec at `/api-docs/openapi.json`.
pub fn swagger_router() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
